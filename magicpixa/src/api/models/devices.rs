//! API models for anonymous device tokens and quotas.

use crate::types::DeviceId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceTokenResponse {
    #[schema(value_type = String, format = "uuid")]
    pub device_id: DeviceId,
    /// Send back in the `x-device-token` header
    pub token: String,
    pub remaining_quota: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaResponse {
    #[schema(value_type = String, format = "uuid")]
    pub device_id: DeviceId,
    pub remaining_quota: i64,
}

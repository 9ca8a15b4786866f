//! API models for photo uploads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

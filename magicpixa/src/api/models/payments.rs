//! API models for payment gateway orders.

use crate::db::models::payments::PaymentOrderDBResponse;
use crate::types::PaymentOrderId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn default_currency() -> String {
    "INR".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PaymentOrderCreate {
    /// Amount in major units, e.g. `"499.00"`
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// ISO 4217 code, defaults to INR
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentOrderResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PaymentOrderId,
    pub provider: String,
    /// Order id to pass to the gateway's checkout widget
    pub provider_order_id: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub receipt: String,
    /// Public gateway key for the checkout widget, when the provider has one
    pub checkout_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentOrderResponse {
    pub fn new(db: PaymentOrderDBResponse, checkout_key: Option<String>) -> Self {
        Self {
            id: db.id,
            provider: db.provider,
            provider_order_id: db.provider_order_id,
            amount: db.amount,
            amount_minor: db.amount_minor,
            currency: db.currency,
            status: db.status,
            receipt: db.receipt,
            checkout_key,
            created_at: db.created_at,
        }
    }
}

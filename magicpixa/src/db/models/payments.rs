//! Database models for payment orders.

use crate::types::{PaymentOrderId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct PaymentOrderCreateDBRequest {
    pub user_id: UserId,
    pub provider: String,
    pub provider_order_id: String,
    /// Major currency units, e.g. rupees
    pub amount: Decimal,
    /// Smallest currency unit as sent to the gateway, e.g. paise
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrderDBResponse {
    pub id: PaymentOrderId,
    pub user_id: UserId,
    pub provider: String,
    pub provider_order_id: String,
    pub amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

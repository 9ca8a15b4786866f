//! Database models for credit transactions.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Credit transaction type enum stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
    SignupBonus,
    AdminGrant,
    AdminRemoval,
    Usage,
}

impl CreditTransactionType {
    /// Whether the transaction lowers the balance.
    pub fn is_debit(&self) -> bool {
        matches!(self, CreditTransactionType::AdminRemoval | CreditTransactionType::Usage)
    }
}

/// Administrative balance change. Idempotent by `source_id`.
#[derive(Debug, Clone)]
pub struct CreditGrantDBRequest {
    pub user_id: UserId,
    /// Either `AdminGrant` or `AdminRemoval`
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub source_id: String,
    pub description: Option<String>,
}

impl CreditGrantDBRequest {
    /// Build a grant or removal with a random source id
    pub fn admin(user_id: UserId, grantor_id: UserId, transaction_type: CreditTransactionType, amount: i64, description: Option<String>) -> Self {
        Self {
            user_id,
            transaction_type,
            amount,
            source_id: format!("{}_{}", grantor_id, Uuid::new_v4()),
            description,
        }
    }
}

/// Database response for a credit transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditTransactionDBResponse {
    pub id: Uuid,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    /// Magnitude actually applied to the balance
    pub amount: i64,
    pub balance_after: i64,
    pub source_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

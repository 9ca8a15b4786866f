//! API request/response models for the credit ledger history.

use super::pagination::Pagination;
use crate::db::models::credits::{CreditTransactionDBResponse, CreditTransactionType};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Direction of an administrative balance change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdminTransactionType {
    AdminGrant,
    AdminRemoval,
}

impl From<AdminTransactionType> for CreditTransactionType {
    fn from(t: AdminTransactionType) -> Self {
        match t {
            AdminTransactionType::AdminGrant => CreditTransactionType::AdminGrant,
            AdminTransactionType::AdminRemoval => CreditTransactionType::AdminRemoval,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreditTransactionCreate {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub transaction_type: AdminTransactionType,
    /// Whole credits, greater than zero. Removals stop at a zero balance.
    pub amount: i64,
    /// Idempotency key; repeating a source id returns the original transaction
    pub source_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditTransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    /// Credits actually applied to the balance
    pub amount: i64,
    pub balance_after: i64,
    pub source_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransactionDBResponse> for CreditTransactionResponse {
    fn from(db: CreditTransactionDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            transaction_type: db.transaction_type,
            amount: db.amount,
            balance_after: db.balance_after,
            source_id: db.source_id,
            description: db.description,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTransactionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Another user's history; requires the billing manager role
    #[param(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}

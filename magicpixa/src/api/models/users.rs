//! API request/response models for users.

use crate::db::models::users::UserDBResponse;
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

/// Platform-wide role. Stored as snake_case text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    StandardUser,
    BillingManager,
    PlatformManager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::StandardUser => "standard_user",
            Role::BillingManager => "billing_manager",
            Role::PlatformManager => "platform_manager",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard_user" => Ok(Role::StandardUser),
            "billing_manager" => Ok(Role::BillingManager),
            "platform_manager" => Ok(Role::PlatformManager),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub plan: String,
    pub roles: Vec<Role>,
    pub is_admin: bool,
    /// Credit balance
    pub credits: i64,
    /// Credits held by jobs that are still running
    pub reserved_credits: i64,
    /// Credits that can be spent right now
    pub available_credits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            available_credits: db.available_credits(),
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            plan: db.plan,
            roles: db.roles,
            is_admin: db.is_admin,
            credits: db.credits,
            reserved_credits: db.reserved_credits,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// The authenticated caller, resolved from the identity proxy header.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub roles: Vec<Role>,
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            is_admin: db.is_admin,
            roles: db.roles,
        }
    }
}

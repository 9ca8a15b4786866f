//! Database models for users.

use crate::api::models::users::Role;
use crate::types::UserId;
use chrono::{DateTime, Utc};

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub email: String,
    pub display_name: Option<String>,
    pub plan: String,
    pub roles: Vec<Role>,
    pub is_admin: bool,
    /// Opening balance, recorded as a `signup_bonus` transaction when positive
    pub signup_bonus: i64,
}

/// Database response for a user
#[derive(Debug, Clone)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub credits: i64,
    pub reserved_credits: i64,
    pub plan: String,
    pub roles: Vec<Role>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDBResponse {
    /// Balance not tied up in open holds.
    pub fn available_credits(&self) -> i64 {
        (self.credits - self.reserved_credits).max(0)
    }
}

//! Database models for credit reservations.
//!
//! A reservation holds credits for one job. It moves `held -> delivered -> committed` when the
//! job succeeds, or `held -> released` when it fails before the output reaches the caller.
//! A hold the reconciler expired while its job was still running goes `released -> delivered`
//! when the output arrives, so the charge is still taken.

use crate::types::{ArtifactId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Release reason the reconciler records for holds that outlived the reservation TTL.
pub const EXPIRED_RELEASE_REASON: &str = "expired";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Held,
    Delivered,
    Committed,
    Released,
}

#[derive(Debug, Clone)]
pub struct ReserveDBRequest {
    pub user_id: UserId,
    pub feature: String,
    pub amount: i64,
    pub idempotency_key: Option<String>,
    pub request_fingerprint: Option<String>,
}

/// What the job handed back to the caller, recorded before the charge is committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub output_url: Option<String>,
    pub output_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDBResponse {
    pub id: ReservationId,
    pub user_id: UserId,
    pub feature: String,
    pub amount: i64,
    pub status: ReservationStatus,
    pub idempotency_key: Option<String>,
    pub request_fingerprint: Option<String>,
    pub output_url: Option<String>,
    pub output_text: Option<String>,
    pub artifact_id: Option<ArtifactId>,
    pub release_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of asking the ledger for a hold.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    /// Credits are held for this job
    Reserved(ReservationDBResponse),
    /// Available balance is below the requested amount; nothing was written
    Insufficient { available: i64 },
    /// The idempotency key already produced an output; no new hold was taken
    Replay(ReservationDBResponse),
    /// The idempotency key belongs to a job that has not finished yet
    InFlight,
    /// The idempotency key was used before with a different request body
    KeyReused,
}

//! Database models for generated artifacts.

use crate::types::{ArtifactId, ReservationId, UserId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDBResponse {
    pub id: ArtifactId,
    pub user_id: UserId,
    pub reservation_id: ReservationId,
    pub feature: String,
    pub output_url: Option<String>,
    pub output_text: Option<String>,
    pub credits_used: i64,
    pub created_at: DateTime<Utc>,
}

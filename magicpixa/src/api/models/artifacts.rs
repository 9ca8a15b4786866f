//! API response models for generated artifacts.

use super::pagination::Pagination;
use crate::db::models::artifacts::ArtifactDBResponse;
use crate::prompts::Feature;
use crate::types::ArtifactId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArtifactResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ArtifactId,
    pub feature: String,
    /// Human readable feature name, e.g. "Photo Enhancement"
    pub processing_type: String,
    pub output_url: Option<String>,
    pub output_text: Option<String>,
    pub credits_used: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ArtifactDBResponse> for ArtifactResponse {
    fn from(db: ArtifactDBResponse) -> Self {
        let processing_type = db
            .feature
            .parse::<Feature>()
            .map(|f| f.label().to_string())
            .unwrap_or_else(|_| db.feature.clone());
        Self {
            id: db.id,
            feature: db.feature,
            processing_type,
            output_url: db.output_url,
            output_text: db.output_text,
            credits_used: db.credits_used,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListArtifactsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

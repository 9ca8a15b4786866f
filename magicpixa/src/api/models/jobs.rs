//! API models for running generation jobs and describing the feature catalogue.

use crate::prompts::{Feature, FeatureRequest, OutputKind};
use crate::types::ArtifactId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Run one feature against one input photo.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct JobCreate {
    /// Input photo as a `data:image/...;base64,` URI
    pub image: String,
    /// Feature selection and its parameters
    pub params: FeatureRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    pub feature: Feature,
    /// Public URL of the generated image, for image features
    pub output_url: Option<String>,
    /// Generated text, for text features
    pub output_text: Option<String>,
    /// Credits debited for this job. 0 for anonymous callers and replays; absent when the
    /// charge has not been committed yet
    pub credits_charged: Option<i64>,
    /// Available credits after the job, for signed-in callers
    pub available_credits: Option<i64>,
    /// Free generations left, for anonymous callers
    pub remaining_quota: Option<i64>,
    /// Set once the charge has been committed
    #[schema(value_type = Option<String>, format = "uuid")]
    pub artifact_id: Option<ArtifactId>,
    /// True when an idempotency key returned an earlier result
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeatureInfo {
    pub feature: Feature,
    pub label: String,
    pub output: OutputKind,
    pub cost: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeatureCatalogue {
    pub features: Vec<FeatureInfo>,
}

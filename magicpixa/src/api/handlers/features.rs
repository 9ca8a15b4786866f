//! HTTP handler for the public feature catalogue.

use crate::{
    AppState,
    api::models::jobs::{FeatureCatalogue, FeatureInfo},
    prompts::Feature,
};
use axum::{extract::State, response::Json};

/// List every feature with its current cost and availability
#[utoipa::path(
    get,
    path = "/features",
    tag = "jobs",
    summary = "List features",
    description = "The feature catalogue with credit costs, output kinds and whether each feature is currently enabled.",
    responses(
        (status = 200, description = "Feature catalogue", body = FeatureCatalogue),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_features(State(state): State<AppState>) -> Json<FeatureCatalogue> {
    let features = Feature::ALL
        .into_iter()
        .map(|feature| {
            let settings = state.config.features.settings(feature);
            FeatureInfo {
                feature,
                label: feature.label().to_string(),
                output: feature.output(),
                cost: settings.cost,
                enabled: settings.enabled,
            }
        })
        .collect();

    Json(FeatureCatalogue { features })
}

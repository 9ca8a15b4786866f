//! HTTP handlers for anonymous device tokens and their free quota.

use crate::{
    AppState,
    api::models::devices::{DeviceTokenResponse, QuotaResponse},
    auth::current_user::Device,
    errors::Result,
};
use axum::{extract::State, http::StatusCode, response::Json};

/// Issue a signed device token for anonymous use
#[utoipa::path(
    post,
    path = "/devices",
    tag = "devices",
    summary = "Register an anonymous device",
    description = "Issue a device token. Send it in the `x-device-token` header to run jobs against the device's free quota without an account.",
    responses(
        (status = 201, description = "Device registered", body = DeviceTokenResponse),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register_device(State(state): State<AppState>) -> Result<(StatusCode, Json<DeviceTokenResponse>)> {
    let (device_id, token) = state.device_tokens.issue();
    let remaining_quota = state
        .store
        .anonymous_quota(device_id, state.config.credits.anonymous_quota)
        .await?;

    tracing::debug!(device_id = %device_id, "Issued device token");
    Ok((
        StatusCode::CREATED,
        Json(DeviceTokenResponse {
            device_id,
            token,
            remaining_quota,
        }),
    ))
}

/// Remaining free generations for the calling device
#[utoipa::path(
    get,
    path = "/quota",
    tag = "devices",
    summary = "Get anonymous quota",
    responses(
        (status = 200, description = "Remaining quota", body = QuotaResponse),
        (status = 401, description = "Missing or invalid device token"),
    ),
    security(("DeviceToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_quota(State(state): State<AppState>, Device(device_id): Device) -> Result<Json<QuotaResponse>> {
    let remaining_quota = state
        .store
        .anonymous_quota(device_id, state.config.credits.anonymous_quota)
        .await?;
    Ok(Json(QuotaResponse {
        device_id,
        remaining_quota,
    }))
}

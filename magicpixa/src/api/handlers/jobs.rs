//! HTTP handler for running generation jobs.

use crate::{
    AppState,
    api::models::jobs::{JobCreate, JobResponse},
    auth::{current_user::Caller, permissions},
    errors::{Error, Result},
    types::{Operation, Permission, Resource},
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|k| !k.is_empty() && k.len() <= 255)
        .ok_or_else(|| Error::BadRequest {
            message: "Idempotency-Key must be 1 to 255 visible ASCII characters".to_string(),
        })?;
    Ok(Some(key.to_string()))
}

/// Run one feature against one photo
#[utoipa::path(
    post,
    path = "/jobs",
    tag = "jobs",
    summary = "Run a job",
    description = "Run a feature against an input photo. Signed-in users are charged the feature cost once the output \
        is delivered; anonymous devices spend one unit of free quota. Send an `Idempotency-Key` header to make retries safe.",
    request_body = JobCreate,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Replays the stored result of an earlier job with the same key"),
    ),
    responses(
        (status = 200, description = "Job output", body = JobResponse),
        (status = 400, description = "Invalid parameters or image"),
        (status = 401, description = "Neither a user identity nor a device token was provided"),
        (status = 402, description = "Insufficient credits"),
        (status = 409, description = "Idempotency key in flight or reused with a different body"),
        (status = 429, description = "Anonymous quota exhausted"),
        (status = 502, description = "The image model failed"),
    ),
    security(("X-Magicpixa-User" = []), ("DeviceToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_job(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Json(job): Json<JobCreate>,
) -> Result<(StatusCode, Json<JobResponse>)> {
    if let Caller::User(user) = &caller {
        if !permissions::has_permission(user, Resource::Artifacts, Operation::CreateOwn) {
            return Err(Error::InsufficientPermissions {
                required: Permission::Allow(Resource::Artifacts, Operation::CreateOwn),
                action: Operation::CreateOwn,
                resource: "jobs".to_string(),
            });
        }
    }

    let key = idempotency_key(&headers)?;
    let response = state.orchestrator.run(&caller, job, key).await?;
    Ok((StatusCode::OK, Json(response)))
}

//! HTTP handlers for the generated-artifact catalogue.

use crate::{
    AppState,
    api::models::{
        artifacts::{ArtifactResponse, ListArtifactsQuery},
        pagination::PaginatedResponse,
    },
    auth::permissions::{self, RequiresPermission, operation, resource},
    errors::{Error, Result},
    types::{ArtifactId, Operation, Resource},
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};

/// List the caller's artifacts, newest first
#[utoipa::path(
    get,
    path = "/artifacts",
    tag = "artifacts",
    summary = "List artifacts",
    params(ListArtifactsQuery),
    responses(
        (status = 200, description = "Paginated artifacts", body = PaginatedResponse<ArtifactResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Magicpixa-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_artifacts(
    State(state): State<AppState>,
    Query(query): Query<ListArtifactsQuery>,
    current_user: RequiresPermission<resource::Artifacts, operation::ReadOwn>,
) -> Result<Json<PaginatedResponse<ArtifactResponse>>> {
    let (skip, limit) = query.pagination.params();
    let (artifacts, total_count) = state.store.list_artifacts(current_user.user.id, skip, limit).await?;

    Ok(Json(PaginatedResponse::new(
        artifacts.into_iter().map(ArtifactResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Get one artifact
#[utoipa::path(
    get,
    path = "/artifacts/{artifact_id}",
    tag = "artifacts",
    summary = "Get an artifact",
    description = "Artifacts belonging to other users are reported as not found.",
    params(("artifact_id" = String, Path, description = "Artifact ID")),
    responses(
        (status = 200, description = "Artifact", body = ArtifactResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Artifact not found"),
    ),
    security(("X-Magicpixa-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(artifact_id): Path<ArtifactId>,
    current_user: RequiresPermission<resource::Artifacts, operation::ReadOwn>,
) -> Result<Json<ArtifactResponse>> {
    let user = &current_user.user;
    let can_read_all = permissions::has_permission(user, Resource::Artifacts, Operation::ReadAll);

    match state.store.get_artifact(artifact_id).await? {
        Some(artifact) if can_read_all || artifact.user_id == user.id => Ok(Json(artifact.into())),
        // Someone else's artifact looks the same as a missing one
        _ => Err(Error::NotFound {
            resource: "Artifact".to_string(),
            id: artifact_id.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::models::artifacts::ArtifactResponse;
    use crate::api::models::jobs::JobResponse;
    use crate::api::models::pagination::PaginatedResponse;
    use crate::test_utils::{create_test_app, create_test_config, png_data_uri};
    use axum::http::StatusCode;
    use serde_json::json;

    const USER: &str = "x-magicpixa-user";

    #[tokio::test]
    async fn artifacts_are_private_to_their_owner() {
        let server = create_test_app(create_test_config()).await;

        for _ in 0..2 {
            server
                .post("/api/v1/jobs")
                .add_header(USER, "owner@example.com")
                .json(&json!({ "image": png_data_uri(), "params": { "feature": "colorize" } }))
                .await
                .assert_status_ok();
        }
        let job: JobResponse = server
            .post("/api/v1/jobs")
            .add_header(USER, "owner@example.com")
            .json(&json!({ "image": png_data_uri(), "params": { "feature": "caption", "tone": "witty" } }))
            .await
            .json();
        let artifact_id = job.artifact_id.unwrap();

        let page: PaginatedResponse<ArtifactResponse> = server
            .get("/api/v1/artifacts?limit=2")
            .add_header(USER, "owner@example.com")
            .await
            .json();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].id, artifact_id);
        assert_eq!(page.data[0].processing_type, "Caption");
        assert!(page.data[0].output_text.is_some());
        assert_eq!(page.data[1].processing_type, "Colorization");

        let own: ArtifactResponse = server
            .get(&format!("/api/v1/artifacts/{artifact_id}"))
            .add_header(USER, "owner@example.com")
            .await
            .json();
        assert_eq!(own.credits_used, 1);

        server
            .get(&format!("/api/v1/artifacts/{artifact_id}"))
            .add_header(USER, "someone-else@example.com")
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let theirs: PaginatedResponse<ArtifactResponse> = server
            .get("/api/v1/artifacts")
            .add_header(USER, "someone-else@example.com")
            .await
            .json();
        assert_eq!(theirs.total_count, 0);
    }
}

//! HTTP handlers for the signed-in account.

use crate::{
    AppState,
    api::models::users::UserResponse,
    auth::permissions::{RequiresPermission, operation, resource},
    errors::{Error, Result},
};
use axum::{extract::State, response::Json};

/// Get the current user's account and balance
#[utoipa::path(
    get,
    path = "/users/current",
    tag = "users",
    summary = "Get current user",
    description = "Account details with the credit balance, credits held by running jobs and the available balance.",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Magicpixa-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_current_user(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Users, operation::ReadOwn>,
) -> Result<Json<UserResponse>> {
    let user = state
        .store
        .get_user(current_user.user.id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: current_user.user.id.to_string(),
        })?;
    Ok(Json(UserResponse::from(user)))
}

#[cfg(test)]
mod tests {
    use crate::api::models::users::{Role, UserResponse};
    use crate::test_utils::{create_test_app, create_test_config};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn first_request_creates_account_with_bonus() {
        let mut config = create_test_config();
        config.credits.signup_bonus = 25;
        let server = create_test_app(config).await;

        let response = server
            .get("/api/v1/users/current")
            .add_header("x-magicpixa-user", "Neha@Example.com")
            .add_header("x-magicpixa-name", "Neha")
            .await;
        response.assert_status_ok();
        let user: UserResponse = response.json();

        assert_eq!(user.email, "Neha@Example.com");
        assert_eq!(user.display_name.as_deref(), Some("Neha"));
        assert_eq!((user.credits, user.reserved_credits, user.available_credits), (25, 0, 25));
        assert_eq!(user.plan, "free");
        assert_eq!(user.roles, vec![Role::StandardUser]);
        assert!(!user.is_admin);
    }

    #[tokio::test]
    async fn requires_identity_header() {
        let server = create_test_app(create_test_config()).await;
        server.get("/api/v1/users/current").await.assert_status(StatusCode::UNAUTHORIZED);
    }
}

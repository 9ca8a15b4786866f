use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    auth::device::DEVICE_TOKEN_HEADER,
    db::models::users::UserCreateDBRequest,
    errors::{Error, Result},
    types::DeviceId,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument, trace};

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Extract user from proxy header if present and valid
/// Returns:
/// - None: No proxy header present
/// - Some(Ok(user)): Valid proxy header found and user authenticated
/// - Some(Err(error)): Proxy header present but user lookup/creation failed
#[instrument(skip_all)]
async fn try_proxy_header_auth(parts: &Parts, state: &AppState) -> Option<Result<CurrentUser>> {
    let proxy = &state.config.auth.proxy_header;
    let email = header_str(parts, &proxy.header_name)?;

    if !email.contains('@') {
        return Some(Err(Error::Unauthenticated {
            message: Some("Identity header does not carry an email address".to_string()),
        }));
    }

    match state.store.get_user_by_email(email).await {
        Ok(Some(user)) => return Some(Ok(user.into())),
        Ok(None) => {}
        Err(e) => return Some(Err(e.into())),
    }

    if !proxy.auto_create_users {
        return Some(Err(Error::Unauthenticated {
            message: Some("No account exists for this identity".to_string()),
        }));
    }

    let request = UserCreateDBRequest {
        email: email.to_string(),
        display_name: header_str(parts, &proxy.display_name_header_name).map(str::to_string),
        plan: state.config.credits.default_plan.clone(),
        roles: vec![Role::StandardUser],
        is_admin: false,
        signup_bonus: state.config.credits.signup_bonus,
    };
    Some(state.store.get_or_create_user(&request).await.map(CurrentUser::from).map_err(Error::from))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match try_proxy_header_auth(parts, state).await {
            Some(Ok(user)) => {
                debug!("Found proxy header authenticated user: {}", user.id);
                Ok(user)
            }
            Some(Err(e)) => {
                trace!("Proxy header authentication failed: {:?}", e);
                Err(e)
            }
            None => Err(Error::Unauthenticated { message: None }),
        }
    }
}

/// An anonymous device identified by a valid `x-device-token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device(pub DeviceId);

fn try_device_auth(parts: &Parts, state: &AppState) -> Option<Result<Device>> {
    let token = header_str(parts, DEVICE_TOKEN_HEADER)?;
    Some(state.device_tokens.verify(token).map(Device).ok_or_else(|| Error::Unauthenticated {
        message: Some("Invalid device token".to_string()),
    }))
}

impl FromRequestParts<AppState> for Device {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        try_device_auth(parts, state).unwrap_or(Err(Error::Unauthenticated {
            message: Some("A device token is required".to_string()),
        }))
    }
}

/// Whoever is running a job: a signed-in user, or an anonymous device spending free quota.
///
/// The identity header wins when both are present.
#[derive(Debug, Clone)]
pub enum Caller {
    User(CurrentUser),
    Anonymous(Device),
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if let Some(user) = try_proxy_header_auth(parts, state).await {
            return user.map(Caller::User);
        }
        match try_device_auth(parts, state) {
            Some(device) => device.map(Caller::Anonymous),
            None => Err(Error::Unauthenticated {
                message: Some("Sign in or request a device token to continue".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, create_test_state};
    use axum::extract::FromRequestParts as _;

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().uri("http://localhost/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _body) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[tokio::test]
    async fn creates_user_with_signup_bonus_on_first_request() {
        let state = create_test_state(create_test_config()).await;
        let mut parts = parts_with(&[("x-magicpixa-user", "new@example.com"), ("x-magicpixa-name", "New User")]);

        let user = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.display_name.as_deref(), Some("New User"));
        assert_eq!(user.roles, vec![Role::StandardUser]);

        let stored = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.credits, state.config.credits.signup_bonus);

        let mut again = parts_with(&[("x-magicpixa-user", "NEW@example.com")]);
        let same = CurrentUser::from_request_parts(&mut again, &state).await.unwrap();
        assert_eq!(same.id, user.id);
    }

    #[tokio::test]
    async fn missing_header_is_unauthenticated() {
        let state = create_test_state(create_test_config()).await;
        let err = CurrentUser::from_request_parts(&mut parts_with(&[]), &state).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { message: None }));
    }

    #[tokio::test]
    async fn unknown_user_rejected_when_auto_create_is_off() {
        let mut config = create_test_config();
        config.auth.proxy_header.auto_create_users = false;
        let state = create_test_state(config).await;

        let mut parts = parts_with(&[("x-magicpixa-user", "stranger@example.com")]);
        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
        assert!(state.store.get_user_by_email("stranger@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn caller_falls_back_to_device_token() {
        let state = create_test_state(create_test_config()).await;
        let (device_id, token) = state.device_tokens.issue();

        let mut parts = parts_with(&[(DEVICE_TOKEN_HEADER, token.as_str())]);
        match Caller::from_request_parts(&mut parts, &state).await.unwrap() {
            Caller::Anonymous(Device(id)) => assert_eq!(id, device_id),
            other => panic!("expected anonymous caller, got {other:?}"),
        }

        let mut forged = parts_with(&[(DEVICE_TOKEN_HEADER, "00000000-0000-0000-0000-000000000000.AAAA")]);
        assert!(Caller::from_request_parts(&mut forged, &state).await.is_err());

        let mut both = parts_with(&[("x-magicpixa-user", "asha@example.com"), (DEVICE_TOKEN_HEADER, token.as_str())]);
        assert!(matches!(
            Caller::from_request_parts(&mut both, &state).await.unwrap(),
            Caller::User(_)
        ));
    }
}

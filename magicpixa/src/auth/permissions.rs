//! Role-based permissions.
//!
//! Platform managers and admins may do anything. Billing managers see and adjust everyone's
//! credits. Standard users act on their own data only.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    errors::Error,
    types::{Operation, Permission, Resource},
};

fn role_allows(role: Role, resource: Resource, operation: Operation) -> bool {
    match role {
        Role::PlatformManager => true,
        Role::BillingManager => matches!(
            (resource, operation),
            (Resource::Credits, _) | (Resource::Users, Operation::ReadAll | Operation::ReadOwn) | (Resource::Payments, _)
        ) || role_allows(Role::StandardUser, resource, operation),
        Role::StandardUser => matches!(
            (resource, operation),
            (Resource::Users, Operation::ReadOwn)
                | (Resource::Credits, Operation::ReadOwn)
                | (Resource::Artifacts, Operation::ReadOwn | Operation::CreateOwn)
                | (Resource::Payments, Operation::CreateOwn)
        ),
    }
}

pub fn has_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    user.is_admin || user.roles.iter().any(|role| role_allows(*role, resource, operation))
}

pub mod resource {
    use crate::types::Resource;

    pub trait ResourceMarker: Send + Sync + 'static {
        const RESOURCE: Resource;
    }

    pub struct Users;
    pub struct Credits;
    pub struct Artifacts;
    pub struct Payments;

    impl ResourceMarker for Users {
        const RESOURCE: Resource = Resource::Users;
    }
    impl ResourceMarker for Credits {
        const RESOURCE: Resource = Resource::Credits;
    }
    impl ResourceMarker for Artifacts {
        const RESOURCE: Resource = Resource::Artifacts;
    }
    impl ResourceMarker for Payments {
        const RESOURCE: Resource = Resource::Payments;
    }
}

pub mod operation {
    use crate::types::Operation;

    pub trait OperationMarker: Send + Sync + 'static {
        const OPERATION: Operation;
    }

    pub struct CreateAll;
    pub struct CreateOwn;
    pub struct ReadAll;
    pub struct ReadOwn;

    impl OperationMarker for CreateAll {
        const OPERATION: Operation = Operation::CreateAll;
    }
    impl OperationMarker for CreateOwn {
        const OPERATION: Operation = Operation::CreateOwn;
    }
    impl OperationMarker for ReadAll {
        const OPERATION: Operation = Operation::ReadAll;
    }
    impl OperationMarker for ReadOwn {
        const OPERATION: Operation = Operation::ReadOwn;
    }
}

/// Extractor that authenticates the caller and rejects with 403 unless they hold the permission.
pub struct RequiresPermission<R, O> {
    pub user: CurrentUser,
    _marker: PhantomData<(R, O)>,
}

impl<R, O> FromRequestParts<AppState> for RequiresPermission<R, O>
where
    R: resource::ResourceMarker,
    O: operation::OperationMarker,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !has_permission(&user, R::RESOURCE, O::OPERATION) {
            return Err(Error::InsufficientPermissions {
                required: Permission::Allow(R::RESOURCE, O::OPERATION),
                action: O::OPERATION,
                resource: format!("{:?}", R::RESOURCE).to_lowercase(),
            });
        }
        Ok(Self {
            user,
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(roles: Vec<Role>, is_admin: bool) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            display_name: None,
            is_admin,
            roles,
        }
    }

    #[test]
    fn standard_users_only_touch_their_own_data() {
        let u = user(vec![Role::StandardUser], false);
        assert!(has_permission(&u, Resource::Artifacts, Operation::ReadOwn));
        assert!(has_permission(&u, Resource::Payments, Operation::CreateOwn));
        assert!(!has_permission(&u, Resource::Credits, Operation::ReadAll));
        assert!(!has_permission(&u, Resource::Credits, Operation::CreateAll));
    }

    #[test]
    fn billing_managers_adjust_credits() {
        let u = user(vec![Role::StandardUser, Role::BillingManager], false);
        assert!(has_permission(&u, Resource::Credits, Operation::CreateAll));
        assert!(has_permission(&u, Resource::Credits, Operation::ReadAll));
        assert!(!has_permission(&u, Resource::Artifacts, Operation::ReadAll));
    }

    #[test]
    fn admins_and_platform_managers_may_do_anything() {
        assert!(has_permission(&user(vec![], true), Resource::Artifacts, Operation::ReadAll));
        assert!(has_permission(
            &user(vec![Role::PlatformManager], false),
            Resource::Credits,
            Operation::CreateAll
        ));
    }
}

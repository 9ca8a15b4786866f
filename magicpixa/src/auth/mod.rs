//! Caller identification and access control.
//!
//! Identity is delegated to a managed auth service in front of the server, which forwards the
//! authenticated email in a trusted header (see [`crate::config::ProxyHeaderAuthConfig`]).
//! Anonymous callers identify with an HMAC-signed device token instead.
//!
//! - [`current_user`]: extractors for [`crate::api::models::users::CurrentUser`] and [`current_user::Caller`]
//! - [`device`]: issuing and verifying device tokens
//! - [`permissions`]: role-based permission checks and the `RequiresPermission` extractor
//!
//! ```ignore
//! async fn handler(current_user: CurrentUser) -> Result<String> {
//!     Ok(format!("Hello, {}!", current_user.email))
//! }
//!
//! async fn admin_handler(_: RequiresPermission<resource::Credits, operation::CreateAll>) { /* ... */ }
//! ```

pub mod current_user;
pub mod device;
pub mod permissions;

//! API request and response data models.
//!
//! These are the public wire contract. They are kept apart from the database models so storage
//! and API representations can change independently, and every type derives `utoipa::ToSchema`
//! for the generated OpenAPI document.
//!
//! - [`users`]: roles, the current user and account responses
//! - [`jobs`]: job submission, results and the feature catalogue
//! - [`devices`]: anonymous device tokens and quotas
//! - [`transactions`]: ledger history and administrative grants
//! - [`artifacts`]: generated outputs
//! - [`uploads`]: photo uploads
//! - [`payments`]: payment gateway orders
//! - [`pagination`]: shared `skip`/`limit` parameters and list wrapper

pub mod artifacts;
pub mod devices;
pub mod jobs;
pub mod pagination;
pub mod payments;
pub mod transactions;
pub mod uploads;
pub mod users;

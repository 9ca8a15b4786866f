//! HTTP request handlers for all API endpoints.
//!
//! This module contains Axum route handlers organized by resource type.
//! Each handler is responsible for:
//! - Request validation and deserialization
//! - Authentication and authorization checks
//! - Calling the store, the orchestrator or a provider
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`features`]: Public feature catalogue
//! - [`devices`]: Anonymous device tokens and quota
//! - [`jobs`]: Running generation jobs
//! - [`uploads`]: Photo uploads
//! - [`users`]: The signed-in account
//! - [`transactions`]: Ledger history and administrative grants
//! - [`artifacts`]: Generated artifact catalogue
//! - [`payments`]: Payment gateway orders
//!
//! # Authentication
//!
//! Signed-in users are identified by the trusted header set by the auth proxy, anonymous devices
//! by a signed `x-device-token`. See [`crate::auth::current_user`] for the extractors.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which automatically converts to
//! appropriate HTTP status codes and JSON error responses.

pub mod artifacts;
pub mod devices;
pub mod features;
pub mod jobs;
pub mod payments;
pub mod transactions;
pub mod uploads;
pub mod users;

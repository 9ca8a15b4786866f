//! API layer for HTTP request handling and data models.
//!
//! This module contains the REST API implementation, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Everything is served under `/api/v1`:
//!
//! - **Catalogue** (`/features`): Features, costs and availability
//! - **Jobs** (`/jobs`): Run a feature against a photo
//! - **Devices** (`/devices`, `/quota`): Anonymous device tokens and free quota
//! - **Uploads** (`/uploads`): Photo uploads
//! - **Account** (`/users/current`, `/transactions`, `/artifacts`): Balance, ledger history and outputs
//! - **Payments** (`/payments/orders`): Payment gateway orders
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`.
//! API documentation is available at `/docs` when the server is running.

pub mod handlers;
pub mod models;

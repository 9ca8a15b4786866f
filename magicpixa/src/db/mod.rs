//! Postgres persistence.
//!
//! Repositories in [`handlers`] wrap a borrowed connection and own all SQL for their tables:
//!
//! ```ignore
//! let mut conn = pool.acquire().await?;
//! let user = Users::new(&mut conn).get_or_create(&request).await?;
//! let outcome = Reservations::new(&mut conn).reserve(&hold).await?;
//! ```
//!
//! Anything that changes a balance opens a transaction internally, so callers never need to.
//! Migrations live in `migrations/` and are embedded via [`crate::migrator`].
//!
//! - [`handlers`]: repositories
//! - [`models`]: request and response records
//! - [`errors`]: [`errors::DbError`] and constraint mapping

pub mod errors;
pub mod handlers;
pub mod models;

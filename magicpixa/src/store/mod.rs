//! Storage backends behind one trait.
//!
//! [`postgres::PostgresStore`] is the production backend and wraps the repositories in
//! [`crate::db::handlers`]. [`in_memory::InMemoryStore`] keeps everything behind a lock and is
//! used for local development and the HTTP tests. Both give the same ledger guarantees: a hold
//! is checked and taken atomically, commits happen once, balances never go negative.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    api::models::users::Role,
    config::{DatabaseConfig, PoolSettings},
    db::{
        errors::Result,
        models::{
            artifacts::ArtifactDBResponse,
            credits::{CreditGrantDBRequest, CreditTransactionDBResponse},
            payments::{PaymentOrderCreateDBRequest, PaymentOrderDBResponse},
            quotas::QuotaOutcome,
            reservations::{Delivery, ReservationDBResponse, ReservationStatus, ReserveDBRequest, ReserveOutcome},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::{ArtifactId, DeviceId, ReservationId, UserId},
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Persistence operations used by the API, the job orchestrator and the reconciler.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    /// Return the account for the email, creating it (with its signup bonus) on first sight.
    async fn get_or_create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn set_roles(&self, id: UserId, roles: &[Role], is_admin: bool) -> Result<UserDBResponse>;

    /// Atomically check the available balance and hold credits for a job.
    async fn reserve_credits(&self, request: &ReserveDBRequest) -> Result<ReserveOutcome>;

    /// Record the output handed to the caller; `held -> delivered`. A hold the reconciler expired
    /// while the job was still running is taken again so the commit still charges it.
    async fn mark_delivered(&self, id: ReservationId, delivery: &Delivery) -> Result<ReservationDBResponse>;

    /// Charge a reservation and write its artifact. Idempotent.
    async fn commit_reservation(&self, id: ReservationId) -> Result<ArtifactDBResponse>;

    /// Free a `held` reservation. Returns false if it was in any other state.
    async fn release_reservation(&self, id: ReservationId, reason: &str) -> Result<bool>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationDBResponse>>;

    /// Reservations in `status` not touched since `older_than`, oldest first.
    async fn stale_reservations(
        &self,
        status: ReservationStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReservationDBResponse>>;

    async fn grant_credits(&self, request: &CreditGrantDBRequest) -> Result<CreditTransactionDBResponse>;

    async fn list_transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<CreditTransactionDBResponse>, i64)>;

    async fn list_artifacts(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<ArtifactDBResponse>, i64)>;

    async fn get_artifact(&self, id: ArtifactId) -> Result<Option<ArtifactDBResponse>>;

    /// Remaining free generations; `allowance` for devices never seen before.
    async fn anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<i64>;

    async fn consume_anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<QuotaOutcome>;

    async fn refund_anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<i64>;

    async fn record_payment_order(&self, request: &PaymentOrderCreateDBRequest) -> Result<PaymentOrderDBResponse>;
}

/// Build the configured store. For PostgreSQL this connects and runs migrations, and the pool
/// is returned alongside so startup code can share it.
pub async fn create_store(config: &DatabaseConfig) -> anyhow::Result<(Arc<dyn Store>, Option<PgPool>)> {
    match config {
        DatabaseConfig::External { url, pool } => {
            info!("Using external PostgreSQL database");
            let pool = pool_options(pool).connect(url).await?;
            crate::migrator().run(&pool).await?;
            Ok((Arc::new(PostgresStore::new(pool.clone())), Some(pool)))
        }
        DatabaseConfig::Memory => {
            info!("Using in-memory store; all data will be lost on shutdown");
            Ok((Arc::new(InMemoryStore::new()), None))
        }
    }
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let seconds = |s: u64| (s > 0).then(|| Duration::from_secs(s));
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(seconds(settings.idle_timeout_secs))
        .max_lifetime(seconds(settings.max_lifetime_secs))
}

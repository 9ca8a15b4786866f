//! PostgreSQL backend: one pooled connection per call, handed to a repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::Store;
use crate::{
    api::models::users::Role,
    db::{
        errors::Result,
        handlers::{Artifacts, Credits, PaymentOrders, Quotas, Reservations, Users},
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

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_by_id(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_by_email(email).await
    }

    async fn get_or_create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_or_create(request).await
    }

    async fn set_roles(&self, id: UserId, roles: &[Role], is_admin: bool) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).set_roles(id, roles, is_admin).await
    }

    async fn reserve_credits(&self, request: &ReserveDBRequest) -> Result<ReserveOutcome> {
        let mut conn = self.pool.acquire().await?;
        Reservations::new(&mut conn).reserve(request).await
    }

    async fn mark_delivered(&self, id: ReservationId, delivery: &Delivery) -> Result<ReservationDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Reservations::new(&mut conn).mark_delivered(id, delivery).await
    }

    async fn commit_reservation(&self, id: ReservationId) -> Result<ArtifactDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Reservations::new(&mut conn).commit(id).await
    }

    async fn release_reservation(&self, id: ReservationId, reason: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Reservations::new(&mut conn).release(id, reason).await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Reservations::new(&mut conn).get_by_id(id).await
    }

    async fn stale_reservations(
        &self,
        status: ReservationStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReservationDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Reservations::new(&mut conn).stale(status, older_than, limit).await
    }

    async fn grant_credits(&self, request: &CreditGrantDBRequest) -> Result<CreditTransactionDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).grant(request).await
    }

    async fn list_transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<CreditTransactionDBResponse>, i64)> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).list_for_user(user_id, skip, limit).await
    }

    async fn list_artifacts(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<ArtifactDBResponse>, i64)> {
        let mut conn = self.pool.acquire().await?;
        Artifacts::new(&mut conn).list_for_user(user_id, skip, limit).await
    }

    async fn get_artifact(&self, id: ArtifactId) -> Result<Option<ArtifactDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Artifacts::new(&mut conn).get_by_id(id).await
    }

    async fn anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Quotas::new(&mut conn).remaining(device_id, allowance).await
    }

    async fn consume_anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<QuotaOutcome> {
        let mut conn = self.pool.acquire().await?;
        Quotas::new(&mut conn).consume(device_id, allowance).await
    }

    async fn refund_anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Quotas::new(&mut conn).refund(device_id, allowance).await
    }

    async fn record_payment_order(&self, request: &PaymentOrderCreateDBRequest) -> Result<PaymentOrderDBResponse> {
        let mut conn = self.pool.acquire().await?;
        PaymentOrders::new(&mut conn).create(request).await
    }
}

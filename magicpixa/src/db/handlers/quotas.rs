use crate::{
    db::{errors::Result, models::quotas::QuotaOutcome},
    types::DeviceId,
};
use sqlx::{Connection, PgConnection};

/// Free generations for anonymous devices.
///
/// A device row is created lazily with the configured allowance on first use.
pub struct Quotas<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Quotas<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Remaining generations for `device_id`, or `allowance` if it has never generated.
    pub async fn remaining(&mut self, device_id: DeviceId, allowance: i64) -> Result<i64> {
        let remaining: Option<i64> = sqlx::query_scalar("SELECT remaining FROM anonymous_quotas WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(remaining.unwrap_or(allowance.max(0)))
    }

    /// Spend one generation. Never takes the count below zero.
    pub async fn consume(&mut self, device_id: DeviceId, allowance: i64) -> Result<QuotaOutcome> {
        let mut tx = self.db.begin().await?;

        sqlx::query("INSERT INTO anonymous_quotas (device_id, remaining) VALUES ($1, $2) ON CONFLICT (device_id) DO NOTHING")
            .bind(device_id)
            .bind(allowance.max(0))
            .execute(&mut *tx)
            .await?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE anonymous_quotas
            SET remaining = remaining - 1, updated_at = NOW()
            WHERE device_id = $1 AND remaining > 0
            RETURNING remaining
            "#,
        )
        .bind(device_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(match remaining {
            Some(remaining) => QuotaOutcome::Consumed { remaining },
            None => QuotaOutcome::Exhausted,
        })
    }

    /// Give back a generation spent on a job that failed. Capped at `allowance`.
    pub async fn refund(&mut self, device_id: DeviceId, allowance: i64) -> Result<i64> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE anonymous_quotas
            SET remaining = LEAST(remaining + 1, $2), updated_at = NOW()
            WHERE device_id = $1
            RETURNING remaining
            "#,
        )
        .bind(device_id)
        .bind(allowance.max(0))
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(remaining.unwrap_or(allowance.max(0)))
    }
}

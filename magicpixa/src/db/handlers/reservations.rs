//! The credit ledger: holds, delivery records, commits and releases.
//!
//! Balances only change here and in [`super::Credits::grant`]. A hold is taken with a single
//! conditional update, so two concurrent jobs for one user can never both pass the same balance
//! check. Commits run in one transaction and are idempotent.

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::artifacts::{ARTIFACT_COLUMNS, ArtifactRow},
        models::{
            artifacts::ArtifactDBResponse,
            credits::CreditTransactionType,
            reservations::{
                Delivery, EXPIRED_RELEASE_REASON, ReservationDBResponse, ReservationStatus, ReserveDBRequest, ReserveOutcome,
            },
        },
    },
    types::{ArtifactId, ReservationId, UserId},
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use uuid::Uuid;

const RESERVATION_COLUMNS: &str = "id, user_id, feature, amount, status, idempotency_key, request_fingerprint, \
     output_url, output_text, artifact_id, release_reason, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub feature: String,
    pub amount: i64,
    pub status: ReservationStatus,
    pub idempotency_key: Option<String>,
    pub request_fingerprint: Option<String>,
    pub output_url: Option<String>,
    pub output_text: Option<String>,
    pub artifact_id: Option<ArtifactId>,
    pub release_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationDBResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            feature: r.feature,
            amount: r.amount,
            status: r.status,
            idempotency_key: r.idempotency_key,
            request_fingerprint: r.request_fingerprint,
            output_url: r.output_url,
            output_text: r.output_text,
            artifact_id: r.artifact_id,
            release_reason: r.release_reason,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

pub struct Reservations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Reservations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&mut self, id: ReservationId) -> Result<Option<ReservationDBResponse>> {
        let row = sqlx::query_as::<_, Reservation>(&format!("SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Hold `amount` credits for a job if the available balance allows it.
    pub async fn reserve(&mut self, request: &ReserveDBRequest) -> Result<ReserveOutcome> {
        let mut tx = self.db.begin().await?;

        if let Some(key) = &request.idempotency_key {
            let existing = sqlx::query_as::<_, Reservation>(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE user_id = $1 AND idempotency_key = $2 FOR UPDATE"
            ))
            .bind(request.user_id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(existing) = existing {
                if existing.request_fingerprint != request.request_fingerprint {
                    return Ok(ReserveOutcome::KeyReused);
                }
                match existing.status {
                    ReservationStatus::Held => return Ok(ReserveOutcome::InFlight),
                    ReservationStatus::Delivered | ReservationStatus::Committed => {
                        tx.commit().await?;
                        return Ok(ReserveOutcome::Replay(existing.into()));
                    }
                    ReservationStatus::Released => {
                        // A failed attempt frees its key for the retry
                        sqlx::query("UPDATE credit_reservations SET idempotency_key = NULL WHERE id = $1")
                            .bind(existing.id)
                            .execute(&mut *tx)
                            .await?;
                    }
                }
            }
        }

        let held = sqlx::query(
            r#"
            UPDATE users
            SET reserved_credits = reserved_credits + $2, updated_at = NOW()
            WHERE id = $1 AND credits - reserved_credits >= $2
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if held == 0 {
            let available: i64 = sqlx::query_scalar("SELECT GREATEST(credits - reserved_credits, 0) FROM users WHERE id = $1")
                .bind(request.user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(DbError::NotFound)?;
            tx.rollback().await?;
            return Ok(ReserveOutcome::Insufficient { available });
        }

        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            INSERT INTO credit_reservations (id, user_id, feature, amount, status, idempotency_key, request_fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.feature)
        .bind(request.amount)
        .bind(ReservationStatus::Held)
        .bind(&request.idempotency_key)
        .bind(&request.request_fingerprint)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReserveOutcome::Reserved(reservation.into()))
    }

    /// Record the output handed to the caller. This is the durable marker the reconciler
    /// uses to finish commits that failed inline.
    ///
    /// A hold the reconciler expired while the job was still running is taken again here, so the
    /// following commit charges it. The balance may no longer cover it; commit floors at zero.
    pub async fn mark_delivered(&mut self, id: ReservationId, delivery: &Delivery) -> Result<ReservationDBResponse> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        match current.status {
            ReservationStatus::Held => {}
            ReservationStatus::Released if current.release_reason.as_deref() == Some(EXPIRED_RELEASE_REASON) => {
                sqlx::query("UPDATE users SET reserved_credits = reserved_credits + $2, updated_at = NOW() WHERE id = $1")
                    .bind(current.user_id)
                    .bind(current.amount)
                    .execute(&mut *tx)
                    .await?;
            }
            status => {
                return Err(DbError::Other(anyhow::anyhow!(
                    "reservation {id} is {status:?} and cannot be marked delivered"
                )));
            }
        }

        let updated = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            UPDATE credit_reservations
            SET status = $2, output_url = $3, output_text = $4, release_reason = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(ReservationStatus::Delivered)
        .bind(&delivery.output_url)
        .bind(&delivery.output_text)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.into())
    }

    /// Charge the reservation: debit the balance (floored at zero), free the hold, append a
    /// `usage` transaction and write the artifact, all in one transaction. Committing an
    /// already committed reservation returns the artifact it produced.
    pub async fn commit(&mut self, id: ReservationId) -> Result<ArtifactDBResponse> {
        let mut tx = self.db.begin().await?;

        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        match reservation.status {
            ReservationStatus::Committed => {
                let artifact = sqlx::query_as::<_, ArtifactRow>(&format!(
                    "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE reservation_id = $1"
                ))
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(artifact.into());
            }
            ReservationStatus::Released => {
                return Err(DbError::Other(anyhow::anyhow!("reservation {id} was released and cannot be committed")));
            }
            ReservationStatus::Held | ReservationStatus::Delivered => {}
        }

        let before: i64 = sqlx::query_scalar("SELECT credits FROM users WHERE id = $1 FOR UPDATE")
            .bind(reservation.user_id)
            .fetch_one(&mut *tx)
            .await?;

        let after: i64 = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits = GREATEST(credits - $2, 0),
                reserved_credits = GREATEST(reserved_credits - $2, 0),
                updated_at = NOW()
            WHERE id = $1
            RETURNING credits
            "#,
        )
        .bind(reservation.user_id)
        .bind(reservation.amount)
        .fetch_one(&mut *tx)
        .await?;

        let debited = before - after;

        sqlx::query(
            r#"
            INSERT INTO credit_transactions (id, user_id, transaction_type, amount, balance_after, source_id, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reservation.user_id)
        .bind(CreditTransactionType::Usage)
        .bind(debited)
        .bind(after)
        .bind(id.to_string())
        .bind(format!("{} job", reservation.feature))
        .execute(&mut *tx)
        .await?;

        let artifact = sqlx::query_as::<_, ArtifactRow>(&format!(
            r#"
            INSERT INTO artifacts (id, user_id, reservation_id, feature, output_url, output_text, credits_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ARTIFACT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(reservation.user_id)
        .bind(id)
        .bind(&reservation.feature)
        .bind(&reservation.output_url)
        .bind(&reservation.output_text)
        .bind(debited)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE credit_reservations SET status = $2, artifact_id = $3, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(ReservationStatus::Committed)
            .bind(artifact.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(artifact.into())
    }

    /// Free a `held` reservation without charging. Returns false if it was not held.
    pub async fn release(&mut self, id: ReservationId, reason: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let released: Option<(UserId, i64)> = sqlx::query_as(
            r#"
            UPDATE credit_reservations
            SET status = $2, release_reason = $3, updated_at = NOW()
            WHERE id = $1 AND status = $4
            RETURNING user_id, amount
            "#,
        )
        .bind(id)
        .bind(ReservationStatus::Released)
        .bind(reason)
        .bind(ReservationStatus::Held)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, amount)) = released else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE users SET reserved_credits = GREATEST(reserved_credits - $2, 0), updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Reservations in `status` last touched before `older_than`, oldest first.
    pub async fn stale(&mut self, status: ReservationStatus, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<ReservationDBResponse>> {
        let rows = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM credit_reservations
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#
        ))
        .bind(status)
        .bind(older_than)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::handlers::Users;
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;

    async fn create_user(pool: &PgPool, credits: i64) -> UserId {
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn)
            .get_or_create(&UserCreateDBRequest {
                email: format!("{}@example.com", Uuid::new_v4()),
                display_name: None,
                plan: "free".to_string(),
                roles: vec![Role::StandardUser],
                is_admin: false,
                signup_bonus: credits,
            })
            .await
            .unwrap()
            .id
    }

    fn reserve_request(user_id: UserId, amount: i64, key: Option<&str>) -> ReserveDBRequest {
        ReserveDBRequest {
            user_id,
            feature: "enhance".to_string(),
            amount,
            idempotency_key: key.map(str::to_string),
            request_fingerprint: key.map(|_| "fp".to_string()),
        }
    }

    async fn balances(pool: &PgPool, user_id: UserId) -> (i64, i64) {
        sqlx::query_as("SELECT credits, reserved_credits FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn reserve_rejects_when_balance_is_short(pool: PgPool) {
        let user_id = create_user(&pool, 0).await;
        let mut conn = pool.acquire().await.unwrap();

        let outcome = Reservations::new(&mut conn).reserve(&reserve_request(user_id, 1, None)).await.unwrap();

        assert!(matches!(outcome, ReserveOutcome::Insufficient { available: 0 }));
        assert_eq!(balances(&pool, user_id).await, (0, 0));
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn concurrent_holds_never_exceed_balance(pool: PgPool) {
        let user_id = create_user(&pool, 3).await;

        let attempts = (0..6).map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut conn = pool.acquire().await.unwrap();
                Reservations::new(&mut conn).reserve(&reserve_request(user_id, 1, None)).await.unwrap()
            })
        });

        let mut reserved = 0;
        for attempt in attempts {
            if let ReserveOutcome::Reserved(_) = attempt.await.unwrap() {
                reserved += 1;
            }
        }

        assert_eq!(reserved, 3);
        assert_eq!(balances(&pool, user_id).await, (3, 3));
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn commit_charges_once_and_writes_artifact(pool: PgPool) {
        let user_id = create_user(&pool, 3).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = Reservations::new(&mut conn);

        let ReserveOutcome::Reserved(reservation) = ledger.reserve(&reserve_request(user_id, 3, None)).await.unwrap() else {
            panic!("expected a hold");
        };
        ledger
            .mark_delivered(
                reservation.id,
                &Delivery {
                    output_url: Some("https://cdn.example.com/out.png".to_string()),
                    output_text: None,
                },
            )
            .await
            .unwrap();

        let first = ledger.commit(reservation.id).await.unwrap();
        let second = ledger.commit(reservation.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.credits_used, 3);
        assert_eq!(first.output_url.as_deref(), Some("https://cdn.example.com/out.png"));
        assert_eq!(balances(&pool, user_id).await, (0, 0));

        let usage_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE source_id = $1")
            .bind(reservation.id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(usage_rows, 1);
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn release_frees_hold_and_key(pool: PgPool) {
        let user_id = create_user(&pool, 2).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = Reservations::new(&mut conn);

        let ReserveOutcome::Reserved(first) = ledger.reserve(&reserve_request(user_id, 2, Some("k1"))).await.unwrap() else {
            panic!("expected a hold");
        };
        assert!(matches!(
            ledger.reserve(&reserve_request(user_id, 2, Some("k1"))).await.unwrap(),
            ReserveOutcome::InFlight
        ));

        assert!(ledger.release(first.id, "model_error").await.unwrap());
        assert!(!ledger.release(first.id, "model_error").await.unwrap());
        assert_eq!(balances(&pool, user_id).await, (2, 0));

        assert!(matches!(
            ledger.reserve(&reserve_request(user_id, 2, Some("k1"))).await.unwrap(),
            ReserveOutcome::Reserved(_)
        ));
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn expired_hold_delivered_late_is_still_charged(pool: PgPool) {
        let user_id = create_user(&pool, 3).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = Reservations::new(&mut conn);

        let ReserveOutcome::Reserved(hold) = ledger.reserve(&reserve_request(user_id, 3, None)).await.unwrap() else {
            panic!("expected a hold");
        };
        assert!(ledger.release(hold.id, EXPIRED_RELEASE_REASON).await.unwrap());
        assert_eq!(balances(&pool, user_id).await, (3, 0));

        let delivery = Delivery {
            output_url: Some("http://media/late.png".to_string()),
            output_text: None,
        };
        let delivered = ledger.mark_delivered(hold.id, &delivery).await.unwrap();
        assert_eq!(delivered.status, ReservationStatus::Delivered);
        assert_eq!(delivered.release_reason, None);
        assert_eq!(balances(&pool, user_id).await, (3, 3));

        let artifact = ledger.commit(hold.id).await.unwrap();
        assert_eq!(artifact.credits_used, 3);
        assert_eq!(balances(&pool, user_id).await, (0, 0));
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn failed_jobs_cannot_be_delivered(pool: PgPool) {
        let user_id = create_user(&pool, 3).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = Reservations::new(&mut conn);

        let ReserveOutcome::Reserved(hold) = ledger.reserve(&reserve_request(user_id, 1, None)).await.unwrap() else {
            panic!("expected a hold");
        };
        assert!(ledger.release(hold.id, "model_call").await.unwrap());
        assert!(ledger.mark_delivered(hold.id, &Delivery::default()).await.is_err());
        assert_eq!(balances(&pool, user_id).await, (3, 0));
    }
}

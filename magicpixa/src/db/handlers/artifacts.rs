use crate::{
    db::{errors::Result, models::artifacts::ArtifactDBResponse},
    types::{ArtifactId, ReservationId, UserId},
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};

pub(crate) const ARTIFACT_COLUMNS: &str = "id, user_id, reservation_id, feature, output_url, output_text, credits_used, created_at";

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ArtifactRow {
    pub id: ArtifactId,
    pub user_id: UserId,
    pub reservation_id: ReservationId,
    pub feature: String,
    pub output_url: Option<String>,
    pub output_text: Option<String>,
    pub credits_used: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ArtifactRow> for ArtifactDBResponse {
    fn from(row: ArtifactRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            reservation_id: row.reservation_id,
            feature: row.feature,
            output_url: row.output_url,
            output_text: row.output_text,
            credits_used: row.credits_used,
            created_at: row.created_at,
        }
    }
}

/// Read access to generated outputs. Rows are only written by [`super::Reservations::commit`].
pub struct Artifacts<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Artifacts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&mut self, id: ArtifactId) -> Result<Option<ArtifactDBResponse>> {
        let row = sqlx::query_as::<_, ArtifactRow>(&format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Page through a user's artifacts, newest first. Returns the page and the total count.
    pub async fn list_for_user(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<ArtifactDBResponse>, i64)> {
        let rows = sqlx::query_as::<_, ArtifactRow>(&format!(
            r#"
            SELECT {ARTIFACT_COLUMNS} FROM artifacts
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#
        ))
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok((rows.into_iter().map(Into::into).collect(), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::handlers::{Reservations, Users};
    use crate::db::models::reservations::{Delivery, ReserveDBRequest, ReserveOutcome};
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;
    use uuid::Uuid;

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn lists_committed_outputs_newest_first(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn)
            .get_or_create(&UserCreateDBRequest {
                email: "gallery@example.com".to_string(),
                display_name: None,
                plan: "free".to_string(),
                roles: vec![Role::StandardUser],
                is_admin: false,
                signup_bonus: 10,
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for feature in ["enhance", "caption"] {
            let mut ledger = Reservations::new(&mut conn);
            let ReserveOutcome::Reserved(reservation) = ledger
                .reserve(&ReserveDBRequest {
                    user_id: user.id,
                    feature: feature.to_string(),
                    amount: 1,
                    idempotency_key: None,
                    request_fingerprint: None,
                })
                .await
                .unwrap()
            else {
                panic!("expected a hold");
            };
            ledger
                .mark_delivered(
                    reservation.id,
                    &Delivery {
                        output_url: None,
                        output_text: Some(format!("{feature} output")),
                    },
                )
                .await
                .unwrap();
            ids.push(ledger.commit(reservation.id).await.unwrap().id);
        }

        let mut artifacts = Artifacts::new(&mut conn);
        let (page, total) = artifacts.list_for_user(user.id, 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|a| a.user_id == user.id));

        let fetched = artifacts.get_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(fetched.feature, "enhance");
        assert!(artifacts.get_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}

use crate::{
    db::{
        errors::{DbError, Result},
        models::credits::{CreditGrantDBRequest, CreditTransactionDBResponse, CreditTransactionType},
    },
    types::UserId,
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, amount, balance_after, source_id, description, created_at";

// Database entity model for credit transaction
#[derive(Debug, Clone, FromRow)]
struct CreditTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub balance_after: i64,
    pub source_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransaction> for CreditTransactionDBResponse {
    fn from(tx: CreditTransaction) -> Self {
        Self {
            id: tx.id,
            user_id: tx.user_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            balance_after: tx.balance_after,
            source_id: tx.source_id,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Apply an administrative grant or removal.
    ///
    /// Removals floor the balance at zero. Replaying a `source_id` returns the original
    /// transaction without touching the balance.
    pub async fn grant(&mut self, request: &CreditGrantDBRequest) -> Result<CreditTransactionDBResponse> {
        if !matches!(
            request.transaction_type,
            CreditTransactionType::AdminGrant | CreditTransactionType::AdminRemoval
        ) || request.amount < 0
        {
            return Err(DbError::Other(anyhow::anyhow!(
                "grant must be a non-negative admin_grant or admin_removal"
            )));
        }

        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_as::<_, CreditTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE source_id = $1"
        ))
        .bind(&request.source_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = existing {
            tx.commit().await?;
            return Ok(existing.into());
        }

        let current: i64 = sqlx::query_scalar("SELECT credits FROM users WHERE id = $1 FOR UPDATE")
            .bind(request.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

        let new_balance = if request.transaction_type.is_debit() {
            (current - request.amount).max(0)
        } else {
            current + request.amount
        };

        sqlx::query("UPDATE users SET credits = $2, updated_at = NOW() WHERE id = $1")
            .bind(request.user_id)
            .bind(new_balance)
            .execute(&mut *tx)
            .await?;

        let transaction = sqlx::query_as::<_, CreditTransaction>(&format!(
            r#"
            INSERT INTO credit_transactions (id, user_id, transaction_type, amount, balance_after, source_id, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.transaction_type)
        .bind((new_balance - current).abs())
        .bind(new_balance)
        .bind(&request.source_id)
        .bind(&request.description)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transaction.into())
    }

    /// Page through a user's ledger history, newest first. Returns the page and the total count.
    pub async fn list_for_user(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<CreditTransactionDBResponse>, i64)> {
        let rows = sqlx::query_as::<_, CreditTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM credit_transactions
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

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1")
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

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn removal_floors_at_zero(pool: PgPool) {
        let user_id = create_user(&pool, 3).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        let tx = credits
            .grant(&CreditGrantDBRequest {
                user_id,
                transaction_type: CreditTransactionType::AdminRemoval,
                amount: 10,
                source_id: "removal-1".to_string(),
                description: None,
            })
            .await
            .unwrap();

        assert_eq!(tx.balance_after, 0);
        assert_eq!(tx.amount, 3);
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn grants_are_idempotent_by_source(pool: PgPool) {
        let user_id = create_user(&pool, 0).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        let request = CreditGrantDBRequest {
            user_id,
            transaction_type: CreditTransactionType::AdminGrant,
            amount: 5,
            source_id: "grant-1".to_string(),
            description: Some("welcome back".to_string()),
        };
        let first = credits.grant(&request).await.unwrap();
        let second = credits.grant(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.balance_after, 5);

        let (history, total) = credits.list_for_user(user_id, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(history[0].transaction_type, CreditTransactionType::AdminGrant);
    }
}

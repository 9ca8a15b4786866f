use crate::{
    api::models::users::Role,
    db::{
        errors::Result,
        models::{
            credits::CreditTransactionType,
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::UserId,
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use uuid::Uuid;

pub(crate) const USER_COLUMNS: &str =
    "id, email, display_name, credits, reserved_credits, plan, roles, is_admin, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub(crate) struct UserRow {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub credits: i64,
    pub reserved_credits: i64,
    pub plan: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for UserDBResponse {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            credits: row.credits,
            reserved_credits: row.reserved_credits,
            plan: row.plan,
            roles: row.roles.iter().filter_map(|r| r.parse::<Role>().ok()).collect(),
            is_admin: row.is_admin,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn role_names(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&mut self, id: UserId) -> Result<Option<UserDBResponse>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn get_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"))
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Return the account for `request.email`, creating it with the signup bonus if needed.
    ///
    /// Concurrent first requests for the same email converge on one account and one bonus.
    pub async fn get_or_create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        if let Some(existing) = self.get_by_email(&request.email).await? {
            return Ok(existing);
        }

        let mut tx = self.db.begin().await?;
        let id = Uuid::new_v4();
        let bonus = request.signup_bonus.max(0);

        let inserted = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, display_name, credits, plan, roles, is_admin)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (LOWER(email)) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.email.trim())
        .bind(&request.display_name)
        .bind(bonus)
        .bind(&request.plan)
        .bind(role_names(&request.roles))
        .bind(request.is_admin)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            // Lost the race to another request; use the account it created
            tx.rollback().await?;
            return self.get_by_email(&request.email).await?.ok_or(crate::db::errors::DbError::NotFound);
        };

        if bonus > 0 {
            sqlx::query(
                r#"
                INSERT INTO credit_transactions (id, user_id, transaction_type, amount, balance_after, source_id, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(CreditTransactionType::SignupBonus)
            .bind(bonus)
            .bind(bonus)
            .bind(format!("signup_{id}"))
            .bind("Signup bonus")
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(user_id = %id, bonus, "Created user account");
        Ok(row.into())
    }

    pub async fn set_roles(&mut self, id: UserId, roles: &[Role], is_admin: bool) -> Result<UserDBResponse> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET roles = $2, is_admin = $3, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role_names(roles))
        .bind(is_admin)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    fn request(email: &str, bonus: i64) -> UserCreateDBRequest {
        UserCreateDBRequest {
            email: email.to_string(),
            display_name: Some("Asha".to_string()),
            plan: "free".to_string(),
            roles: vec![Role::StandardUser],
            is_admin: false,
            signup_bonus: bonus,
        }
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn creates_user_with_signup_bonus_once(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);

        let created = users.get_or_create(&request("asha@example.com", 10)).await.unwrap();
        assert_eq!(created.credits, 10);
        assert_eq!(created.roles, vec![Role::StandardUser]);

        let again = users.get_or_create(&request("ASHA@example.com", 10)).await.unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(again.credits, 10);

        let bonus_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1")
            .bind(created.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(bonus_rows, 1);
    }

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn updates_roles(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);

        let created = users.get_or_create(&request("ops@example.com", 0)).await.unwrap();
        let updated = users
            .set_roles(created.id, &[Role::StandardUser, Role::BillingManager], false)
            .await
            .unwrap();
        assert_eq!(updated.roles, vec![Role::StandardUser, Role::BillingManager]);
    }
}

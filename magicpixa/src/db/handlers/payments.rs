use crate::{
    db::{
        errors::Result,
        models::payments::{PaymentOrderCreateDBRequest, PaymentOrderDBResponse},
    },
    types::{PaymentOrderId, UserId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, user_id, provider, provider_order_id, amount, amount_minor, currency, status, receipt, created_at";

#[derive(Debug, Clone, FromRow)]
struct PaymentOrder {
    pub id: PaymentOrderId,
    pub user_id: UserId,
    pub provider: String,
    pub provider_order_id: String,
    pub amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentOrder> for PaymentOrderDBResponse {
    fn from(row: PaymentOrder) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            provider_order_id: row.provider_order_id,
            amount: row.amount,
            amount_minor: row.amount_minor,
            currency: row.currency,
            status: row.status,
            receipt: row.receipt,
            created_at: row.created_at,
        }
    }
}

pub struct PaymentOrders<'c> {
    db: &'c mut PgConnection,
}

impl<'c> PaymentOrders<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &PaymentOrderCreateDBRequest) -> Result<PaymentOrderDBResponse> {
        let row = sqlx::query_as::<_, PaymentOrder>(&format!(
            r#"
            INSERT INTO payment_orders (id, user_id, provider, provider_order_id, amount, amount_minor, currency, status, receipt)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.provider)
        .bind(&request.provider_order_id)
        .bind(request.amount)
        .bind(request.amount_minor)
        .bind(&request.currency)
        .bind(&request.status)
        .bind(&request.receipt)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::errors::DbError;
    use crate::db::handlers::Users;
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;

    #[sqlx::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn records_order_once_per_provider_id(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn)
            .get_or_create(&UserCreateDBRequest {
                email: "buyer@example.com".to_string(),
                display_name: None,
                plan: "free".to_string(),
                roles: vec![Role::StandardUser],
                is_admin: false,
                signup_bonus: 0,
            })
            .await
            .unwrap();

        let request = PaymentOrderCreateDBRequest {
            user_id: user.id,
            provider: "razorpay".to_string(),
            provider_order_id: "order_123".to_string(),
            amount: Decimal::new(49900, 2),
            amount_minor: 49900,
            currency: "INR".to_string(),
            status: "created".to_string(),
            receipt: "rcpt_1".to_string(),
        };

        let mut orders = PaymentOrders::new(&mut conn);
        let order = orders.create(&request).await.unwrap();
        assert_eq!(order.amount, Decimal::new(49900, 2));

        let err = orders.create(&request).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }
}

//! HTTP handlers for payment gateway orders.
//!
//! The server only creates orders. The client completes payment in the gateway's checkout widget,
//! and credits are applied separately through the ledger.

use axum::{extract::State, http::StatusCode, response::Json};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::payments::{PaymentOrderCreate, PaymentOrderResponse},
    auth::permissions::{RequiresPermission, operation, resource},
    db::models::payments::PaymentOrderCreateDBRequest,
    errors::{Error, Result},
    payment_providers::OrderRequest,
};

/// Create a payment order
#[utoipa::path(
    post,
    path = "/payments/orders",
    tag = "payments",
    summary = "Create a payment order",
    description = "Create an order with the configured payment gateway. The response carries the gateway order id \
        (and, for Razorpay, the public key) needed to open checkout on the client.",
    request_body = PaymentOrderCreate,
    responses(
        (status = 201, description = "Order created", body = PaymentOrderResponse),
        (status = 400, description = "Invalid amount or currency, or payments are not configured"),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "Payment gateway error"),
    ),
    security(("X-Magicpixa-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_payment_order(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Payments, operation::CreateOwn>,
    Json(data): Json<PaymentOrderCreate>,
) -> Result<(StatusCode, Json<PaymentOrderResponse>)> {
    let provider = state.payment_provider.as_ref().ok_or_else(|| Error::BadRequest {
        message: "Payments are not enabled on this server".to_string(),
    })?;
    let user_id = current_user.user.id;

    let receipt = format!("rcpt_{}", Uuid::new_v4().simple());
    let order = provider
        .create_order(&OrderRequest {
            user_id,
            amount: data.amount,
            currency: data.currency,
            receipt: receipt.clone(),
        })
        .await?;

    let record = state
        .store
        .record_payment_order(&PaymentOrderCreateDBRequest {
            user_id,
            provider: provider.name().to_string(),
            provider_order_id: order.provider_order_id,
            amount: data.amount,
            amount_minor: order.amount_minor,
            currency: order.currency,
            status: order.status,
            receipt,
        })
        .await?;

    tracing::info!(
        user_id = %user_id,
        provider = %record.provider,
        order_id = %record.provider_order_id,
        amount_minor = record.amount_minor,
        "Created payment order"
    );
    Ok((StatusCode::CREATED, Json(PaymentOrderResponse::new(record, order.checkout_key))))
}

#[cfg(test)]
mod tests {
    use crate::api::models::payments::PaymentOrderResponse;
    use crate::config::PaymentConfig;
    use crate::test_utils::{create_test_app, create_test_config};
    use axum::http::StatusCode;
    use rust_decimal::Decimal;
    use serde_json::json;

    const USER: &str = "x-magicpixa-user";

    #[tokio::test]
    async fn creates_order_with_dummy_provider() {
        let mut config = create_test_config();
        config.payment = Some(PaymentConfig::Dummy);
        let server = create_test_app(config).await;

        let response = server
            .post("/api/v1/payments/orders")
            .add_header(USER, "payer@example.com")
            .json(&json!({ "amount": "499.00", "currency": "inr" }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let order: PaymentOrderResponse = response.json();
        assert_eq!(order.provider, "dummy");
        assert!(order.provider_order_id.starts_with("dummy_order_"));
        assert_eq!(order.amount, Decimal::new(49900, 2));
        assert_eq!(order.amount_minor, 49900);
        assert_eq!(order.currency, "INR");
        assert!(order.receipt.len() <= 40);
    }

    #[tokio::test]
    async fn rejects_invalid_amounts() {
        let mut config = create_test_config();
        config.payment = Some(PaymentConfig::Dummy);
        let server = create_test_app(config).await;

        server
            .post("/api/v1/payments/orders")
            .add_header(USER, "payer@example.com")
            .json(&json!({ "amount": "-5", "currency": "INR" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unconfigured_payments_are_a_bad_request() {
        let server = create_test_app(create_test_config()).await;

        server
            .post("/api/v1/payments/orders")
            .add_header(USER, "payer@example.com")
            .json(&json!({ "amount": "10" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

//! Dummy payment provider for development. Orders are created locally and never paid.

use async_trait::async_trait;
use uuid::Uuid;

use super::{OrderRequest, PaymentOrder, PaymentProvider, Result, normalise_currency, to_minor_units};

pub struct DummyProvider;

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<PaymentOrder> {
        let currency = normalise_currency(&request.currency)?;
        let amount_minor = to_minor_units(request.amount, &currency)?;
        let provider_order_id = format!("dummy_order_{}", Uuid::new_v4().simple());

        tracing::info!(user_id = %request.user_id, order_id = %provider_order_id, "Dummy provider created order");

        Ok(PaymentOrder {
            provider_order_id,
            amount_minor,
            currency,
            status: "created".to_string(),
            checkout_key: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn creates_local_order() {
        let order = DummyProvider
            .create_order(&OrderRequest {
                user_id: Uuid::new_v4(),
                amount: Decimal::from(99),
                currency: "inr".to_string(),
                receipt: "rcpt".to_string(),
            })
            .await
            .unwrap();

        assert!(order.provider_order_id.starts_with("dummy_order_"));
        assert_eq!(order.amount_minor, 9900);
        assert_eq!(order.currency, "INR");
    }
}

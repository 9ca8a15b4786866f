//! Payment gateway abstraction.
//!
//! Providers create orders that the client completes with the gateway's own checkout widget.
//! Nothing here credits an account; credits only change through the ledger.

use async_trait::async_trait;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use std::sync::Arc;

use crate::{config::PaymentConfig, types::UserId};

pub mod dummy;
pub mod razorpay;

/// Create a payment provider from configuration
pub fn create_provider(config: &PaymentConfig) -> anyhow::Result<Arc<dyn PaymentProvider>> {
    Ok(match config {
        PaymentConfig::Razorpay(razorpay_config) => Arc::new(razorpay::RazorpayProvider::new(razorpay_config.clone())?),
        PaymentConfig::Dummy => Arc::new(dummy::DummyProvider),
    })
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),
}

/// An order to create with the gateway. `amount` is in major units (rupees, dollars).
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub receipt: String,
}

/// What the gateway returned, enough for the client to open checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrder {
    pub provider_order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    /// Public key the client passes to the checkout widget
    pub checkout_key: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name stored alongside each order
    fn name(&self) -> &'static str;

    async fn create_order(&self, request: &OrderRequest) -> Result<PaymentOrder>;
}

/// Decimal places of the currency's minor unit.
fn currency_exponent(currency: &str) -> u32 {
    match currency {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX" | "VND" | "VUV" | "XAF" | "XOF"
        | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Normalise and check an ISO 4217 currency code.
pub fn normalise_currency(currency: &str) -> Result<String> {
    let code = currency.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(PaymentError::InvalidData(format!(
            "'{currency}' is not a three-letter ISO 4217 currency code"
        )));
    }
    Ok(code)
}

/// Convert a major-unit amount to the gateway's integer minor units, rejecting amounts that
/// are not positive or carry more precision than the currency allows.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidData("amount must be greater than zero".to_string()));
    }
    let exponent = currency_exponent(currency);
    let scaled = amount * Decimal::from(10_i64.pow(exponent));
    if scaled.fract() != Decimal::ZERO {
        return Err(PaymentError::InvalidData(format!(
            "{currency} amounts allow at most {exponent} decimal places"
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| PaymentError::InvalidData("amount is too large".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn converts_to_minor_units_per_currency() {
        assert_eq!(to_minor_units(Decimal::from_str("499.00").unwrap(), "INR").unwrap(), 49900);
        assert_eq!(to_minor_units(Decimal::from_str("1.5").unwrap(), "USD").unwrap(), 150);
        assert_eq!(to_minor_units(Decimal::from(500), "JPY").unwrap(), 500);
        assert_eq!(to_minor_units(Decimal::from_str("1.234").unwrap(), "KWD").unwrap(), 1234);
    }

    #[test]
    fn rejects_bad_amounts() {
        assert!(to_minor_units(Decimal::ZERO, "INR").is_err());
        assert!(to_minor_units(Decimal::from(-5), "INR").is_err());
        assert!(to_minor_units(Decimal::from_str("10.005").unwrap(), "INR").is_err());
        assert!(to_minor_units(Decimal::from_str("10.5").unwrap(), "JPY").is_err());
    }

    #[test]
    fn normalises_currency_codes() {
        assert_eq!(normalise_currency(" inr ").unwrap(), "INR");
        assert!(normalise_currency("RUPEES").is_err());
        assert!(normalise_currency("1NR").is_err());
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::payment::PaymentMethod;

pub mod bank;
pub mod card;
pub mod upi;

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("invalid payment method: {0}")]
    InvalidPaymentMethod(String),
    #[error("invalid card details: {0}")]
    InvalidCard(String),
    #[error("card expired")]
    CardExpired,
    #[error("invalid UPI ID")]
    InvalidUpi,
    #[error("invalid bank details")]
    InvalidBank,
    #[error("{0}")]
    Declined(String),
    #[error("processor unavailable: {0}")]
    Transient(String),
}

impl ProcessorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessorError::Transient(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
    pub cardholder_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpiDetails {
    pub upi_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_number: String,
    pub ifsc: String,
    pub account_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_details: Option<CardDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upi_details: Option<UpiDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_details: Option<BankDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub payment_id: Uuid,
    pub processor_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn id(&self) -> &'static str;

    async fn authorize(
        &self,
        req: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, ProcessorError>;

    async fn capture(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError>;

    async fn refund(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError>;
}

pub fn processor_for(method: PaymentMethod) -> Result<Box<dyn PaymentProcessor>, ProcessorError> {
    match method {
        PaymentMethod::CreditCard | PaymentMethod::DebitCard => {
            Ok(Box::new(card::CardProcessor::default()))
        }
        PaymentMethod::Upi => Ok(Box::new(upi::UpiProcessor::default())),
        PaymentMethod::BankTransfer => Ok(Box::new(bank::BankProcessor::default())),
        other => Err(ProcessorError::InvalidPaymentMethod(other.as_str().to_string())),
    }
}

// Selection seam so the orchestrator can be driven with forced-approve or
// forced-decline processors in tests; the default is the dispatch above.
pub trait ProcessorSelector: Send + Sync {
    fn select(&self, method: PaymentMethod) -> Result<Box<dyn PaymentProcessor>, ProcessorError>;
}

pub struct DefaultProcessors;

impl ProcessorSelector for DefaultProcessors {
    fn select(&self, method: PaymentMethod) -> Result<Box<dyn PaymentProcessor>, ProcessorError> {
        processor_for(method)
    }
}

pub(crate) fn simulated_approval(approval_rate: f64) -> bool {
    use rand::Rng;
    rand::thread_rng().gen::<f64>() < approval_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_rejects_unknown_methods() {
        for method in [PaymentMethod::Wallet, PaymentMethod::Crypto, PaymentMethod::Bnpl] {
            let err = processor_for(method).err().unwrap();
            assert!(err.to_string().starts_with("invalid payment method"));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn dispatch_selects_by_method() {
        assert_eq!(processor_for(PaymentMethod::CreditCard).unwrap().id(), "card-processor");
        assert_eq!(processor_for(PaymentMethod::DebitCard).unwrap().id(), "card-processor");
        assert_eq!(processor_for(PaymentMethod::Upi).unwrap().id(), "upi-processor");
        assert_eq!(processor_for(PaymentMethod::BankTransfer).unwrap().id(), "bank-processor");
    }
}

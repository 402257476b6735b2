use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::processors::{
    simulated_approval, AuthorizationRequest, AuthorizationResponse, PaymentProcessor,
    ProcessorError,
};

pub struct CardProcessor {
    pub approval_rate: f64,
}

impl Default for CardProcessor {
    fn default() -> Self {
        Self { approval_rate: 0.90 }
    }
}

// Expiry input is two digits each: month 01-12, year 00-99 (2000-based).
fn parse_expiry(month: &str, year: &str) -> Result<(u32, i32), ProcessorError> {
    if month.len() != 2 || !month.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProcessorError::InvalidCard(format!("bad expiry month {:?}", month)));
    }
    if year.len() != 2 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProcessorError::InvalidCard(format!("bad expiry year {:?}", year)));
    }
    let month: u32 = month.parse().map_err(|_| ProcessorError::InvalidCard("bad expiry month".into()))?;
    if !(1..=12).contains(&month) {
        return Err(ProcessorError::InvalidCard(format!("expiry month {} out of range", month)));
    }
    let year: i32 = year.parse().map_err(|_| ProcessorError::InvalidCard("bad expiry year".into()))?;
    Ok((month, 2000 + year))
}

fn is_expired(month: u32, year: i32, now: chrono::DateTime<Utc>) -> bool {
    year < now.year() || (year == now.year() && month < now.month())
}

#[async_trait::async_trait]
impl PaymentProcessor for CardProcessor {
    fn id(&self) -> &'static str {
        "card-processor"
    }

    async fn authorize(
        &self,
        req: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, ProcessorError> {
        tracing::info!(payment_id = %req.payment_id, "authorizing card payment");

        let card = req
            .card_details
            .as_ref()
            .ok_or_else(|| ProcessorError::InvalidCard("card details are required".into()))?;

        let (month, year) = parse_expiry(&card.expiry_month, &card.expiry_year)?;
        if is_expired(month, year, Utc::now()) {
            return Err(ProcessorError::CardExpired);
        }

        if simulated_approval(self.approval_rate) {
            return Ok(AuthorizationResponse {
                payment_id: req.payment_id,
                processor_id: self.id().to_string(),
                approved: true,
                authorization_id: Some(format!("auth_{}", Uuid::new_v4())),
                error: None,
                timestamp: Utc::now(),
            });
        }

        Err(ProcessorError::Declined("Card declined by issuer".to_string()))
    }

    async fn capture(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        tracing::info!(%payment_id, %amount, "capturing card payment");
        Ok(())
    }

    async fn refund(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        tracing::info!(%payment_id, %amount, "refunding card payment");
        Ok(())
    }
}

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::processors::{
    simulated_approval, AuthorizationRequest, AuthorizationResponse, PaymentProcessor,
    ProcessorError,
};

pub struct BankProcessor {
    pub approval_rate: f64,
}

impl Default for BankProcessor {
    fn default() -> Self {
        Self { approval_rate: 0.90 }
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for BankProcessor {
    fn id(&self) -> &'static str {
        "bank-processor"
    }

    async fn authorize(
        &self,
        req: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, ProcessorError> {
        tracing::info!(payment_id = %req.payment_id, "authorizing bank transfer");

        let details = req.bank_details.as_ref().ok_or(ProcessorError::InvalidBank)?;
        if details.account_number.is_empty() || details.ifsc.is_empty() {
            return Err(ProcessorError::InvalidBank);
        }

        if simulated_approval(self.approval_rate) {
            return Ok(AuthorizationResponse {
                payment_id: req.payment_id,
                processor_id: self.id().to_string(),
                approved: true,
                authorization_id: Some(format!("bank_{}", Uuid::new_v4())),
                error: None,
                timestamp: Utc::now(),
            });
        }

        Err(ProcessorError::Declined("Bank transfer failed".to_string()))
    }

    async fn capture(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        tracing::info!(%payment_id, %amount, "capturing bank transfer");
        Ok(())
    }

    async fn refund(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        tracing::info!(%payment_id, %amount, "refunding bank transfer");
        Ok(())
    }
}

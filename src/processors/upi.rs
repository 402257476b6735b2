use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::processors::{
    simulated_approval, AuthorizationRequest, AuthorizationResponse, PaymentProcessor,
    ProcessorError,
};

pub struct UpiProcessor {
    pub approval_rate: f64,
}

impl Default for UpiProcessor {
    fn default() -> Self {
        Self { approval_rate: 0.95 }
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for UpiProcessor {
    fn id(&self) -> &'static str {
        "upi-processor"
    }

    async fn authorize(
        &self,
        req: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, ProcessorError> {
        tracing::info!(payment_id = %req.payment_id, "authorizing UPI payment");

        let details = req.upi_details.as_ref().ok_or(ProcessorError::InvalidUpi)?;
        if !details.upi_id.contains('@') {
            return Err(ProcessorError::InvalidUpi);
        }

        if simulated_approval(self.approval_rate) {
            return Ok(AuthorizationResponse {
                payment_id: req.payment_id,
                processor_id: self.id().to_string(),
                approved: true,
                authorization_id: Some(format!("upi_{}", Uuid::new_v4())),
                error: None,
                timestamp: Utc::now(),
            });
        }

        Err(ProcessorError::Declined("UPI payment failed".to_string()))
    }

    async fn capture(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        // UPI amounts move at authorization time; the capture is an ack.
        tracing::info!(%payment_id, %amount, "capturing UPI payment");
        Ok(())
    }

    async fn refund(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        tracing::info!(%payment_id, %amount, "refunding UPI payment");
        Ok(())
    }
}

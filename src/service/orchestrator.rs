use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentStatus, TransactionRecord};
use crate::events::envelope::{
    FraudEvent, PaymentEvent, PAYMENT_AUTHORIZATION_FAILED, PAYMENT_AUTHORIZATION_REQUESTED,
    PAYMENT_AUTHORIZED, PAYMENT_CAPTURED, PAYMENT_CAPTURE_FAILED, PAYMENT_CAPTURE_REQUESTED,
    PAYMENT_INITIATED, PAYMENT_REFUNDED, PAYMENT_REFUND_FAILED, PAYMENT_REFUND_REQUESTED,
};
use crate::events::log::EventPublisher;
use crate::processors::{
    AuthorizationRequest, BankDetails, CardDetails, ProcessorSelector, UpiDetails,
};
use crate::repo::Store;

pub struct PaymentOrchestrator {
    pub store: Arc<dyn Store>,
    pub publisher: Arc<dyn EventPublisher>,
    pub processors: Arc<dyn ProcessorSelector>,
    pub payments_topic: String,
    in_flight: Mutex<HashSet<(Uuid, &'static str)>>,
}

struct OpGuard<'a> {
    ops: &'a Mutex<HashSet<(Uuid, &'static str)>>,
    key: (Uuid, &'static str),
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.ops.lock().unwrap().remove(&self.key);
    }
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        processors: Arc<dyn ProcessorSelector>,
        payments_topic: String,
    ) -> Self {
        Self {
            store,
            publisher,
            processors,
            payments_topic,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn begin_op(&self, payment_id: Uuid, op: &'static str) -> Option<OpGuard<'_>> {
        let mut ops = self.in_flight.lock().unwrap();
        if !ops.insert((payment_id, op)) {
            return None;
        }
        Some(OpGuard { ops: &self.in_flight, key: (payment_id, op) })
    }

    pub async fn handle_payment_event(&self, event: &PaymentEvent) -> Result<()> {
        match event.event_type.as_str() {
            PAYMENT_INITIATED => self.handle_initiated(event).await,
            PAYMENT_AUTHORIZATION_REQUESTED => self.handle_authorization_requested(event).await,
            PAYMENT_CAPTURE_REQUESTED => self.handle_capture_requested(event).await,
            PAYMENT_REFUND_REQUESTED => self.handle_refund_requested(event).await,
            // Outcome events on the same topic are this worker's own outputs.
            other => {
                tracing::debug!(event_type = other, payment_id = %event.payment.id, "skipping event");
                Ok(())
            }
        }
    }

    async fn handle_initiated(&self, event: &PaymentEvent) -> Result<()> {
        self.store.upsert_payment(&event.payment).await?;

        let Some(payment) = self.store.get_payment(event.payment.id).await? else {
            return Ok(());
        };
        if payment.status != PaymentStatus::Initiated {
            tracing::info!(payment_id = %payment.id, status = payment.status.as_str(),
                "payment already past initiation, dropping command");
            return Ok(());
        }

        self.publish(PAYMENT_AUTHORIZATION_REQUESTED, payment).await
    }

    async fn handle_authorization_requested(&self, event: &PaymentEvent) -> Result<()> {
        let Some(payment) = self.store.get_payment(event.payment.id).await? else {
            tracing::warn!(payment_id = %event.payment.id, "authorization for unknown payment, dropping");
            return Ok(());
        };
        if payment.status != PaymentStatus::Initiated {
            tracing::info!(payment_id = %payment.id, status = payment.status.as_str(),
                "authorization command does not match state, dropping");
            return Ok(());
        }

        let Some(_guard) = self.begin_op(payment.id, "authorize") else {
            tracing::info!(payment_id = %payment.id, "authorization already in flight, dropping");
            return Ok(());
        };

        let processor = match self.processors.select(payment.payment_method) {
            Ok(p) => p,
            Err(err) => {
                return self
                    .fail(payment, PAYMENT_AUTHORIZATION_FAILED, "AUTHORIZATION", &err.to_string())
                    .await;
            }
        };

        let request = authorization_request(&payment);
        match processor.authorize(&request).await {
            Ok(response) => {
                let mut patch = serde_json::Map::new();
                if let Some(auth_id) = &response.authorization_id {
                    patch.insert("authorization_id".into(), auth_id.clone().into());
                }
                patch.insert("processor_id".into(), response.processor_id.clone().into());

                let moved = self
                    .store
                    .transition_payment(payment.id, PaymentStatus::Initiated, PaymentStatus::Authorized, &patch)
                    .await?;
                if !moved {
                    tracing::info!(payment_id = %payment.id, "lost authorization race, dropping");
                    return Ok(());
                }

                self.store
                    .record_transaction(&TransactionRecord::new(
                        payment.id,
                        "AUTHORIZATION",
                        PaymentStatus::Authorized,
                        serde_json::to_value(&response).ok(),
                        None,
                    ))
                    .await?;

                let Some(updated) = self.store.get_payment(payment.id).await? else {
                    return Ok(());
                };
                // Both outputs land on the payment's partition, in this order,
                // before the input is acknowledged.
                self.publish(PAYMENT_AUTHORIZED, updated.clone()).await?;
                self.publish(PAYMENT_CAPTURE_REQUESTED, updated).await
            }
            Err(err) if err.is_transient() => Err(err.into()),
            Err(err) => {
                self.fail(payment, PAYMENT_AUTHORIZATION_FAILED, "AUTHORIZATION", &err.to_string())
                    .await
            }
        }
    }

    async fn handle_capture_requested(&self, event: &PaymentEvent) -> Result<()> {
        let Some(payment) = self.store.get_payment(event.payment.id).await? else {
            tracing::warn!(payment_id = %event.payment.id, "capture for unknown payment, dropping");
            return Ok(());
        };
        if payment.status != PaymentStatus::Authorized {
            tracing::info!(payment_id = %payment.id, status = payment.status.as_str(),
                "capture command does not match state, dropping");
            return Ok(());
        }

        let Some(_guard) = self.begin_op(payment.id, "capture") else {
            tracing::info!(payment_id = %payment.id, "capture already in flight, dropping");
            return Ok(());
        };

        let processor = match self.processors.select(payment.payment_method) {
            Ok(p) => p,
            Err(err) => {
                return self
                    .fail(payment, PAYMENT_CAPTURE_FAILED, "CAPTURE", &err.to_string())
                    .await;
            }
        };

        match processor.capture(payment.id, payment.amount).await {
            Ok(()) => {
                let patch = serde_json::Map::new();
                let moved = self
                    .store
                    .transition_payment(payment.id, PaymentStatus::Authorized, PaymentStatus::Captured, &patch)
                    .await?;
                if !moved {
                    tracing::info!(payment_id = %payment.id, "lost capture race, dropping");
                    return Ok(());
                }

                self.store
                    .record_transaction(&TransactionRecord::new(
                        payment.id,
                        "CAPTURE",
                        PaymentStatus::Captured,
                        None,
                        None,
                    ))
                    .await?;

                let Some(updated) = self.store.get_payment(payment.id).await? else {
                    return Ok(());
                };
                self.publish(PAYMENT_CAPTURED, updated).await
            }
            Err(err) if err.is_transient() => Err(err.into()),
            Err(err) => {
                self.fail(payment, PAYMENT_CAPTURE_FAILED, "CAPTURE", &err.to_string())
                    .await
            }
        }
    }

    async fn handle_refund_requested(&self, event: &PaymentEvent) -> Result<()> {
        let Some(payment) = self.store.get_payment(event.payment.id).await? else {
            tracing::warn!(payment_id = %event.payment.id, "refund for unknown payment, dropping");
            return Ok(());
        };
        if payment.status != PaymentStatus::Captured {
            // Unlike other mismatched commands, a bad refund is answered so the
            // merchant sees the rejection.
            tracing::info!(payment_id = %payment.id, status = payment.status.as_str(),
                "refund requires a captured payment, rejecting");
            let mut snapshot = payment.clone();
            snapshot
                .metadata
                .insert("error".into(), "refund requires a captured payment".into());
            return self.publish(PAYMENT_REFUND_FAILED, snapshot).await;
        }

        let Some(_guard) = self.begin_op(payment.id, "refund") else {
            tracing::info!(payment_id = %payment.id, "refund already in flight, dropping");
            return Ok(());
        };

        let processor = match self.processors.select(payment.payment_method) {
            Ok(p) => p,
            Err(err) => return self.reject_refund(payment, &err.to_string()).await,
        };

        let refund_amount = refund_amount(&payment);
        match processor.refund(payment.id, refund_amount).await {
            Ok(()) => {
                let mut patch = serde_json::Map::new();
                patch.insert("refund_amount".into(), refund_amount.to_string().into());
                patch.insert("refund_id".into(), Uuid::new_v4().to_string().into());
                patch.insert("refund_time".into(), Utc::now().to_rfc3339().into());

                let moved = self
                    .store
                    .transition_payment(payment.id, PaymentStatus::Captured, PaymentStatus::Refunded, &patch)
                    .await?;
                if !moved {
                    tracing::info!(payment_id = %payment.id, "lost refund race, dropping");
                    return Ok(());
                }

                self.store
                    .record_transaction(&TransactionRecord::new(
                        payment.id,
                        "REFUND",
                        PaymentStatus::Refunded,
                        None,
                        None,
                    ))
                    .await?;

                let Some(updated) = self.store.get_payment(payment.id).await? else {
                    return Ok(());
                };
                self.publish(PAYMENT_REFUNDED, updated).await
            }
            Err(err) if err.is_transient() => Err(err.into()),
            Err(err) => self.reject_refund(payment, &err.to_string()).await,
        }
    }

    // A fraud verdict is terminal; every non-terminal payment aborts.
    pub async fn handle_fraud_event(&self, event: &FraudEvent) -> Result<()> {
        let payment_id = event.fraud_check.payment_id;
        let mut patch = serde_json::Map::new();
        patch.insert("error".into(), "payment flagged by fraud screening".into());
        patch.insert("fraud_check_id".into(), event.id.to_string().into());
        if let Some(reason) = &event.fraud_check.reason {
            patch.insert("fraud_reason".into(), reason.clone().into());
        }
        patch.insert("failure_time".into(), Utc::now().to_rfc3339().into());

        let aborted = self.store.fail_payment(payment_id, &patch).await?;
        if aborted {
            self.store
                .record_transaction(&TransactionRecord::new(
                    payment_id,
                    "FRAUD_ABORT",
                    PaymentStatus::Failed,
                    None,
                    Some("payment flagged by fraud screening".to_string()),
                ))
                .await?;
            tracing::warn!(%payment_id, risk_score = event.fraud_check.risk_score,
                "payment aborted after fraud verdict");
        }
        Ok(())
    }

    async fn fail(
        &self,
        payment: Payment,
        event_type: &str,
        transaction_type: &str,
        error: &str,
    ) -> Result<()> {
        let mut patch = serde_json::Map::new();
        patch.insert("error".into(), error.into());
        patch.insert("failure_time".into(), Utc::now().to_rfc3339().into());

        let moved = self
            .store
            .transition_payment(payment.id, payment.status, PaymentStatus::Failed, &patch)
            .await?;
        if !moved {
            tracing::info!(payment_id = %payment.id, "lost failure race, dropping");
            return Ok(());
        }

        self.store
            .record_transaction(&TransactionRecord::new(
                payment.id,
                transaction_type,
                PaymentStatus::Failed,
                None,
                Some(error.to_string()),
            ))
            .await?;

        let Some(updated) = self.store.get_payment(payment.id).await? else {
            return Ok(());
        };
        self.publish(event_type, updated).await
    }

    // Refund failures leave the payment Captured; the rejection lives in the
    // event and the transaction log.
    async fn reject_refund(&self, payment: Payment, error: &str) -> Result<()> {
        self.store
            .record_transaction(&TransactionRecord::new(
                payment.id,
                "REFUND",
                payment.status,
                None,
                Some(error.to_string()),
            ))
            .await?;

        let mut snapshot = payment;
        snapshot.metadata.insert("error".into(), error.into());
        self.publish(PAYMENT_REFUND_FAILED, snapshot).await
    }

    async fn publish(&self, event_type: &str, payment: Payment) -> Result<()> {
        let event = PaymentEvent::new(event_type, payment);
        let key = event.partition_key();
        let payload = serde_json::to_vec(&event)?;
        self.publisher.publish(&self.payments_topic, &key, payload).await?;
        tracing::info!(event_type, payment_id = %event.payment.id, "published payment event");
        Ok(())
    }
}

// Instrument details come from a vault in a real deployment; the simulated
// processors only check shape.
fn authorization_request(payment: &Payment) -> AuthorizationRequest {
    use crate::domain::payment::PaymentMethod;

    let mut request = AuthorizationRequest {
        payment_id: payment.id,
        amount: payment.amount,
        currency: payment.currency.clone(),
        payment_method: payment.payment_method,
        card_details: None,
        upi_details: None,
        bank_details: None,
    };

    match payment.payment_method {
        PaymentMethod::CreditCard | PaymentMethod::DebitCard => {
            request.card_details = Some(CardDetails {
                card_number: "4111111111111111".to_string(),
                expiry_month: "12".to_string(),
                expiry_year: "30".to_string(),
                cvv: "123".to_string(),
                cardholder_name: "Test User".to_string(),
            });
        }
        PaymentMethod::Upi => {
            request.upi_details = Some(UpiDetails { upi_id: "testuser@upi".to_string() });
        }
        PaymentMethod::BankTransfer => {
            request.bank_details = Some(BankDetails {
                account_number: "1234567890".to_string(),
                ifsc: "TEST0001".to_string(),
                account_name: "Test User".to_string(),
            });
        }
        _ => {}
    }

    request
}

fn refund_amount(payment: &Payment) -> Decimal {
    match payment.metadata.get("refund_amount") {
        Some(serde_json::Value::String(raw)) => raw.parse().unwrap_or(payment.amount),
        Some(serde_json::Value::Number(raw)) => raw
            .to_string()
            .parse()
            .unwrap_or(payment.amount),
        _ => payment.amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentMethod;
    use rust_decimal_macros::dec;

    fn payment_with_metadata(metadata: serde_json::Map<String, serde_json::Value>) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            customer_id: None,
            amount: dec!(100.00),
            currency: "USD".to_string(),
            status: PaymentStatus::Captured,
            payment_method: PaymentMethod::CreditCard,
            idempotency_key: None,
            reference: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn refund_amount_defaults_to_full_amount() {
        let payment = payment_with_metadata(serde_json::Map::new());
        assert_eq!(refund_amount(&payment), dec!(100.00));
    }

    #[test]
    fn refund_amount_reads_metadata_string_and_number() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("refund_amount".into(), "25.50".into());
        assert_eq!(refund_amount(&payment_with_metadata(metadata)), dec!(25.50));

        let mut metadata = serde_json::Map::new();
        metadata.insert("refund_amount".into(), serde_json::json!(40.25));
        assert_eq!(refund_amount(&payment_with_metadata(metadata)), dec!(40.25));
    }

    #[test]
    fn request_details_follow_method() {
        let mut payment = payment_with_metadata(serde_json::Map::new());
        payment.payment_method = PaymentMethod::Upi;
        let req = authorization_request(&payment);
        assert!(req.upi_details.is_some());
        assert!(req.card_details.is_none());
        assert!(req.bank_details.is_none());
    }
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use payments_pipeline::domain::payment::{Payment, PaymentMethod, PaymentStatus};
use payments_pipeline::events::envelope::PaymentEvent;
use payments_pipeline::events::log::MemoryPublisher;
use payments_pipeline::processors::bank::BankProcessor;
use payments_pipeline::processors::card::CardProcessor;
use payments_pipeline::processors::upi::UpiProcessor;
use payments_pipeline::processors::{PaymentProcessor, ProcessorError, ProcessorSelector};
use payments_pipeline::service::orchestrator::PaymentOrchestrator;
use rust_decimal::Decimal;
use uuid::Uuid;

pub fn payment(
    merchant_id: Uuid,
    amount: Decimal,
    currency: &str,
    method: PaymentMethod,
    status: PaymentStatus,
) -> Payment {
    let now = Utc::now();
    Payment {
        id: Uuid::new_v4(),
        merchant_id,
        customer_id: Some(Uuid::new_v4()),
        amount,
        currency: currency.to_string(),
        status,
        payment_method: method,
        idempotency_key: None,
        reference: None,
        metadata: serde_json::Map::new(),
        created_at: now,
        updated_at: now,
    }
}

// Real simulated processors with the decline model pinned to one outcome.
pub struct FixedRateProcessors {
    pub approval_rate: f64,
    pub authorize_calls: Arc<AtomicUsize>,
}

impl FixedRateProcessors {
    pub fn approving() -> Self {
        Self {
            approval_rate: 1.0,
            authorize_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn declining() -> Self {
        Self {
            approval_rate: 0.0,
            authorize_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct CountingProcessor {
    inner: Box<dyn PaymentProcessor>,
    authorize_calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl PaymentProcessor for CountingProcessor {
    fn id(&self) -> &'static str {
        self.inner.id()
    }

    async fn authorize(
        &self,
        req: &payments_pipeline::processors::AuthorizationRequest,
    ) -> Result<payments_pipeline::processors::AuthorizationResponse, ProcessorError> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.authorize(req).await
    }

    async fn capture(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        self.inner.capture(payment_id, amount).await
    }

    async fn refund(&self, payment_id: Uuid, amount: Decimal) -> Result<(), ProcessorError> {
        self.inner.refund(payment_id, amount).await
    }
}

impl ProcessorSelector for FixedRateProcessors {
    fn select(&self, method: PaymentMethod) -> Result<Box<dyn PaymentProcessor>, ProcessorError> {
        let inner: Box<dyn PaymentProcessor> = match method {
            PaymentMethod::CreditCard | PaymentMethod::DebitCard => {
                Box::new(CardProcessor { approval_rate: self.approval_rate })
            }
            PaymentMethod::Upi => Box::new(UpiProcessor { approval_rate: self.approval_rate }),
            PaymentMethod::BankTransfer => Box::new(BankProcessor { approval_rate: self.approval_rate }),
            other => return Err(ProcessorError::InvalidPaymentMethod(other.as_str().to_string())),
        };
        Ok(Box::new(CountingProcessor {
            inner,
            authorize_calls: self.authorize_calls.clone(),
        }))
    }
}

// Replays every event the orchestrator emits back into it, the way the
// payments-topic consumer loop would.
pub async fn drive(orchestrator: &PaymentOrchestrator, publisher: &MemoryPublisher, topic: &str) {
    let mut processed = 0;
    loop {
        let messages = publisher.messages_for_topic(topic);
        if processed >= messages.len() {
            break;
        }
        let event: PaymentEvent = serde_json::from_value(messages[processed].payload.clone()).unwrap();
        processed += 1;
        orchestrator.handle_payment_event(&event).await.unwrap();
    }
}

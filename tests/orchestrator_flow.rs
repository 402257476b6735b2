use std::sync::atomic::Ordering;
use std::sync::Arc;

use payments_pipeline::domain::payment::{PaymentMethod, PaymentStatus};
use payments_pipeline::events::envelope::{
    FraudEvent, PaymentEvent, PAYMENT_AUTHORIZATION_FAILED, PAYMENT_AUTHORIZATION_REQUESTED,
    PAYMENT_AUTHORIZED, PAYMENT_CAPTURED, PAYMENT_CAPTURE_REQUESTED, PAYMENT_INITIATED,
    PAYMENT_REFUNDED, PAYMENT_REFUND_FAILED, PAYMENT_REFUND_REQUESTED,
};
use payments_pipeline::events::log::MemoryPublisher;
use payments_pipeline::repo::memory::MemoryStore;
use payments_pipeline::repo::Store;
use payments_pipeline::service::orchestrator::PaymentOrchestrator;
use rust_decimal_macros::dec;
use uuid::Uuid;

mod common;
use common::{drive, payment, FixedRateProcessors};

fn orchestrator(
    store: Arc<MemoryStore>,
    publisher: Arc<MemoryPublisher>,
    processors: FixedRateProcessors,
) -> PaymentOrchestrator {
    PaymentOrchestrator::new(store, publisher, Arc::new(processors), "payments".to_string())
}

fn new_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(dec!(2.5), dec!(100)))
}

#[tokio::test]
async fn happy_card_path_reaches_captured() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::approving());

    let p = payment(
        Uuid::new_v4(),
        dec!(1250.00),
        "USD",
        PaymentMethod::CreditCard,
        PaymentStatus::Initiated,
    );
    let payment_id = p.id;

    orch.handle_payment_event(&PaymentEvent::new(PAYMENT_INITIATED, p))
        .await
        .unwrap();
    drive(&orch, &publisher, "payments").await;

    let types = publisher.event_types("payments");
    assert_eq!(
        types,
        vec![
            PAYMENT_AUTHORIZATION_REQUESTED,
            PAYMENT_AUTHORIZED,
            PAYMENT_CAPTURE_REQUESTED,
            PAYMENT_CAPTURED,
        ]
    );

    for message in publisher.messages_for_topic("payments") {
        assert_eq!(message.key, payment_id.to_string());
    }

    let stored = store.payment(payment_id).unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
    assert!(stored.metadata_str("authorization_id").unwrap().starts_with("auth_"));
    assert_eq!(stored.metadata_str("processor_id"), Some("card-processor"));
}

#[tokio::test]
async fn declined_card_lands_in_failed() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::declining());

    let p = payment(
        Uuid::new_v4(),
        dec!(1250.00),
        "USD",
        PaymentMethod::CreditCard,
        PaymentStatus::Initiated,
    );
    let payment_id = p.id;

    orch.handle_payment_event(&PaymentEvent::new(PAYMENT_INITIATED, p))
        .await
        .unwrap();
    drive(&orch, &publisher, "payments").await;

    let types = publisher.event_types("payments");
    assert_eq!(types, vec![PAYMENT_AUTHORIZATION_REQUESTED, PAYMENT_AUTHORIZATION_FAILED]);

    let stored = store.payment(payment_id).unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.metadata_str("error"), Some("Card declined by issuer"));
    assert!(stored.metadata_str("failure_time").is_some());
}

#[tokio::test]
async fn unknown_method_fails_authorization() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::approving());

    let p = payment(
        Uuid::new_v4(),
        dec!(10.00),
        "USD",
        PaymentMethod::Crypto,
        PaymentStatus::Initiated,
    );
    let payment_id = p.id;

    orch.handle_payment_event(&PaymentEvent::new(PAYMENT_INITIATED, p))
        .await
        .unwrap();
    drive(&orch, &publisher, "payments").await;

    let stored = store.payment(payment_id).unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.metadata_str("error"), Some("invalid payment method: CRYPTO"));
    assert!(publisher
        .event_types("payments")
        .contains(&PAYMENT_AUTHORIZATION_FAILED.to_string()));
}

#[tokio::test]
async fn redelivered_authorization_does_not_double_charge() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let processors = FixedRateProcessors::approving();
    let calls = processors.authorize_calls.clone();
    let orch = orchestrator(store.clone(), publisher.clone(), processors);

    let p = payment(
        Uuid::new_v4(),
        dec!(500.00),
        "USD",
        PaymentMethod::CreditCard,
        PaymentStatus::Initiated,
    );
    let payment_id = p.id;
    store.upsert_payment(&p).await.unwrap();

    let command = PaymentEvent::new(PAYMENT_AUTHORIZATION_REQUESTED, p);
    orch.handle_payment_event(&command).await.unwrap();
    let status_after_first = store.payment(payment_id).unwrap().status;
    let metadata_after_first = store.payment(payment_id).unwrap().metadata;

    // Plain redelivery of the same command event.
    orch.handle_payment_event(&command).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stored = store.payment(payment_id).unwrap();
    assert_eq!(stored.status, status_after_first);
    assert_eq!(stored.metadata, metadata_after_first);
}

#[tokio::test]
async fn capture_for_captured_payment_is_a_noop() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::approving());

    let p = payment(
        Uuid::new_v4(),
        dec!(75.00),
        "USD",
        PaymentMethod::CreditCard,
        PaymentStatus::Captured,
    );
    let payment_id = p.id;
    store.upsert_payment(&p).await.unwrap();

    orch.handle_payment_event(&PaymentEvent::new(PAYMENT_CAPTURE_REQUESTED, p))
        .await
        .unwrap();

    assert!(publisher.messages().is_empty());
    assert_eq!(store.payment(payment_id).unwrap().status, PaymentStatus::Captured);
}

#[tokio::test]
async fn refund_from_initiated_is_rejected() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::approving());

    let p = payment(
        Uuid::new_v4(),
        dec!(30.00),
        "USD",
        PaymentMethod::Upi,
        PaymentStatus::Initiated,
    );
    let payment_id = p.id;
    store.upsert_payment(&p).await.unwrap();

    orch.handle_payment_event(&PaymentEvent::new(PAYMENT_REFUND_REQUESTED, p))
        .await
        .unwrap();

    let types = publisher.event_types("payments");
    assert_eq!(types, vec![PAYMENT_REFUND_FAILED]);
    // The stored payment is untouched; the rejection lives in the event.
    assert_eq!(store.payment(payment_id).unwrap().status, PaymentStatus::Initiated);
    assert!(store.payment(payment_id).unwrap().metadata_str("error").is_none());
}

#[tokio::test]
async fn refund_of_captured_payment_succeeds() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::approving());

    let mut p = payment(
        Uuid::new_v4(),
        dec!(80.00),
        "USD",
        PaymentMethod::CreditCard,
        PaymentStatus::Captured,
    );
    p.metadata.insert("refund_amount".into(), "25.00".into());
    let payment_id = p.id;
    store.upsert_payment(&p).await.unwrap();

    orch.handle_payment_event(&PaymentEvent::new(PAYMENT_REFUND_REQUESTED, p))
        .await
        .unwrap();

    let types = publisher.event_types("payments");
    assert_eq!(types, vec![PAYMENT_REFUNDED]);

    let stored = store.payment(payment_id).unwrap();
    assert_eq!(stored.status, PaymentStatus::Refunded);
    assert_eq!(stored.metadata_str("refund_amount"), Some("25.00"));
    assert!(stored.metadata_str("refund_id").is_some());
    assert!(stored.metadata_str("refund_time").is_some());

    let transactions = store.transactions_for(payment_id);
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].transaction_type, "REFUND");
}

#[tokio::test]
async fn fraud_verdict_aborts_in_flight_payment() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::approving());

    let p = payment(
        Uuid::new_v4(),
        dec!(15000.00),
        "USD",
        PaymentMethod::CreditCard,
        PaymentStatus::Authorized,
    );
    let payment_id = p.id;
    store.upsert_payment(&p).await.unwrap();

    let check = payments_pipeline::domain::fraud::FraudCheck {
        payment_id,
        merchant_id: p.merchant_id,
        customer_id: p.customer_id,
        risk_score: 0.675,
        is_fraudulent: true,
        reason: Some("Multiple risk factors detected".to_string()),
        checks: vec![],
        created_at: chrono::Utc::now(),
    };
    orch.handle_fraud_event(&FraudEvent::detected(check)).await.unwrap();

    let stored = store.payment(payment_id).unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert!(stored.metadata_str("fraud_check_id").is_some());
    assert_eq!(stored.metadata_str("error"), Some("payment flagged by fraud screening"));

    // Any further command is dropped.
    orch.handle_payment_event(&PaymentEvent::new(PAYMENT_CAPTURE_REQUESTED, stored))
        .await
        .unwrap();
    assert!(publisher.messages().is_empty());
    assert_eq!(store.payment(payment_id).unwrap().status, PaymentStatus::Failed);
}

#[tokio::test]
async fn terminal_payment_is_not_aborted_twice() {
    let store = new_store();
    let publisher = Arc::new(MemoryPublisher::new());
    let orch = orchestrator(store.clone(), publisher.clone(), FixedRateProcessors::approving());

    let p = payment(
        Uuid::new_v4(),
        dec!(10.00),
        "USD",
        PaymentMethod::Upi,
        PaymentStatus::Refunded,
    );
    let payment_id = p.id;
    store.upsert_payment(&p).await.unwrap();

    let check = payments_pipeline::domain::fraud::FraudCheck {
        payment_id,
        merchant_id: p.merchant_id,
        customer_id: None,
        risk_score: 0.9,
        is_fraudulent: true,
        reason: None,
        checks: vec![],
        created_at: chrono::Utc::now(),
    };
    orch.handle_fraud_event(&FraudEvent::detected(check)).await.unwrap();

    assert_eq!(store.payment(payment_id).unwrap().status, PaymentStatus::Refunded);
    assert!(store.transactions_for(payment_id).is_empty());
}

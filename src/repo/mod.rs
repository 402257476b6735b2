use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentStatus, TransactionRecord};
use crate::domain::settlement::{MerchantSettlementConfig, PaymentSummary, Settlement, SettlementStatus};

pub mod memory;
pub mod postgres;

// Shared capability surface for the workers. The orchestrator and the batcher
// never know which implementation is live; MOCK_MODE selects at startup.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn upsert_payment(&self, payment: &Payment) -> Result<()>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>>;

    // Moves a payment from an expected status to the next one, merging the
    // metadata patch. Returns false when the expected-status predicate did not
    // match, which is how concurrent redeliveries lose the race.
    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool>;

    // Forces any non-terminal payment to FAILED (fraud abort path).
    async fn fail_payment(
        &self,
        id: Uuid,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool>;

    async fn record_transaction(&self, record: &TransactionRecord) -> Result<()>;

    async fn mark_for_settlement(&self, payment_id: Uuid) -> Result<bool>;

    async fn eligible_payments(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PaymentSummary>>;

    async fn payment_ids_for_group(
        &self,
        merchant_id: Uuid,
        currency: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;

    // Persists the settlement and attaches the listed payments to it. A
    // payment already attached elsewhere is left alone.
    async fn create_settlement(&self, settlement: &Settlement, payment_ids: &[Uuid]) -> Result<()>;

    async fn update_settlement_status(&self, id: Uuid, status: SettlementStatus) -> Result<()>;

    async fn settle_attached_payments(&self, settlement_id: Uuid) -> Result<u64>;

    async fn release_attached_payments(&self, settlement_id: Uuid) -> Result<u64>;

    async fn merchant_settlement_config(&self, merchant_id: Uuid) -> Result<MerchantSettlementConfig>;
}

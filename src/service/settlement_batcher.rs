use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::domain::payment::PaymentStatus;
use crate::domain::settlement::{PaymentSummary, Settlement, SettlementStatus};
use crate::events::envelope::{
    PaymentEvent, SettlementEvent, PAYMENT_CAPTURED, SETTLEMENT_COMPLETED, SETTLEMENT_CREATED,
    SETTLEMENT_FAILED,
};
use crate::events::log::EventPublisher;
use crate::repo::Store;
use crate::service::bank_transfer::BankTransferAdapter;

pub struct SettlementBatcher {
    pub store: Arc<dyn Store>,
    pub publisher: Arc<dyn EventPublisher>,
    pub bank: Arc<dyn BankTransferAdapter>,
    pub settlement_topic: String,
    pub default_fee_percent: Decimal,
    tick_lock: tokio::sync::Mutex<()>,
}

impl SettlementBatcher {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        bank: Arc<dyn BankTransferAdapter>,
        settlement_topic: String,
        default_fee_percent: Decimal,
    ) -> Self {
        Self {
            store,
            publisher,
            bank,
            settlement_topic,
            default_fee_percent,
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    // Captured payments become settlement-ready; everything else on the
    // payments topic is ignored.
    pub async fn handle_payment_event(&self, event: &PaymentEvent) -> Result<()> {
        if event.event_type != PAYMENT_CAPTURED {
            return Ok(());
        }
        if event.payment.status != PaymentStatus::Captured {
            tracing::info!(payment_id = %event.payment.id, status = event.payment.status.as_str(),
                "capture event without captured snapshot, skipping");
            return Ok(());
        }

        let marked = self.store.mark_for_settlement(event.payment.id).await?;
        if marked {
            tracing::info!(payment_id = %event.payment.id, "payment marked for settlement");
        }
        Ok(())
    }

    // One timer tick. A tick still in progress makes this a no-op instead of
    // overlapping it.
    pub async fn run_tick(&self, window: Duration) {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            tracing::warn!("previous settlement tick still running, skipping");
            return;
        };

        let end = Utc::now();
        let start = end - window;
        match self.run_batch(start, end).await {
            Ok(settlements) => {
                tracing::info!(count = settlements.len(), "settlement tick finished");
            }
            Err(err) => {
                tracing::error!(error = %err, "settlement tick failed");
            }
        }
    }

    pub async fn run_batch(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Settlement>> {
        let groups = self.store.eligible_payments(start, end).await?;
        tracing::info!(groups = groups.len(), %start, %end, "creating settlement batch");

        let mut settlements = Vec::new();
        for summary in groups {
            // One group's failure must not abort the rest of the tick.
            match self.settle_group(&summary, start, end).await {
                Ok(Some(settlement)) => settlements.push(settlement),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(merchant_id = %summary.merchant_id, currency = %summary.currency,
                        error = %err, "failed to settle group");
                }
            }
        }
        Ok(settlements)
    }

    async fn settle_group(
        &self,
        summary: &PaymentSummary,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Settlement>> {
        let config = self.store.merchant_settlement_config(summary.merchant_id).await?;

        // Inclusive minimum: a group exactly at the threshold settles.
        if summary.total_amount < config.minimum_settlement_amount {
            tracing::info!(merchant_id = %summary.merchant_id,
                total = %summary.total_amount, minimum = %config.minimum_settlement_amount,
                "group below minimum settlement amount, skipping");
            return Ok(None);
        }

        let payment_ids = self
            .store
            .payment_ids_for_group(summary.merchant_id, &summary.currency, start, end)
            .await?;
        if payment_ids.is_empty() {
            return Ok(None);
        }

        let fee_percent = config.effective_fee_percent(self.default_fee_percent);
        let settlement = Settlement::build(summary, &config, fee_percent);
        self.store.create_settlement(&settlement, &payment_ids).await?;
        tracing::info!(settlement_id = %settlement.id, merchant_id = %settlement.merchant_id,
            gross = %settlement.amount, net = %settlement.net_amount, currency = %settlement.currency,
            "created settlement");

        self.publish(SETTLEMENT_CREATED, settlement.clone()).await?;
        let settled = self.process_settlement(settlement).await?;
        Ok(Some(settled))
    }

    // Pending -> Processing -> Completed | Failed, each transition persisted
    // before the matching emission.
    async fn process_settlement(&self, mut settlement: Settlement) -> Result<Settlement> {
        self.store
            .update_settlement_status(settlement.id, SettlementStatus::Processing)
            .await?;
        settlement.status = SettlementStatus::Processing;

        let transfer = self
            .bank
            .transfer(&settlement.bank_account_id, settlement.net_amount, &settlement.currency)
            .await;

        match transfer {
            Ok(()) => {
                self.store
                    .update_settlement_status(settlement.id, SettlementStatus::Completed)
                    .await?;
                settlement.status = SettlementStatus::Completed;
                let settled = self.store.settle_attached_payments(settlement.id).await?;
                tracing::info!(settlement_id = %settlement.id, payments = settled, "settlement completed");
                self.publish(SETTLEMENT_COMPLETED, settlement.clone()).await?;
            }
            Err(err) => {
                tracing::error!(settlement_id = %settlement.id, error = %err, "settlement transfer failed");
                self.store
                    .update_settlement_status(settlement.id, SettlementStatus::Failed)
                    .await?;
                settlement.status = SettlementStatus::Failed;
                // Released payments stay Captured and eligible for the next tick.
                self.store.release_attached_payments(settlement.id).await?;
                self.publish(SETTLEMENT_FAILED, settlement.clone()).await?;
            }
        }

        Ok(settlement)
    }

    async fn publish(&self, event_type: &str, settlement: Settlement) -> Result<()> {
        let event = SettlementEvent::new(event_type, settlement);
        let key = event.partition_key();
        let payload = serde_json::to_vec(&event)?;
        self.publisher.publish(&self.settlement_topic, &key, payload).await?;
        Ok(())
    }
}

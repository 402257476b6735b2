use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentStatus, TransactionRecord};
use crate::domain::settlement::{
    MerchantSettlementConfig, PaymentSummary, Settlement, SettlementStatus,
};
use crate::repo::Store;

#[derive(Default)]
struct Inner {
    payments: HashMap<Uuid, Payment>,
    settlement_ready: HashSet<Uuid>,
    attachments: HashMap<Uuid, Uuid>,
    settlements: HashMap<Uuid, Settlement>,
    configs: HashMap<Uuid, MerchantSettlementConfig>,
    transactions: Vec<TransactionRecord>,
}

// Deterministic stand-in for the database, selected by MOCK_MODE and used
// throughout the integration tests.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pub default_fee_percent: Decimal,
    pub default_minimum_amount: Decimal,
}

impl MemoryStore {
    pub fn new(default_fee_percent: Decimal, default_minimum_amount: Decimal) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            default_fee_percent,
            default_minimum_amount,
        }
    }

    pub fn insert_config(&self, config: MerchantSettlementConfig) {
        self.inner.lock().unwrap().configs.insert(config.merchant_id, config);
    }

    pub fn payment(&self, id: Uuid) -> Option<Payment> {
        self.inner.lock().unwrap().payments.get(&id).cloned()
    }

    pub fn settlement(&self, id: Uuid) -> Option<Settlement> {
        self.inner.lock().unwrap().settlements.get(&id).cloned()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        let mut all: Vec<Settlement> = self.inner.lock().unwrap().settlements.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    pub fn attachment(&self, payment_id: Uuid) -> Option<Uuid> {
        self.inner.lock().unwrap().attachments.get(&payment_id).copied()
    }

    pub fn is_settlement_ready(&self, payment_id: Uuid) -> bool {
        self.inner.lock().unwrap().settlement_ready.contains(&payment_id)
    }

    pub fn transactions_for(&self, payment_id: Uuid) -> Vec<TransactionRecord> {
        self.inner
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn upsert_payment(&self, payment: &Payment) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.payments.entry(payment.id).or_insert_with(|| payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.inner.lock().unwrap().payments.get(&id).cloned())
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(payment) = inner.payments.get_mut(&id) else {
            return Ok(false);
        };
        if payment.status != from {
            return Ok(false);
        }
        payment.status = to;
        for (key, value) in metadata_patch {
            payment.metadata.insert(key.clone(), value.clone());
        }
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail_payment(
        &self,
        id: Uuid,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(payment) = inner.payments.get_mut(&id) else {
            return Ok(false);
        };
        if payment.status.is_terminal() {
            return Ok(false);
        }
        payment.status = PaymentStatus::Failed;
        for (key, value) in metadata_patch {
            payment.metadata.insert(key.clone(), value.clone());
        }
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_transaction(&self, record: &TransactionRecord) -> Result<()> {
        self.inner.lock().unwrap().transactions.push(record.clone());
        Ok(())
    }

    async fn mark_for_settlement(&self, payment_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let captured = inner
            .payments
            .get(&payment_id)
            .is_some_and(|p| p.status == PaymentStatus::Captured);
        if !captured {
            return Ok(false);
        }
        inner.settlement_ready.insert(payment_id);
        Ok(true)
    }

    async fn eligible_payments(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PaymentSummary>> {
        let inner = self.inner.lock().unwrap();
        let mut groups: BTreeMap<(Uuid, String), PaymentSummary> = BTreeMap::new();

        for payment in inner.payments.values() {
            if payment.status != PaymentStatus::Captured
                || !inner.settlement_ready.contains(&payment.id)
                || inner.attachments.contains_key(&payment.id)
                || payment.created_at < start
                || payment.created_at > end
            {
                continue;
            }

            let key = (payment.merchant_id, payment.currency.clone());
            groups
                .entry(key)
                .and_modify(|summary| {
                    summary.total_amount += payment.amount;
                    summary.payment_count += 1;
                    summary.earliest_payment = summary.earliest_payment.min(payment.created_at);
                    summary.latest_payment = summary.latest_payment.max(payment.created_at);
                })
                .or_insert_with(|| PaymentSummary {
                    merchant_id: payment.merchant_id,
                    currency: payment.currency.clone(),
                    total_amount: payment.amount,
                    payment_count: 1,
                    earliest_payment: payment.created_at,
                    latest_payment: payment.created_at,
                });
        }

        Ok(groups.into_values().collect())
    }

    async fn payment_ids_for_group(
        &self,
        merchant_id: Uuid,
        currency: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<Uuid> = inner
            .payments
            .values()
            .filter(|p| {
                p.merchant_id == merchant_id
                    && p.currency == currency
                    && p.status == PaymentStatus::Captured
                    && inner.settlement_ready.contains(&p.id)
                    && !inner.attachments.contains_key(&p.id)
                    && p.created_at >= start
                    && p.created_at <= end
            })
            .map(|p| p.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_settlement(&self, settlement: &Settlement, payment_ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.settlements.insert(settlement.id, settlement.clone());
        for id in payment_ids {
            let captured = inner
                .payments
                .get(id)
                .is_some_and(|p| p.status == PaymentStatus::Captured);
            if captured && !inner.attachments.contains_key(id) {
                inner.attachments.insert(*id, settlement.id);
            }
        }
        Ok(())
    }

    async fn update_settlement_status(&self, id: Uuid, status: SettlementStatus) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(settlement) = inner.settlements.get_mut(&id) {
            settlement.status = status;
            settlement.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn settle_attached_payments(&self, settlement_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<Uuid> = inner
            .attachments
            .iter()
            .filter(|(_, sid)| **sid == settlement_id)
            .map(|(pid, _)| *pid)
            .collect();

        let mut updated = 0;
        for id in ids {
            if let Some(payment) = inner.payments.get_mut(&id) {
                if payment.status == PaymentStatus::Captured {
                    payment.status = PaymentStatus::Settled;
                    payment.updated_at = Utc::now();
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn release_attached_payments(&self, settlement_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<Uuid> = inner
            .attachments
            .iter()
            .filter(|(pid, sid)| {
                **sid == settlement_id
                    && inner
                        .payments
                        .get(pid)
                        .is_some_and(|p| p.status == PaymentStatus::Captured)
            })
            .map(|(pid, _)| *pid)
            .collect();

        let released = ids.len() as u64;
        for id in ids {
            inner.attachments.remove(&id);
        }
        Ok(released)
    }

    async fn merchant_settlement_config(&self, merchant_id: Uuid) -> Result<MerchantSettlementConfig> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.configs.get(&merchant_id).cloned().unwrap_or_else(|| {
            MerchantSettlementConfig::defaults(
                merchant_id,
                self.default_fee_percent,
                self.default_minimum_amount,
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentMethod;
    use rust_decimal_macros::dec;

    fn captured_payment(merchant_id: Uuid, amount: Decimal) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            merchant_id,
            customer_id: None,
            amount,
            currency: "USD".to_string(),
            status: PaymentStatus::Captured,
            payment_method: PaymentMethod::CreditCard,
            idempotency_key: None,
            reference: None,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn transition_requires_expected_status() {
        let store = MemoryStore::new(dec!(2.5), dec!(100));
        let payment = captured_payment(Uuid::new_v4(), dec!(10.00));
        let id = payment.id;
        store.upsert_payment(&payment).await.unwrap();

        let patch = serde_json::Map::new();
        let moved = store
            .transition_payment(id, PaymentStatus::Initiated, PaymentStatus::Authorized, &patch)
            .await
            .unwrap();
        assert!(!moved);
        assert_eq!(store.payment(id).unwrap().status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn mark_for_settlement_is_idempotent() {
        let store = MemoryStore::new(dec!(2.5), dec!(100));
        let payment = captured_payment(Uuid::new_v4(), dec!(10.00));
        let id = payment.id;
        store.upsert_payment(&payment).await.unwrap();

        assert!(store.mark_for_settlement(id).await.unwrap());
        assert!(store.mark_for_settlement(id).await.unwrap());
        assert!(store.is_settlement_ready(id));
    }

    #[tokio::test]
    async fn eligibility_excludes_attached_payments() {
        let store = MemoryStore::new(dec!(2.5), dec!(100));
        let merchant = Uuid::new_v4();
        let p1 = captured_payment(merchant, dec!(150.00));
        let p2 = captured_payment(merchant, dec!(250.00));
        store.upsert_payment(&p1).await.unwrap();
        store.upsert_payment(&p2).await.unwrap();
        store.mark_for_settlement(p1.id).await.unwrap();
        store.mark_for_settlement(p2.id).await.unwrap();

        let window_start = Utc::now() - chrono::Duration::hours(1);
        let window_end = Utc::now() + chrono::Duration::hours(1);

        let summary = store.merchant_settlement_config(merchant).await.unwrap();
        let settlement = Settlement::build(
            &store.eligible_payments(window_start, window_end).await.unwrap()[0],
            &summary,
            dec!(2.5),
        );
        store.create_settlement(&settlement, &[p1.id]).await.unwrap();

        let groups = store.eligible_payments(window_start, window_end).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].total_amount, dec!(250.00));
        assert_eq!(groups[0].payment_count, 1);
    }
}

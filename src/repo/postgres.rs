use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentMethod, PaymentStatus, TransactionRecord};
use crate::domain::settlement::{
    MerchantSettlementConfig, PaymentSummary, Settlement, SettlementCycle, SettlementMethod,
    SettlementStatus,
};
use crate::repo::Store;

#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
    pub default_fee_percent: Decimal,
    pub default_minimum_amount: Decimal,
}

const NON_TERMINAL: [&str; 3] = ["INITIATED", "AUTHORIZED", "CAPTURED"];

fn payment_from_row(row: &sqlx::postgres::PgRow) -> Result<Payment> {
    let status_raw: String = row.get("status");
    let method_raw: String = row.get("payment_method");
    let metadata: serde_json::Value = row.get("metadata");
    Ok(Payment {
        id: row.get("id"),
        merchant_id: row.get("merchant_id"),
        customer_id: row.get("customer_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: PaymentStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown payment status {:?}", status_raw))?,
        payment_method: PaymentMethod::parse(&method_raw)
            .ok_or_else(|| anyhow!("unknown payment method {:?}", method_raw))?,
        idempotency_key: row.get("idempotency_key"),
        reference: row.get("reference"),
        metadata: metadata.as_object().cloned().unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn upsert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, merchant_id, customer_id, amount, currency, status, payment_method,
                idempotency_key, reference, metadata, settlement_ready, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(payment.id)
        .bind(payment.merchant_id)
        .bind(payment.customer_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.payment_method.as_str())
        .bind(&payment.idempotency_key)
        .bind(&payment.reference)
        .bind(serde_json::Value::Object(payment.metadata.clone()))
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, merchant_id, customer_id, amount, currency, status, payment_method,
                   idempotency_key, reference, metadata, created_at, updated_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $3, metadata = metadata || $4, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(serde_json::Value::Object(metadata_patch.clone()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_payment(
        &self,
        id: Uuid,
        metadata_patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'FAILED', metadata = metadata || $2, updated_at = now()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(serde_json::Value::Object(metadata_patch.clone()))
        .bind(&NON_TERMINAL[..])
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_transaction(&self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, payment_id, transaction_type, status, gateway_response, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.payment_id)
        .bind(&record.transaction_type)
        .bind(record.status.as_str())
        .bind(&record.gateway_response)
        .bind(&record.error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_for_settlement(&self, payment_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET settlement_ready = TRUE, updated_at = now()
            WHERE id = $1 AND status = 'CAPTURED'
            "#,
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn eligible_payments(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PaymentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT merchant_id, currency,
                   SUM(amount) AS total_amount,
                   COUNT(*) AS payment_count,
                   MIN(created_at) AS earliest_payment,
                   MAX(created_at) AS latest_payment
            FROM payments
            WHERE settlement_ready = TRUE
              AND status = 'CAPTURED'
              AND settlement_id IS NULL
              AND created_at BETWEEN $1 AND $2
            GROUP BY merchant_id, currency
            ORDER BY merchant_id, currency
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PaymentSummary {
                merchant_id: row.get("merchant_id"),
                currency: row.get("currency"),
                total_amount: row.get("total_amount"),
                payment_count: row.get("payment_count"),
                earliest_payment: row.get("earliest_payment"),
                latest_payment: row.get("latest_payment"),
            })
            .collect())
    }

    async fn payment_ids_for_group(
        &self,
        merchant_id: Uuid,
        currency: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM payments
            WHERE merchant_id = $1
              AND currency = $2
              AND settlement_ready = TRUE
              AND status = 'CAPTURED'
              AND settlement_id IS NULL
              AND created_at BETWEEN $3 AND $4
            "#,
        )
        .bind(merchant_id)
        .bind(currency)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn create_settlement(&self, settlement: &Settlement, payment_ids: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO settlements (
                id, merchant_id, amount, currency, status, payment_count,
                fee_amount, tax_amount, net_amount, settlement_date,
                bank_account_id, settlement_method, reference, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(settlement.id)
        .bind(settlement.merchant_id)
        .bind(settlement.amount)
        .bind(&settlement.currency)
        .bind(settlement.status.as_str())
        .bind(settlement.payment_count)
        .bind(settlement.fee_amount)
        .bind(settlement.tax_amount)
        .bind(settlement.net_amount)
        .bind(settlement.settlement_date)
        .bind(&settlement.bank_account_id)
        .bind(settlement.settlement_method.as_str())
        .bind(&settlement.reference)
        .bind(settlement.created_at)
        .bind(settlement.updated_at)
        .execute(tx.as_mut())
        .await?;

        sqlx::query(
            r#"
            UPDATE payments
            SET settlement_id = $1, updated_at = now()
            WHERE id = ANY($2) AND settlement_id IS NULL AND status = 'CAPTURED'
            "#,
        )
        .bind(settlement.id)
        .bind(payment_ids)
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_settlement_status(&self, id: Uuid, status: SettlementStatus) -> Result<()> {
        sqlx::query("UPDATE settlements SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn settle_attached_payments(&self, settlement_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'SETTLED', updated_at = now()
            WHERE settlement_id = $1 AND status = 'CAPTURED'
            "#,
        )
        .bind(settlement_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_attached_payments(&self, settlement_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET settlement_id = NULL, updated_at = now()
            WHERE settlement_id = $1 AND status = 'CAPTURED'
            "#,
        )
        .bind(settlement_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn merchant_settlement_config(&self, merchant_id: Uuid) -> Result<MerchantSettlementConfig> {
        let row = sqlx::query(
            r#"
            SELECT merchant_id, settlement_cycle, preferred_settlement_day, settlement_method,
                   bank_account_id, fee_percent, minimum_settlement_amount, created_at, updated_at
            FROM merchant_settlement_config
            WHERE merchant_id = $1
            "#,
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(MerchantSettlementConfig::defaults(
                merchant_id,
                self.default_fee_percent,
                self.default_minimum_amount,
            ));
        };

        let cycle_raw: String = row.get("settlement_cycle");
        let method_raw: String = row.get("settlement_method");
        Ok(MerchantSettlementConfig {
            merchant_id: row.get("merchant_id"),
            settlement_cycle: match cycle_raw.as_str() {
                "WEEKLY" => SettlementCycle::Weekly,
                "MONTHLY" => SettlementCycle::Monthly,
                _ => SettlementCycle::Daily,
            },
            preferred_settlement_day: row.get("preferred_settlement_day"),
            settlement_method: SettlementMethod::parse(&method_raw)
                .unwrap_or(SettlementMethod::BankTransfer),
            bank_account_id: row.get("bank_account_id"),
            fee_percent: row.get("fee_percent"),
            minimum_settlement_amount: row.get("minimum_settlement_amount"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

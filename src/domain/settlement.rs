use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::money::fee_breakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Processing => "PROCESSING",
            SettlementStatus::Completed => "COMPLETED",
            SettlementStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<SettlementStatus> {
        match s {
            "PENDING" => Some(SettlementStatus::Pending),
            "PROCESSING" => Some(SettlementStatus::Processing),
            "COMPLETED" => Some(SettlementStatus::Completed),
            "FAILED" => Some(SettlementStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementMethod {
    BankTransfer,
    Wallet,
}

impl SettlementMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementMethod::BankTransfer => "BANK_TRANSFER",
            SettlementMethod::Wallet => "WALLET",
        }
    }

    pub fn parse(s: &str) -> Option<SettlementMethod> {
        match s {
            "BANK_TRANSFER" => Some(SettlementMethod::BankTransfer),
            "WALLET" => Some(SettlementMethod::Wallet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: SettlementStatus,
    pub payment_count: i64,
    pub fee_amount: Decimal,
    pub tax_amount: Decimal,
    pub net_amount: Decimal,
    pub settlement_date: DateTime<Utc>,
    pub bank_account_id: String,
    pub settlement_method: SettlementMethod,
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    pub fn build(summary: &PaymentSummary, config: &MerchantSettlementConfig, fee_percent: Decimal) -> Self {
        let breakdown = fee_breakdown(summary.total_amount, fee_percent);
        let id = Uuid::new_v4();
        let now = Utc::now();
        Settlement {
            id,
            merchant_id: summary.merchant_id,
            amount: breakdown.gross,
            currency: summary.currency.clone(),
            status: SettlementStatus::Pending,
            payment_count: summary.payment_count,
            fee_amount: breakdown.fee,
            tax_amount: breakdown.tax,
            net_amount: breakdown.net,
            settlement_date: now,
            bank_account_id: config.bank_account_id.clone(),
            settlement_method: config.settlement_method,
            reference: settlement_reference(),
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn settlement_reference() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("SET_{}", &id[..8])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub merchant_id: Uuid,
    pub currency: String,
    pub total_amount: Decimal,
    pub payment_count: i64,
    pub earliest_payment: DateTime<Utc>,
    pub latest_payment: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementCycle {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantSettlementConfig {
    pub merchant_id: Uuid,
    pub settlement_cycle: SettlementCycle,
    pub preferred_settlement_day: i32,
    pub settlement_method: SettlementMethod,
    pub bank_account_id: String,
    pub fee_percent: Decimal,
    pub minimum_settlement_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MerchantSettlementConfig {
    pub fn defaults(merchant_id: Uuid, fee_percent: Decimal, minimum_settlement_amount: Decimal) -> Self {
        let now = Utc::now();
        let short = merchant_id.simple().to_string();
        MerchantSettlementConfig {
            merchant_id,
            settlement_cycle: SettlementCycle::Daily,
            preferred_settlement_day: 1,
            settlement_method: SettlementMethod::BankTransfer,
            bank_account_id: format!("bank_acc_{}", &short[..8]),
            fee_percent,
            minimum_settlement_amount,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn effective_fee_percent(&self, default_fee_percent: Decimal) -> Decimal {
        if self.fee_percent > Decimal::ZERO {
            self.fee_percent
        } else {
            default_fee_percent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn summary(total: Decimal) -> PaymentSummary {
        PaymentSummary {
            merchant_id: Uuid::new_v4(),
            currency: "USD".to_string(),
            total_amount: total,
            payment_count: 3,
            earliest_payment: Utc::now(),
            latest_payment: Utc::now(),
        }
    }

    #[test]
    fn build_computes_fee_tax_net() {
        let s = summary(dec!(1000.25));
        let cfg = MerchantSettlementConfig::defaults(s.merchant_id, dec!(2.5), dec!(100));
        let settlement = Settlement::build(&s, &cfg, dec!(2.5));
        assert_eq!(settlement.amount, dec!(1000.25));
        assert_eq!(settlement.fee_amount, dec!(25.01));
        assert_eq!(settlement.tax_amount, dec!(4.50));
        assert_eq!(settlement.net_amount, dec!(970.74));
        assert_eq!(settlement.status, SettlementStatus::Pending);
        assert!(settlement.reference.starts_with("SET_"));
        assert_eq!(settlement.reference.len(), "SET_".len() + 8);
    }

    #[test]
    fn nonpositive_fee_percent_falls_back_to_default() {
        let mut cfg = MerchantSettlementConfig::defaults(Uuid::new_v4(), dec!(0), dec!(100));
        assert_eq!(cfg.effective_fee_percent(dec!(2.5)), dec!(2.5));
        cfg.fee_percent = dec!(1.75);
        assert_eq!(cfg.effective_fee_percent(dec!(2.5)), dec!(1.75));
    }
}

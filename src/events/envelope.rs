use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::fraud::FraudCheck;
use crate::domain::payment::Payment;
use crate::domain::settlement::Settlement;

pub const PAYMENT_INITIATED: &str = "payment.initiated";
pub const PAYMENT_AUTHORIZATION_REQUESTED: &str = "payment.authorization.requested";
pub const PAYMENT_CAPTURE_REQUESTED: &str = "payment.capture.requested";
pub const PAYMENT_REFUND_REQUESTED: &str = "payment.refund.requested";
pub const PAYMENT_AUTHORIZED: &str = "payment.authorized";
pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const PAYMENT_REFUNDED: &str = "payment.refunded";
pub const PAYMENT_AUTHORIZATION_FAILED: &str = "payment.authorization.failed";
pub const PAYMENT_CAPTURE_FAILED: &str = "payment.capture.failed";
pub const PAYMENT_REFUND_FAILED: &str = "payment.refund.failed";

pub const FRAUD_DETECTED: &str = "fraud.detected";

pub const SETTLEMENT_CREATED: &str = "settlement.created";
pub const SETTLEMENT_COMPLETED: &str = "settlement.completed";
pub const SETTLEMENT_FAILED: &str = "settlement.failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payment: Payment,
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(event_type: &str, payment: Payment) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payment,
            timestamp: Utc::now(),
        }
    }

    pub fn partition_key(&self) -> String {
        self.payment.id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub fraud_check: FraudCheck,
    pub timestamp: DateTime<Utc>,
}

impl FraudEvent {
    pub fn detected(fraud_check: FraudCheck) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: FRAUD_DETECTED.to_string(),
            fraud_check,
            timestamp: Utc::now(),
        }
    }

    pub fn partition_key(&self) -> String {
        self.fraud_check.payment_id.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub settlement: Settlement,
    pub timestamp: DateTime<Utc>,
}

impl SettlementEvent {
    pub fn new(event_type: &str, settlement: Settlement) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            settlement,
            timestamp: Utc::now(),
        }
    }

    pub fn partition_key(&self) -> String {
        self.settlement.id.to_string()
    }
}

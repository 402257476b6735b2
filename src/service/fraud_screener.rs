use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::fraud::{FraudCheck, FraudCheckItem};
use crate::domain::payment::{Payment, PaymentMethod};
use crate::events::envelope::{
    FraudEvent, PaymentEvent, PAYMENT_AUTHORIZED, PAYMENT_CAPTURED, PAYMENT_INITIATED,
};
use crate::events::log::EventPublisher;

pub trait VelocityProvider: Send + Sync {
    fn record(&self, customer_id: Option<Uuid>, at: DateTime<Utc>);
    fn score(&self, customer_id: Option<Uuid>, now: DateTime<Utc>) -> f64;
}

// Bounded per-customer counter over the trailing hour; at most MAX_SAMPLES
// timestamps are retained per customer.
pub struct SlidingVelocity {
    samples: Mutex<HashMap<Uuid, VecDeque<DateTime<Utc>>>>,
}

const MAX_SAMPLES: usize = 32;

impl SlidingVelocity {
    pub fn new() -> Self {
        Self { samples: Mutex::new(HashMap::new()) }
    }
}

impl Default for SlidingVelocity {
    fn default() -> Self {
        Self::new()
    }
}

impl VelocityProvider for SlidingVelocity {
    fn record(&self, customer_id: Option<Uuid>, at: DateTime<Utc>) {
        let Some(customer_id) = customer_id else { return };
        let mut samples = self.samples.lock().unwrap();
        let queue = samples.entry(customer_id).or_default();
        queue.push_back(at);
        while queue.len() > MAX_SAMPLES {
            queue.pop_front();
        }
    }

    fn score(&self, customer_id: Option<Uuid>, now: DateTime<Utc>) -> f64 {
        let Some(customer_id) = customer_id else {
            return 0.5;
        };
        let mut samples = self.samples.lock().unwrap();
        let Some(queue) = samples.get_mut(&customer_id) else {
            return 0.1;
        };
        let floor = now - Duration::hours(1);
        while queue.front().is_some_and(|t| *t < floor) {
            queue.pop_front();
        }
        match queue.len() {
            0..=2 => 0.1,
            3..=5 => 0.3,
            6..=9 => 0.6,
            _ => 0.9,
        }
    }
}

pub struct FraudAnalyzer {
    pub threshold: f64,
    pub high_risk_regions: Vec<String>,
    pub velocity: Arc<dyn VelocityProvider>,
}

impl FraudAnalyzer {
    pub fn analyze(&self, payment: &Payment) -> FraudCheck {
        let now = Utc::now();
        self.velocity.record(payment.customer_id, now);

        let checks = vec![
            check_amount(payment),
            check_velocity(self.velocity.as_ref(), payment, now),
            check_geolocation(payment, &self.high_risk_regions),
            check_payment_method(payment),
        ];

        let risk_score = checks.iter().map(|c| c.score).sum::<f64>() / checks.len() as f64;
        let is_fraudulent = risk_score > self.threshold;

        FraudCheck {
            payment_id: payment.id,
            merchant_id: payment.merchant_id,
            customer_id: payment.customer_id,
            risk_score,
            is_fraudulent,
            reason: is_fraudulent.then(|| "Multiple risk factors detected".to_string()),
            checks,
            created_at: now,
        }
    }
}

fn check_amount(payment: &Payment) -> FraudCheckItem {
    let (score, info) = if payment.amount > Decimal::from(10_000) {
        (0.8, "Unusually large transaction amount")
    } else if payment.amount > Decimal::from(5_000) {
        (0.5, "Larger than average transaction amount")
    } else {
        (0.1, "Normal transaction amount")
    };
    FraudCheckItem::new("amount_check", score, info)
}

fn check_velocity(velocity: &dyn VelocityProvider, payment: &Payment, now: DateTime<Utc>) -> FraudCheckItem {
    let score = velocity.score(payment.customer_id, now);
    let info = if score > 0.3 {
        "Multiple transactions detected in a short period"
    } else {
        "Normal transaction frequency"
    };
    FraudCheckItem::new("velocity_check", score, info)
}

fn check_geolocation(payment: &Payment, high_risk_regions: &[String]) -> FraudCheckItem {
    let Some(location) = payment.metadata_str("location") else {
        return FraudCheckItem::new("geolocation_check", 0.5, "No location data provided");
    };

    let location = location.to_lowercase();
    if high_risk_regions.iter().any(|region| location.contains(region)) {
        FraudCheckItem::new("geolocation_check", 0.9, "Transaction from high-risk region")
    } else {
        FraudCheckItem::new("geolocation_check", 0.2, "Transaction from normal region")
    }
}

fn check_payment_method(payment: &Payment) -> FraudCheckItem {
    let (score, info) = match payment.payment_method {
        PaymentMethod::CreditCard | PaymentMethod::DebitCard => (0.4, "Card payment - moderate risk"),
        PaymentMethod::Upi => (0.2, "UPI payment - lower risk"),
        PaymentMethod::BankTransfer => (0.1, "Bank transfer - lower risk"),
        PaymentMethod::Crypto => (0.7, "Crypto payment - higher risk"),
        _ => (0.5, "Unknown payment method risk profile"),
    };
    FraudCheckItem::new("payment_method_check", score, info)
}

pub struct FraudScreener {
    pub analyzer: FraudAnalyzer,
    pub publisher: Arc<dyn EventPublisher>,
    pub fraud_topic: String,
}

impl FraudScreener {
    pub fn wants(event_type: &str) -> bool {
        matches!(event_type, PAYMENT_INITIATED | PAYMENT_AUTHORIZED | PAYMENT_CAPTURED)
    }

    // Scores the payment and publishes fraud.detected on a positive verdict.
    // Returns the check so callers can log or assert on it.
    pub async fn handle_payment_event(&self, event: &PaymentEvent) -> Result<Option<FraudCheck>> {
        if !Self::wants(&event.event_type) {
            return Ok(None);
        }

        let check = self.analyzer.analyze(&event.payment);
        if !check.is_fraudulent {
            tracing::info!(payment_id = %check.payment_id, risk_score = check.risk_score,
                "payment passed fraud checks");
            return Ok(Some(check));
        }

        tracing::warn!(payment_id = %check.payment_id, risk_score = check.risk_score,
            "fraud detected");
        let fraud_event = FraudEvent::detected(check.clone());
        let key = fraud_event.partition_key();
        let payload = serde_json::to_vec(&fraud_event)?;
        self.publisher.publish(&self.fraud_topic, &key, payload).await?;
        Ok(Some(check))
    }
}

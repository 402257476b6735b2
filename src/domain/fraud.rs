use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudCheck {
    pub payment_id: Uuid,
    pub merchant_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
    pub risk_score: f64,
    pub is_fraudulent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub checks: Vec<FraudCheckItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudCheckItem {
    #[serde(rename = "type")]
    pub check_type: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl FraudCheckItem {
    pub fn new(check_type: &str, score: f64, info: &str) -> Self {
        Self {
            check_type: check_type.to_string(),
            score,
            info: Some(info.to_string()),
        }
    }
}

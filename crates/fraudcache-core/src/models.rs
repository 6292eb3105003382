//! Payload shapes exchanged with the prediction backend and the platform's
//! notification surface. The backend itself is an external collaborator;
//! only its request/response contract is modelled here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The backend rejects anything other than exactly this many features.
pub const FEATURE_COUNT: usize = 30;

pub const PUSH_TITLE: &str = "Fraud Detection Alert";
const PUSH_DEFAULT_BODY: &str = "New fraud alert!";
const PUSH_ICON: &str = "/static/images/icon-192.png";
const PUSH_BADGE: &str = "/static/images/icon-72.png";
const PUSH_VIBRATE: [u32; 3] = [100, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    /// Random forest
    Rf,
    /// XGBoost
    Xgb,
    /// Accuracy-weighted blend of both
    #[default]
    Hybrid,
}

impl ModelChoice {
    /// Parse the wire id (`rf`, `xgb`, `hybrid`).
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "rf" => Some(ModelChoice::Rf),
            "xgb" => Some(ModelChoice::Xgb),
            "hybrid" => Some(ModelChoice::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct PredictionRequest {
    pub features: Vec<f64>,
    #[serde(default)]
    pub model: ModelChoice,
}

impl PredictionRequest {
    pub fn new(features: Vec<f64>, model: ModelChoice) -> Self {
        Self { features, model }
    }

    /// Mirrors the backend's own check so a request that can never succeed
    /// is not queued for replay.
    pub fn validate(&self) -> Result<(), String> {
        if self.features.len() != FEATURE_COUNT {
            return Err(format!(
                "Exactly {} values required, got {}",
                FEATURE_COUNT,
                self.features.len()
            ));
        }
        if let Some(pos) = self.features.iter().position(|v| !v.is_finite()) {
            return Err(format!("Feature {} is not a finite number", pos));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct PredictionResponse {
    /// 1 = fraudulent, 0 = legitimate
    pub prediction: u8,
    pub model_used: String,
    pub accuracy: f64,
    pub probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rf_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xgb_probability: Option<f64>,
}

impl PredictionResponse {
    pub fn is_fraud(&self) -> bool {
        self.prediction == 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    /// Epoch milliseconds
    pub date_of_arrival: i64,
    pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct PushAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct PushNotification {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: PushData,
    pub actions: Vec<PushAction>,
}

impl PushNotification {
    /// Build the alert shown for an incoming push message. An empty or
    /// missing message falls back to the generic alert text.
    pub fn from_push(text: Option<&str>, arrived_at: DateTime<Utc>) -> Self {
        let body = text
            .filter(|t| !t.is_empty())
            .unwrap_or(PUSH_DEFAULT_BODY)
            .to_string();

        Self {
            body,
            icon: PUSH_ICON.to_string(),
            badge: PUSH_BADGE.to_string(),
            vibrate: PUSH_VIBRATE.to_vec(),
            data: PushData {
                date_of_arrival: arrived_at.timestamp_millis(),
                primary_key: 1,
            },
            actions: vec![
                PushAction {
                    action: "explore".to_string(),
                    title: "View Details".to_string(),
                    icon: "/static/images/checkmark.png".to_string(),
                },
                PushAction {
                    action: "close".to_string(),
                    title: "Close".to_string(),
                    icon: "/static/images/xmark.png".to_string(),
                },
            ],
        }
    }
}

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A deferred call. Serialized with exactly `id`, `endpoint`, `payload` and
/// `timestamp` (epoch milliseconds of enqueue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct QueueItem {
    pub id: String,
    pub endpoint: String,
    pub payload: Value,
    pub timestamp: i64,
}

impl QueueItem {
    pub fn new(endpoint: &str, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(now),
            endpoint: endpoint.to_string(),
            payload,
            timestamp: now.timestamp_millis(),
        }
    }

    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Enqueue time in base 36 followed by a random base-36 suffix.
pub(crate) fn generate_id(now: DateTime<Utc>) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    let suffix: u64 = rand::thread_rng().gen();
    format!("{}{}", to_base36(millis), to_base36(suffix))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

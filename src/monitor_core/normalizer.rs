//! Raw feed payload normalization into canonical `BurnEvent`s
//!
//! Amount extraction follows a fixed precedence over known field names. The
//! first candidate present wins, even if its value cannot be parsed; a payload
//! with no candidate at all still yields an event with `amount = 0`.

use super::types::{BurnEvent, RawEvent};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Amount field names in priority order
pub const AMOUNT_FIELDS: [&str; 3] = ["amount", "value", "burned_amount"];

/// Transaction id field names consulted for opaque payloads
const TX_ID_FIELDS: [&str; 4] = ["txDigest", "tx_digest", "digest", "transaction_id"];

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    decimals: u8,
}

impl Normalizer {
    pub fn new(decimals: u8) -> Self {
        Self { decimals }
    }

    /// Convert a raw payload into a `BurnEvent`
    ///
    /// Returns `None` only when the payload is not a key/value structure.
    pub fn normalize(&self, raw: &RawEvent, source_topic: &str) -> Option<BurnEvent> {
        match raw {
            RawEvent::Envelope(envelope) => {
                let fields = match &envelope.parsed_json {
                    Value::Object(fields) => fields.clone(),
                    Value::Null => Map::new(),
                    _ => return None,
                };

                let observed_at = envelope
                    .timestamp_ms
                    .as_ref()
                    .and_then(parse_timestamp_ms)
                    .unwrap_or_else(Utc::now);

                Some(BurnEvent {
                    transaction_id: envelope.id.tx_digest.clone(),
                    amount: scale(raw_amount(&fields), self.decimals),
                    observed_at,
                    source_topic: source_topic.to_string(),
                })
            }
            RawEvent::Opaque(Value::Object(fields)) => Some(BurnEvent {
                transaction_id: opaque_transaction_id(fields),
                amount: scale(raw_amount(fields), self.decimals),
                observed_at: Utc::now(),
                source_topic: source_topic.to_string(),
            }),
            RawEvent::Opaque(other) => {
                log::debug!("Not a burn payload on {}: {}", source_topic, other);
                None
            }
        }
    }
}

/// Raw (unscaled) amount using `AMOUNT_FIELDS` precedence
pub fn raw_amount(fields: &Map<String, Value>) -> f64 {
    AMOUNT_FIELDS
        .iter()
        .find_map(|name| fields.get(*name))
        .and_then(parse_raw_quantity)
        .unwrap_or(0.0)
}

/// Parse a raw on-chain quantity
///
/// Accepts integer strings, JSON numbers and `{ "value": .. }` wrappers.
/// Negative or non-finite values are rejected.
pub fn parse_raw_quantity(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u128>()
                .map(|v| v as f64)
                .or_else(|_| s.parse::<f64>())
                .ok()?
        }
        Value::Number(n) => n.as_u64().map(|v| v as f64).or_else(|| n.as_f64())?,
        Value::Object(inner) => return inner.get("value").and_then(parse_raw_quantity),
        _ => return None,
    };

    if parsed.is_finite() && parsed >= 0.0 {
        Some(parsed)
    } else {
        None
    }
}

/// Scale a raw integer quantity to display units
pub fn scale(raw: f64, decimals: u8) -> f64 {
    raw / 10f64.powi(decimals as i32)
}

fn parse_timestamp_ms(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}

fn opaque_transaction_id(fields: &Map<String, Value>) -> String {
    TX_ID_FIELDS
        .iter()
        .find_map(|name| fields.get(*name).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("unidentified-{:016x}", rand::random::<u64>()))
}

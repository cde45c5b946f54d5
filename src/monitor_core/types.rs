//! Core data types shared by the monitoring engine

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;

/// Source label for events inferred from treasury balance differences
pub const BALANCE_DIFF_TOPIC: &str = "balance-diff";

/// A single observed burn, already scaled to display units
#[derive(Debug, Clone, PartialEq)]
pub struct BurnEvent {
    pub transaction_id: String,
    pub amount: f64,
    pub observed_at: DateTime<Utc>,
    pub source_topic: String,
}

impl BurnEvent {
    /// True when the event was synthesized by the fallback poller rather than
    /// delivered by an on-chain event feed.
    pub fn is_inferred(&self) -> bool {
        self.source_topic == BALANCE_DIFF_TOPIC
    }
}

/// Live view of supply-related metrics
///
/// Owned by the aggregator task; everyone else sees clones published
/// through a watch channel.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub current_supply: f64,
    pub circulating_supply: f64,
    pub treasury_balance: f64,
    /// Cumulative since process start, never decreases
    pub total_burned: f64,
    /// Sum of burns observed within the trailing 24 hours
    pub burn_rate_window: f64,
    /// Newest first
    pub event_history: VecDeque<BurnEvent>,
    pub last_burn: Option<BurnEvent>,
    pub events_observed: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

/// Lifecycle of one topic subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Connecting,
    Active,
    Failed,
    Retrying,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Connecting => "CONNECTING",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Failed => "FAILED",
            SubscriptionStatus::Retrying => "RETRYING",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionHandle {
    pub topic: String,
    pub status: SubscriptionStatus,
    pub last_error: Option<String>,
}

impl SubscriptionHandle {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            status: SubscriptionStatus::Connecting,
            last_error: None,
        }
    }
}

/// Event envelope as delivered by the ledger's event feed
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(rename = "timestampMs", default)]
    pub timestamp_ms: Option<Value>,
    #[serde(rename = "parsedJson", default)]
    pub parsed_json: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventId {
    #[serde(rename = "txDigest")]
    pub tx_digest: String,
    #[serde(rename = "eventSeq", default)]
    pub event_seq: Option<Value>,
}

/// Raw payload handed to the normalizer
///
/// Only the normalizer interprets the opaque form.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Recognized feed envelope with transaction metadata
    Envelope(EventEnvelope),
    /// Anything else the feed produced
    Opaque(Value),
}

impl RawEvent {
    /// Classify a JSON value coming off a feed
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<EventEnvelope>(value.clone()) {
            Ok(envelope) => RawEvent::Envelope(envelope),
            Err(_) => RawEvent::Opaque(value),
        }
    }
}

/// Absolute quantities fetched by a refresh cycle
///
/// `None` means the query failed and the previous value should be kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefreshUpdate {
    pub current_supply: Option<f64>,
    pub treasury_balance: Option<f64>,
    pub circulating_supply: Option<f64>,
}

impl RefreshUpdate {
    pub fn is_empty(&self) -> bool {
        self.current_supply.is_none()
            && self.treasury_balance.is_none()
            && self.circulating_supply.is_none()
    }
}

/// Message sent through the fan-in channel to the aggregator task
#[derive(Debug, Clone)]
pub enum AggregatorMessage {
    Burn(BurnEvent),
    Refresh(RefreshUpdate),
    Shutdown,
}

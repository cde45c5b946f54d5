//! Scripted in-memory ledger shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use burnwatch::config::MonitorConfig;
use burnwatch::ledger::{CoinPage, EventSubscription, LedgerRpc, RpcError, TokenMetadata};
use burnwatch::monitor_core::RawEvent;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const TOKEN: &str = "0xabc::burn::TKN";
pub const TREASURY: &str = "0xtreasury";

pub struct MockLedger {
    pub metadata: Mutex<Result<TokenMetadata, RpcError>>,
    /// Raw treasury balance; `None` makes the query fail
    pub treasury_raw: Mutex<Option<u64>>,
    /// Raw coin balances returned one per page
    pub coin_pages: Mutex<Vec<Vec<u64>>>,
    /// Makes every coin page query fail
    pub coin_pages_fail: Mutex<bool>,
    /// Per-topic queue of subscribe outcomes; empty queue means failure
    pub subscribe_script: Mutex<HashMap<String, VecDeque<bool>>>,
    pub subscribe_calls: Mutex<HashMap<String, usize>>,
    pub feeds: Mutex<HashMap<String, mpsc::Sender<RawEvent>>>,
    pub closers: Mutex<Vec<(String, oneshot::Receiver<()>)>>,
}

impl MockLedger {
    pub fn new(decimals: u8) -> Self {
        Self {
            metadata: Mutex::new(Ok(TokenMetadata {
                decimals,
                supply_hint: None,
            })),
            treasury_raw: Mutex::new(Some(0)),
            coin_pages: Mutex::new(Vec::new()),
            coin_pages_fail: Mutex::new(false),
            subscribe_script: Mutex::new(HashMap::new()),
            subscribe_calls: Mutex::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
            closers: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, topic: &str, outcomes: &[bool]) {
        self.subscribe_script
            .lock()
            .unwrap()
            .insert(topic.to_string(), outcomes.iter().copied().collect());
    }

    pub fn set_treasury(&self, raw: Option<u64>) {
        *self.treasury_raw.lock().unwrap() = raw;
    }

    pub fn set_supply(&self, raw: Option<f64>) {
        if let Ok(metadata) = self.metadata.lock().unwrap().as_mut() {
            metadata.supply_hint = raw;
        }
    }

    pub fn calls(&self, topic: &str) -> usize {
        self.subscribe_calls
            .lock()
            .unwrap()
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    pub fn feed(&self, topic: &str) -> Option<mpsc::Sender<RawEvent>> {
        self.feeds.lock().unwrap().get(topic).cloned()
    }

    /// Drop the live sender for `topic`, terminating its feed
    pub fn cut_feed(&self, topic: &str) {
        self.feeds.lock().unwrap().remove(topic);
    }

    /// Number of subscriptions whose close signal has been delivered
    pub fn closed_count(&self) -> usize {
        let mut closers = self.closers.lock().unwrap();
        closers
            .iter_mut()
            .filter_map(|(_, rx)| rx.try_recv().ok())
            .count()
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn fetch_token_metadata(&self, _token_type: &str) -> Result<TokenMetadata, RpcError> {
        self.metadata.lock().unwrap().clone()
    }

    async fn fetch_object_fields(&self, object_id: &str) -> Result<Map<String, Value>, RpcError> {
        if object_id != TREASURY {
            return Err(RpcError::NotFound(object_id.to_string()));
        }
        match *self.treasury_raw.lock().unwrap() {
            Some(raw) => {
                let mut fields = Map::new();
                fields.insert("balance".to_string(), json!({"value": raw.to_string()}));
                Ok(fields)
            }
            None => Err(RpcError::Transient("treasury unavailable".to_string())),
        }
    }

    async fn fetch_coin_balances_page(
        &self,
        _token_type: &str,
        cursor: Option<String>,
    ) -> Result<CoinPage, RpcError> {
        if *self.coin_pages_fail.lock().unwrap() {
            return Err(RpcError::Transient("coin listing unavailable".to_string()));
        }
        let pages = self.coin_pages.lock().unwrap();
        let index: usize = cursor.as_deref().map(|c| c.parse().unwrap()).unwrap_or(0);
        let Some(page) = pages.get(index) else {
            return Ok(CoinPage::default());
        };
        let has_next_page = index + 1 < pages.len();
        Ok(CoinPage {
            balances: page
                .iter()
                .map(|raw| json!({"balance": raw.to_string()}))
                .collect(),
            next_cursor: has_next_page.then(|| (index + 1).to_string()),
            has_next_page,
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<EventSubscription, RpcError> {
        *self
            .subscribe_calls
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_insert(0) += 1;

        let succeed = self
            .subscribe_script
            .lock()
            .unwrap()
            .get_mut(topic)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(false);

        if !succeed {
            return Err(RpcError::Subscription(format!("{} unavailable", topic)));
        }

        let (tx, rx) = mpsc::channel(64);
        let (close_tx, close_rx) = oneshot::channel();
        self.feeds.lock().unwrap().insert(topic.to_string(), tx);
        self.closers
            .lock()
            .unwrap()
            .push((topic.to_string(), close_rx));
        Ok(EventSubscription::new(topic, rx, close_tx))
    }
}

pub fn test_config(topics: &[&str]) -> MonitorConfig {
    MonitorConfig {
        rpc_url: "http://localhost:9000".to_string(),
        ws_url: "ws://localhost:9000".to_string(),
        token_type: TOKEN.to_string(),
        treasury_object_id: TREASURY.to_string(),
        coin_owner: TREASURY.to_string(),
        token_decimals: None,
        topics: topics.iter().map(|t| t.to_string()).collect(),
        refresh_interval: Duration::from_secs(15),
        fallback_interval: Duration::from_secs(30),
        history_capacity: 10,
        channel_buffer: 100,
        retry_initial_secs: 1,
        retry_max_secs: 4,
    }
}

pub fn burn_payload(digest: &str, raw_amount: u64) -> RawEvent {
    RawEvent::from_value(json!({
        "id": {"txDigest": digest, "eventSeq": "0"},
        "type": "0xabc::burn::BurnEvent",
        "parsedJson": {"amount": raw_amount.to_string()}
    }))
}

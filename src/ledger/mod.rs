//! Ledger RPC collaborator seam
//!
//! The engine only talks to the ledger through [`LedgerRpc`]. The production
//! implementation is [`JsonRpcLedgerClient`]; tests script their own.

pub mod json_rpc;

pub use json_rpc::JsonRpcLedgerClient;

use crate::monitor_core::types::RawEvent;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected response shape: {0}")]
    InvalidShape(String),
    #[error("transient RPC failure: {0}")]
    Transient(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
}

impl RpcError {
    /// Network/timeout class errors that are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transient(_) | RpcError::Subscription(_))
    }
}

/// Token-level metadata; `supply_hint` is in raw (unscaled) units
#[derive(Debug, Clone, PartialEq)]
pub struct TokenMetadata {
    pub decimals: u8,
    pub supply_hint: Option<f64>,
}

/// One page of raw coin balance entries
#[derive(Debug, Clone, Default)]
pub struct CoinPage {
    pub balances: Vec<Value>,
    pub next_cursor: Option<String>,
    pub has_next_page: bool,
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn fetch_token_metadata(&self, token_type: &str) -> Result<TokenMetadata, RpcError>;

    async fn fetch_object_fields(&self, object_id: &str) -> Result<Map<String, Value>, RpcError>;

    async fn fetch_coin_balances_page(
        &self,
        token_type: &str,
        cursor: Option<String>,
    ) -> Result<CoinPage, RpcError>;

    async fn subscribe(&self, topic: &str) -> Result<EventSubscription, RpcError>;
}

/// Fetch every coin balance entry, following pagination to the end
pub async fn fetch_all_coin_balances(
    rpc: &dyn LedgerRpc,
    token_type: &str,
) -> Result<Vec<Value>, RpcError> {
    let mut balances = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = rpc.fetch_coin_balances_page(token_type, cursor.clone()).await?;
        balances.extend(page.balances);

        if !page.has_next_page {
            break;
        }

        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            Some(next) => {
                return Err(RpcError::InvalidShape(format!(
                    "pagination cursor did not advance ({})",
                    next
                )))
            }
            None => {
                return Err(RpcError::InvalidShape(
                    "hasNextPage set without a cursor".to_string(),
                ))
            }
        }
    }

    Ok(balances)
}

/// Live delivery for one topic
///
/// Events arrive until the feed terminates, at which point `next_event`
/// returns `None`. Dropping the subscription closes it.
pub struct EventSubscription {
    topic: String,
    events: mpsc::Receiver<RawEvent>,
    closer: Option<oneshot::Sender<()>>,
}

impl EventSubscription {
    pub fn new(
        topic: impl Into<String>,
        events: mpsc::Receiver<RawEvent>,
        closer: oneshot::Sender<()>,
    ) -> Self {
        Self {
            topic: topic.into(),
            events,
            closer: Some(closer),
        }
    }

    pub async fn next_event(&mut self) -> Option<RawEvent> {
        self.events.recv().await
    }

    /// Release the underlying feed; safe to call more than once
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            let _ = closer.send(());
            log::debug!("Closed subscription for {}", self.topic);
        }
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

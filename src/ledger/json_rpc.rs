//! JSON-RPC (HTTP) + WebSocket ledger client
//!
//! Request/response calls go over HTTP via `reqwest`. Event subscriptions use
//! a dedicated WebSocket connection per topic so one dropped feed does not
//! take the others down.
//!
//! Methods used:
//! - `suix_getCoinMetadata` / `suix_getTotalSupply` - token metadata
//! - `sui_getObject` - object fields
//! - `suix_getCoins` - paginated coin listing for the configured owner
//! - `suix_subscribeEvent` / `suix_unsubscribeEvent` - event feeds

use super::{CoinPage, EventSubscription, LedgerRpc, RpcError, TokenMetadata};
use crate::monitor_core::types::RawEvent;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const COIN_PAGE_LIMIT: u32 = 50;
const SUBSCRIPTION_BUFFER: usize = 256;

pub struct JsonRpcLedgerClient {
    http: reqwest::Client,
    rpc_url: String,
    ws_url: String,
    coin_owner: String,
    next_id: AtomicU64,
}

impl JsonRpcLedgerClient {
    pub fn new(rpc_url: &str, ws_url: &str, coin_owner: &str) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            ws_url: ws_url.to_string(),
            coin_owner: coin_owner.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transient(format!("{}: {}", method, e)))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RpcError::Transient(format!("{}: HTTP {}", method, status)));
        }
        if !status.is_success() {
            return Err(RpcError::InvalidShape(format!("{}: HTTP {}", method, status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transient(format!("{}: unreadable body: {}", method, e)))?;

        if let Some(error) = body.get("error") {
            return Err(RpcError::InvalidShape(format!("{}: {}", method, error)));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidShape(format!("{}: missing result", method)))
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcLedgerClient {
    async fn fetch_token_metadata(&self, token_type: &str) -> Result<TokenMetadata, RpcError> {
        let metadata = self.call("suix_getCoinMetadata", json!([token_type])).await?;
        if metadata.is_null() {
            return Err(RpcError::NotFound(format!("token {}", token_type)));
        }

        let decimals = metadata
            .get("decimals")
            .and_then(Value::as_u64)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| RpcError::InvalidShape("coin metadata without decimals".to_string()))?;

        // Not every deployment exposes a supply query; absence is not an error.
        let supply_hint = match self.call("suix_getTotalSupply", json!([token_type])).await {
            Ok(supply) => supply
                .get("value")
                .and_then(crate::monitor_core::normalizer::parse_raw_quantity),
            Err(e) if e.is_transient() => {
                log::warn!("Total supply query for {} failed: {}", token_type, e);
                None
            }
            Err(e) => {
                log::debug!("Total supply unavailable for {}: {}", token_type, e);
                None
            }
        };

        Ok(TokenMetadata {
            decimals,
            supply_hint,
        })
    }

    async fn fetch_object_fields(&self, object_id: &str) -> Result<Map<String, Value>, RpcError> {
        let result = self
            .call("sui_getObject", json!([object_id, {"showContent": true}]))
            .await?;

        if let Some(error) = result.get("error") {
            return Err(RpcError::NotFound(format!("object {}: {}", object_id, error)));
        }

        let content = result
            .pointer("/data/content")
            .ok_or_else(|| RpcError::NotFound(format!("object {}", object_id)))?;

        if content.get("dataType").and_then(Value::as_str) != Some("moveObject") {
            return Err(RpcError::InvalidShape(format!(
                "object {} is not a move object",
                object_id
            )));
        }

        match content.get("fields") {
            Some(Value::Object(fields)) => Ok(fields.clone()),
            _ => Err(RpcError::InvalidShape(format!(
                "object {} has no fields",
                object_id
            ))),
        }
    }

    async fn fetch_coin_balances_page(
        &self,
        token_type: &str,
        cursor: Option<String>,
    ) -> Result<CoinPage, RpcError> {
        let result = self
            .call(
                "suix_getCoins",
                json!([self.coin_owner, token_type, cursor, COIN_PAGE_LIMIT]),
            )
            .await?;

        let balances = match result.get("data") {
            Some(Value::Array(entries)) => entries.clone(),
            _ => return Err(RpcError::InvalidShape("coin page without data".to_string())),
        };

        Ok(CoinPage {
            balances,
            next_cursor: result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string),
            has_next_page: result
                .get("hasNextPage")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<EventSubscription, RpcError> {
        // Connect and ack share one bound so a dead host cannot stall startup.
        let connect = connect_async(self.ws_url.as_str());
        let (mut ws, _) = tokio::time::timeout(SUBSCRIBE_TIMEOUT, connect)
            .await
            .map_err(|_| RpcError::Transient(format!("connect {} timed out", self.ws_url)))?
            .map_err(|e| RpcError::Subscription(format!("connect {}: {}", self.ws_url, e)))?;

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "suix_subscribeEvent",
            "params": [{"MoveEventType": topic}],
        });
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| RpcError::Subscription(format!("send subscribe: {}", e)))?;

        let subscription_id = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
            while let Some(message) = ws.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(RpcError::Subscription(e.to_string())),
                };
                let Ok(body) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if body.get("id").and_then(Value::as_u64) != Some(request_id) {
                    continue;
                }
                if let Some(error) = body.get("error") {
                    return Err(RpcError::Subscription(error.to_string()));
                }
                return body
                    .get("result")
                    .cloned()
                    .ok_or_else(|| RpcError::Subscription("ack without result".to_string()));
            }
            Err(RpcError::Subscription("connection closed before ack".to_string()))
        })
        .await
        .map_err(|_| RpcError::Transient(format!("subscribe {} timed out", topic)))??;

        let (event_tx, event_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let topic_name = topic.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        let unsubscribe = json!({
                            "jsonrpc": "2.0",
                            "id": 0,
                            "method": "suix_unsubscribeEvent",
                            "params": [subscription_id],
                        });
                        let _ = ws.send(Message::Text(unsubscribe.to_string())).await;
                        let _ = ws.close(None).await;
                        break;
                    }
                    message = ws.next() => {
                        let text = match message {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(frame))) => {
                                log::warn!("Feed {} closed by server: {:?}", topic_name, frame);
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                log::warn!("Feed {} errored: {}", topic_name, e);
                                break;
                            }
                            None => break,
                        };

                        let Ok(body) = serde_json::from_str::<Value>(&text) else {
                            log::debug!("Ignoring non-JSON frame on {}", topic_name);
                            continue;
                        };
                        let Some(payload) = body.pointer("/params/result").cloned() else {
                            continue;
                        };
                        if event_tx.send(RawEvent::from_value(payload)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            log::debug!("Feed reader for {} exited", topic_name);
        });

        Ok(EventSubscription::new(topic, event_rx, close_tx))
    }
}

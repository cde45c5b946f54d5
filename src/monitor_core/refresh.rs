//! Refresh scheduler - periodic re-fetch of absolute supply quantities
//!
//! Burns are a derived signal; supply, treasury balance and circulating supply
//! are re-read from the ledger on a fixed cadence so out-of-band corrections
//! show up. Each quantity is fetched independently and a failed query leaves
//! the previous value in place.

use super::normalizer::{parse_raw_quantity, scale};
use super::shutdown_requested;
use super::types::{AggregatorMessage, RefreshUpdate};
use crate::config::clamp_refresh_interval;
use crate::ledger::{fetch_all_coin_balances, LedgerRpc, RpcError};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Treasury object field names holding the balance, in priority order
const TREASURY_BALANCE_FIELDS: [&str; 3] = ["balance", "value", "total_supply"];

/// Reads absolute token quantities from the ledger, scaled to display units
#[derive(Clone)]
pub struct SupplySource {
    rpc: Arc<dyn LedgerRpc>,
    token_type: String,
    treasury_object_id: String,
    decimals: u8,
    /// Whether the ledger answers supply queries at all; without one the
    /// circulating sum stands in for current supply
    supply_query: bool,
}

impl SupplySource {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        token_type: impl Into<String>,
        treasury_object_id: impl Into<String>,
        decimals: u8,
    ) -> Self {
        Self {
            rpc,
            token_type: token_type.into(),
            treasury_object_id: treasury_object_id.into(),
            decimals,
            supply_query: false,
        }
    }

    pub fn with_supply_query(mut self, available: bool) -> Self {
        self.supply_query = available;
        self
    }

    pub async fn treasury_balance(&self) -> Result<f64, RpcError> {
        let fields = self.rpc.fetch_object_fields(&self.treasury_object_id).await?;
        let raw = treasury_raw_balance(&fields).ok_or_else(|| {
            RpcError::InvalidShape(format!(
                "treasury {} has no readable balance field",
                self.treasury_object_id
            ))
        })?;
        Ok(scale(raw, self.decimals))
    }

    pub async fn circulating_supply(&self) -> Result<f64, RpcError> {
        let balances = fetch_all_coin_balances(self.rpc.as_ref(), &self.token_type).await?;
        Ok(scale(sum_balances(&balances), self.decimals))
    }

    /// Ledger-reported supply, if the ledger exposes one
    pub async fn supply_hint(&self) -> Result<Option<f64>, RpcError> {
        let metadata = self.rpc.fetch_token_metadata(&self.token_type).await?;
        Ok(metadata.supply_hint.map(|raw| scale(raw, self.decimals)))
    }

    /// Query all three quantities, tolerating partial failure
    pub async fn fetch_update(&self) -> RefreshUpdate {
        let (supply, treasury, circulating) = tokio::join!(
            async {
                if self.supply_query {
                    Some(self.supply_hint().await)
                } else {
                    None
                }
            },
            self.treasury_balance(),
            self.circulating_supply()
        );

        let circulating_supply = keep_on_error("circulating supply", circulating);
        let treasury_balance = keep_on_error("treasury balance", treasury);

        let current_supply = match supply {
            None => circulating_supply,
            Some(result) => match keep_on_error("supply", result) {
                Some(Some(value)) => Some(value),
                Some(None) => {
                    log::warn!("Supply query returned nothing, keeping previous value");
                    None
                }
                None => None,
            },
        };

        RefreshUpdate {
            current_supply,
            treasury_balance,
            circulating_supply,
        }
    }
}

pub struct RefreshScheduler {
    source: SupplySource,
    period: Duration,
}

impl RefreshScheduler {
    pub fn new(source: SupplySource, interval_secs: u64) -> Self {
        Self {
            source,
            period: Duration::from_secs(clamp_refresh_interval(interval_secs)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run until shutdown; the first tick fires one period from now since
    /// startup already seeds the snapshot
    pub async fn run(
        self,
        sink: mpsc::Sender<AggregatorMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        log::info!(
            "⏰ Starting refresh scheduler (interval: {}s)",
            self.period.as_secs()
        );

        let mut timer = interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = timer.tick() => {}
            }

            let update = self.source.fetch_update().await;
            if update.is_empty() {
                log::warn!("Refresh produced no values, keeping previous snapshot");
                continue;
            }

            if sink.send(AggregatorMessage::Refresh(update)).await.is_err() {
                break;
            }
        }

        log::info!("Refresh scheduler stopped");
    }
}

/// Turn a failed query into "keep the previous value"
pub(crate) fn keep_on_error<T>(what: &str, result: Result<T, RpcError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_transient() => {
            log::warn!("{} refresh failed, retrying next cycle: {}", what, e);
            None
        }
        Err(e) => {
            log::error!("{} refresh failed: {}", what, e);
            None
        }
    }
}

fn treasury_raw_balance(fields: &Map<String, Value>) -> Option<f64> {
    TREASURY_BALANCE_FIELDS
        .iter()
        .find_map(|name| fields.get(*name))
        .and_then(parse_raw_quantity)
}

/// Sum raw coin entries, either `{ "balance": .. }` objects or bare quantities
pub fn sum_balances(entries: &[Value]) -> f64 {
    entries
        .iter()
        .filter_map(|entry| match entry.get("balance") {
            Some(balance) => parse_raw_quantity(balance),
            None => parse_raw_quantity(entry),
        })
        .sum()
}

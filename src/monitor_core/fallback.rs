//! Fallback poller - infers burns from treasury balance decreases
//!
//! Only runs when no live feed could be established at startup. A decrease
//! between two samples becomes a synthetic `BurnEvent` tagged
//! `balance-diff`; flat or increasing balances emit nothing, so burns offset
//! by inflows within one interval go undetected.

use super::refresh::{keep_on_error, SupplySource};
use super::shutdown_requested;
use super::types::{AggregatorMessage, BurnEvent, BALANCE_DIFF_TOPIC};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Default)]
pub struct FallbackPoller {
    previous_balance: Option<f64>,
    sequence: u64,
}

impl FallbackPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known balance, e.g. the one seeded at startup
    pub fn with_baseline(balance: f64) -> Self {
        Self {
            previous_balance: Some(balance),
            sequence: 0,
        }
    }

    pub fn previous_balance(&self) -> Option<f64> {
        self.previous_balance
    }

    /// Record a balance sample; returns a synthetic burn if it dropped
    pub fn observe(&mut self, current_balance: f64) -> Option<BurnEvent> {
        let previous = self.previous_balance.replace(current_balance)?;
        let delta = previous - current_balance;

        if delta <= 0.0 {
            return None;
        }

        self.sequence += 1;
        let now = Utc::now();
        Some(BurnEvent {
            transaction_id: format!(
                "{}-{}-{}",
                BALANCE_DIFF_TOPIC,
                now.timestamp_millis(),
                self.sequence
            ),
            amount: delta,
            observed_at: now,
            source_topic: BALANCE_DIFF_TOPIC.to_string(),
        })
    }
}

/// Waits for the activation signal, then polls the treasury balance
///
/// Exits immediately if the signal sender is dropped without firing, i.e.
/// at least one live subscription came up at startup.
pub async fn fallback_task(
    activation: oneshot::Receiver<()>,
    source: SupplySource,
    mut poller: FallbackPoller,
    poll_interval: Duration,
    sink: mpsc::Sender<AggregatorMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        signal = activation => {
            if signal.is_err() {
                log::debug!("Fallback poller not needed, live feeds available");
                return;
            }
        }
        _ = shutdown_requested(&mut shutdown) => return,
    }

    log::info!(
        "🛟 Fallback poller active (interval: {}s)",
        poll_interval.as_secs()
    );

    let mut timer = interval(poll_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            _ = timer.tick() => {}
        }

        let Some(balance) = keep_on_error("fallback treasury", source.treasury_balance().await)
        else {
            continue;
        };

        if let Some(event) = poller.observe(balance) {
            log::info!(
                "🛟 Inferred burn of {:.6} from treasury balance drop",
                event.amount
            );
            if sink.send(AggregatorMessage::Burn(event)).await.is_err() {
                break;
            }
        }
    }

    log::info!("Fallback poller stopped");
}

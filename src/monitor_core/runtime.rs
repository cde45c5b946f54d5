//! Startup and shutdown orchestration
//!
//! Startup order matters: token metadata and one synchronous refresh are
//! fetched before any feed opens, so the first published snapshot already
//! carries absolute supply values. Failing to resolve the token is the only
//! fatal path.

use super::aggregator::{aggregator_task, MetricsAggregator};
use super::fallback::{fallback_task, FallbackPoller};
use super::normalizer::Normalizer;
use super::refresh::{RefreshScheduler, SupplySource};
use super::subscription::{StartOutcome, SubscriptionManager};
use super::types::{AggregatorMessage, MetricsSnapshot, SubscriptionHandle};
use crate::config::{clamp_refresh_interval, fallback_interval_above, MonitorConfig};
use crate::error::MonitorError;
use crate::ledger::{JsonRpcLedgerClient, LedgerRpc};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const TASK_STOP_GRACE: Duration = Duration::from_secs(5);

/// A running monitor
pub struct MonitorHandle {
    snapshots: watch::Receiver<MetricsSnapshot>,
    manager: SubscriptionManager,
    shutdown: watch::Sender<bool>,
    sink: mpsc::Sender<AggregatorMessage>,
    aggregator: JoinHandle<MetricsAggregator>,
    timers: Vec<JoinHandle<()>>,
    outcome: StartOutcome,
}

impl MonitorHandle {
    /// Wire every component against `rpc` and open the feeds
    pub async fn start(
        config: &MonitorConfig,
        rpc: Arc<dyn LedgerRpc>,
    ) -> Result<Self, MonitorError> {
        let metadata = rpc.fetch_token_metadata(&config.token_type).await?;
        let decimals = config.token_decimals.unwrap_or(metadata.decimals);
        if config.token_decimals.is_some_and(|d| d != metadata.decimals) {
            log::warn!(
                "Configured decimals {} differ from ledger metadata {}, using configured value",
                decimals,
                metadata.decimals
            );
        }

        let source = SupplySource::new(
            rpc.clone(),
            config.token_type.clone(),
            config.treasury_object_id.clone(),
            decimals,
        )
        .with_supply_query(metadata.supply_hint.is_some());

        // Configs built by hand skip from_env, so the cadence rules apply here too.
        let refresh_secs = clamp_refresh_interval(config.refresh_interval.as_secs());
        let fallback_interval =
            fallback_interval_above(config.fallback_interval, Duration::from_secs(refresh_secs));

        let seed = source.fetch_update().await;
        let mut aggregator = MetricsAggregator::new(config.history_capacity);
        if seed.is_empty() {
            log::warn!("⚠️  Every seed query failed, snapshot starts empty until the first refresh");
        } else {
            aggregator.on_refresh(seed, Utc::now());
            log::info!(
                "📊 Seeded snapshot: supply={:.6} treasury={:.6} circulating={:.6}",
                aggregator.snapshot().current_supply,
                aggregator.snapshot().treasury_balance,
                aggregator.snapshot().circulating_supply
            );
        }

        let (sink, receiver) = mpsc::channel(config.channel_buffer.max(1));
        let (publisher, snapshots) = watch::channel(aggregator.snapshot().clone());
        let aggregator = tokio::spawn(aggregator_task(receiver, aggregator, publisher));

        let (shutdown, _) = watch::channel(false);
        let mut timers = Vec::new();

        let scheduler = RefreshScheduler::new(source.clone(), refresh_secs);
        timers.push(tokio::spawn(
            scheduler.run(sink.clone(), shutdown.subscribe()),
        ));

        let poller = match seed.treasury_balance {
            Some(balance) => FallbackPoller::with_baseline(balance),
            None => FallbackPoller::new(),
        };
        let (fallback_signal, activation) = oneshot::channel();
        timers.push(tokio::spawn(fallback_task(
            activation,
            source,
            poller,
            fallback_interval,
            sink.clone(),
            shutdown.subscribe(),
        )));

        let mut manager = SubscriptionManager::new(
            rpc,
            Normalizer::new(decimals),
            sink.clone(),
            fallback_signal,
        )
        .with_retry(config.retry_initial_secs, config.retry_max_secs);
        let outcome = manager.start(&config.topics).await;

        Ok(Self {
            snapshots,
            manager,
            shutdown,
            sink,
            aggregator,
            timers,
            outcome,
        })
    }

    pub fn snapshots(&self) -> watch::Receiver<MetricsSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscription_statuses(&self) -> Vec<SubscriptionHandle> {
        self.manager.statuses()
    }

    pub fn start_outcome(&self) -> StartOutcome {
        self.outcome
    }

    /// Close feeds, stop timers, then drain and stop the aggregator
    pub async fn shutdown(mut self) -> MetricsSnapshot {
        self.manager.stop().await;
        self.shutdown.send_replace(true);

        for timer in self.timers.drain(..) {
            let abort = timer.abort_handle();
            if tokio::time::timeout(TASK_STOP_GRACE, timer).await.is_err() {
                abort.abort();
            }
        }

        let _ = self.sink.send(AggregatorMessage::Shutdown).await;
        drop(self.sink);

        match self.aggregator.await {
            Ok(aggregator) => aggregator.snapshot().clone(),
            Err(e) => {
                log::error!("Aggregator task failed: {}", e);
                let last = self.snapshots.borrow().clone();
                last
            }
        }
    }
}

/// Run the monitor against the configured ledger until Ctrl-C
pub async fn run(config: MonitorConfig) -> Result<(), MonitorError> {
    log::info!("🚀 Starting burn monitor");
    log::info!("   ├─ RPC: {}", config.rpc_url);
    log::info!("   ├─ WebSocket: {}", config.ws_url);
    log::info!("   ├─ Token: {}", config.token_type);
    log::info!("   ├─ Treasury: {}", config.treasury_object_id);
    log::info!("   ├─ Topics: {:?}", config.topics);
    log::info!("   ├─ Refresh interval: {}s", config.refresh_interval.as_secs());
    log::info!("   └─ Fallback interval: {}s", config.fallback_interval.as_secs());

    let rpc: Arc<dyn LedgerRpc> = Arc::new(JsonRpcLedgerClient::new(
        &config.rpc_url,
        &config.ws_url,
        &config.coin_owner,
    )?);

    let monitor = MonitorHandle::start(&config, rpc).await?;
    let reporter = tokio::spawn(report_task(monitor.snapshots()));

    log::info!("🔄 Press CTRL+C to shutdown gracefully");
    let signal = tokio::signal::ctrl_c().await;
    if let Err(e) = &signal {
        log::error!("❌ Failed to listen for CTRL+C: {}", e);
    } else {
        log::info!("⚠️  Received CTRL+C, shutting down...");
    }

    let last = monitor.shutdown().await;
    reporter.abort();
    log::info!(
        "✅ Burn monitor stopped (session burned {:.6} across {} events)",
        last.total_burned,
        last.events_observed
    );

    signal.map_err(MonitorError::from)
}

/// Logs a one-line summary whenever a refresh lands
async fn report_task(mut snapshots: watch::Receiver<MetricsSnapshot>) {
    let mut last_refresh = None;

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.last_refresh_at == last_refresh {
            continue;
        }
        last_refresh = snapshot.last_refresh_at;

        log::info!(
            "📈 supply={:.6} circulating={:.6} treasury={:.6} burned={:.6} burned_24h={:.6} events={}",
            snapshot.current_supply,
            snapshot.circulating_supply,
            snapshot.treasury_balance,
            snapshot.total_burned,
            snapshot.burn_rate_window,
            snapshot.events_observed
        );
    }
}

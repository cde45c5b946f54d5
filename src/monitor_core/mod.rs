//! Burn event monitoring engine
//!
//! # Architecture
//!
//! ```text
//! LedgerRpc ──► SubscriptionManager ─┐
//!          └──► FallbackPoller ──────┼──► mpsc ──► aggregator_task ──► watch<MetricsSnapshot>
//!          └──► RefreshScheduler ────┘
//! ```
//!
//! Every producer normalizes into `AggregatorMessage` and sends it through a
//! single bounded channel; the aggregator task is the only writer.

pub mod aggregator;
pub mod backoff;
pub mod fallback;
pub mod normalizer;
pub mod refresh;
pub mod runtime;
pub mod subscription;
pub mod types;

pub use aggregator::{aggregator_task, MetricsAggregator};
pub use fallback::{fallback_task, FallbackPoller};
pub use normalizer::Normalizer;
pub use refresh::{RefreshScheduler, SupplySource};
pub use runtime::{run, MonitorHandle};
pub use subscription::{StartOutcome, SubscriptionManager};
pub use types::{
    AggregatorMessage, BurnEvent, MetricsSnapshot, RawEvent, RefreshUpdate, SubscriptionHandle,
    SubscriptionStatus,
};

/// Resolves once shutdown is requested or the shutdown sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut tokio::sync::watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

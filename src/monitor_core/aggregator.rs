//! Metrics aggregator - sole writer of the `MetricsSnapshot`
//!
//! Burn events and refresh updates from every source are funneled through one
//! bounded channel into [`aggregator_task`], which owns the aggregator
//! outright. Each applied message publishes a fresh snapshot copy on a watch
//! channel, so readers never observe a half-applied mutation.

use super::types::{AggregatorMessage, BurnEvent, MetricsSnapshot, RefreshUpdate};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch};

/// Trailing window used for `burn_rate_window`
pub const BURN_RATE_WINDOW_HOURS: i64 = 24;

pub struct MetricsAggregator {
    snapshot: MetricsSnapshot,
    history_capacity: usize,
}

impl MetricsAggregator {
    pub fn new(history_capacity: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        let mut snapshot = MetricsSnapshot::default();
        snapshot.event_history.reserve(history_capacity);

        Self {
            snapshot,
            history_capacity,
        }
    }

    pub fn snapshot(&self) -> &MetricsSnapshot {
        &self.snapshot
    }

    /// Apply a burn observed at wall-clock `now`
    pub fn on_burn_event(&mut self, event: BurnEvent, now: DateTime<Utc>) {
        // Amounts are non-negative by construction; guard anyway so the
        // running total can never move backwards.
        let amount = if event.amount.is_finite() && event.amount > 0.0 {
            event.amount
        } else {
            0.0
        };

        self.snapshot.event_history.push_front(event.clone());
        self.snapshot.event_history.truncate(self.history_capacity);

        self.snapshot.total_burned += amount;
        self.snapshot.events_observed += 1;
        self.snapshot.last_burn = Some(event);
        self.recompute_window(now);
    }

    /// Overwrite absolute quantities; burn-derived fields are untouched
    pub fn on_refresh(&mut self, update: RefreshUpdate, now: DateTime<Utc>) {
        if let Some(supply) = update.current_supply {
            self.snapshot.current_supply = supply;
        }
        if let Some(treasury) = update.treasury_balance {
            self.snapshot.treasury_balance = treasury;
        }
        if let Some(circulating) = update.circulating_supply {
            self.snapshot.circulating_supply = circulating;
        }
        self.snapshot.last_refresh_at = Some(now);
        // Window boundary moves with the clock even without new burns.
        self.recompute_window(now);
    }

    /// Re-scan retained history for events inside the trailing window
    fn recompute_window(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(BURN_RATE_WINDOW_HOURS);
        self.snapshot.burn_rate_window = self
            .snapshot
            .event_history
            .iter()
            .filter(|e| e.observed_at >= cutoff)
            .map(|e| e.amount.max(0.0))
            .sum();
    }
}

/// Background task that drains the fan-in channel into the aggregator
///
/// Runs until a `Shutdown` message arrives or every sender is dropped.
pub async fn aggregator_task(
    mut receiver: mpsc::Receiver<AggregatorMessage>,
    mut aggregator: MetricsAggregator,
    publisher: watch::Sender<MetricsSnapshot>,
) -> MetricsAggregator {
    log::info!("Metrics aggregator task started");

    while let Some(message) = receiver.recv().await {
        let now = Utc::now();
        match message {
            AggregatorMessage::Burn(event) => {
                log::info!(
                    "🔥 Burn: tx={} amount={:.6} source={}",
                    event.transaction_id,
                    event.amount,
                    event.source_topic
                );
                aggregator.on_burn_event(event, now);
            }
            AggregatorMessage::Refresh(update) => {
                log::debug!("Applying refresh: {:?}", update);
                aggregator.on_refresh(update, now);
            }
            AggregatorMessage::Shutdown => {
                log::info!("Metrics aggregator received shutdown signal");
                break;
            }
        }

        publisher.send_replace(aggregator.snapshot().clone());
    }

    log::info!("Metrics aggregator task stopped");
    aggregator
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burn(id: &str, amount: f64, observed_at: DateTime<Utc>) -> BurnEvent {
        BurnEvent {
            transaction_id: id.to_string(),
            amount,
            observed_at,
            source_topic: "test".to_string(),
        }
    }

    #[test]
    fn test_total_burned_accumulates() {
        let mut agg = MetricsAggregator::new(10);
        let now = Utc::now();
        let amounts = [1.5, 0.0, 2.25, 10.0];

        let mut previous = 0.0;
        for (i, amount) in amounts.iter().enumerate() {
            agg.on_burn_event(burn(&format!("tx{}", i), *amount, now), now);
            assert!(agg.snapshot().total_burned >= previous);
            previous = agg.snapshot().total_burned;
        }

        assert_eq!(agg.snapshot().total_burned, amounts.iter().sum::<f64>());
        assert_eq!(agg.snapshot().events_observed, 4);
    }

    #[test]
    fn test_history_capacity_evicts_oldest() {
        let mut agg = MetricsAggregator::new(3);
        let now = Utc::now();

        for i in 0..5 {
            agg.on_burn_event(burn(&format!("tx{}", i), 1.0, now), now);
        }

        let ids: Vec<&str> = agg
            .snapshot()
            .event_history
            .iter()
            .map(|e| e.transaction_id.as_str())
            .collect();
        assert_eq!(ids, vec!["tx4", "tx3", "tx2"]);
        // Evicted entries still count toward the session total.
        assert_eq!(agg.snapshot().total_burned, 5.0);
    }

    #[test]
    fn test_burn_rate_window_excludes_older_than_24h() {
        let mut agg = MetricsAggregator::new(10);
        let now = Utc::now();

        agg.on_burn_event(burn("old", 100.0, now - Duration::hours(25)), now);
        agg.on_burn_event(burn("recent", 10.0, now - Duration::hours(23)), now);
        agg.on_burn_event(burn("now", 1.0, now), now);

        assert_eq!(agg.snapshot().burn_rate_window, 11.0);
        assert_eq!(agg.snapshot().total_burned, 111.0);
    }

    #[test]
    fn test_history_ordered_by_arrival_not_timestamp() {
        let mut agg = MetricsAggregator::new(10);
        let now = Utc::now();

        agg.on_burn_event(burn("late", 1.0, now), now);
        agg.on_burn_event(burn("early", 1.0, now - Duration::hours(1)), now);

        assert_eq!(agg.snapshot().event_history[0].transaction_id, "early");
        assert_eq!(agg.snapshot().last_burn.as_ref().unwrap().transaction_id, "early");
    }

    #[test]
    fn test_refresh_keeps_missing_fields_and_burn_totals() {
        let mut agg = MetricsAggregator::new(10);
        let now = Utc::now();
        agg.on_burn_event(burn("tx", 5.0, now), now);

        agg.on_refresh(
            RefreshUpdate {
                current_supply: Some(1000.0),
                treasury_balance: Some(400.0),
                circulating_supply: Some(600.0),
            },
            now,
        );
        agg.on_refresh(
            RefreshUpdate {
                current_supply: Some(995.0),
                treasury_balance: None,
                circulating_supply: None,
            },
            now,
        );

        let snapshot = agg.snapshot();
        assert_eq!(snapshot.current_supply, 995.0);
        assert_eq!(snapshot.treasury_balance, 400.0);
        assert_eq!(snapshot.circulating_supply, 600.0);
        assert_eq!(snapshot.total_burned, 5.0);
        assert_eq!(snapshot.event_history.len(), 1);
        assert_eq!(snapshot.last_refresh_at, Some(now));
    }

    #[test]
    fn test_refresh_slides_window_forward() {
        let mut agg = MetricsAggregator::new(10);
        let then = Utc::now() - Duration::hours(20);
        agg.on_burn_event(burn("tx", 5.0, then), then);
        assert_eq!(agg.snapshot().burn_rate_window, 5.0);

        agg.on_refresh(RefreshUpdate::default(), then + Duration::hours(25));
        assert_eq!(agg.snapshot().burn_rate_window, 0.0);
        assert_eq!(agg.snapshot().total_burned, 5.0);
    }

    #[tokio::test]
    async fn test_task_publishes_and_stops() {
        let (tx, rx) = mpsc::channel(8);
        let (publisher, mut snapshots) = watch::channel(MetricsSnapshot::default());
        let handle = tokio::spawn(aggregator_task(rx, MetricsAggregator::new(5), publisher));

        tx.send(AggregatorMessage::Burn(burn("a", 2.0, Utc::now())))
            .await
            .unwrap();
        snapshots.changed().await.unwrap();
        assert_eq!(snapshots.borrow().total_burned, 2.0);

        tx.send(AggregatorMessage::Shutdown).await.unwrap();
        let aggregator = handle.await.unwrap();
        assert_eq!(aggregator.snapshot().events_observed, 1);
    }
}

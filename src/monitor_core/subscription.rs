//! Subscription manager - one self-healing feed per monitored topic
//!
//! Each topic gets its own worker task. A worker pumps normalized events into
//! the aggregator channel while its feed is live, and on failure or feed
//! termination marks the topic `Failed`, backs off, and re-subscribes. There is
//! no retry ceiling.
//!
//! Fallback activation is decided exactly once, right after the initial
//! subscribe attempt across all topics: if none reached `Active`, the fallback
//! signal fires. Later recoveries never tear the fallback down.

use super::backoff::ExponentialBackoff;
use super::normalizer::Normalizer;
use super::shutdown_requested;
use super::types::{AggregatorMessage, SubscriptionHandle, SubscriptionStatus};
use crate::ledger::{EventSubscription, LedgerRpc, RpcError};
use futures_util::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const STOP_GRACE: Duration = Duration::from_secs(5);

type HandleTable = Arc<Mutex<HashMap<String, SubscriptionHandle>>>;

/// Result of the initial subscribe pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    pub active: usize,
    pub failed: usize,
    pub fallback_activated: bool,
}

pub struct SubscriptionManager {
    rpc: Arc<dyn LedgerRpc>,
    normalizer: Normalizer,
    sink: mpsc::Sender<AggregatorMessage>,
    handles: HandleTable,
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    fallback_signal: Option<oneshot::Sender<()>>,
    retry_initial_secs: u64,
    retry_max_secs: u64,
    started: bool,
}

impl SubscriptionManager {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        normalizer: Normalizer,
        sink: mpsc::Sender<AggregatorMessage>,
        fallback_signal: oneshot::Sender<()>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            rpc,
            normalizer,
            sink,
            handles: Arc::new(Mutex::new(HashMap::new())),
            workers: Vec::new(),
            shutdown,
            fallback_signal: Some(fallback_signal),
            retry_initial_secs: 5,
            retry_max_secs: 60,
            started: false,
        }
    }

    pub fn with_retry(mut self, initial_secs: u64, max_secs: u64) -> Self {
        self.retry_initial_secs = initial_secs;
        self.retry_max_secs = max_secs;
        self
    }

    /// Open one subscription per topic and spawn its worker
    pub async fn start(&mut self, topics: &[String]) -> StartOutcome {
        if self.started {
            log::warn!("Subscription manager already started, ignoring start()");
            let active = self.count(SubscriptionStatus::Active);
            return StartOutcome {
                active,
                failed: self.workers.len().saturating_sub(active),
                fallback_activated: false,
            };
        }
        self.started = true;

        let topics: BTreeSet<String> = topics.iter().cloned().collect();
        {
            let mut handles = lock(&self.handles);
            for topic in &topics {
                handles.insert(topic.clone(), SubscriptionHandle::new(topic.clone()));
            }
        }

        log::info!("🔌 Subscribing to {} topic(s)", topics.len());

        // Initial attempts run concurrently; each topic succeeds or fails alone.
        let attempts = join_all(topics.iter().map(|topic| {
            let rpc = self.rpc.clone();
            let topic = topic.clone();
            async move {
                let result = rpc.subscribe(&topic).await;
                (topic, result)
            }
        }))
        .await;

        let mut outcome = StartOutcome {
            active: 0,
            failed: 0,
            fallback_activated: false,
        };

        for (topic, result) in attempts {
            let initial = match result {
                Ok(subscription) => {
                    set_status(&self.handles, &topic, SubscriptionStatus::Active, None);
                    outcome.active += 1;
                    Some(subscription)
                }
                Err(e) => {
                    set_status(
                        &self.handles,
                        &topic,
                        SubscriptionStatus::Failed,
                        Some(e.to_string()),
                    );
                    outcome.failed += 1;
                    None
                }
            };

            let worker = TopicWorker {
                topic,
                rpc: self.rpc.clone(),
                normalizer: self.normalizer,
                sink: self.sink.clone(),
                handles: self.handles.clone(),
                shutdown: self.shutdown.subscribe(),
                backoff: ExponentialBackoff::new(self.retry_initial_secs, self.retry_max_secs),
            };
            self.workers.push(tokio::spawn(worker.run(initial)));
        }

        // Decided once: the sender is consumed either way.
        if let Some(signal) = self.fallback_signal.take() {
            if outcome.active == 0 {
                log::warn!("⚠️  No live subscription available, activating fallback poller");
                outcome.fallback_activated = signal.send(()).is_ok();
            }
        }

        log::info!(
            "📡 Subscriptions: {} active, {} failed",
            outcome.active,
            outcome.failed
        );
        outcome
    }

    /// Close every subscription and stop every worker; idempotent
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        self.fallback_signal.take();

        let workers: Vec<JoinHandle<()>> = self.workers.drain(..).collect();
        if workers.is_empty() {
            return;
        }

        log::info!("Stopping {} subscription worker(s)", workers.len());
        for worker in workers {
            let abort = worker.abort_handle();
            if tokio::time::timeout(STOP_GRACE, worker).await.is_err() {
                log::warn!("Subscription worker did not stop in time, aborting");
                abort.abort();
            }
        }
    }

    /// Copy of every handle, ordered by topic
    pub fn statuses(&self) -> Vec<SubscriptionHandle> {
        let mut handles: Vec<SubscriptionHandle> = lock(&self.handles).values().cloned().collect();
        handles.sort_by(|a, b| a.topic.cmp(&b.topic));
        handles
    }

    pub fn status(&self, topic: &str) -> Option<SubscriptionStatus> {
        lock(&self.handles).get(topic).map(|h| h.status)
    }

    fn count(&self, status: SubscriptionStatus) -> usize {
        lock(&self.handles)
            .values()
            .filter(|h| h.status == status)
            .count()
    }
}

struct TopicWorker {
    topic: String,
    rpc: Arc<dyn LedgerRpc>,
    normalizer: Normalizer,
    sink: mpsc::Sender<AggregatorMessage>,
    handles: HandleTable,
    shutdown: watch::Receiver<bool>,
    backoff: ExponentialBackoff,
}

enum FeedEnd {
    Terminated,
    Shutdown,
}

impl TopicWorker {
    async fn run(mut self, initial: Option<EventSubscription>) {
        let mut current = initial;

        loop {
            if let Some(mut subscription) = current.take() {
                self.backoff.reset();
                let end = self.pump(&mut subscription).await;
                subscription.close();

                match end {
                    FeedEnd::Shutdown => break,
                    FeedEnd::Terminated => {
                        log::warn!("Feed for {} terminated unexpectedly", self.topic);
                        set_status(
                            &self.handles,
                            &self.topic,
                            SubscriptionStatus::Failed,
                            Some("feed terminated".to_string()),
                        );
                    }
                }
            }

            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                _ = self.backoff.sleep(&self.topic) => {}
            }

            set_status(&self.handles, &self.topic, SubscriptionStatus::Retrying, None);

            let result: Result<EventSubscription, RpcError> = tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                result = self.rpc.subscribe(&self.topic) => result,
            };

            match result {
                Ok(subscription) => {
                    set_status(&self.handles, &self.topic, SubscriptionStatus::Active, None);
                    current = Some(subscription);
                }
                Err(e) => {
                    set_status(
                        &self.handles,
                        &self.topic,
                        SubscriptionStatus::Failed,
                        Some(e.to_string()),
                    );
                }
            }
        }

        log::debug!("Subscription worker for {} stopped", self.topic);
    }

    async fn pump(&mut self, subscription: &mut EventSubscription) -> FeedEnd {
        loop {
            let raw = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return FeedEnd::Shutdown,
                raw = subscription.next_event() => raw,
            };

            let Some(raw) = raw else {
                return FeedEnd::Terminated;
            };

            let Some(event) = self.normalizer.normalize(&raw, &self.topic) else {
                continue;
            };

            if self.sink.send(AggregatorMessage::Burn(event)).await.is_err() {
                log::warn!("Aggregator channel closed, stopping feed for {}", self.topic);
                return FeedEnd::Shutdown;
            }
        }
    }
}

fn lock(
    handles: &HandleTable,
) -> std::sync::MutexGuard<'_, HashMap<String, SubscriptionHandle>> {
    handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_status(
    handles: &HandleTable,
    topic: &str,
    status: SubscriptionStatus,
    error: Option<String>,
) {
    match status {
        SubscriptionStatus::Active => log::info!("✅ Subscription {} is {}", topic, status.as_str()),
        _ => match &error {
            Some(e) => log::warn!("Subscription {} is {}: {}", topic, status.as_str(), e),
            None => log::warn!("Subscription {} is {}", topic, status.as_str()),
        },
    }

    let mut handles = lock(handles);
    let handle = handles
        .entry(topic.to_string())
        .or_insert_with(|| SubscriptionHandle::new(topic));
    handle.status = status;
    if error.is_some() || status == SubscriptionStatus::Active {
        handle.last_error = error;
    }
}

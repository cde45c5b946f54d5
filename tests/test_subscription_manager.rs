//! Subscription manager behavior against a scripted ledger
//!
//! Covers independent per-topic startup, the one-shot fallback decision,
//! self-healing after feed termination, and idempotent stop.

mod common;

use burnwatch::monitor_core::{
    AggregatorMessage, Normalizer, SubscriptionManager, SubscriptionStatus,
};
use common::{burn_payload, MockLedger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

fn topics(names: &[&str]) -> Vec<String> {
    names.iter().map(|t| t.to_string()).collect()
}

async fn wait_for_status(manager: &SubscriptionManager, topic: &str, status: SubscriptionStatus) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while manager.status(topic) != Some(status) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("status never reached");
}

#[tokio::test(start_paused = true)]
async fn test_one_topic_failure_does_not_block_others() {
    let ledger = Arc::new(MockLedger::new(0));
    ledger.script("good", &[true]);
    let (tx, mut rx) = mpsc::channel(16);
    let (signal, mut activation) = oneshot::channel();

    let mut manager = SubscriptionManager::new(ledger.clone(), Normalizer::new(0), tx, signal)
        .with_retry(1, 2);
    let outcome = manager.start(&topics(&["good", "bad"])).await;

    assert_eq!(outcome.active, 1);
    assert_eq!(outcome.failed, 1);
    assert!(!outcome.fallback_activated);
    assert_eq!(manager.status("good"), Some(SubscriptionStatus::Active));
    assert_ne!(manager.status("bad"), Some(SubscriptionStatus::Active));
    // Sender consumed without firing.
    assert!(matches!(
        activation.try_recv(),
        Err(oneshot::error::TryRecvError::Closed)
    ));

    ledger
        .feed("good")
        .unwrap()
        .send(burn_payload("tx1", 7))
        .await
        .unwrap();
    match rx.recv().await {
        Some(AggregatorMessage::Burn(event)) => {
            assert_eq!(event.transaction_id, "tx1");
            assert_eq!(event.amount, 7.0);
            assert_eq!(event.source_topic, "good");
        }
        other => panic!("expected burn, got {:?}", other),
    }

    let statuses = manager.statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].topic, "bad");
    assert!(statuses[0].last_error.is_some());

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_fallback_signaled_once_and_not_torn_down() {
    let ledger = Arc::new(MockLedger::new(0));
    ledger.script("a", &[false, true]);
    ledger.script("b", &[false]);
    let (tx, _rx) = mpsc::channel(16);
    let (signal, activation) = oneshot::channel();

    let mut manager = SubscriptionManager::new(ledger.clone(), Normalizer::new(0), tx, signal)
        .with_retry(1, 2);
    let outcome = manager.start(&topics(&["a", "b"])).await;
    assert!(outcome.fallback_activated);
    assert!(activation.await.is_ok());

    // A second start is ignored and never re-signals.
    let again = manager.start(&topics(&["a", "b"])).await;
    assert!(!again.fallback_activated);

    // "a" recovers; "b" keeps retrying indefinitely.
    wait_for_status(&manager, "a", SubscriptionStatus::Active).await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(ledger.calls("b") > 3);
    assert_ne!(manager.status("b"), Some(SubscriptionStatus::Active));

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminated_feed_is_resubscribed() {
    let ledger = Arc::new(MockLedger::new(0));
    ledger.script("t", &[true, true]);
    let (tx, mut rx) = mpsc::channel(16);
    let (signal, _activation) = oneshot::channel();

    let mut manager = SubscriptionManager::new(ledger.clone(), Normalizer::new(0), tx, signal)
        .with_retry(1, 2);
    manager.start(&topics(&["t"])).await;
    assert_eq!(ledger.calls("t"), 1);

    ledger.cut_feed("t");
    tokio::time::timeout(Duration::from_secs(600), async {
        while ledger.calls("t") < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("never resubscribed");
    wait_for_status(&manager, "t", SubscriptionStatus::Active).await;

    ledger
        .feed("t")
        .unwrap()
        .send(burn_payload("after", 3))
        .await
        .unwrap();
    assert!(matches!(rx.recv().await, Some(AggregatorMessage::Burn(_))));

    manager.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_closes_feeds() {
    let ledger = Arc::new(MockLedger::new(0));
    ledger.script("x", &[true]);
    ledger.script("y", &[true]);
    let (tx, _rx) = mpsc::channel(16);

    // Stopping before anything started is harmless.
    let (signal, _unused) = oneshot::channel();
    let mut idle = SubscriptionManager::new(ledger.clone(), Normalizer::new(0), tx.clone(), signal);
    idle.stop().await;
    idle.stop().await;

    let (signal, _activation) = oneshot::channel();
    let mut manager = SubscriptionManager::new(ledger.clone(), Normalizer::new(0), tx, signal);
    manager.start(&topics(&["x", "y"])).await;
    manager.stop().await;
    manager.stop().await;

    assert_eq!(ledger.closed_count(), 2);
}

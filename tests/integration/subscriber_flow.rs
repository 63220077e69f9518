//! Broker subscriber tests against a scripted broker
//!
//! These tests verify that:
//! - A handshake leads to a subscribe request and payloads reach the queue
//! - A refused subscription drops the connection and retries with backoff
//! - Refused subscriptions count against the retry limit
//! - After a lost connection the subscription is only active again once the
//!   broker acknowledges the new subscribe request

use std::time::Duration;

use porty::actors::subscriber::SubscriberHandle;
use porty::connection::{ConnectionState, ReconnectPolicy};
use porty::queue::{IngestQueue, RawMessage};
use pretty_assertions::assert_eq;

use crate::helpers::*;
use crate::mock_broker::{MockBroker, Session};

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay_ms: 50,
        jitter: false,
        ..ReconnectPolicy::default()
    }
}

/// Poll `condition` every 10ms for up to 5s
async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn payloads(messages: &[RawMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.payload.as_str()).collect()
}

#[tokio::test]
async fn test_subscribes_and_enqueues_payloads() {
    let broker = MockBroker::start(vec![Session::granted().publishing(&[QUIET_PAYLOAD])]).await;
    let (sender, mut queue) = IngestQueue::new();
    let handle = SubscriberHandle::spawn(broker.config(fast_reconnect()), sender);

    let mut received = Vec::new();
    assert!(
        wait_for(|| {
            received.extend(queue.drain());
            !received.is_empty()
        })
        .await
    );

    assert_eq!(payloads(&received), vec![QUIET_PAYLOAD]);
    assert_eq!(handle.state(), ConnectionState::SubscriptionActive);
    assert_eq!(broker.connections(), 1);
    assert_eq!(broker.subscribes(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_refused_subscription_reconnects() {
    let broker = MockBroker::start(vec![
        Session::refused(),
        Session::granted().publishing(&[QUIET_PAYLOAD]),
    ])
    .await;
    let (sender, mut queue) = IngestQueue::new();
    let handle = SubscriberHandle::spawn(broker.config(fast_reconnect()), sender);

    let mut received = Vec::new();
    assert!(
        wait_for(|| {
            received.extend(queue.drain());
            !received.is_empty()
        })
        .await
    );

    assert_eq!(payloads(&received), vec![QUIET_PAYLOAD]);
    assert_eq!(broker.connections(), 2);
    assert_eq!(broker.subscribes(), 2);
    assert_eq!(handle.state(), ConnectionState::SubscriptionActive);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_refused_subscriptions_exhaust_retries() {
    let broker = MockBroker::start(vec![Session::refused()]).await;
    let policy = ReconnectPolicy {
        max_attempts: Some(1),
        ..fast_reconnect()
    };
    let (sender, _queue) = IngestQueue::new();
    let handle = SubscriberHandle::spawn(broker.config(policy), sender);
    let mut state_rx = handle.subscribe_state();

    // The state sender is dropped once the task ends
    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        while state_rx.changed().await.is_ok() {}
    })
    .await;

    assert!(finished.is_ok());
    assert_eq!(broker.connections(), 2);
    assert_eq!(broker.subscribes(), 2);
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_resubscribes_after_connection_loss() {
    let first = payload([0.0; 5], 0.0, 20.9, 1.0, 1);
    let second = payload([0.0; 5], 0.0, 20.9, 2.0, 1);
    let broker = MockBroker::start(vec![
        Session::granted().publishing(&[&first]).then_hang_up(),
        Session::granted()
            .delay_suback(Duration::from_millis(500))
            .publishing(&[&second]),
    ])
    .await;
    let (sender, mut queue) = IngestQueue::new();
    let handle = SubscriberHandle::spawn(broker.config(fast_reconnect()), sender);

    let mut received = Vec::new();
    assert!(
        wait_for(|| {
            received.extend(queue.drain());
            !received.is_empty()
        })
        .await
    );

    // Reconnected and subscribing, but the broker has not acknowledged yet
    assert!(wait_for(|| broker.subscribes() == 2).await);
    assert_eq!(handle.state(), ConnectionState::Connected);

    assert!(
        wait_for(|| {
            received.extend(queue.drain());
            received.len() == 2
        })
        .await
    );

    assert_eq!(payloads(&received), vec![first.as_str(), second.as_str()]);
    assert_eq!(handle.state(), ConnectionState::SubscriptionActive);
    assert_eq!(broker.connections(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_closed_queue_stops_subscriber() {
    let broker = MockBroker::start(vec![Session::granted().publishing(&[QUIET_PAYLOAD])]).await;
    let (sender, queue) = IngestQueue::new();
    drop(queue);

    let handle = SubscriberHandle::spawn(broker.config(fast_reconnect()), sender);
    let mut state_rx = handle.subscribe_state();

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        while state_rx.changed().await.is_ok() {}
    })
    .await;

    assert!(finished.is_ok());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(broker.connections(), 1);
}

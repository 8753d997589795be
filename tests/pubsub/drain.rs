use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use topic_pubsub::broker::{Connection, InMemoryBroker};
use topic_pubsub::{CallbackId, DrainReport, PubSubError};

use crate::support::{client, client_with, config, Recorder, IDLE};

/// Generous upper bound for a drain that should end after one idle window.
const SLACK: Duration = Duration::from_secs(2);

#[test]
fn drain_without_subscriptions_returns_after_idle_timeout() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);

    let started = Instant::now();
    let report = pubsub.drain().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report, DrainReport::default());
    assert!(elapsed >= IDLE);
    assert!(elapsed < SLACK);
}

#[test]
fn drain_returns_once_the_queue_goes_quiet() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let recorder = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("drain", "recorder"), recorder.ok())
        .unwrap();

    for id in 0..25 {
        pubsub
            .publish_model_event("Order", "created", &json!({ "id": id }))
            .unwrap();
    }

    let started = Instant::now();
    let report = pubsub.drain().unwrap();

    assert!(started.elapsed() < SLACK);
    assert_eq!(report.delivered, 25);
    assert_eq!(report.handled, 25);
    assert_eq!(recorder.ids(), (0..25u64).collect::<Vec<_>>());
    assert_eq!(broker.acknowledged().len(), 25);
    assert_eq!(broker.ready_count(&pubsub.bindings()[0].queue.name), 0);
}

#[test]
fn messages_published_before_subscribing_are_not_delivered() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let recorder = Recorder::new();

    pubsub
        .publish_model_event("Order", "created", &json!({ "id": 1 }))
        .unwrap();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("drain", "late"), recorder.ok())
        .unwrap();
    pubsub
        .publish_model_event("Order", "created", &json!({ "id": 2 }))
        .unwrap();
    pubsub.drain().unwrap();

    assert_eq!(recorder.ids(), vec![2]);
}

#[test]
fn acknowledged_messages_are_not_redelivered() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let recorder = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("drain", "once"), recorder.ok())
        .unwrap();

    pubsub
        .publish_model_event("Order", "created", &json!({ "id": 1 }))
        .unwrap();
    pubsub.drain().unwrap();
    let second = pubsub.drain().unwrap();

    assert_eq!(second.delivered, 0);
    assert_eq!(recorder.calls(), 1);
}

#[test]
fn acquired_connection_publishes_raw_messages() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let recorder = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("drain", "raw"), recorder.ok())
        .unwrap();

    {
        let mut conn = pubsub.acquire().unwrap();
        conn.publish(
            pubsub.exchange().name(),
            "Order.imported",
            br#"{"object":{"id":5}}"#.to_vec(),
        )
        .unwrap();
    }
    pubsub.drain().unwrap();

    assert_eq!(recorder.ids(), vec![5]);
}

#[test]
fn broker_loss_during_drain_is_reported() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let recorder = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("drain", "cut"), recorder.ok())
        .unwrap();

    broker.disconnect();
    let err = pubsub.drain().unwrap_err();
    assert!(matches!(err, PubSubError::BrokerUnavailable(_)));

    broker.reconnect();
    pubsub
        .publish_model_event("Order", "created", &json!({ "id": 1 }))
        .unwrap();
    let report = pubsub.drain().unwrap();
    assert_eq!(report.handled, 1);
}

#[test]
fn publishes_during_a_drain_extend_it() {
    let idle = Duration::from_millis(200);
    let gap = Duration::from_millis(100);
    let broker = InMemoryBroker::new();
    let mut pubsub = client_with(&broker, config().with_idle_timeout(idle));
    let recorder = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("drain", "concurrent"), recorder.ok())
        .unwrap();

    let publisher = pubsub.publisher();
    let started = Instant::now();
    let producer = thread::spawn(move || {
        for id in 1..=3 {
            thread::sleep(gap);
            publisher
                .publish_model_event("Order", "created", &json!({ "id": id }))
                .unwrap();
        }
    });

    let report = pubsub.drain().unwrap();
    let elapsed = started.elapsed();
    producer.join().unwrap();

    // The last message lands after the first idle window would have closed.
    assert_eq!(report.handled, 3);
    assert_eq!(recorder.ids(), vec![1, 2, 3]);
    assert!(elapsed >= gap * 3 + idle);
}

use serde_json::{json, Value};
use topic_pubsub::broker::{Connection, Delivery, InMemoryBroker};
use topic_pubsub::{CallbackId, FailurePolicy, HandlerError};

use crate::support::{client, client_with, config, Recorder};

fn publish_ids(pubsub: &topic_pubsub::PubSub<InMemoryBroker>, ids: &[u64]) {
    for id in ids {
        pubsub
            .publish_model_event("Order", "cancelled", &json!({ "id": id }))
            .unwrap();
    }
}

#[test]
fn failed_subscriber_sees_nothing_else_in_the_drain() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let f = Recorder::new();
    pubsub
        .subscribe_as("Order.cancelled", CallbackId::new("failures", "f"), f.failing_on(0))
        .unwrap();
    let queue = pubsub.bindings()[0].queue.name.clone();

    publish_ids(&pubsub, &[1, 2]);
    let report = pubsub.drain().unwrap();

    assert_eq!(f.ids(), vec![1]);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.handled, 0);
    assert!(broker.acknowledged().is_empty());
    // both went back to the queue when the drain released its connection
    assert_eq!(broker.ready_count(&queue), 2);
    assert_eq!(broker.unacked_count(&queue), 0);
}

#[test]
fn next_drain_redelivers_and_reenables() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let f = Recorder::new();
    pubsub
        .subscribe_as("Order.cancelled", CallbackId::new("failures", "retry"), f.failing_on(0))
        .unwrap();

    publish_ids(&pubsub, &[1, 2]);
    pubsub.drain().unwrap();
    let report = pubsub.drain().unwrap();

    assert_eq!(report.handled, 2);
    assert_eq!(f.ids(), vec![1, 1, 2]);
    let redelivered: Vec<_> = f.seen().iter().map(|s| s.redelivered).collect();
    assert_eq!(redelivered, vec![false, true, true]);
    assert_eq!(broker.acknowledged().len(), 2);
}

#[test]
fn failing_subscriber_does_not_affect_siblings() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let bad = Recorder::new();
    let good = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("failures", "bad"), bad.failing_on(1))
        .unwrap();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("failures", "good"), good.ok())
        .unwrap();

    publish_ids(&pubsub, &[1, 2, 3, 4]);
    let report = pubsub.drain().unwrap();

    assert_eq!(bad.ids(), vec![1, 2]);
    assert_eq!(good.ids(), vec![1, 2, 3, 4]);
    assert_eq!(report.handled, 5);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
}

#[test]
fn panicking_subscriber_is_contained() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let exploding = |_body: &Value, _delivery: &Delivery| -> Result<(), HandlerError> {
        panic!("subscriber bug")
    };
    pubsub
        .subscribe_as("Order.*", CallbackId::new("failures", "exploding"), exploding)
        .unwrap();

    publish_ids(&pubsub, &[1, 2]);
    let report = pubsub.drain().unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert!(broker.acknowledged().is_empty());
}

#[test]
fn body_that_is_not_json_counts_as_failure() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client(&broker);
    let f = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("failures", "strict"), f.ok())
        .unwrap();

    {
        let mut conn = pubsub.acquire().unwrap();
        conn.publish(pubsub.exchange().name(), "Order.legacy", b"<xml/>".to_vec())
            .unwrap();
    }
    publish_ids(&pubsub, &[1]);
    let report = pubsub.drain().unwrap();

    assert_eq!(f.calls(), 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
}

#[test]
fn requeue_policy_rejects_the_failed_delivery() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client_with(
        &broker,
        config().with_failure_policy(FailurePolicy::Requeue),
    );
    let f = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("failures", "requeue"), f.failing_on(0))
        .unwrap();
    let queue = pubsub.bindings()[0].queue.name.clone();

    publish_ids(&pubsub, &[1, 2]);
    let report = pubsub.drain().unwrap();

    // the requeued message comes straight back and meets the disabled guard
    assert_eq!(report.requeued, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(f.calls(), 1);
    assert_eq!(broker.ready_count(&queue), 2);
}

#[test]
fn discard_policy_drops_the_failed_delivery() {
    let broker = InMemoryBroker::new();
    let mut pubsub = client_with(
        &broker,
        config().with_failure_policy(FailurePolicy::Discard),
    );
    let f = Recorder::new();
    pubsub
        .subscribe_as("Order.*", CallbackId::new("failures", "discard"), f.failing_on(0))
        .unwrap();
    let queue = pubsub.bindings()[0].queue.name.clone();

    publish_ids(&pubsub, &[1, 2]);
    let report = pubsub.drain().unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(broker.discarded(), 1);
    assert_eq!(broker.ready_count(&queue), 1);

    let report = pubsub.drain().unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(f.ids(), vec![1, 2]);
}

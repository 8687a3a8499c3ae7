//! Notification routing: polled queries, standalone subscriptions, and
//! batch fan-out.

mod common;

use async_trait::async_trait;
use common::{eventually, init_tracing, method_of, result_for, MockServer, Reply};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tw_client::prelude::*;
use tw_client::PollFailure;

struct RecordingPollObserver {
    deltas: mpsc::UnboundedSender<RowsDelta<Vec<i64>>>,
    failures: mpsc::UnboundedSender<PollFailure>,
}

#[async_trait]
impl PollObserver<Vec<i64>> for RecordingPollObserver {
    async fn rows_changed(&self, delta: RowsDelta<Vec<i64>>) {
        let _ = self.deltas.send(delta);
    }

    async fn poll_failed(&self, failure: PollFailure) {
        let _ = self.failures.send(failure);
    }
}

struct RecordingSubObserver<T> {
    rows: mpsc::UnboundedSender<T>,
}

#[async_trait]
impl<T: Send + 'static> SubscriptionObserver<T> for RecordingSubObserver<T> {
    async fn notify(&self, row: T) {
        let _ = self.rows.send(row);
    }
}

fn polled_query_server() -> common::Responder {
    Box::new(|message| match method_of(message) {
        "create-polled-query" => {
            assert_eq!(message["params"]["method"], "poll0");
            Reply::Send(vec![result_for(message, json!({"handle": 11}))])
        }
        "poll-now" => {
            assert_eq!(message["params"], json!([11]));
            Reply::Send(vec![result_for(message, Value::Null)])
        }
        "close-polled-query" => {
            assert_eq!(message["params"], json!([11]));
            Reply::Send(vec![result_for(message, Value::Null)])
        }
        _ => Reply::None,
    })
}

#[tokio::test]
async fn polled_query_notification_reaches_the_observer_once() {
    init_tracing();
    let server = MockServer::spawn(polled_query_server()).await;
    let client = TwClient::connect(server.addr).await.unwrap();

    let (deltas_tx, mut deltas_rx) = mpsc::unbounded_channel();
    let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
    let polled = client
        .polled_query(
            QuerySpec::fol("((x) s.t. (watched x))", "AP5"),
            PolledQueryOptions {
                schedule: Some(Schedule::every_seconds(60)),
                report_initial: Some(true),
                ..PolledQueryOptions::default()
            },
            Arc::new(RecordingPollObserver {
                deltas: deltas_tx,
                failures: failures_tx,
            }),
        )
        .await
        .unwrap();

    assert_eq!(polled.label(), "poll0");
    assert_eq!(polled.handle(), Some(11));
    let create = &server.seen_for("create-polled-query")[0];
    assert_eq!(create["params"]["schedule"], json!([60]));
    assert_eq!(create["params"]["report-initial"], true);

    server.push(json!({
        "jsonrpc": "2.0",
        "method": "poll0",
        "params": {"added": [[7]], "deleted": [], "timestamp": "2017-06-01T09:30:00Z"}
    }));

    let delta = deltas_rx.recv().await.unwrap();
    assert_eq!(delta.added, vec![vec![7]]);
    assert!(delta.deleted.is_empty());
    // Exactly once.
    assert!(deltas_rx.try_recv().is_err());

    // Error notifications arrive under the same label, told apart by
    // payload shape.
    server.push(json!({
        "jsonrpc": "2.0",
        "method": "poll0",
        "params": {"message": "poll skipped: previous poll still running"}
    }));
    let failure = failures_rx.recv().await.unwrap();
    assert!(failure.message.contains("skipped"));

    polled.poll(None).await.unwrap();

    polled.dispose().await;
    polled.dispose().await;
    assert_eq!(server.seen_for("close-polled-query").len(), 1);

    // Late notifications for the dropped label are silently discarded.
    server.push(json!({
        "jsonrpc": "2.0",
        "method": "poll0",
        "params": {"added": [[9]], "deleted": []}
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(deltas_rx.try_recv().is_err());
    assert!(matches!(polled.poll(None).await, Err(TwError::Disposed(_))));
}

#[tokio::test]
async fn invalid_schedule_is_rejected_locally() {
    init_tracing();
    let server = MockServer::spawn(Box::new(|_| Reply::None)).await;
    let client = TwClient::connect(server.addr).await.unwrap();

    let (deltas_tx, _deltas_rx) = mpsc::unbounded_channel();
    let (failures_tx, _failures_rx) = mpsc::unbounded_channel();
    let result = client
        .polled_query::<Vec<i64>>(
            QuerySpec::fol("((x) s.t. (watched x))", "AP5"),
            PolledQueryOptions {
                schedule: Some(Schedule::new().push_calendar(CalendarSpec {
                    minutes: "75".into(),
                    ..CalendarSpec::default()
                })),
                ..PolledQueryOptions::default()
            },
            Arc::new(RecordingPollObserver {
                deltas: deltas_tx,
                failures: failures_tx,
            }),
        )
        .await;

    assert!(matches!(result, Err(TwError::Schedule(_))));
    // Nothing went out on the wire.
    assert!(server.seen_for("create-polled-query").is_empty());
}

#[tokio::test]
async fn standalone_subscription_lifecycle() {
    init_tracing();
    let server = MockServer::spawn(Box::new(|message| match method_of(message) {
        "subscribe" | "unsubscribe" => {
            assert_eq!(message["params"]["label"], "sub0");
            assert_eq!(message["params"]["method"], "sub0");
            assert_eq!(message["params"]["combine"], false);
            Reply::Send(vec![result_for(message, Value::Null)])
        }
        _ => Reply::None,
    }))
    .await;
    let client = TwClient::connect(server.addr).await.unwrap();

    let (rows_tx, mut rows_rx) = mpsc::unbounded_channel::<Vec<String>>();
    let subscription = client.subscription(
        QuerySpec::fol("((x) s.t. (observed x))", "AP5"),
        Arc::new(RecordingSubObserver { rows: rows_tx }),
    );
    assert_eq!(subscription.label(), "sub0");
    assert!(!subscription.is_active());

    subscription.activate().await.unwrap();
    assert!(subscription.is_active());
    // Double activation violates the state machine.
    assert!(matches!(
        subscription.activate().await,
        Err(TwError::Subscription(_))
    ));

    // A single-subscription notification carries one tuple as params.
    server.push(json!({"jsonrpc": "2.0", "method": "sub0", "params": ["a"]}));
    assert_eq!(rows_rx.recv().await.unwrap(), vec!["a"]);

    subscription.deactivate().await.unwrap();
    assert!(!subscription.is_active());
    assert!(matches!(
        subscription.deactivate().await,
        Err(TwError::Subscription(_))
    ));

    // Inactive again: notifications no longer reach the observer.
    server.push(json!({"jsonrpc": "2.0", "method": "sub0", "params": ["b"]}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rows_rx.try_recv().is_err());
}

#[tokio::test]
async fn batch_dispatches_tuples_to_members_in_order() {
    init_tracing();
    let server = MockServer::spawn(Box::new(|message| match method_of(message) {
        "subscribe" | "unsubscribe" => {
            assert_eq!(message["params"]["method"], "batch0");
            assert_eq!(message["params"]["combine"], true);
            Reply::Send(vec![result_for(message, Value::Null)])
        }
        _ => Reply::None,
    }))
    .await;
    let client = TwClient::connect(server.addr).await.unwrap();

    let (a_tx, mut a_rx) = mpsc::unbounded_channel::<Vec<String>>();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel::<Vec<i64>>();
    let sub_a = client.subscription(
        QuerySpec::fol("((x) s.t. (tagged x))", "AP5"),
        Arc::new(RecordingSubObserver { rows: a_tx }),
    );
    let sub_b = client.subscription(
        QuerySpec::fol("((n) s.t. (counted n))", "AP5"),
        Arc::new(RecordingSubObserver { rows: b_tx }),
    );

    let batch = client.batch_subscription().unwrap();
    assert_eq!(batch.method(), "batch0");
    batch.add(&sub_a).await.unwrap();
    batch.add(&sub_b).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert!(sub_a.is_batched());

    // A batched subscription cannot be activated, nor re-added.
    assert!(matches!(
        sub_a.activate().await,
        Err(TwError::Subscription(_))
    ));
    assert!(matches!(batch.add(&sub_a).await, Err(TwError::Subscription(_))));

    server.push(json!({
        "jsonrpc": "2.0",
        "method": "batch0",
        "params": {
            "update#": 3,
            "matches": [
                {"label": "sub0", "tuples": [["a"]]},
                {"label": "sub1", "tuples": [[1], [2]]}
            ]
        }
    }));

    assert_eq!(a_rx.recv().await.unwrap(), vec!["a"]);
    assert_eq!(b_rx.recv().await.unwrap(), vec![1]);
    assert_eq!(b_rx.recv().await.unwrap(), vec![2]);
    assert!(a_rx.try_recv().is_err());
    assert!(b_rx.try_recv().is_err());

    // Removal unsubscribes on the server and frees the member.
    batch.remove(&sub_a).await.unwrap();
    assert!(!sub_a.is_batched());
    assert_eq!(batch.len(), 1);

    batch.dispose().await;
    batch.dispose().await;
    assert!(!sub_b.is_batched());
    // One unsubscribe for the removal, one per member at disposal.
    assert_eq!(server.seen_for("unsubscribe").len(), 2);
}

#[tokio::test]
async fn active_subscription_cannot_join_a_batch() {
    init_tracing();
    let server = MockServer::spawn(Box::new(|message| match method_of(message) {
        "subscribe" => Reply::Send(vec![result_for(message, Value::Null)]),
        _ => Reply::None,
    }))
    .await;
    let client = TwClient::connect(server.addr).await.unwrap();

    let (rows_tx, _rows_rx) = mpsc::unbounded_channel::<Vec<String>>();
    let subscription = client.subscription(
        QuerySpec::fol("((x) s.t. (observed x))", "AP5"),
        Arc::new(RecordingSubObserver { rows: rows_tx }),
    );
    subscription.activate().await.unwrap();

    let batch = client.batch_subscription().unwrap();
    assert!(matches!(
        batch.add(&subscription).await,
        Err(TwError::Subscription(_))
    ));
}

#[tokio::test]
async fn subscriptions_cannot_cross_clients() {
    init_tracing();
    let server_a = MockServer::spawn(Box::new(|_| Reply::None)).await;
    let server_b = MockServer::spawn(Box::new(|_| Reply::None)).await;
    let client_a = TwClient::connect(server_a.addr).await.unwrap();
    let client_b = TwClient::connect(server_b.addr).await.unwrap();

    let (rows_tx, _rows_rx) = mpsc::unbounded_channel::<Vec<String>>();
    let foreign = client_b.subscription(
        QuerySpec::fol("((x) s.t. (observed x))", "AP5"),
        Arc::new(RecordingSubObserver { rows: rows_tx }),
    );

    let batch = client_a.batch_subscription().unwrap();
    match batch.add(&foreign).await {
        Err(TwError::Subscription(message)) => assert!(message.contains("different client")),
        other => panic!("expected a subscription error, got {:?}", other),
    }
}

#[tokio::test]
async fn subscription_dispose_leaves_its_batch() {
    init_tracing();
    let server = MockServer::spawn(Box::new(|message| match method_of(message) {
        "subscribe" | "unsubscribe" => Reply::Send(vec![result_for(message, Value::Null)]),
        _ => Reply::None,
    }))
    .await;
    let client = TwClient::connect(server.addr).await.unwrap();

    let (rows_tx, _rows_rx) = mpsc::unbounded_channel::<Vec<String>>();
    let subscription = client.subscription(
        QuerySpec::fol("((x) s.t. (observed x))", "AP5"),
        Arc::new(RecordingSubObserver { rows: rows_tx }),
    );
    let batch = client.batch_subscription().unwrap();
    batch.add(&subscription).await.unwrap();

    subscription.dispose().await;
    subscription.dispose().await;
    assert_eq!(batch.len(), 0);
    assert!(
        eventually(|| server.seen_for("unsubscribe").len() == 1).await,
        "disposal unsubscribes the member exactly once"
    );
}

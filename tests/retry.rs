//! Retry-layer behavior: the budget, exactly-once failure callbacks, and
//! topic-filter matching of responses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatelink::connectivity::{OutboundPublisher, OutboundRetryHandler, RetryMessage};
use gatelink::model::Message;
use gatelink::persistence::InMemoryMessagePersistence;

mod common;

struct Fixture {
    connection: Arc<common::ScriptedConnection>,
    retry: OutboundRetryHandler,
}

fn fixture() -> Fixture {
    let connection = common::ScriptedConnection::new();
    let publisher = OutboundPublisher::new(
        "test",
        connection.clone(),
        Arc::new(InMemoryMessagePersistence::new()),
    );
    publisher.connected();
    Fixture {
        connection,
        retry: OutboundRetryHandler::new(publisher),
    }
}

fn request() -> Message {
    Message::new("d2p/GW/registered_devices", b"{}".to_vec())
}

#[tokio::test]
async fn exhausts_the_budget_and_fails_exactly_once() {
    common::init_logging();
    let fixture = fixture();
    let failures = Arc::new(AtomicUsize::new(0));

    let on_fail_counter = failures.clone();
    fixture.retry.add(RetryMessage {
        message: request(),
        response_channel: "p2d/GW/registered_devices_response".to_owned(),
        on_fail: Box::new(move |_| {
            on_fail_counter.fetch_add(1, Ordering::SeqCst);
        }),
        retry_count: 3,
        retry_interval: Duration::from_millis(50),
    });

    common::assert_eventually(|| failures.load(Ordering::SeqCst) == 1, "failure callback").await;
    // Initial send plus one per retry tick.
    common::assert_eventually(
        || fixture.connection.published().len() == 4,
        "three retries after the initial send",
    )
    .await;

    // Nothing more fires after exhaustion.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.connection.published().len(), 4);
}

#[tokio::test]
async fn a_matching_response_stops_the_retries() {
    common::init_logging();
    let fixture = fixture();
    let failures = Arc::new(AtomicUsize::new(0));

    let on_fail_counter = failures.clone();
    fixture.retry.add(RetryMessage {
        message: request(),
        response_channel: "p2d/GW/registered_devices_response".to_owned(),
        on_fail: Box::new(move |_| {
            on_fail_counter.fetch_add(1, Ordering::SeqCst);
        }),
        retry_count: 3,
        retry_interval: Duration::from_millis(100),
    });

    common::assert_eventually(|| fixture.connection.published().len() == 1, "initial send").await;
    fixture.retry.message_received(&Message::new(
        "p2d/GW/registered_devices_response",
        b"{}".to_vec(),
    ));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(failures.load(Ordering::SeqCst), 0, "no failure after a response");
    assert_eq!(fixture.connection.published().len(), 1, "no retries after a response");
}

#[tokio::test]
async fn response_matching_honors_single_level_wildcards() {
    common::init_logging();
    let fixture = fixture();
    let failures = Arc::new(AtomicUsize::new(0));

    let on_fail_counter = failures.clone();
    fixture.retry.add(RetryMessage {
        message: request(),
        response_channel: "p2d/+/registered_devices_response".to_owned(),
        on_fail: Box::new(move |_| {
            on_fail_counter.fetch_add(1, Ordering::SeqCst);
        }),
        retry_count: 2,
        retry_interval: Duration::from_millis(100),
    });

    // A different action does not clear the record.
    fixture
        .retry
        .message_received(&Message::new("p2d/GW/children_synchronization_response", b"[]".to_vec()));
    // The wildcard level does.
    fixture.retry.message_received(&Message::new(
        "p2d/ANY_DEVICE/registered_devices_response",
        b"{}".to_vec(),
    ));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.connection.published().len(), 1);
}

#[tokio::test]
async fn a_duplicate_request_supersedes_the_active_record() {
    common::init_logging();
    let fixture = fixture();
    let failures = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let on_fail_counter = failures.clone();
        fixture.retry.add(RetryMessage {
            message: request(),
            response_channel: "p2d/GW/registered_devices_response".to_owned(),
            on_fail: Box::new(move |_| {
                on_fail_counter.fetch_add(1, Ordering::SeqCst);
            }),
            retry_count: 1,
            retry_interval: Duration::from_millis(50),
        });
    }

    // Only the second record is alive; exactly one failure fires.
    common::assert_eventually(|| failures.load(Ordering::SeqCst) == 1, "single failure").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

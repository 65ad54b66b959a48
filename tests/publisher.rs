//! Outbound-publisher behavior: nothing leaves while disconnected, FIFO
//! order holds across a failed publish and a reconnect, and the queue drains
//! exactly once per message.

use std::sync::Arc;
use std::time::Duration;

use gatelink::connectivity::OutboundPublisher;
use gatelink::model::Message;
use gatelink::persistence::InMemoryMessagePersistence;

mod common;

fn message(n: u32) -> Message {
    Message::new("d2p/D1/feed_values", format!("[{n}]").into_bytes())
}

#[tokio::test]
async fn holds_messages_while_disconnected() {
    common::init_logging();
    let connection = common::ScriptedConnection::new();
    let persistence = Arc::new(InMemoryMessagePersistence::new());
    let publisher = OutboundPublisher::new("test", connection.clone(), persistence.clone());

    publisher.enqueue(message(1));
    publisher.enqueue(message(2));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(connection.published().is_empty());
    assert_eq!(persistence.len(), 2);

    publisher.connected();
    common::assert_eventually(|| connection.published().len() == 2, "drain after connect").await;
    common::assert_eventually(|| persistence.len() == 0, "queue emptied").await;
}

#[tokio::test]
async fn resumes_from_the_failed_message_in_order() {
    common::init_logging();
    let connection = common::ScriptedConnection::new();
    let persistence = Arc::new(InMemoryMessagePersistence::new());
    let publisher = OutboundPublisher::new("test", connection.clone(), persistence.clone());

    publisher.enqueue(message(1));
    publisher.enqueue(message(2));
    publisher.enqueue(message(3));

    // The transport rejects everything: m1 must stay at the front.
    connection.set_publish_ok(false);
    publisher.connected();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(connection.published().is_empty());
    assert_eq!(persistence.len(), 3);

    publisher.disconnected();
    connection.set_publish_ok(true);
    publisher.connected();

    common::assert_eventually(|| connection.published().len() == 3, "drain after reconnect").await;
    let payloads: Vec<Vec<u8>> = connection
        .published()
        .iter()
        .map(|m| m.payload().to_vec())
        .collect();
    assert_eq!(payloads, vec![b"[1]".to_vec(), b"[2]".to_vec(), b"[3]".to_vec()]);
}

#[tokio::test]
async fn messages_enqueued_while_connected_flow_through() {
    common::init_logging();
    let connection = common::ScriptedConnection::new();
    let publisher = OutboundPublisher::new(
        "test",
        connection.clone(),
        Arc::new(InMemoryMessagePersistence::new()),
    );
    publisher.connected();

    for n in 0..10 {
        publisher.enqueue(message(n));
    }
    common::assert_eventually(|| connection.published().len() == 10, "all published").await;
}

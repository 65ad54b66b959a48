//! Connection contracts and the machinery layered on top of them: the
//! outbound publishing queue, the retry layer, and the inbound routers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::Message;

pub mod mqtt;
pub mod publisher;
pub mod retry;
pub mod router;

pub use publisher::OutboundPublisher;
pub use retry::{OutboundRetryHandler, RetryMessage};
pub use router::{GatewayMessageListener, GatewayMessageRouter, LocalMessageRouter, MessageListener};

/// A broker connection. Implementations own their transport; the core only
/// needs these five operations.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Attempts to establish the connection. Returns `false` on failure;
    /// the supervisor owns the retry schedule.
    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    /// Publishes one message. `false` means the message was not accepted by
    /// the transport; the caller decides whether to keep it queued.
    async fn publish(&self, message: &Message) -> bool;

    /// Installs the listener inbound messages are handed to. Expected to be
    /// called once, before `connect`.
    fn set_listener(&self, listener: Arc<dyn InboundMessageListener>);

    /// Installs the callback invoked when an established connection drops.
    fn on_connection_lost(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// Receiver of raw inbound messages. Implementations must return quickly;
/// the routers only classify and enqueue.
pub trait InboundMessageListener: Send + Sync {
    fn message_received(&self, message: Message);
}

//! Inbound routing. The gateway router dispatches platform envelopes to
//! listeners by message type; the local router dispatches local-bus traffic
//! by channel filter. Both defer listener work onto a command queue so the
//! transport callback returns immediately and per-listener order follows
//! submission order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error, trace, warn};

use crate::connectivity::InboundMessageListener;
use crate::model::{GatewaySubdeviceMessage, Message, MessageType};
use crate::protocol::GatewaySubdeviceProtocol;
use crate::util::CommandQueue;

/// A consumer of unwrapped platform traffic. Declares the message types it
/// covers; the router delivers only those.
#[async_trait]
pub trait GatewayMessageListener: Send + Sync {
    fn message_types(&self) -> Vec<MessageType>;

    async fn receive_messages(&self, messages: Vec<GatewaySubdeviceMessage>);
}

/// Routes platform messages: classify, unwrap the envelope, hand the inner
/// messages to the one listener registered for the type.
pub struct GatewayMessageRouter {
    protocol: Arc<dyn GatewaySubdeviceProtocol>,
    listeners: Mutex<HashMap<String, Arc<dyn GatewayMessageListener>>>,
    listeners_per_type: Mutex<HashMap<MessageType, (String, Arc<dyn GatewayMessageListener>)>>,
    queue: CommandQueue,
}

impl GatewayMessageRouter {
    pub fn new(protocol: Arc<dyn GatewaySubdeviceProtocol>) -> Self {
        GatewayMessageRouter {
            protocol,
            listeners: Mutex::new(HashMap::new()),
            listeners_per_type: Mutex::new(HashMap::new()),
            queue: CommandQueue::new("gateway-message-router"),
        }
    }

    /// Registers a listener under a name for every type it declares. A type
    /// already claimed by another listener is taken over; the later
    /// registration wins.
    pub fn add_listener(&self, name: &str, listener: Arc<dyn GatewayMessageListener>) {
        let message_types = listener.message_types();
        if message_types.is_empty() {
            warn!("Attempted to add listener '{name}' but it listens to no message types.");
            return;
        }

        self.listeners
            .lock()
            .expect("router lock poisoned")
            .insert(name.to_owned(), listener.clone());
        let mut per_type = self
            .listeners_per_type
            .lock()
            .expect("router lock poisoned");
        for message_type in message_types {
            per_type.insert(message_type, (name.to_owned(), listener.clone()));
            debug!("Added listener '{name}' for type {message_type:?}.");
        }
    }

    /// Unregisters a listener and every type entry pointing at it.
    pub fn remove_listener(&self, name: &str) {
        self.listeners
            .lock()
            .expect("router lock poisoned")
            .remove(name);
        self.listeners_per_type
            .lock()
            .expect("router lock poisoned")
            .retain(|_, (listener_name, _)| listener_name != name);
        debug!("Removed listener '{name}'.");
    }
}

impl InboundMessageListener for GatewayMessageRouter {
    fn message_received(&self, message: Message) {
        trace!(
            "Routing message on channel '{}' | payload '{}'.",
            message.channel(),
            message.payload_text()
        );

        let message_type = self.protocol.message_type(&message);
        if message_type == MessageType::Unknown {
            warn!(
                "Received a message on channel '{}' but failed to recognize the type.",
                message.channel()
            );
            return;
        }

        let listener = {
            let per_type = self
                .listeners_per_type
                .lock()
                .expect("router lock poisoned");
            per_type.get(&message_type).map(|(_, listener)| listener.clone())
        };
        let Some(listener) = listener else {
            debug!("Received a message of type {message_type:?} but no listener covers it.");
            return;
        };

        let parsed = self.protocol.parse_incoming_subdevice_message(&message);
        if parsed.is_empty() {
            error!(
                "Received a message on channel '{}' but failed to parse any subdevice messages from it.",
                message.channel()
            );
            return;
        }

        self.queue.push(async move {
            listener.receive_messages(parsed).await;
        });
    }
}

/// A consumer of local-bus traffic, selected by channel filter.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// MQTT channel filters this listener covers.
    fn subscription_channels(&self) -> Vec<String>;

    async fn message_received(&self, message: Message);
}

/// Routes raw local-bus messages to the first listener whose filter matches
/// the channel.
pub struct LocalMessageRouter {
    listeners: Mutex<Vec<(String, Vec<String>, Arc<dyn MessageListener>)>>,
    queue: CommandQueue,
}

impl LocalMessageRouter {
    pub fn new() -> Self {
        LocalMessageRouter {
            listeners: Mutex::new(Vec::new()),
            queue: CommandQueue::new("local-message-router"),
        }
    }

    pub fn add_listener(&self, name: &str, listener: Arc<dyn MessageListener>) {
        let channels = listener.subscription_channels();
        if channels.is_empty() {
            warn!("Attempted to add local listener '{name}' but it covers no channels.");
            return;
        }
        debug!("Added local listener '{name}' for channels {channels:?}.");
        self.listeners
            .lock()
            .expect("router lock poisoned")
            .push((name.to_owned(), channels, listener));
    }

    pub fn remove_listener(&self, name: &str) {
        self.listeners
            .lock()
            .expect("router lock poisoned")
            .retain(|(listener_name, _, _)| listener_name != name);
    }

    /// Every filter any registered listener covers; the local connection
    /// subscribes to this set.
    pub fn subscription_channels(&self) -> Vec<String> {
        self.listeners
            .lock()
            .expect("router lock poisoned")
            .iter()
            .flat_map(|(_, channels, _)| channels.iter().cloned())
            .collect()
    }
}

impl Default for LocalMessageRouter {
    fn default() -> Self {
        LocalMessageRouter::new()
    }
}

impl InboundMessageListener for LocalMessageRouter {
    fn message_received(&self, message: Message) {
        let listener = {
            let listeners = self.listeners.lock().expect("router lock poisoned");
            listeners
                .iter()
                .find(|(_, channels, _)| {
                    channels
                        .iter()
                        .any(|filter| rumqttc::matches(message.channel(), filter))
                })
                .map(|(_, _, listener)| listener.clone())
        };
        let Some(listener) = listener else {
            debug!(
                "Received a local message on channel '{}' but no listener covers it.",
                message.channel()
            );
            return;
        };
        self.queue.push(async move {
            listener.message_received(message).await;
        });
    }
}

//! MQTT implementation of the [`Connection`] contract over `rumqttc`.
//!
//! Each `connect` builds a fresh client and spawns an event-loop task. The
//! task forwards publishes to the installed listener and reports a lost
//! connection through the installed callback; the supervisor owns the
//! reconnect schedule, so the task ends on the first transport error instead
//! of letting rumqttc retry internally.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, error, trace, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, SubscribeFilter,
    TlsConfiguration, Transport,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::connectivity::{Connection, InboundMessageListener};
use crate::model::Message;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Transport settings for one broker.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub ca_bundle_path: Option<PathBuf>,
    pub max_packet_size: Option<usize>,
}

impl MqttSettings {
    pub fn new(client_id: impl Into<String>, uri: impl Into<String>) -> Self {
        MqttSettings {
            client_id: client_id.into(),
            uri: uri.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            ca_bundle_path: None,
            max_packet_size: None,
        }
    }
}

/// Scheme, host and port from a broker URI such as `ssl://broker:8883` or
/// `tcp://localhost:1883`. A bare `host[:port]` is treated as plain TCP.
fn parse_uri(uri: &str) -> Result<(bool, String, u16)> {
    let (tls, rest) = match uri.split_once("://") {
        Some(("ssl" | "mqtts" | "tls", rest)) => (true, rest),
        Some(("tcp" | "mqtt", rest)) => (false, rest),
        Some((scheme, _)) => bail!("Unsupported broker URI scheme '{scheme}' in '{uri}'."),
        None => (false, uri),
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (
            host.to_owned(),
            port.parse::<u16>()
                .with_context(|| format!("Invalid port in broker URI '{uri}'."))?,
        ),
        None => (rest.to_owned(), if tls { 8883 } else { 1883 }),
    };
    if host.is_empty() {
        bail!("Missing host in broker URI '{uri}'.");
    }
    Ok((tls, host, port))
}

struct Shared {
    listener: Mutex<Option<Arc<dyn InboundMessageListener>>>,
    lost_callback: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

pub struct MqttConnection {
    settings: MqttSettings,
    subscriptions: Mutex<Vec<String>>,
    shared: Arc<Shared>,
    client: Mutex<Option<AsyncClient>>,
    session: Mutex<Option<CancellationToken>>,
}

impl MqttConnection {
    pub fn new(settings: MqttSettings) -> Self {
        MqttConnection {
            settings,
            subscriptions: Mutex::new(Vec::new()),
            shared: Arc::new(Shared {
                listener: Mutex::new(None),
                lost_callback: Mutex::new(None),
            }),
            client: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Replaces the channel filters subscribed after every successful
    /// connect.
    pub fn set_subscription_filters(&self, filters: Vec<String>) {
        *self
            .subscriptions
            .lock()
            .expect("connection lock poisoned") = filters;
    }

    fn build_options(&self) -> Result<MqttOptions> {
        let (tls, host, port) = parse_uri(&self.settings.uri)?;
        let mut options = MqttOptions::new(self.settings.client_id.clone(), host, port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(self.settings.clean_session);
        if let (Some(username), Some(password)) =
            (&self.settings.username, &self.settings.password)
        {
            options.set_credentials(username.clone(), password.clone());
        }
        if let Some(size) = self.settings.max_packet_size {
            options.set_max_packet_size(size, size);
        }
        if tls {
            let configuration = match &self.settings.ca_bundle_path {
                Some(path) => {
                    let bundle = std::fs::read(path).with_context(|| {
                        format!("Unable to read the CA bundle '{}'.", path.display())
                    })?;
                    TlsConfiguration::SimpleNative {
                        ca: bundle,
                        client_auth: None,
                    }
                }
                None => TlsConfiguration::Native,
            };
            options.set_transport(Transport::Tls(configuration));
        }
        Ok(options)
    }
}

#[async_trait::async_trait]
impl Connection for MqttConnection {
    async fn connect(&self) -> bool {
        let options = match self.build_options() {
            Ok(options) => options,
            Err(e) => {
                error!("Unable to configure the MQTT connection: {e:?}");
                return false;
            }
        };

        // A previous session may still be winding down.
        if let Some(previous) = self.session.lock().expect("connection lock poisoned").take() {
            previous.cancel();
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let cancellation = CancellationToken::new();
        let (connack_sender, connack_receiver) = oneshot::channel();

        let filters = self
            .subscriptions
            .lock()
            .expect("connection lock poisoned")
            .clone();
        tokio::spawn(run_eventloop(
            eventloop,
            client.clone(),
            filters,
            self.shared.clone(),
            connack_sender,
            cancellation.clone(),
        ));

        let established =
            match tokio::time::timeout(CONNECT_TIMEOUT, connack_receiver).await {
                Ok(Ok(established)) => established,
                Ok(Err(_)) => false,
                Err(_) => {
                    warn!("Timed out waiting for the broker to acknowledge the connection.");
                    cancellation.cancel();
                    false
                }
            };

        if established {
            *self.client.lock().expect("connection lock poisoned") = Some(client);
            *self.session.lock().expect("connection lock poisoned") = Some(cancellation);
        } else {
            cancellation.cancel();
        }
        established
    }

    async fn disconnect(&self) {
        let client = self.client.lock().expect("connection lock poisoned").take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!("Disconnect request was not delivered: {e:?}");
            }
        }
        if let Some(session) = self.session.lock().expect("connection lock poisoned").take() {
            session.cancel();
        }
    }

    async fn publish(&self, message: &Message) -> bool {
        let client = self
            .client
            .lock()
            .expect("connection lock poisoned")
            .clone();
        let Some(client) = client else {
            return false;
        };
        match client
            .publish(
                message.channel().to_owned(),
                QoS::AtLeastOnce,
                false,
                message.payload().to_vec(),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Unable to publish on channel '{}': {e:?}",
                    message.channel()
                );
                false
            }
        }
    }

    fn set_listener(&self, listener: Arc<dyn InboundMessageListener>) {
        *self
            .shared
            .listener
            .lock()
            .expect("connection lock poisoned") = Some(listener);
    }

    fn on_connection_lost(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self
            .shared
            .lost_callback
            .lock()
            .expect("connection lock poisoned") = Some(Arc::from(callback));
    }
}

async fn run_eventloop(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    filters: Vec<String>,
    shared: Arc<Shared>,
    connack_sender: oneshot::Sender<bool>,
    cancellation: CancellationToken,
) {
    let mut connack_sender = Some(connack_sender);
    loop {
        let notification = tokio::select! {
            _ = cancellation.cancelled() => {
                debug!("Stopping the MQTT event loop because of cancellation.");
                return;
            }
            notification = eventloop.poll() => notification,
        };

        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    debug!("Broker acknowledged the connection.");
                    if let Some(sender) = connack_sender.take() {
                        let _ = sender.send(true);
                    }
                    if !filters.is_empty() {
                        let subscriptions = filters
                            .iter()
                            .map(|path| SubscribeFilter {
                                path: path.clone(),
                                qos: QoS::AtLeastOnce,
                            })
                            .collect::<Vec<_>>();
                        if let Err(e) = client.subscribe_many(subscriptions).await {
                            error!("Unable to subscribe to inbound channels: {e:?}");
                        }
                    }
                } else {
                    warn!("Broker refused the connection: {:?}", ack.code);
                    if let Some(sender) = connack_sender.take() {
                        let _ = sender.send(false);
                    }
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!("Received a message on topic '{}'.", publish.topic);
                let listener = shared
                    .listener
                    .lock()
                    .expect("connection lock poisoned")
                    .clone();
                match listener {
                    Some(listener) => listener
                        .message_received(Message::new(publish.topic, publish.payload.to_vec())),
                    None => warn!(
                        "Ignoring message on topic '{}': no listener installed.",
                        publish.topic
                    ),
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscriptions acknowledged.");
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Error in the MQTT event loop: {e:?}");
                match connack_sender.take() {
                    // Still connecting; report failure and let the
                    // supervisor schedule the next attempt.
                    Some(sender) => {
                        let _ = sender.send(false);
                    }
                    // Established connection dropped.
                    None => {
                        let callback = shared
                            .lost_callback
                            .lock()
                            .expect("connection lock poisoned")
                            .clone();
                        if let Some(callback) = callback {
                            callback();
                        }
                    }
                }
                return;
            }
        }
    }
}

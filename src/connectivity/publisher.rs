//! The outbound publishing queue. `enqueue` never blocks; a worker drains the
//! persistence front-to-back while the connection is up and parks while it is
//! down. A message is removed only after the transport accepted it, which is
//! what makes delivery at-least-once.

use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connectivity::Connection;
use crate::model::Message;
use crate::persistence::MessagePersistence;

pub struct OutboundPublisher {
    name: String,
    persistence: Arc<dyn MessagePersistence>,
    connected: watch::Sender<bool>,
    queued: Arc<Notify>,
    cancellation: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl OutboundPublisher {
    /// Creates the publisher and spawns its worker. The worker starts in the
    /// disconnected state and waits for the first `connected` signal.
    pub fn new(
        name: &str,
        connection: Arc<dyn Connection>,
        persistence: Arc<dyn MessagePersistence>,
    ) -> Arc<Self> {
        let (connected, connected_rx) = watch::channel(false);
        let queued = Arc::new(Notify::new());
        let cancellation = CancellationToken::new();

        let publisher = Arc::new(OutboundPublisher {
            name: name.to_owned(),
            persistence: persistence.clone(),
            connected,
            queued: queued.clone(),
            cancellation: cancellation.clone(),
            worker: std::sync::Mutex::new(None),
        });

        let worker = tokio::spawn(run_worker(
            publisher.name.clone(),
            connection,
            persistence,
            connected_rx,
            queued,
            cancellation,
        ));
        *publisher.worker.lock().expect("publisher lock poisoned") = Some(worker);

        publisher
    }

    /// Appends a message to the queue. Never blocks; on a store that refuses
    /// the message (bounded persistence) the message is dropped with a log
    /// line.
    pub fn enqueue(&self, message: Message) {
        trace!(
            "[{}] Queueing message on channel '{}'.",
            self.name,
            message.channel()
        );
        if !self.persistence.push(message) {
            warn!("[{}] Persistence refused a message; dropping it.", self.name);
            return;
        }
        self.queued.notify_one();
    }

    /// Signals that the connection is up. The worker resumes draining. Also
    /// the signal a worker parked on a failed publish waits for.
    pub fn connected(&self) {
        debug!("[{}] Connection is up, resuming publishing.", self.name);
        self.connected.send_replace(true);
    }

    /// Signals that the connection is down. The worker finishes the publish
    /// it may be in the middle of and then parks.
    pub fn disconnected(&self) {
        debug!("[{}] Connection is down, pausing publishing.", self.name);
        self.connected.send_replace(false);
    }

    /// Stops the worker. Messages still in the persistence stay there.
    pub async fn stop(&self) {
        self.cancellation.cancel();
        let worker = self
            .worker
            .lock()
            .expect("publisher lock poisoned")
            .take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn run_worker(
    name: String,
    connection: Arc<dyn Connection>,
    persistence: Arc<dyn MessagePersistence>,
    mut connected: watch::Receiver<bool>,
    queued: Arc<Notify>,
    cancellation: CancellationToken,
) {
    loop {
        if cancellation.is_cancelled() {
            break;
        }

        // Park while disconnected.
        while !*connected.borrow_and_update() {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let Some(message) = persistence.front() else {
            // Nothing queued; wait for an enqueue or a connection change.
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = queued.notified() => {}
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        };

        if connection.publish(&message).await {
            trace!("[{name}] Published message on channel '{}'.", message.channel());
            persistence.pop();
        } else {
            // Leave the message at the front and wait for the next
            // connected signal before trying again.
            warn!(
                "[{name}] Failed to publish message on channel '{}'; \
                 waiting for the connection to come back.",
                message.channel()
            );
            tokio::select! {
                _ = cancellation.cancelled() => return,
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

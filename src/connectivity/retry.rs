//! Request/response bookkeeping with retries. A record sends its message
//! immediately, re-sends it on every timer tick while no matching response
//! arrived, and fires its fail callback exactly once when the budget is
//! exhausted. A collector task removes cleared records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connectivity::OutboundPublisher;
use crate::model::Message;
use crate::util::Timer;

/// What to send, where the answer shows up, and what to do when it never
/// does. The response channel uses MQTT filter semantics: `+` matches one
/// topic level, a trailing `#` matches the rest.
pub struct RetryMessage {
    pub message: Message,
    pub response_channel: String,
    pub on_fail: Box<dyn FnOnce(Message) + Send>,
    pub retry_count: u16,
    pub retry_interval: Duration,
}

struct Record {
    message: Message,
    response_channel: String,
    on_fail: Option<Box<dyn FnOnce(Message) + Send>>,
    attempts: u16,
    retry_count: u16,
    timer: Timer,
    cleared: bool,
}

struct Inner {
    publisher: Arc<OutboundPublisher>,
    records: Mutex<HashMap<u64, Record>>,
    next_id: AtomicU64,
    cleanup: Notify,
    cancellation: CancellationToken,
}

pub struct OutboundRetryHandler {
    inner: Arc<Inner>,
    collector: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl OutboundRetryHandler {
    pub fn new(publisher: Arc<OutboundPublisher>) -> Self {
        let inner = Arc::new(Inner {
            publisher,
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cleanup: Notify::new(),
            cancellation: CancellationToken::new(),
        });

        let collector = tokio::spawn(run_collector(inner.clone()));

        OutboundRetryHandler {
            inner,
            collector: std::sync::Mutex::new(Some(collector)),
        }
    }

    /// Sends the message and installs the retry record. An active record for
    /// the same payload and response channel is superseded: its timer stops
    /// and it is collected without firing its fail callback.
    pub fn add(&self, retry_message: RetryMessage) {
        debug!(
            "Adding message for retry on channel '{}'.",
            retry_message.message.channel()
        );

        let mut records = self.inner.records.lock().expect("retry lock poisoned");

        for record in records.values_mut() {
            if !record.cleared
                && record.response_channel == retry_message.response_channel
                && record.message.payload() == retry_message.message.payload()
            {
                debug!(
                    "Superseding an active retry record for response channel '{}'.",
                    record.response_channel
                );
                record.cleared = true;
                record.on_fail = None;
                record.timer.cancel();
                self.inner.cleanup.notify_one();
            }
        }

        self.inner.publisher.enqueue(retry_message.message.clone());

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Record {
            message: retry_message.message,
            response_channel: retry_message.response_channel,
            on_fail: Some(retry_message.on_fail),
            attempts: 0,
            retry_count: retry_message.retry_count,
            timer: Timer::new(),
            cleared: false,
        };
        let interval = retry_message.retry_interval;
        records.insert(id, record);

        let inner = self.inner.clone();
        records
            .get(&id)
            .expect("record was just inserted")
            .timer
            .start_periodic(interval, move || tick(&inner, id));
    }

    /// Feeds an inbound message to the bookkeeping: every active record whose
    /// response channel matches the message's channel is cleared.
    pub fn message_received(&self, response: &Message) {
        let mut records = self.inner.records.lock().expect("retry lock poisoned");
        for record in records.values_mut() {
            if !record.cleared && rumqttc::matches(response.channel(), &record.response_channel) {
                debug!(
                    "Response received on channel '{}' for message on channel '{}'.",
                    response.channel(),
                    record.message.channel()
                );
                record.cleared = true;
                record.on_fail = None;
                record.timer.cancel();
                self.inner.cleanup.notify_one();
            }
        }
    }

    /// Stops the collector and every pending timer. Fail callbacks of
    /// pending records do not fire.
    pub async fn stop(&self) {
        self.inner.cancellation.cancel();
        self.inner.cleanup.notify_one();
        let collector = self
            .collector
            .lock()
            .expect("retry lock poisoned")
            .take();
        if let Some(collector) = collector {
            let _ = collector.await;
        }
        let mut records = self.inner.records.lock().expect("retry lock poisoned");
        for record in records.values_mut() {
            record.timer.cancel();
        }
        records.clear();
    }
}

fn tick(inner: &Arc<Inner>, id: u64) {
    let (on_fail, message) = {
        let mut records = inner.records.lock().expect("retry lock poisoned");
        let Some(record) = records.get_mut(&id) else {
            return;
        };
        if record.cleared {
            return;
        }

        record.attempts += 1;
        if record.attempts <= record.retry_count {
            info!(
                "Retrying message on channel '{}' (attempt {}/{}).",
                record.message.channel(),
                record.attempts,
                record.retry_count
            );
            inner.publisher.enqueue(record.message.clone());
            return;
        }

        info!(
            "Retry count exceeded for message on channel '{}'.",
            record.message.channel()
        );
        record.cleared = true;
        record.timer.cancel();
        (record.on_fail.take(), record.message.clone())
    };

    // The callback runs outside the record lock.
    if let Some(on_fail) = on_fail {
        on_fail(message);
    }
    inner.cleanup.notify_one();
}

async fn run_collector(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            _ = inner.cancellation.cancelled() => break,
            _ = inner.cleanup.notified() => {}
        }
        let mut records = inner.records.lock().expect("retry lock poisoned");
        records.retain(|_, record| {
            if record.cleared {
                debug!(
                    "Removing cleared retry record for channel '{}'.",
                    record.message.channel()
                );
                record.timer.cancel();
                false
            } else {
                true
            }
        });
    }
}

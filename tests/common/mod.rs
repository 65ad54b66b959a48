#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gatelink::connectivity::{Connection, InboundMessageListener};
use gatelink::model::Message;
use gatelink::persistence::ExistingDevicesRepository;

pub fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("sqlx=warn,debug"),
    )
    .is_test(true)
    .try_init();
}

/// An in-process connection double: records published messages, reports
/// scripted connect/publish outcomes, and lets a test inject inbound traffic
/// or a lost-connection event.
pub struct ScriptedConnection {
    published: Mutex<Vec<Message>>,
    connect_results: Mutex<VecDeque<bool>>,
    publish_ok: AtomicBool,
    listener: Mutex<Option<Arc<dyn InboundMessageListener>>>,
    lost_callback: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl ScriptedConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedConnection {
            published: Mutex::new(Vec::new()),
            connect_results: Mutex::new(VecDeque::new()),
            publish_ok: AtomicBool::new(true),
            listener: Mutex::new(None),
            lost_callback: Mutex::new(None),
        })
    }

    pub fn published(&self) -> Vec<Message> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_channels(&self) -> Vec<String> {
        self.published()
            .iter()
            .map(|message| message.channel().to_owned())
            .collect()
    }

    pub fn clear_published(&self) {
        self.published.lock().unwrap().clear();
    }

    /// Queues outcomes for upcoming `connect` calls; once drained, connects
    /// succeed.
    pub fn script_connect_results(&self, results: impl IntoIterator<Item = bool>) {
        self.connect_results.lock().unwrap().extend(results);
    }

    pub fn set_publish_ok(&self, ok: bool) {
        self.publish_ok.store(ok, Ordering::SeqCst);
    }

    /// Hands an inbound message to the installed listener.
    pub fn inject(&self, message: Message) {
        let listener = self.listener.lock().unwrap().clone();
        listener
            .expect("no listener installed on the scripted connection")
            .message_received(message);
    }

    pub fn fire_connection_lost(&self) {
        if let Some(callback) = self.lost_callback.lock().unwrap().as_ref() {
            callback();
        }
    }
}

#[async_trait::async_trait]
impl Connection for ScriptedConnection {
    async fn connect(&self) -> bool {
        self.connect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true)
    }

    async fn disconnect(&self) {}

    async fn publish(&self, message: &Message) -> bool {
        if !self.publish_ok.load(Ordering::SeqCst) {
            return false;
        }
        self.published.lock().unwrap().push(message.clone());
        true
    }

    fn set_listener(&self, listener: Arc<dyn InboundMessageListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn on_connection_lost(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self.lost_callback.lock().unwrap() = Some(callback);
    }
}

/// Existing-devices double holding the list in memory.
#[derive(Default)]
pub struct MemoryExistingDevices {
    keys: Mutex<Vec<String>>,
}

impl MemoryExistingDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryExistingDevices::default())
    }

    pub fn with_keys(keys: impl IntoIterator<Item = &'static str>) -> Arc<Self> {
        let repository = MemoryExistingDevices::new();
        for key in keys {
            repository.add_device_key(key);
        }
        repository
    }
}

impl ExistingDevicesRepository for MemoryExistingDevices {
    fn add_device_key(&self, device_key: &str) {
        let mut keys = self.keys.lock().unwrap();
        if !keys.iter().any(|key| key == device_key) {
            keys.push(device_key.to_owned());
        }
    }

    fn device_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn wait_until(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn assert_eventually(condition: impl Fn() -> bool, what: &str) {
    assert!(
        wait_until(condition, Duration::from_secs(5)).await,
        "timed out waiting for: {what}"
    );
}

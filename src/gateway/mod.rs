//! The composition root and connection supervisor. Owns the two connections,
//! the publishers, the routers and the services; drives the
//! connect/reconnect cycles and fans out connectivity transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::info;

use crate::connectivity::{
    Connection, GatewayMessageRouter, LocalMessageRouter, OutboundPublisher, OutboundRetryHandler,
};
use crate::repository::InMemoryDeviceRepository;
use crate::service::{
    DevicesService, ExternalDataService, InternalDataService, KeepAliveService,
    PlatformStatusService,
};
use crate::util::CommandQueue;
use tokio_util::sync::CancellationToken;

pub mod builder;

pub use builder::GatewayBuilder;

type ConnectionListener = Box<dyn Fn(bool) + Send + Sync>;

pub(crate) struct GatewayInner {
    pub(crate) reconnect_delay: Duration,
    pub(crate) platform_connection: Arc<dyn Connection>,
    pub(crate) local_connection: Option<Arc<dyn Connection>>,
    pub(crate) platform_publisher: Arc<OutboundPublisher>,
    pub(crate) local_publisher: Option<Arc<OutboundPublisher>>,
    pub(crate) platform_retry: Arc<OutboundRetryHandler>,
    pub(crate) gateway_router: Arc<GatewayMessageRouter>,
    pub(crate) local_router: Option<Arc<LocalMessageRouter>>,
    pub(crate) devices_service: Arc<DevicesService>,
    pub(crate) internal_data_service: Option<Arc<InternalDataService>>,
    pub(crate) external_data_service: Option<Arc<ExternalDataService>>,
    pub(crate) platform_status_service: Option<Arc<PlatformStatusService>>,
    pub(crate) keep_alive_service: Arc<KeepAliveService>,
    pub(crate) cache_repository: Option<Arc<InMemoryDeviceRepository>>,
    pub(crate) platform_connected: AtomicBool,
    pub(crate) local_connected: AtomicBool,
    pub(crate) queue: CommandQueue,
    pub(crate) cancellation: CancellationToken,
    pub(crate) connection_listeners: Mutex<Vec<ConnectionListener>>,
}

impl GatewayInner {
    fn fan_out(&self, connected: bool) {
        let listeners = self
            .connection_listeners
            .lock()
            .expect("gateway lock poisoned");
        for listener in listeners.iter() {
            listener(connected);
        }
    }

    async fn notify_platform_connected(&self) {
        info!("Connection to the platform established.");
        self.platform_connected.store(true, Ordering::SeqCst);
        self.fan_out(true);

        if let Some(cache) = &self.cache_repository {
            cache.load_from_persistent().await;
        }
        self.devices_service.update_device_cache().await;
        if let Some(status) = &self.platform_status_service {
            status.send_platform_connection_status_message(true).await;
        }
        self.platform_publisher.connected();
        self.keep_alive_service.connected();
    }

    async fn notify_platform_disconnected(&self) {
        info!("Connection to the platform lost.");
        self.platform_connected.store(false, Ordering::SeqCst);
        self.fan_out(false);

        if self.local_connected.load(Ordering::SeqCst) {
            if let Some(status) = &self.platform_status_service {
                status.send_platform_connection_status_message(false).await;
            }
        }
        self.keep_alive_service.disconnected();
        self.platform_publisher.disconnected();
    }

    fn notify_local_connected(&self) {
        info!("Connection to the local broker established.");
        self.local_connected.store(true, Ordering::SeqCst);
        if let Some(publisher) = &self.local_publisher {
            publisher.connected();
        }
    }

    fn notify_local_disconnected(&self) {
        info!("Connection to the local broker lost.");
        self.local_connected.store(false, Ordering::SeqCst);
        if let Some(publisher) = &self.local_publisher {
            publisher.disconnected();
        }
    }
}

/// Enqueues one platform connection attempt; on failure it sleeps the
/// reconnect delay and enqueues the next attempt, so attempts serialize with
/// every other supervised operation.
pub(crate) fn schedule_connect_platform(inner: Arc<GatewayInner>, first_time: bool) {
    let queue_inner = inner.clone();
    inner.queue.push(async move {
        if queue_inner.cancellation.is_cancelled() {
            return;
        }
        if first_time {
            info!("Connecting to the platform...");
        }
        if queue_inner.platform_connection.connect().await {
            queue_inner.notify_platform_connected().await;
        } else {
            if first_time {
                info!("Failed to connect to the platform.");
            }
            tokio::time::sleep(queue_inner.reconnect_delay).await;
            schedule_connect_platform(queue_inner, false);
        }
    });
}

pub(crate) fn schedule_connect_local(inner: Arc<GatewayInner>, first_time: bool) {
    let Some(connection) = inner.local_connection.clone() else {
        return;
    };
    let queue_inner = inner.clone();
    inner.queue.push(async move {
        if queue_inner.cancellation.is_cancelled() {
            return;
        }
        if first_time {
            info!("Connecting to the local broker...");
        }
        if connection.connect().await {
            queue_inner.notify_local_connected();
        } else {
            if first_time {
                info!("Failed to connect to the local broker.");
            }
            tokio::time::sleep(queue_inner.reconnect_delay).await;
            schedule_connect_local(queue_inner, false);
        }
    });
}

/// Installed on the connections at build time. Lost-connection events are
/// queued so they serialize with connects and the work the services run.
pub(crate) fn install_lost_callbacks(inner: &Arc<GatewayInner>) {
    let weak: Weak<GatewayInner> = Arc::downgrade(inner);
    inner
        .platform_connection
        .on_connection_lost(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let queue_inner = inner.clone();
            inner.queue.push(async move {
                queue_inner.notify_platform_disconnected().await;
                schedule_connect_platform(queue_inner, true);
            });
        }));

    if let Some(local_connection) = &inner.local_connection {
        let weak: Weak<GatewayInner> = Arc::downgrade(inner);
        local_connection.on_connection_lost(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let queue_inner = inner.clone();
            inner.queue.push(async move {
                queue_inner.notify_local_disconnected();
                schedule_connect_local(queue_inner, true);
            });
        }));
    }
}

/// The gateway handle. Built by [`GatewayBuilder`]; cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn builder(config: crate::config::GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub(crate) fn from_inner(inner: Arc<GatewayInner>) -> Self {
        Gateway { inner }
    }

    /// Starts both connection cycles. Attempts retry forever with the
    /// configured reconnect delay; this call only schedules them.
    pub fn connect(&self) {
        schedule_connect_local(self.inner.clone(), true);
        schedule_connect_platform(self.inner.clone(), true);
    }

    /// Closes both connections without scheduling reconnects.
    pub async fn disconnect(&self) {
        self.inner.platform_connection.disconnect().await;
        self.inner.platform_connected.store(false, Ordering::SeqCst);
        self.inner.platform_publisher.disconnected();
        if let Some(local) = &self.inner.local_connection {
            local.disconnect().await;
            self.inner.local_connected.store(false, Ordering::SeqCst);
            if let Some(publisher) = &self.inner.local_publisher {
                publisher.disconnected();
            }
        }
    }

    pub fn is_platform_connected(&self) -> bool {
        self.inner.platform_connected.load(Ordering::SeqCst)
    }

    pub fn is_local_connected(&self) -> bool {
        self.inner.local_connected.load(Ordering::SeqCst)
    }

    /// Registers a callback invoked with `true`/`false` on every platform
    /// connectivity transition.
    pub fn add_connection_listener(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.inner
            .connection_listeners
            .lock()
            .expect("gateway lock poisoned")
            .push(Box::new(listener));
    }

    /// The subdevice-lifecycle service.
    pub fn devices_service(&self) -> Arc<DevicesService> {
        self.inner.devices_service.clone()
    }

    /// The embedded data API; present when the gateway was built with a
    /// [`crate::service::DataProvider`].
    pub fn external_data_service(&self) -> Option<Arc<ExternalDataService>> {
        self.inner.external_data_service.clone()
    }

    /// The platform inbound router, exposed so hosts can attach their own
    /// listeners for types the built-in services do not cover.
    pub fn gateway_router(&self) -> Arc<GatewayMessageRouter> {
        self.inner.gateway_router.clone()
    }

    /// The local inbound router; present when a local connection exists.
    pub fn local_router(&self) -> Option<Arc<LocalMessageRouter>> {
        self.inner.local_router.clone()
    }

    /// The local-to-platform relay; present when a local connection exists.
    pub fn internal_data_service(&self) -> Option<Arc<InternalDataService>> {
        self.inner.internal_data_service.clone()
    }

    /// Disconnects and stops every worker. The gateway cannot be restarted
    /// afterwards.
    pub async fn stop(&self) {
        self.inner.cancellation.cancel();
        self.disconnect().await;
        self.inner.keep_alive_service.disconnected();
        self.inner.platform_retry.stop().await;
        self.inner.platform_publisher.stop().await;
        if let Some(publisher) = &self.inner.local_publisher {
            publisher.stop().await;
        }
    }
}

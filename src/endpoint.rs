use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    bridge::{DisconnectReason, PeerId},
    error::{Error, Result},
    events::{LifecycleEvent, Observers},
    feature::{FeatureManager, FeatureState, Installable},
    latency::LatencyConfig,
    link::{Link, Outgoing, Side},
    protocol::{self, MessageKind},
    reconnect::ReconnectConfig,
    request::RequestConfig,
    sync::SyncConfig,
    value::DataPack,
};

/// Configuration shared by every feature installed on an endpoint.
///
/// # Example
/// ```
/// use featurenet::{EndpointConfig, LatencyConfig, MeasureSide, RequestConfig};
///
/// let cfg = EndpointConfig::new()
///     .request(RequestConfig::new().sweep_interval(0.1).default_timeout(2.0))
///     .latency(LatencyConfig::new().interval(0.5).side(MeasureSide::Both));
/// assert_eq!(cfg.request_config().default_timeout_secs(), 2.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    request: RequestConfig,
    latency: LatencyConfig,
    reconnect: ReconnectConfig,
    sync: SyncConfig,
}

impl EndpointConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn request(mut self, cfg: RequestConfig) -> Self {
        self.request = cfg;
        self
    }
    pub fn latency(mut self, cfg: LatencyConfig) -> Self {
        self.latency = cfg;
        self
    }
    pub fn reconnect(mut self, cfg: ReconnectConfig) -> Self {
        self.reconnect = cfg;
        self
    }
    pub fn sync(mut self, cfg: SyncConfig) -> Self {
        self.sync = cfg;
        self
    }
    pub fn request_config(&self) -> &RequestConfig {
        &self.request
    }
    pub fn latency_config(&self) -> &LatencyConfig {
        &self.latency
    }
    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect
    }
    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync
    }
}

/// The local representative of one connection: the lone endpoint of a client, or one per connected peer on
/// a server.
///
/// An endpoint owns the feature set, the outbound queue and the lifecycle observers. It never touches the
/// transport itself; its controller drains [`Outgoing`] work after every update.
pub struct Endpoint {
    link: Arc<Link>,
    cfg: EndpointConfig,
    running: AtomicBool,
    connected: AtomicBool,
    features: FeatureManager,
    observers: Observers<LifecycleEvent>,
}

impl Endpoint {
    pub fn new(id: Option<PeerId>, side: Side, cfg: EndpointConfig) -> Self {
        Self {
            link: Arc::new(Link::new(id, side)),
            cfg,
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            features: FeatureManager::new(),
            observers: Observers::new(),
        }
    }
    pub fn id(&self) -> Option<PeerId> {
        self.link.id()
    }
    pub fn side(&self) -> Side {
        self.link.side()
    }
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }
    pub fn config(&self) -> &EndpointConfig {
        &self.cfg
    }
    pub fn time(&self) -> f64 {
        self.link.time()
    }
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
    pub fn bytes_sent(&self) -> u64 {
        self.link.bytes_sent()
    }
    pub fn bytes_received(&self) -> u64 {
        self.link.bytes_received()
    }

    // Features

    pub fn features(&self) -> &FeatureManager {
        &self.features
    }
    pub fn add_feature<F: Installable>(&self) -> Arc<F> {
        self.features.add::<F>(self)
    }
    pub fn add_feature_instance<F: Installable>(&self, feature: F) -> Arc<F> {
        self.features.add_instance(self, feature)
    }
    pub fn feature<F: Installable>(&self) -> Option<Arc<F>> {
        self.features.get::<F>()
    }
    pub fn has_feature<F: Installable>(&self) -> bool {
        self.features.contains::<F>()
    }
    pub fn feature_state<F: Installable>(&self) -> Option<FeatureState> {
        self.features.state::<F>()
    }
    pub fn remove_feature<F: Installable>(&self) -> bool {
        self.features.remove::<F>(self)
    }
    pub fn enable_feature<F: Installable>(&self) -> bool {
        self.features.enable::<F>(self)
    }
    pub fn disable_feature<F: Installable>(&self) -> bool {
        self.features.disable::<F>(self)
    }

    // Lifecycle

    /// Public observers of this endpoint's lifecycle events.
    ///
    /// Priority features see every event before these observers do.
    pub fn observers(&self) -> &Observers<LifecycleEvent> {
        &self.observers
    }

    /// Delivers `event` to priority features, then public features, then public observers.
    pub fn emit(&self, event: LifecycleEvent) {
        log::trace!("endpoint {:?} emitting {:?}", self.id(), event);
        let (priority, public) = self.features.listeners();
        for feature in priority {
            feature.on_event(self, &event);
        }
        for feature in public {
            feature.on_event(self, &event);
        }
        self.observers.notify(&event);
    }

    /// Marks the endpoint running and enables every installed feature.
    pub fn start(&self, time: f64) {
        self.link.set_time(time);
        if self.is_running() {
            return;
        }
        self.emit(LifecycleEvent::Starting);
        self.running.store(true, Ordering::Release);
        self.features.enable_all(self);
        self.emit(LifecycleEvent::Started);
    }

    /// Disables every feature and marks the endpoint stopped.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        self.emit(LifecycleEvent::Stopping);
        self.features.disable_all(self);
        self.running.store(false, Ordering::Release);
        self.link.clear();
        self.emit(LifecycleEvent::Stopped);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn set_time(&self, time: f64) {
        self.link.set_time(time);
    }

    /// Runs one update of every enabled feature.
    pub fn update(&self, time: f64) {
        self.link.set_time(time);
        if !self.is_running() {
            return;
        }
        for feature in self.features.enabled() {
            feature.update(self, time);
        }
    }

    /// Takes the work queued since the last call.
    pub fn drain_outgoing(&self) -> Vec<Outgoing> {
        self.link.drain()
    }

    /// Asks the controller to close this connection.
    pub fn disconnect(&self, reason: DisconnectReason) {
        self.link.request_disconnect(reason);
    }

    // Data

    /// Queues an application data pack for the remote side.
    pub fn send_data(&self, pack: &DataPack) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.link.send(MessageKind::Data, pack)
    }

    /// Dispatches one inbound message.
    ///
    /// Application data is offered to the data targets in registration order until one accepts it. Every
    /// other kind goes to the enabled feature that claims it. Anything that cannot be placed is logged and
    /// dropped; the connection stays usable.
    pub fn receive(&self, buf: &[u8]) {
        self.link.record_received(buf.len());
        if !self.is_running() {
            log::debug!("endpoint {:?} ignored message while stopped", self.id());
            return;
        }
        let (kind, body) = match protocol::decode(buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("endpoint {:?} dropped message: {e}", self.id());
                return;
            }
        };
        if kind == MessageKind::Data {
            self.receive_data(body);
            return;
        }
        let Some(feature) = self.features.route(kind) else {
            log::warn!(
                "endpoint {:?} dropped {:?} message: no enabled feature consumes it",
                self.id(),
                kind
            );
            return;
        };
        if let Err(e) = feature.on_message(self, kind, body) {
            log::warn!("endpoint {:?} dropped {:?} message: {e}", self.id(), kind);
        }
    }

    fn receive_data(&self, body: &[u8]) {
        let pack = match protocol::read_body::<DataPack>(body) {
            Ok(pack) => pack,
            Err(e) => {
                log::warn!("endpoint {:?} dropped data pack: {e}", self.id());
                return;
            }
        };
        for target in self.features.data_targets() {
            if target.on_data(self, &pack) {
                return;
            }
        }
        log::warn!(
            "endpoint {:?} dropped data pack of {} values: no data target accepted it",
            self.id(),
            pack.len()
        );
    }
}

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{
    bridge::{Bridge, BridgeEvent, DisconnectReason, PeerId},
    endpoint::{Endpoint, EndpointConfig},
    error::{Error, Result},
    events::{LifecycleEvent, Observers},
    link::{Outgoing, Side},
    value::DataPack,
};

type ConnectCallback<Ctx> = Box<dyn FnMut(&Endpoint, &mut Ctx) + Send + Sync + 'static>;
type DisconnectCallback<Ctx> =
    Box<dyn FnMut(&Endpoint, &DisconnectReason, &mut Ctx) + Send + Sync + 'static>;

/// Configuration for a server.
///
/// * `endpoint` - The configuration every peer endpoint is created with.
/// * `on_connect` - A callback that will be called for every new peer, before its features are enabled.
///   This is where features are installed on the peer's endpoint.
/// * `on_disconnect` - A callback that will be called when a peer leaves, before its features are disabled.
///
/// # Example
/// ```
/// # struct MyContext { peers_seen: usize }
/// use featurenet::{RequestManager, ServerConfig};
///
/// let cfg = ServerConfig::with_context(MyContext { peers_seen: 0 })
///     .on_connect(|ep, ctx| {
///         ctx.peers_seen += 1;
///         ep.add_feature::<RequestManager>();
///     })
///     .on_disconnect(|ep, reason, _ctx| {
///         println!("{:?} left: {reason}", ep.id());
///     });
/// ```
pub struct ServerConfig<Ctx> {
    endpoint: EndpointConfig,
    context: Ctx,
    on_connect: Option<ConnectCallback<Ctx>>,
    on_disconnect: Option<DisconnectCallback<Ctx>>,
}

impl Default for ServerConfig<()> {
    fn default() -> Self {
        Self::with_context(())
    }
}

impl ServerConfig<()> {
    /// Create a new, default server configuration with no context.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Ctx> ServerConfig<Ctx> {
    /// Create a new server configuration with context that will be passed to the callbacks.
    pub fn with_context(ctx: Ctx) -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            context: ctx,
            on_connect: None,
            on_disconnect: None,
        }
    }
    /// Set the configuration of every peer endpoint.
    pub fn endpoint(mut self, cfg: EndpointConfig) -> Self {
        self.endpoint = cfg;
        self
    }
    /// Set a callback that will be called for every newly connected peer.
    pub fn on_connect<F>(mut self, cb: F) -> Self
    where
        F: FnMut(&Endpoint, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(cb));
        self
    }
    /// Set a callback that will be called when a peer disconnects or is disconnected.
    pub fn on_disconnect<F>(mut self, cb: F) -> Self
    where
        F: FnMut(&Endpoint, &DisconnectReason, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(cb));
        self
    }
}

/// The server controller.
///
/// A server owns one bridge and one [`Endpoint`] per connected peer. Peer endpoints are created running and
/// connected as soon as the bridge reports the connection, after `on_connect` has installed their features.
/// Server-wide events (`Starting`, `Started`, `Connected`, ...) go to [`observers`](Server::observers).
///
/// # Example
/// ```
/// use featurenet::{simulator::{NetworkSimulator, RoutingTable}, Server, ServerConfig, LatencyMeter};
///
/// let table = RoutingTable::default();
/// let cfg = ServerConfig::new().on_connect(|ep, _| {
///     ep.add_feature::<LatencyMeter>();
/// });
/// let mut server = Server::with_config(NetworkSimulator::new(50000, table), cfg);
/// server.start().unwrap();
///
/// let tick_rate = 1.0 / 60.0;
/// let mut time = 0.0;
/// for _ in 0..10 {
///     server.update(time);
///     time += tick_rate;
/// }
/// assert_eq!(server.num_peers(), 0);
/// ```
pub struct Server<B: Bridge, Ctx = ()> {
    bridge: B,
    peers: BTreeMap<PeerId, Arc<Endpoint>>,
    observers: Observers<LifecycleEvent>,
    running: bool,
    time: f64,
    cfg: ServerConfig<Ctx>,
}

impl<B: Bridge> Server<B> {
    /// Create a new server with a default configuration.
    pub fn new(bridge: B) -> Self {
        Server::with_config(bridge, ServerConfig::default())
    }
}

impl<B: Bridge, Ctx> Server<B, Ctx> {
    /// Create a new server with a custom configuration. <br>
    /// See [`ServerConfig`](ServerConfig) for more details.
    pub fn with_config(bridge: B, cfg: ServerConfig<Ctx>) -> Self {
        Self {
            bridge,
            peers: BTreeMap::new(),
            observers: Observers::new(),
            running: false,
            time: 0.0,
            cfg,
        }
    }
    /// Observers of server-wide lifecycle events.
    pub fn observers(&self) -> &Observers<LifecycleEvent> {
        &self.observers
    }
    /// Gets the local `SocketAddr` that the server's bridge is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.bridge.addr()
    }
    pub fn is_running(&self) -> bool {
        self.running
    }
    pub fn bridge(&self) -> &B {
        &self.bridge
    }
    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }
    /// Starts accepting connections.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.observers.notify(&LifecycleEvent::Starting);
        self.bridge.start().map_err(Into::into)?;
        self.running = true;
        log::info!("server started on {}", self.bridge.addr());
        self.observers.notify(&LifecycleEvent::Started);
        Ok(())
    }
    /// Disconnects every peer and stops the bridge.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.observers.notify(&LifecycleEvent::Stopping);
        self.disconnect_all(DisconnectReason::closed("server stopped"));
        self.bridge.stop();
        self.running = false;
        log::info!("server stopped");
        self.observers.notify(&LifecycleEvent::Stopped);
    }

    pub fn peer(&self, id: PeerId) -> Option<&Arc<Endpoint>> {
        self.peers.get(&id)
    }
    pub fn iter_peers(&self) -> impl Iterator<Item = (PeerId, &Arc<Endpoint>)> {
        self.peers.iter().map(|(id, ep)| (*id, ep))
    }
    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    /// Queues an application data pack for every connected peer.
    pub fn broadcast_data(&self, pack: &DataPack) -> Result<()> {
        for ep in self.peers.values() {
            ep.send_data(pack)?;
        }
        Ok(())
    }

    /// Disconnects `peer`, handing `reason` to the remote side.
    pub fn disconnect(&mut self, peer: PeerId, reason: DisconnectReason) -> Result<()> {
        let Some(ep) = self.peers.get(&peer).cloned() else {
            return Err(Error::PeerNotFound(peer));
        };
        ep.emit(LifecycleEvent::Disconnecting(peer, reason.clone()));
        let sent = self.bridge.disconnect(peer, &reason).map_err(Into::into);
        self.remove_peer(peer, reason);
        sent
    }

    /// Disconnects every peer. Failures to reach a peer are logged.
    pub fn disconnect_all(&mut self, reason: DisconnectReason) {
        log::debug!("server disconnecting all peers");
        let peers: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in peers {
            if let Err(e) = self.disconnect(peer, reason.clone()) {
                log::error!("server failed to disconnect {peer}: {e}");
            }
        }
    }

    fn add_peer(&mut self, peer: PeerId) {
        if self.peers.contains_key(&peer) {
            log::debug!("server replacing stale endpoint of {peer}");
            self.remove_peer(peer, DisconnectReason::lost("replaced by a new connection"));
        }
        let ep = Arc::new(Endpoint::new(
            Some(peer),
            Side::Server,
            self.cfg.endpoint.clone(),
        ));
        if let Some(ref mut cb) = self.cfg.on_connect {
            cb(&ep, &mut self.cfg.context);
        }
        ep.start(self.time);
        ep.set_connected(true);
        self.peers.insert(peer, ep.clone());
        log::info!("server accepted {peer}");
        ep.emit(LifecycleEvent::Connected(peer));
        self.observers.notify(&LifecycleEvent::Connected(peer));
    }

    fn remove_peer(&mut self, peer: PeerId, reason: DisconnectReason) {
        let Some(ep) = self.peers.remove(&peer) else {
            return;
        };
        ep.set_connected(false);
        log::info!("server lost {peer}: {reason}");
        ep.emit(LifecycleEvent::Disconnected(peer, reason.clone()));
        if let Some(ref mut cb) = self.cfg.on_disconnect {
            cb(&ep, &reason, &mut self.cfg.context);
        }
        ep.stop();
        self.observers
            .notify(&LifecycleEvent::Disconnected(peer, reason));
    }

    fn process_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Connected(peer) => self.add_peer(peer),
            BridgeEvent::Disconnected(peer, reason) => self.remove_peer(peer, reason),
            BridgeEvent::Data(peer, payload) => match self.peers.get(&peer) {
                Some(ep) => ep.receive(&payload),
                None => log::debug!("server ignored data from unknown {peer}"),
            },
        }
    }

    /// Performs pending I/O, dispatches inbound messages, runs the features of every peer and sends queued
    /// work.
    pub fn update(&mut self, time: f64) {
        self.time = time;
        if !self.running {
            return;
        }
        for ep in self.peers.values() {
            ep.set_time(time);
        }
        if let Err(e) = self.bridge.tick(time).map_err(Into::<Error>::into) {
            log::error!("server bridge failed: {e}");
        }
        while let Some(event) = self.bridge.poll() {
            self.process_event(event);
        }

        let mut leaving = Vec::new();
        for (&peer, ep) in &self.peers {
            ep.update(time);
            for outgoing in ep.drain_outgoing() {
                match outgoing {
                    Outgoing::Message(msg) => {
                        match self.bridge.send(peer, &msg).map_err(Into::<Error>::into) {
                            Ok(_) => ep.link().record_sent(msg.len()),
                            Err(e) => log::error!("server failed to send to {peer}: {e}"),
                        }
                    }
                    Outgoing::Connect => {
                        log::warn!("server ignored connect request from the endpoint of {peer}");
                    }
                    Outgoing::Disconnect(reason) => leaving.push((peer, reason)),
                }
            }
        }
        for (peer, reason) in leaving {
            if let Err(e) = self.disconnect(peer, reason) {
                log::error!("server failed to disconnect {peer}: {e}");
            }
        }
    }
}

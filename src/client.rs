use std::net::SocketAddr;

use crate::{
    bridge::{Bridge, BridgeEvent, DisconnectReason, PeerId},
    endpoint::{Endpoint, EndpointConfig},
    error::{Error, Result},
    events::LifecycleEvent,
    link::{Outgoing, Side},
    value::DataPack,
};

type Callback<Ctx> = Box<dyn FnMut(ClientState, ClientState, &mut Ctx) + Send + Sync + 'static>;

/// Configuration for a client
///
/// * `endpoint` - The configuration handed to the features installed on the client's endpoint.
/// * `on_state_change` - A callback that will be called when the client changes states.
///
/// # Example
/// ```
/// # struct MyContext;
/// use featurenet::{ClientConfig, ClientState, EndpointConfig};
///
/// let cfg = ClientConfig::with_context(MyContext {})
///     .endpoint(EndpointConfig::default())
///     .on_state_change(|from, to, _ctx| {
///         if let (ClientState::Connecting, ClientState::Connected) = (from, to) {
///             println!("client connected to server");
///         }
///     });
/// ```
pub struct ClientConfig<Ctx> {
    endpoint: EndpointConfig,
    context: Ctx,
    on_state_change: Option<Callback<Ctx>>,
}

impl Default for ClientConfig<()> {
    fn default() -> Self {
        Self::with_context(())
    }
}

impl ClientConfig<()> {
    /// Create a new, default client configuration with no context.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Ctx> ClientConfig<Ctx> {
    /// Create a new client configuration with context that will be passed to the callbacks.
    pub fn with_context(ctx: Ctx) -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            context: ctx,
            on_state_change: None,
        }
    }
    /// Set the configuration of the client's endpoint and its features.
    pub fn endpoint(mut self, cfg: EndpointConfig) -> Self {
        self.endpoint = cfg;
        self
    }
    /// Set a callback that will be called when the client changes states.
    pub fn on_state_change<F>(mut self, cb: F) -> Self
    where
        F: FnMut(ClientState, ClientState, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(cb));
        self
    }
}

/// The states in the client state machine.
///
/// The initial state is `Disconnected`. [`Client::connect`] moves to `Connecting`, and the bridge's
/// confirmation moves to `Connected`. A lost connection, a failed attempt or [`Client::disconnect`] moves
/// back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// The client controller.
///
/// A client owns one bridge and one endpoint without an id. Features are installed on the endpoint before
/// or after [`start`](Client::start), and the client should be updated at a fixed rate (e.g. 60Hz) so that
/// inbound messages are dispatched and queued work reaches the bridge.
///
/// # Example
/// ```
/// use featurenet::{simulator::{NetworkSimulator, RoutingTable}, Client, ClientState, RequestManager};
/// # use std::net::SocketAddr;
///
/// let table = RoutingTable::default();
/// let server_addr = SocketAddr::from(([127, 0, 0, 1], 50000));
/// let mut client = Client::new(NetworkSimulator::new(40000, table), server_addr);
/// client.endpoint().add_feature::<RequestManager>();
/// client.start().unwrap();
/// client.connect().unwrap();
/// assert_eq!(client.state(), ClientState::Connecting);
///
/// let tick_rate = 1.0 / 60.0;
/// let mut time = 0.0;
/// for _ in 0..10 {
///     client.update(time);
///     time += tick_rate;
/// }
/// ```
pub struct Client<B: Bridge, Ctx = ()> {
    bridge: B,
    endpoint: Endpoint,
    target: SocketAddr,
    server: PeerId,
    state: ClientState,
    time: f64,
    cfg: ClientConfig<Ctx>,
}

impl<B: Bridge> Client<B> {
    /// Create a new client with a default configuration.
    pub fn new(bridge: B, target: SocketAddr) -> Self {
        Client::with_config(bridge, target, ClientConfig::default())
    }
}

impl<B: Bridge, Ctx> Client<B, Ctx> {
    /// Create a new client with a custom configuration. <br>
    /// See [`ClientConfig`](ClientConfig) for more details.
    pub fn with_config(bridge: B, target: SocketAddr, cfg: ClientConfig<Ctx>) -> Self {
        let endpoint = Endpoint::new(None, Side::Client, cfg.endpoint.clone());
        Self {
            bridge,
            endpoint,
            target,
            server: PeerId(target.port() as u64),
            state: ClientState::Disconnected,
            time: 0.0,
            cfg,
        }
    }
    fn set_state(&mut self, state: ClientState) {
        if self.state == state {
            return;
        }
        log::debug!("client state changing from {:?} to {:?}", self.state, state);
        if let Some(ref mut cb) = self.cfg.on_state_change {
            cb(self.state, state, &mut self.cfg.context)
        }
        self.state = state;
    }
    /// Starts the bridge and enables every installed feature.
    pub fn start(&mut self) -> Result<()> {
        if self.endpoint.is_running() {
            return Ok(());
        }
        self.bridge.start().map_err(Into::into)?;
        self.endpoint.start(self.time);
        log::info!("client started on {}", self.bridge.addr());
        Ok(())
    }
    /// Closes the connection, stops the bridge and disables every feature.
    pub fn stop(&mut self) {
        if !self.endpoint.is_running() {
            return;
        }
        if let Err(e) = self.disconnect(DisconnectReason::closed("client stopped")) {
            log::error!("client failed to disconnect while stopping: {e}");
        }
        self.bridge.stop();
        self.endpoint.stop();
        log::info!("client stopped");
    }
    /// Connects the client to its target.
    ///
    /// Does not block. The outcome shows up as a state change during a later [`update`](Client::update).
    pub fn connect(&mut self) -> Result<()> {
        if !self.endpoint.is_running() {
            return Err(Error::NotConnected);
        }
        if self.state == ClientState::Connected {
            log::debug!("client is already connected");
            return Ok(());
        }
        self.set_state(ClientState::Connecting);
        self.endpoint.emit(LifecycleEvent::Connecting(self.target));
        log::info!("client connecting to server {}", self.target);
        self.bridge.connect(self.target).map_err(Into::into)
    }
    /// Disconnects the client from the server, handing `reason` to the remote side.
    pub fn disconnect(&mut self, reason: DisconnectReason) -> Result<()> {
        if self.state == ClientState::Disconnected {
            return Ok(());
        }
        let peer = self.server;
        self.endpoint
            .emit(LifecycleEvent::Disconnecting(peer, reason.clone()));
        let sent = self.bridge.disconnect(peer, &reason).map_err(Into::into);
        self.lose_connection(peer, reason);
        sent
    }
    fn lose_connection(&mut self, peer: PeerId, reason: DisconnectReason) {
        self.endpoint.set_connected(false);
        self.set_state(ClientState::Disconnected);
        log::info!("client disconnected from {peer}: {reason}");
        self.endpoint
            .emit(LifecycleEvent::Disconnected(peer, reason));
    }
    /// Gets the local `SocketAddr` that the client's bridge is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.bridge.addr()
    }
    /// Gets the address the client connects to.
    pub fn target(&self) -> SocketAddr {
        self.target
    }
    /// Gets the current state of the client.
    pub fn state(&self) -> ClientState {
        self.state
    }
    /// Returns true if the client is connected to a server.
    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }
    /// The endpoint features are installed on.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
    pub fn bridge(&self) -> &B {
        &self.bridge
    }
    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }
    /// Queues an application data pack for the server.
    pub fn send_data(&self, pack: &DataPack) -> Result<()> {
        self.endpoint.send_data(pack)
    }
    fn process_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Connected(peer) if self.state == ClientState::Connecting => {
                self.server = peer;
                self.endpoint.set_connected(true);
                self.set_state(ClientState::Connected);
                log::info!("client connected to server {peer}");
                self.endpoint.emit(LifecycleEvent::Connected(peer));
            }
            BridgeEvent::Connected(peer) => {
                log::debug!("client ignored unexpected connection from {peer}");
            }
            BridgeEvent::Disconnected(peer, reason) => {
                if self.state != ClientState::Disconnected {
                    self.lose_connection(peer, reason);
                }
            }
            BridgeEvent::Data(_, payload) if self.state == ClientState::Connected => {
                self.endpoint.receive(&payload);
            }
            BridgeEvent::Data(peer, _) => {
                log::debug!("client ignored data from {peer} while not connected");
            }
        }
    }
    fn flush(&mut self) {
        for outgoing in self.endpoint.drain_outgoing() {
            match outgoing {
                Outgoing::Message(msg) if self.state == ClientState::Connected => {
                    match self.bridge.send(self.server, &msg).map_err(Into::into) {
                        Ok(_) => self.endpoint.link().record_sent(msg.len()),
                        Err(e) => log::error!("client failed to send message: {e}"),
                    }
                }
                Outgoing::Message(msg) => {
                    log::debug!(
                        "client dropped {} byte message while not connected",
                        msg.len()
                    );
                }
                Outgoing::Connect => {
                    if let Err(e) = self.connect() {
                        log::error!("client failed to connect: {e}");
                    }
                }
                Outgoing::Disconnect(reason) => {
                    if let Err(e) = self.disconnect(reason) {
                        log::error!("client failed to disconnect: {e}");
                    }
                }
            }
        }
    }
    /// Performs pending I/O, dispatches inbound messages, runs every feature and sends queued work.
    pub fn update(&mut self, time: f64) {
        self.time = time;
        self.endpoint.set_time(time);
        if let Err(e) = self.bridge.tick(time).map_err(Into::<Error>::into) {
            log::error!("client bridge failed: {e}");
        }
        while let Some(event) = self.bridge.poll() {
            self.process_event(event);
        }
        self.endpoint.update(time);
        self.flush();
    }
}

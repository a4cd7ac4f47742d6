//! An in-memory [`Bridge`] for tests and demos.
//!
//! Every simulator is registered under a port in a shared routing table. Frames are delivered after a
//! configurable latency (plus jitter), in send order per destination. A simulator can go offline to play a
//! crashed process: it stops answering and forgets its connections without telling anyone.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr},
    rc::Rc,
    sync::mpsc::{self, Receiver, Sender},
};

use byteorder::{ReadBytesExt, WriteBytesExt};
use rand::Rng;

use crate::{
    bridge::{Bridge, BridgeEvent, DisconnectReason, PeerId},
    bytes::Bytes,
};

/// Routes frames between simulators by port.
pub type RoutingTable = Rc<RefCell<HashMap<u16, Sender<PacketEntry>>>>;

#[derive(Debug, Clone)]
pub struct PacketEntry {
    pub from: u16,
    pub to: u16,
    pub delivery_time: f64,
    pub frame: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_percent: f64,
    /// How long an unanswered connect waits before it fails.
    pub connect_timeout_sec: f64,
    /// How long a connection may stay silent before it is considered lost.
    pub idle_timeout_sec: f64,
    pub keep_alive_sec: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 50.0,
            jitter_ms: 0.0,
            packet_loss_percent: 0.0,
            connect_timeout_sec: 1.0,
            idle_timeout_sec: 3.0,
            keep_alive_sec: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Connect,
    Accept,
    Data(Vec<u8>),
    Disconnect(DisconnectReason),
    KeepAlive,
}

impl Bytes for Frame {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        match self {
            Frame::Connect => writer.write_u8(0),
            Frame::Accept => writer.write_u8(1),
            Frame::Data(payload) => {
                writer.write_u8(2)?;
                writer.write_all(payload)
            }
            Frame::Disconnect(reason) => {
                writer.write_u8(3)?;
                reason.write_to(writer)
            }
            Frame::KeepAlive => writer.write_u8(4),
        }
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        Ok(match reader.read_u8()? {
            0 => Frame::Connect,
            1 => Frame::Accept,
            2 => {
                let mut payload = Vec::new();
                reader.read_to_end(&mut payload)?;
                Frame::Data(payload)
            }
            3 => Frame::Disconnect(DisconnectReason::read_from(reader)?),
            4 => Frame::KeepAlive,
            tag => {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("unknown frame {tag}"),
                ))
            }
        })
    }
}

struct Connection {
    last_send: f64,
    last_receive: f64,
}

struct PendingConnect {
    target: u16,
    deadline: f64,
}

pub struct NetworkSimulator {
    port: u16,
    time: f64,
    online: bool,
    cfg: SimulationConfig,
    routing_table: RoutingTable,
    rx: Receiver<PacketEntry>,
    in_flight: Vec<PacketEntry>,
    last_delivery: HashMap<u16, f64>,
    connections: HashMap<u16, Connection>,
    pending: Option<PendingConnect>,
    events: VecDeque<BridgeEvent>,
}

impl NetworkSimulator {
    pub fn new(port: u16, table: RoutingTable) -> Self {
        Self::with_config(port, table, SimulationConfig::default())
    }

    pub fn with_config(port: u16, table: RoutingTable, cfg: SimulationConfig) -> Self {
        let (tx, rx) = mpsc::channel::<PacketEntry>();
        table.borrow_mut().insert(port, tx);
        Self {
            port,
            time: 0.0,
            online: true,
            cfg,
            routing_table: table,
            rx,
            in_flight: Vec::new(),
            last_delivery: HashMap::new(),
            connections: HashMap::new(),
            pending: None,
            events: VecDeque::new(),
        }
    }

    pub fn config_mut(&mut self) -> &mut SimulationConfig {
        &mut self.cfg
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Drops every connection silently and ignores all traffic until [`go_online`](Self::go_online).
    pub fn go_offline(&mut self) {
        log::debug!("simulator {} going offline", self.port);
        self.online = false;
        self.connections.clear();
        self.pending = None;
        self.in_flight.clear();
        self.events.clear();
    }

    pub fn go_online(&mut self) {
        log::debug!("simulator {} back online", self.port);
        self.online = true;
    }

    fn peer(port: u16) -> PeerId {
        PeerId(port as u64)
    }

    fn port_of(peer: PeerId) -> io::Result<u16> {
        u16::try_from(peer.0).map_err(|_| io::Error::new(ErrorKind::InvalidInput, "not a port"))
    }

    fn transmit(&mut self, to: u16, frame: &Frame) -> io::Result<usize> {
        if !self.online {
            return Ok(0);
        }
        let table = self.routing_table.borrow();
        let Some(tx) = table.get(&to) else {
            return Ok(0);
        };
        let mut rng = rand::thread_rng();
        if self.cfg.packet_loss_percent > 0.0
            && rng.gen_range(0.0..100.0) < self.cfg.packet_loss_percent
        {
            log::trace!("simulator {} lost a frame to {to}", self.port);
            return Ok(0);
        }
        let mut delay = self.cfg.latency_ms / 1000.0;
        if self.cfg.jitter_ms > 0.0 {
            delay += rng.gen_range(-self.cfg.jitter_ms..self.cfg.jitter_ms) / 1000.0;
        }
        // never overtake a frame already on its way to the same destination
        let last = self.last_delivery.entry(to).or_insert(f64::NEG_INFINITY);
        let delivery_time = (self.time + delay.max(0.0)).max(*last);
        *last = delivery_time;
        let frame = frame.to_vec()?;
        let len = frame.len();
        tx.send(PacketEntry {
            from: self.port,
            to,
            delivery_time,
            frame,
        })
        .ok();
        if let Some(conn) = self.connections.get_mut(&to) {
            conn.last_send = self.time;
        }
        Ok(len)
    }

    fn receive(&mut self, from: u16, frame: Frame) -> io::Result<()> {
        if let Some(conn) = self.connections.get_mut(&from) {
            conn.last_receive = self.time;
        }
        match frame {
            Frame::Connect => {
                if self.connections.contains_key(&from) {
                    log::debug!("simulator {} replacing connection from {from}", self.port);
                }
                self.connections.insert(
                    from,
                    Connection {
                        last_send: self.time,
                        last_receive: self.time,
                    },
                );
                self.transmit(from, &Frame::Accept)?;
                self.events.push_back(BridgeEvent::Connected(Self::peer(from)));
            }
            Frame::Accept => {
                if !matches!(self.pending, Some(ref p) if p.target == from) {
                    return Ok(());
                }
                self.pending = None;
                self.connections.insert(
                    from,
                    Connection {
                        last_send: self.time,
                        last_receive: self.time,
                    },
                );
                self.events.push_back(BridgeEvent::Connected(Self::peer(from)));
            }
            Frame::Data(payload) => {
                if self.connections.contains_key(&from) {
                    self.events
                        .push_back(BridgeEvent::Data(Self::peer(from), payload));
                } else {
                    log::debug!("simulator {} dropped data from stranger {from}", self.port);
                }
            }
            Frame::Disconnect(reason) => {
                let was_pending = matches!(self.pending, Some(ref p) if p.target == from);
                if was_pending {
                    self.pending = None;
                }
                if self.connections.remove(&from).is_some() || was_pending {
                    self.events
                        .push_back(BridgeEvent::Disconnected(Self::peer(from), reason));
                }
            }
            Frame::KeepAlive => {}
        }
        Ok(())
    }
}

impl Bridge for NetworkSimulator {
    type IntoError = io::Error;

    fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    fn stop(&mut self) {
        self.connections.clear();
        self.pending = None;
    }

    fn connect(&mut self, target: SocketAddr) -> Result<(), io::Error> {
        let to = target.port();
        self.pending = Some(PendingConnect {
            target: to,
            deadline: self.time + self.cfg.connect_timeout_sec,
        });
        self.transmit(to, &Frame::Connect)?;
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId, reason: &DisconnectReason) -> Result<(), io::Error> {
        let to = Self::port_of(peer)?;
        self.transmit(to, &Frame::Disconnect(reason.clone()))?;
        self.connections.remove(&to);
        if matches!(self.pending, Some(ref p) if p.target == to) {
            self.pending = None;
        }
        Ok(())
    }

    fn send(&mut self, peer: PeerId, payload: &[u8]) -> Result<usize, io::Error> {
        let to = Self::port_of(peer)?;
        if !self.connections.contains_key(&to) {
            return Err(io::Error::new(
                ErrorKind::NotConnected,
                format!("no connection to {peer}"),
            ));
        }
        self.transmit(to, &Frame::Data(payload.to_vec()))
    }

    fn tick(&mut self, time: f64) -> Result<(), io::Error> {
        self.time = time;
        self.in_flight.extend(self.rx.try_iter());
        if !self.online {
            self.in_flight.clear();
            return Ok(());
        }
        self.in_flight
            .sort_by(|a, b| a.delivery_time.total_cmp(&b.delivery_time));
        let due = self
            .in_flight
            .iter()
            .take_while(|entry| entry.delivery_time <= time)
            .count();
        let arrived: Vec<PacketEntry> = self.in_flight.drain(..due).collect();
        for entry in arrived {
            match Frame::from_slice(&entry.frame) {
                Ok(frame) => self.receive(entry.from, frame)?,
                Err(e) => log::warn!("simulator {} dropped frame: {e}", self.port),
            }
        }

        if let Some(pending) = self.pending.take() {
            if time >= pending.deadline {
                self.events.push_back(BridgeEvent::Disconnected(
                    Self::peer(pending.target),
                    DisconnectReason::lost("connection timed out"),
                ));
            } else {
                self.pending = Some(pending);
            }
        }

        let mut quiet = Vec::new();
        let mut lost = Vec::new();
        for (port, conn) in &self.connections {
            if time - conn.last_receive >= self.cfg.idle_timeout_sec {
                lost.push(*port);
            } else if time - conn.last_send >= self.cfg.keep_alive_sec {
                quiet.push(*port);
            }
        }
        for port in lost {
            self.connections.remove(&port);
            self.events.push_back(BridgeEvent::Disconnected(
                Self::peer(port),
                DisconnectReason::lost("connection timed out"),
            ));
        }
        for port in quiet {
            self.transmit(port, &Frame::KeepAlive)?;
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<BridgeEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        client::{Client, ClientConfig, ClientState},
        events::LifecycleEvent,
        feature::{Feature, Installable},
        latency::{LatencyConfig, LatencyMeter, MeasureSide},
        protocol::ResponseStatus,
        reconnect::{ReconnectState, Reconnector},
        request::{Payload, Request, RequestManager, Response},
        server::{Server, ServerConfig},
        sync::{PropertySpec, SyncManager, SyncType, SyncedEntity},
        value::{DataPack, Value},
        Endpoint, EndpointConfig,
    };

    const SERVER_PORT: u16 = 50000;

    fn enable_logging() {
        static LOGGER_CELL: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        LOGGER_CELL.get_or_init(|| {
            env_logger::Builder::new()
                .filter(None, log::LevelFilter::Warn)
                .is_test(true)
                .try_init()
                .ok();
        });
    }

    fn server_addr() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, SERVER_PORT))
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Ping;

    impl Bytes for Ping {
        fn write_to(&self, _: &mut impl WriteBytesExt) -> Result<(), io::Error> {
            Ok(())
        }
        fn read_from(_: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
            Ok(Ping)
        }
    }

    impl Payload for Ping {
        const KIND: u16 = 10;
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Pong;

    impl Bytes for Pong {
        fn write_to(&self, _: &mut impl WriteBytesExt) -> Result<(), io::Error> {
            Ok(())
        }
        fn read_from(_: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
            Ok(Pong)
        }
    }

    impl Payload for Pong {
        const KIND: u16 = 11;
    }

    struct Counter;

    impl SyncType for Counter {
        const TYPE_NAME: &'static str = "counter";
        fn properties() -> Vec<PropertySpec> {
            vec![PropertySpec::new("value", 0i32)]
        }
    }

    #[derive(Default)]
    struct Inbox {
        packs: Mutex<Vec<DataPack>>,
    }

    impl Feature for Inbox {
        fn is_data_target(&self) -> bool {
            true
        }
        fn on_data(&self, _ep: &Endpoint, pack: &DataPack) -> bool {
            self.packs.lock().unwrap().push(pack.clone());
            true
        }
    }

    impl Installable for Inbox {
        const NAME: &'static str = "inbox";
        fn create(_ep: &Endpoint) -> Self {
            Self::default()
        }
    }

    fn ping_server(table: &RoutingTable) -> Server<NetworkSimulator> {
        let cfg = ServerConfig::new().on_connect(|ep, _| {
            ep.add_feature::<RequestManager>()
                .register_responder(|_: &Request<Ping>| Ok(Some(Pong)));
            ep.add_feature::<Inbox>();
        });
        let mut server =
            Server::with_config(NetworkSimulator::new(SERVER_PORT, table.clone()), cfg);
        server.start().unwrap();
        server
    }

    fn run_until(
        time: &mut f64,
        limit: f64,
        client: &mut Client<NetworkSimulator>,
        server: &mut Server<NetworkSimulator>,
        mut done: impl FnMut(&Client<NetworkSimulator>, &Server<NetworkSimulator>) -> bool,
    ) -> bool {
        let delta = 1.0 / 60.0;
        while *time < limit {
            client.update(*time);
            server.update(*time);
            if done(&*client, &*server) {
                return true;
            }
            *time += delta;
        }
        false
    }

    #[test]
    fn client_server_connect_and_exchange_data() {
        enable_logging();
        let table = RoutingTable::default();
        let mut server = ping_server(&table);
        let mut client = Client::new(NetworkSimulator::new(40000, table.clone()), server_addr());
        let inbox = client.endpoint().add_feature::<Inbox>();
        client.start().unwrap();
        client.connect().unwrap();
        assert_eq!(client.state(), ClientState::Connecting);

        let mut time = 0.0;
        assert!(run_until(&mut time, 2.0, &mut client, &mut server, |c, s| {
            c.is_connected() && s.num_peers() == 1
        }));

        client
            .send_data(&DataPack::new().with("hello").with(7u32))
            .unwrap();
        server.broadcast_data(&DataPack::new().with("welcome")).unwrap();
        let limit = time + 0.5;
        run_until(&mut time, limit, &mut client, &mut server, |_, _| false);

        let (_, peer) = server.iter_peers().next().unwrap();
        let server_inbox = peer.feature::<Inbox>().unwrap();
        assert_eq!(
            server_inbox.packs.lock().unwrap()[0],
            DataPack::new().with("hello").with(7u32)
        );
        assert_eq!(
            inbox.packs.lock().unwrap()[0].get(0),
            Some(&Value::from("welcome"))
        );
        assert!(client.endpoint().bytes_sent() > 0);
        assert!(client.endpoint().bytes_received() > 0);
    }

    #[test]
    fn ping_is_answered_and_times_out_once_the_server_dies() {
        enable_logging();
        let table = RoutingTable::default();
        let mut server = ping_server(&table);
        let mut client = Client::new(NetworkSimulator::new(40000, table.clone()), server_addr());
        let requests = client.endpoint().add_feature::<RequestManager>();
        client.start().unwrap();
        client.connect().unwrap();

        let mut time = 0.0;
        assert!(run_until(&mut time, 2.0, &mut client, &mut server, |c, _| c
            .is_connected()));

        let seen: Arc<Mutex<Vec<Response<Pong>>>> = Arc::default();
        {
            let seen = seen.clone();
            requests
                .send(&Ping, move |r: Response<Pong>| seen.lock().unwrap().push(r))
                .unwrap();
        }
        let limit = time + 2.0;
        assert!(run_until(&mut time, limit, &mut client, &mut server, |_, _| {
            !seen.lock().unwrap().is_empty()
        }));
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen[0].status, ResponseStatus::Ok);
            assert_eq!(seen[0].payload, Some(Pong));
            let rtt = seen[0].round_trip().unwrap();
            assert!(rtt > 0.09 && rtt < 0.2, "round trip {rtt}");
        }

        server.bridge_mut().go_offline();
        let sent_at = time;
        {
            let seen = seen.clone();
            requests
                .send(&Ping, move |r: Response<Pong>| seen.lock().unwrap().push(r))
                .unwrap();
        }
        assert!(run_until(&mut time, sent_at + 10.0, &mut client, &mut server, |_, _| {
            seen.lock().unwrap().len() == 2
        }));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[1].status, ResponseStatus::TimedOut);
        assert_eq!(seen[1].payload, None);
        let waited = time - sent_at;
        assert!(waited >= 5.0 && waited < 5.3, "timed out after {waited}");
    }

    #[test]
    fn latency_meter_measures_over_the_wire() {
        enable_logging();
        let table = RoutingTable::default();
        let cfg = ServerConfig::new().on_connect(|ep, _| {
            ep.add_feature::<LatencyMeter>();
        });
        let mut server =
            Server::with_config(NetworkSimulator::new(SERVER_PORT, table.clone()), cfg);
        server.start().unwrap();

        let endpoint_cfg = EndpointConfig::new()
            .latency(LatencyConfig::new().interval(0.5).side(MeasureSide::Client));
        let mut client = Client::with_config(
            NetworkSimulator::new(40000, table.clone()),
            server_addr(),
            ClientConfig::new().endpoint(endpoint_cfg),
        );
        let meter = client.endpoint().add_feature::<LatencyMeter>();
        client.start().unwrap();
        client.connect().unwrap();

        let mut time = 0.0;
        assert!(run_until(&mut time, 5.0, &mut client, &mut server, |_, _| {
            meter.stats().samples >= 3
        }));
        let stats = meter.stats();
        assert!(stats.min > 0.09 && stats.max < 0.2, "{stats:?}");
        assert!(stats.average() >= stats.min && stats.average() <= stats.max);
    }

    #[test]
    fn reconnects_after_the_server_comes_back() {
        enable_logging();
        let table = RoutingTable::default();
        let mut server = ping_server(&table);
        let events: Arc<Mutex<Vec<LifecycleEvent>>> = Arc::default();
        let mut client = Client::new(NetworkSimulator::new(40000, table.clone()), server_addr());
        let reconnector = client.endpoint().add_feature::<Reconnector>();
        {
            let events = events.clone();
            client
                .endpoint()
                .observers()
                .subscribe(move |e| events.lock().unwrap().push(e.clone()));
        }
        client.start().unwrap();
        client.connect().unwrap();

        let mut time = 0.0;
        assert!(run_until(&mut time, 2.0, &mut client, &mut server, |c, _| c
            .is_connected()));

        server.bridge_mut().go_offline();
        let limit = time + 10.0;
        assert!(run_until(&mut time, limit, &mut client, &mut server, |_, _| {
            reconnector.attempts() >= 2
        }));
        assert!(!client.is_connected());
        assert_ne!(reconnector.state(), ReconnectState::Connected);

        server.bridge_mut().go_online();
        let limit = time + 10.0;
        assert!(run_until(&mut time, limit, &mut client, &mut server, |c, _| {
            c.is_connected() && events.lock().unwrap().contains(&LifecycleEvent::Reconnected)
        }));
        assert_eq!(reconnector.state(), ReconnectState::Connected);
        assert_eq!(reconnector.attempts(), 0);
        assert_eq!(server.num_peers(), 1);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, LifecycleEvent::Reconnecting { attempt: 1 })));
    }

    #[test]
    fn deliberate_disconnect_is_not_retried() {
        enable_logging();
        let table = RoutingTable::default();
        let mut server = ping_server(&table);
        let mut client = Client::new(NetworkSimulator::new(40000, table.clone()), server_addr());
        let reconnector = client.endpoint().add_feature::<Reconnector>();
        client.start().unwrap();
        client.connect().unwrap();
        let mut time = 0.0;
        assert!(run_until(&mut time, 2.0, &mut client, &mut server, |c, _| c
            .is_connected()));

        client
            .disconnect(DisconnectReason::closed("bye"))
            .unwrap();
        let limit = time + 1.0;
        assert!(run_until(&mut time, limit, &mut client, &mut server, |_, s| {
            s.num_peers() == 0
        }));
        let limit = time + 5.0;
        run_until(&mut time, limit, &mut client, &mut server, |_, _| false);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(!reconnector.is_active());
    }

    #[test]
    fn counter_replicates_to_the_server() {
        enable_logging();
        let table = RoutingTable::default();
        let mirrored: Arc<Mutex<Option<Arc<SyncedEntity>>>> = Arc::default();
        let cfg = {
            let mirrored = mirrored.clone();
            ServerConfig::new().on_connect(move |ep, _| {
                let sync = ep.add_feature::<SyncManager>();
                sync.register::<Counter>();
                let mirrored = mirrored.clone();
                sync.on_remote_create()
                    .subscribe(move |e| *mirrored.lock().unwrap() = Some(e.clone()));
            })
        };
        let mut server =
            Server::with_config(NetworkSimulator::new(SERVER_PORT, table.clone()), cfg);
        server.start().unwrap();

        let mut client = Client::new(NetworkSimulator::new(40000, table.clone()), server_addr());
        let sync = client.endpoint().add_feature::<SyncManager>();
        client.start().unwrap();
        client.connect().unwrap();
        let mut time = 0.0;
        assert!(run_until(&mut time, 2.0, &mut client, &mut server, |c, _| c
            .is_connected()));

        let counter = sync.create::<Counter>().unwrap();
        for v in [42, 43, 44] {
            counter.set(0, v).unwrap();
        }
        let limit = time + 1.0;
        assert!(run_until(&mut time, limit, &mut client, &mut server, |_, _| {
            mirrored
                .lock()
                .unwrap()
                .as_ref()
                .map_or(false, |e| e.get(0) == Some(Value::I32(44)))
        }));
        let mirror = mirrored.lock().unwrap().clone().unwrap();
        assert_eq!(mirror.id(), counter.id());
        assert_eq!(mirror.type_name(), "counter");
    }

    #[test]
    fn multiple_clients_get_their_own_endpoints() {
        enable_logging();
        let table = RoutingTable::default();
        let mut server = ping_server(&table);
        let mut clients: Vec<_> = (0..3)
            .map(|i| Client::new(NetworkSimulator::new(40000 + i, table.clone()), server_addr()))
            .collect();
        for client in clients.iter_mut() {
            client.start().unwrap();
            client.connect().unwrap();
        }
        let mut time = 0.0;
        while time < 2.0 && !clients.iter().all(|c| c.is_connected()) {
            for client in clients.iter_mut() {
                client.update(time);
            }
            server.update(time);
            time += 1.0 / 60.0;
        }
        assert!(clients.iter().all(|c| c.is_connected()));
        assert_eq!(server.num_peers(), 3);
        let mut ids: Vec<_> = server.iter_peers().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec![PeerId(40000), PeerId(40001), PeerId(40002)]);

        server.disconnect_all(DisconnectReason::closed("shutdown"));
        assert_eq!(server.num_peers(), 0);
        for _ in 0..10 {
            for client in clients.iter_mut() {
                client.update(time);
            }
            time += 1.0 / 60.0;
        }
        assert!(clients.iter().all(|c| !c.is_connected()));
    }

    #[test]
    fn connect_to_nobody_times_out() {
        enable_logging();
        let table = RoutingTable::default();
        let mut client = Client::new(NetworkSimulator::new(40000, table), server_addr());
        client.start().unwrap();
        client.connect().unwrap();
        let mut time = 0.0;
        while time < 1.5 {
            client.update(time);
            time += 0.1;
        }
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}

use std::net::SocketAddr;

use featurenet::{
    simulator::{NetworkSimulator, RoutingTable, SimulationConfig},
    Client, ClientConfig, ClientState, EndpointConfig, LatencyConfig, LatencyMeter, MeasureSide,
    PropertySpec, Reconnector, Server, ServerConfig, SyncManager, SyncType,
};

const SERVER_PORT: u16 = 12345;
const CLIENT_PORT: u16 = 40000;

struct Counter;

impl SyncType for Counter {
    const TYPE_NAME: &'static str = "counter";
    fn properties() -> Vec<PropertySpec> {
        vec![PropertySpec::new("value", 0i32)]
    }
}

fn main() {
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    let network = SimulationConfig {
        latency_ms: 40.0,
        jitter_ms: 10.0,
        ..SimulationConfig::default()
    };
    let table = RoutingTable::default();

    let server_cfg = ServerConfig::with_context(0usize).on_connect(|ep, peers_seen| {
        *peers_seen += 1;
        log::info!("`on_connect` callback called for {:?} ({} so far)", ep.id(), peers_seen);
        ep.add_feature::<LatencyMeter>();
        let sync = ep.add_feature::<SyncManager>();
        sync.register::<Counter>();
        sync.on_remote_create().subscribe(|entity| {
            log::info!("server mirrors {} {}", entity.type_name(), entity.id());
        });
    });
    let mut server = Server::with_config(
        NetworkSimulator::with_config(SERVER_PORT, table.clone(), network),
        server_cfg,
    );
    server.start().unwrap();

    let endpoint_cfg = EndpointConfig::new()
        .latency(LatencyConfig::new().interval(0.5).side(MeasureSide::Client));
    let client_cfg = ClientConfig::new()
        .endpoint(endpoint_cfg)
        .on_state_change(|from, to, _| {
            log::info!("client went from {from:?} to {to:?}");
        });
    let mut client = Client::with_config(
        NetworkSimulator::with_config(CLIENT_PORT, table, network),
        SocketAddr::from(([127, 0, 0, 1], SERVER_PORT)),
        client_cfg,
    );
    let meter = client.endpoint().add_feature::<LatencyMeter>();
    let sync = client.endpoint().add_feature::<SyncManager>();
    client.endpoint().add_feature::<Reconnector>();
    client.start().unwrap();
    client.connect().unwrap();

    let tick_rate = 1.0 / 60.0;
    let mut time = 0.0;
    let mut counter = None;
    let mut next_bump = 1.0;
    while time < 10.0 {
        client.update(time);
        server.update(time);

        if client.state() == ClientState::Connected && time >= next_bump {
            next_bump += 1.0;
            if counter.is_none() {
                counter = sync.create::<Counter>().ok();
            }
            if let Some(ref counter) = counter {
                let value = counter.get(0).and_then(|v| v.as_i32()).unwrap_or(0) + 1;
                counter.set(0, value).unwrap();
            }
        }
        time += tick_rate;
    }

    let stats = meter.stats();
    println!(
        "{} samples: current {:.1}ms, min {:.1}ms, max {:.1}ms, average {:.1}ms",
        stats.samples,
        stats.current * 1000.0,
        stats.min * 1000.0,
        stats.max * 1000.0,
        stats.average() * 1000.0
    );
    if let Some((peer, ep)) = server.iter_peers().next() {
        let mirrored = ep
            .feature::<SyncManager>()
            .and_then(|sync| sync.entities().first().cloned());
        if let Some(entity) = mirrored {
            println!("{peer} sees counter at {:?}", entity.get_by_name("value"));
        }
        println!(
            "{peer} received {} bytes and sent {} bytes",
            ep.bytes_received(),
            ep.bytes_sent()
        );
    }

    client.stop();
    server.stop();
}

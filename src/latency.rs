use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    bytes::Bytes,
    consts::{DEFAULT_LATENCY_INTERVAL_SEC, DEFAULT_REQUEST_TIMEOUT_SEC, LATENCY_PROBE_KIND},
    endpoint::Endpoint,
    error::{Error, Result},
    feature::{Feature, Installable},
    link::{Link, Side},
    request::{Payload, Request, RequestManager, Response},
    utils::lock,
};

/// Which side of a connection runs the periodic measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureSide {
    Client,
    Server,
    Both,
}

impl MeasureSide {
    fn allows(self, side: Side) -> bool {
        matches!(
            (self, side),
            (MeasureSide::Both, _)
                | (MeasureSide::Client, Side::Client)
                | (MeasureSide::Server, Side::Server)
        )
    }
}

/// Configuration for the [`LatencyMeter`].
///
/// * `interval` - Seconds between unattended measurements. Zero or less turns the timer off.
/// * `side` - The side that measures. The other side only echoes probes.
/// * `timeout` - How long a probe may stay unanswered.
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    interval: f64,
    side: MeasureSide,
    timeout: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_LATENCY_INTERVAL_SEC,
            side: MeasureSide::Client,
            timeout: DEFAULT_REQUEST_TIMEOUT_SEC,
        }
    }
}

impl LatencyConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn interval(mut self, secs: f64) -> Self {
        self.interval = secs;
        self
    }
    pub fn side(mut self, side: MeasureSide) -> Self {
        self.side = side;
        self
    }
    pub fn timeout(mut self, secs: f64) -> Self {
        self.timeout = secs;
        self
    }
    pub fn interval_secs(&self) -> f64 {
        self.interval
    }
    pub fn measure_side(&self) -> MeasureSide {
        self.side
    }
    pub fn timeout_secs(&self) -> f64 {
        self.timeout
    }
}

/// The probe echoed back by the remote side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyProbe {
    pub sent_at: f64,
}

impl Bytes for LatencyProbe {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        writer.write_f64::<LittleEndian>(self.sent_at)
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> io::Result<Self> {
        Ok(Self {
            sent_at: reader.read_f64::<LittleEndian>()?,
        })
    }
}

impl Payload for LatencyProbe {
    const KIND: u16 = LATENCY_PROBE_KIND;
}

/// Running round-trip statistics. Only the extremes are kept, so the average is the midpoint of `min` and
/// `max` rather than a true mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub samples: u64,
    pub current: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencyStats {
    pub fn average(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    fn record(&mut self, round_trip: f64) {
        if self.samples == 0 {
            self.min = round_trip;
            self.max = round_trip;
        } else {
            self.min = self.min.min(round_trip);
            self.max = self.max.max(round_trip);
        }
        self.current = round_trip;
        self.samples += 1;
    }
}

/// One completed measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub sent_at: f64,
    pub received_at: f64,
    pub round_trip: f64,
    /// Statistics after this sample was recorded.
    pub stats: LatencyStats,
}

/// Periodic round-trip measurement on top of the [`RequestManager`].
pub struct LatencyMeter {
    link: Arc<Link>,
    requests: Arc<RequestManager>,
    cfg: LatencyConfig,
    enabled: AtomicBool,
    stats: Arc<Mutex<LatencyStats>>,
    next_at: Mutex<Option<f64>>,
}

impl LatencyMeter {
    pub fn new(link: Arc<Link>, requests: Arc<RequestManager>, cfg: LatencyConfig) -> Self {
        Self {
            link,
            requests,
            cfg,
            enabled: AtomicBool::new(false),
            stats: Arc::new(Mutex::new(LatencyStats::default())),
            next_at: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> LatencyStats {
        *lock(&self.stats)
    }

    /// Whether the periodic timer is running.
    pub fn is_measuring(&self) -> bool {
        lock(&self.next_at).is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Sends one probe. `callback` receives the sample, or `None` if the probe failed or timed out.
    pub fn measure<F>(&self, callback: F) -> Result<u16>
    where
        F: FnOnce(Option<LatencySample>) + Send + 'static,
    {
        if !self.is_enabled() {
            return Err(Error::FeatureDisabled(Self::NAME));
        }
        let stats = self.stats.clone();
        let probe = LatencyProbe {
            sent_at: self.link.time(),
        };
        self.requests.send_with_timeout(
            &probe,
            self.cfg.timeout,
            move |response: Response<LatencyProbe>| {
                let Some(received_at) = response.received_at.filter(|_| response.is_ok()) else {
                    log::debug!(
                        "latency probe {} finished with {:?}",
                        response.id,
                        response.status
                    );
                    callback(None);
                    return;
                };
                let round_trip = received_at - response.sent_at;
                let stats = {
                    let mut stats = lock(&stats);
                    stats.record(round_trip);
                    *stats
                };
                log::trace!(
                    "round trip {:.1}ms (min {:.1}ms, max {:.1}ms)",
                    round_trip * 1000.0,
                    stats.min * 1000.0,
                    stats.max * 1000.0
                );
                callback(Some(LatencySample {
                    sent_at: response.sent_at,
                    received_at,
                    round_trip,
                    stats,
                }));
            },
        )
    }
}

impl Feature for LatencyMeter {
    fn on_enable(&self, ep: &Endpoint) {
        self.requests
            .register_responder(|req: &Request<LatencyProbe>| Ok(Some(*req.payload())));
        self.enabled.store(true, Ordering::Release);
        if !self.cfg.side.allows(ep.side()) {
            log::debug!(
                "latency measurement runs on {:?}, only echoing on {:?}",
                self.cfg.side,
                ep.side()
            );
            return;
        }
        if self.cfg.interval > 0.0 {
            *lock(&self.next_at) = Some(ep.time());
        }
    }

    fn on_disable(&self, _ep: &Endpoint) {
        self.enabled.store(false, Ordering::Release);
        lock(&self.next_at).take();
        self.requests.unregister_handler::<LatencyProbe>();
    }

    fn update(&self, ep: &Endpoint, time: f64) {
        if !ep.is_connected() {
            return;
        }
        {
            let mut next_at = lock(&self.next_at);
            match *next_at {
                Some(at) if time >= at => *next_at = Some(time + self.cfg.interval),
                _ => return,
            }
        }
        if let Err(e) = self.measure(|_| {}) {
            log::warn!("latency probe not sent: {e}");
        }
    }
}

impl Installable for LatencyMeter {
    const NAME: &'static str = "latency-meter";

    fn create(ep: &Endpoint) -> Self {
        Self::new(
            ep.link().clone(),
            ep.add_feature::<RequestManager>(),
            ep.config().latency_config().clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EndpointConfig, Outgoing};

    fn endpoint(side: Side, cfg: LatencyConfig) -> (Endpoint, Arc<LatencyMeter>) {
        let ep = Endpoint::new(None, side, EndpointConfig::new().latency(cfg));
        let meter = ep.add_feature::<LatencyMeter>();
        ep.start(0.0);
        ep.set_connected(true);
        (ep, meter)
    }

    fn pump(from: &Endpoint, to: &Endpoint) -> usize {
        let mut n = 0;
        for outgoing in from.drain_outgoing() {
            if let Outgoing::Message(msg) = outgoing {
                to.receive(&msg);
                n += 1;
            }
        }
        n
    }

    #[test]
    fn average_is_the_midpoint_of_the_extremes() {
        let mut stats = LatencyStats::default();
        for rtt in [0.1, 0.4, 0.3] {
            stats.record(rtt);
        }
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.current, 0.3);
        assert_eq!(stats.min, 0.1);
        assert_eq!(stats.max, 0.4);
        assert!((stats.average() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn installs_the_request_manager_it_needs() {
        let (ep, _) = endpoint(Side::Client, LatencyConfig::new());
        assert!(ep.has_feature::<RequestManager>());
    }

    #[test]
    fn measure_records_a_positive_round_trip() {
        let (client, meter) = endpoint(Side::Client, LatencyConfig::new().interval(0.0));
        let (server, _) = endpoint(Side::Server, LatencyConfig::new().interval(0.0));
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            meter
                .measure(move |sample| *seen.lock().unwrap() = sample)
                .unwrap();
        }
        client.update(0.05);
        server.update(0.05);
        assert_eq!(pump(&client, &server), 1);
        assert_eq!(pump(&server, &client), 1);
        client.update(0.1);
        client.update(0.3);

        let sample = seen.lock().unwrap().expect("sample");
        assert!(sample.round_trip > 0.0);
        assert_eq!(meter.stats().samples, 1);
        assert_eq!(meter.stats().current, sample.round_trip);
    }

    #[test]
    fn timer_fires_only_on_the_measuring_side() {
        let cfg = LatencyConfig::new().interval(0.5).side(MeasureSide::Server);
        let (client, client_meter) = endpoint(Side::Client, cfg.clone());
        let (server, server_meter) = endpoint(Side::Server, cfg);
        assert!(!client_meter.is_measuring());
        assert!(server_meter.is_measuring());

        client.update(0.1);
        server.update(0.1);
        assert!(client.drain_outgoing().is_empty());
        assert_eq!(server.drain_outgoing().len(), 1);

        // the next probe waits a full interval
        server.update(0.3);
        assert!(server.drain_outgoing().is_empty());
        server.update(0.6);
        assert_eq!(server.drain_outgoing().len(), 1);
    }

    #[test]
    fn disable_cancels_the_timer_and_removes_the_echo() {
        let (ep, meter) = endpoint(Side::Client, LatencyConfig::new());
        assert!(meter.is_measuring());
        assert!(ep.feature::<RequestManager>().unwrap().has_handler::<LatencyProbe>());
        ep.disable_feature::<LatencyMeter>();
        ep.disable_feature::<LatencyMeter>();
        assert!(!meter.is_measuring());
        assert!(!ep.feature::<RequestManager>().unwrap().has_handler::<LatencyProbe>());
        ep.update(5.0);
        assert!(ep.drain_outgoing().is_empty());
    }

    #[test]
    fn measure_is_refused_while_disabled() {
        let (ep, meter) = endpoint(Side::Client, LatencyConfig::new().interval(0.0));
        assert!(meter.is_enabled());
        ep.disable_feature::<LatencyMeter>();
        assert!(!meter.is_enabled());
        assert!(matches!(
            meter.measure(|_| {}),
            Err(Error::FeatureDisabled("latency-meter"))
        ));
        assert!(ep.drain_outgoing().is_empty());

        ep.enable_feature::<LatencyMeter>();
        meter.measure(|_| {}).unwrap();
        assert_eq!(ep.drain_outgoing().len(), 1);
    }

    #[test]
    fn unanswered_probe_reports_none() {
        let (client, meter) = endpoint(Side::Client, LatencyConfig::new().interval(0.0).timeout(1.0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            meter
                .measure(move |sample| seen.lock().unwrap().push(sample))
                .unwrap();
        }
        client.drain_outgoing();
        client.update(0.5);
        client.update(1.2);
        assert_eq!(*seen.lock().unwrap(), vec![None]);
        assert_eq!(meter.stats().samples, 0);
    }
}

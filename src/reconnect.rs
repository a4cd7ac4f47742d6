//! Automatic reconnection for clients.
//!
//! The reconnector is a tick-driven state machine. After an unexpected disconnect it asks the client to
//! connect again at most once per attempt interval. After `max_attempts` failures it sits out a long
//! cooldown, then resumes with a larger delay between attempts. Once the delay passes its ceiling the
//! reconnector disables itself for good.

use std::sync::{Arc, Mutex};

use crate::{
    consts::{
        DEFAULT_RECONNECT_COOLDOWN_SEC, DEFAULT_RECONNECT_DELAY_CEILING_SEC,
        DEFAULT_RECONNECT_DELAY_STEP_SEC, DEFAULT_RECONNECT_INTERVAL_SEC,
        DEFAULT_RECONNECT_MAX_ATTEMPTS,
    },
    endpoint::Endpoint,
    events::LifecycleEvent,
    feature::{Feature, Installable},
    link::{Link, Side},
    utils::lock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconnectState {
    /// Idle. The connection is up or was closed on purpose.
    Connected,
    /// Due to make an attempt.
    Reconnecting,
    /// Waiting out the interval after an attempt.
    Cooldown,
    /// Waiting out the long cooldown after `max_attempts` failures.
    CooldownFailure,
}

/// Configuration for the [`Reconnector`].
///
/// * `interval` - Minimum seconds between two attempts.
/// * `max_attempts` - Attempts per cycle before the long cooldown.
/// * `cooldown` - Length of the long cooldown in seconds.
/// * `delay_step` - Added to the delay between attempts after every long cooldown.
/// * `delay_ceiling` - The reconnector gives up once the delay exceeds this.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    interval: f64,
    max_attempts: u32,
    cooldown: f64,
    delay_step: f64,
    delay_ceiling: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL_SEC,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            cooldown: DEFAULT_RECONNECT_COOLDOWN_SEC,
            delay_step: DEFAULT_RECONNECT_DELAY_STEP_SEC,
            delay_ceiling: DEFAULT_RECONNECT_DELAY_CEILING_SEC,
        }
    }
}

impl ReconnectConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn interval(mut self, secs: f64) -> Self {
        self.interval = secs;
        self
    }
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
    pub fn cooldown(mut self, secs: f64) -> Self {
        self.cooldown = secs;
        self
    }
    pub fn delay_step(mut self, secs: f64) -> Self {
        self.delay_step = secs;
        self
    }
    pub fn delay_ceiling(mut self, secs: f64) -> Self {
        self.delay_ceiling = secs;
        self
    }
}

struct Machine {
    state: ReconnectState,
    active: bool,
    attempts: u32,
    delay: f64,
    next_attempt: f64,
    cooldown_until: f64,
    announce_reconnected: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            state: ReconnectState::Connected,
            active: false,
            attempts: 0,
            delay: 0.0,
            next_attempt: 0.0,
            cooldown_until: 0.0,
            announce_reconnected: false,
        }
    }
}

enum Step {
    Idle,
    Attempt(u32),
    GiveUp,
}

pub struct Reconnector {
    link: Arc<Link>,
    cfg: ReconnectConfig,
    machine: Mutex<Machine>,
}

impl Reconnector {
    pub fn new(link: Arc<Link>, cfg: ReconnectConfig) -> Self {
        Self {
            link,
            cfg,
            machine: Mutex::new(Machine::default()),
        }
    }

    pub fn state(&self) -> ReconnectState {
        lock(&self.machine).state
    }
    pub fn attempts(&self) -> u32 {
        lock(&self.machine).attempts
    }
    /// The extra delay currently added to the attempt interval.
    pub fn delay(&self) -> f64 {
        lock(&self.machine).delay
    }
    pub fn is_active(&self) -> bool {
        lock(&self.machine).active
    }

    /// Starts a reconnection cycle with the first attempt due at `time`. An active cycle is stopped first.
    pub fn start(&self, time: f64) {
        if self.link.side() != Side::Client {
            log::warn!("reconnector only runs on clients");
            return;
        }
        if self.is_active() {
            self.stop();
        }
        let mut machine = lock(&self.machine);
        machine.active = true;
        machine.state = ReconnectState::Reconnecting;
        machine.next_attempt = time;
        log::info!("connection lost, reconnecting");
    }

    /// Stops the cycle and clears every counter.
    pub fn stop(&self) {
        let announce = lock(&self.machine).announce_reconnected;
        *lock(&self.machine) = Machine {
            announce_reconnected: announce,
            ..Machine::default()
        };
    }

    fn step(&self, time: f64) -> Step {
        let mut machine = lock(&self.machine);
        if !machine.active {
            return Step::Idle;
        }
        match machine.state {
            ReconnectState::Connected => Step::Idle,
            ReconnectState::Reconnecting | ReconnectState::Cooldown => {
                if time < machine.next_attempt {
                    return Step::Idle;
                }
                machine.attempts += 1;
                let attempt = machine.attempts;
                if attempt >= self.cfg.max_attempts {
                    machine.state = ReconnectState::CooldownFailure;
                    machine.cooldown_until = time + self.cfg.cooldown;
                    machine.attempts = 0;
                    log::info!(
                        "{attempt} reconnection attempts failed, cooling down for {:.1}s",
                        self.cfg.cooldown
                    );
                } else {
                    machine.state = ReconnectState::Cooldown;
                    machine.next_attempt = time + self.cfg.interval + machine.delay;
                }
                Step::Attempt(attempt)
            }
            ReconnectState::CooldownFailure => {
                if time < machine.cooldown_until {
                    return Step::Idle;
                }
                let delay = machine.delay + self.cfg.delay_step;
                if delay > self.cfg.delay_ceiling {
                    machine.active = false;
                    return Step::GiveUp;
                }
                machine.delay = delay;
                log::debug!("cooldown over, attempt delay is now {:.1}s", machine.delay);
                machine.state = ReconnectState::Reconnecting;
                machine.next_attempt = time;
                Step::Idle
            }
        }
    }
}

impl Feature for Reconnector {
    fn is_priority(&self) -> bool {
        true
    }

    fn on_enable(&self, ep: &Endpoint) {
        if ep.side() != Side::Client {
            log::warn!("reconnector installed on a server endpoint, it will stay idle");
        }
    }

    fn on_disable(&self, _ep: &Endpoint) {
        self.stop();
        lock(&self.machine).announce_reconnected = false;
    }

    fn on_event(&self, ep: &Endpoint, event: &LifecycleEvent) {
        if ep.side() != Side::Client {
            return;
        }
        match event {
            LifecycleEvent::Disconnected(_, reason) if reason.should_reconnect => {
                if !self.is_active() {
                    self.start(ep.time());
                }
            }
            LifecycleEvent::Connected(_) => {
                let was_active = self.is_active();
                self.stop();
                if was_active {
                    lock(&self.machine).announce_reconnected = true;
                }
            }
            _ => {}
        }
    }

    fn update(&self, ep: &Endpoint, time: f64) {
        let announce = std::mem::take(&mut lock(&self.machine).announce_reconnected);
        if announce {
            log::info!("reconnected");
            ep.emit(LifecycleEvent::Reconnected);
        }
        match self.step(time) {
            Step::Idle => {}
            Step::Attempt(attempt) => {
                log::debug!("reconnection attempt {attempt}");
                self.link.request_connect();
                ep.emit(LifecycleEvent::Reconnecting { attempt });
            }
            Step::GiveUp => {
                log::info!("giving up on reconnection");
                ep.emit(LifecycleEvent::ReconnectionFailed);
                ep.disable_feature::<Reconnector>();
            }
        }
    }
}

impl Installable for Reconnector {
    const NAME: &'static str = "reconnector";

    fn create(ep: &Endpoint) -> Self {
        Self::new(ep.link().clone(), ep.config().reconnect_config().clone())
    }
}

pub const PROTOCOL_VERSION: u8 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
pub const MAX_STRING_SIZE: usize = u16::MAX as usize;

pub const DEFAULT_SWEEP_INTERVAL_SEC: f64 = 0.2;
pub const DEFAULT_REQUEST_TIMEOUT_SEC: f64 = 5.0;

pub const DEFAULT_LATENCY_INTERVAL_SEC: f64 = 1.0;

pub const DEFAULT_RECONNECT_INTERVAL_SEC: f64 = 2.5;
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_COOLDOWN_SEC: f64 = 60.0;
pub const DEFAULT_RECONNECT_DELAY_STEP_SEC: f64 = 5.0;
pub const DEFAULT_RECONNECT_DELAY_CEILING_SEC: f64 = 60.0;

pub const DEFAULT_SYNC_ID_CAPACITY: u16 = 256;

/// Payload kinds at or above this value are reserved for built-in features.
pub const RESERVED_PAYLOAD_KIND_START: u16 = 0xFF00;
pub(crate) const LATENCY_PROBE_KIND: u16 = 0xFF01;

//! A feature-based session layer for client/server networking.
//!
//! A [`Client`] or [`Server`] drives one [`Endpoint`] per connection over any transport implementing
//! [`Bridge`]. Behavior is attached to an endpoint as pluggable [`Feature`]s:
//!
//! * [`RequestManager`] - correlated request/response messaging with timeouts.
//! * [`LatencyMeter`] - periodic round-trip measurements on top of the request manager.
//! * [`Reconnector`] - client-side reconnection with backoff and cooldown.
//! * [`SyncManager`] - replicated entities whose property changes are sent as deltas.
//!
//! Everything is driven by calling `update(time)` on the controller at a fixed rate.
mod bridge;
mod bytes;
mod client;
mod consts;
mod endpoint;
mod error;
mod events;
mod feature;
mod free_list;
mod latency;
mod link;
mod protocol;
mod reconnect;
mod request;
mod server;
mod sync;
mod utils;
mod value;

pub mod simulator;

pub use bridge::{Bridge, BridgeEvent, DisconnectReason, PeerId};
pub use bytes::Bytes;
pub use client::{Client, ClientConfig, ClientState};
pub use consts::{
    DEFAULT_LATENCY_INTERVAL_SEC, DEFAULT_RECONNECT_COOLDOWN_SEC,
    DEFAULT_RECONNECT_DELAY_CEILING_SEC, DEFAULT_RECONNECT_DELAY_STEP_SEC,
    DEFAULT_RECONNECT_INTERVAL_SEC, DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SEC,
    DEFAULT_SWEEP_INTERVAL_SEC, DEFAULT_SYNC_ID_CAPACITY, MAX_MESSAGE_SIZE, MAX_STRING_SIZE,
    PROTOCOL_VERSION, RESERVED_PAYLOAD_KIND_START,
};
pub use endpoint::{Endpoint, EndpointConfig};
pub use error::{Error, HandlerError, Result};
pub use events::{LifecycleEvent, ObserverId, Observers};
pub use feature::{Feature, FeatureManager, FeatureState, Installable};
pub use latency::{LatencyConfig, LatencyMeter, LatencyProbe, LatencySample, LatencyStats, MeasureSide};
pub use link::{Link, Outgoing, Side};
pub use protocol::{MessageKind, ResponseStatus};
pub use reconnect::{ReconnectConfig, ReconnectState, Reconnector};
pub use request::{Payload, Request, RequestConfig, RequestManager, Responder, Response};
pub use server::{Server, ServerConfig};
pub use sync::{PropertySpec, SyncConfig, SyncManager, SyncType, SyncedEntity};
pub use value::{DataPack, Value, ValueKind};

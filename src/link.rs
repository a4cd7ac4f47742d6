use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use crate::{
    bridge::{DisconnectReason, PeerId},
    bytes::Bytes,
    error::Result,
    protocol::{self, MessageKind},
    utils::lock,
};

/// Which end of a connection an endpoint represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

/// Work queued by an endpoint for its controller to carry out on the next update.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Message(Vec<u8>),
    Connect,
    Disconnect(DisconnectReason),
}

/// The sending half of an endpoint, shared with every feature installed on it.
///
/// All outbound traffic is funnelled through one FIFO queue, so messages leave in the order they were
/// produced regardless of which thread produced them.
#[derive(Debug)]
pub struct Link {
    id: Option<PeerId>,
    side: Side,
    time: AtomicU64,
    outbox: Mutex<VecDeque<Outgoing>>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Link {
    pub(crate) fn new(id: Option<PeerId>, side: Side) -> Self {
        Self {
            id,
            side,
            time: AtomicU64::new(0f64.to_bits()),
            outbox: Mutex::new(VecDeque::new()),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }
    /// The id of the owning endpoint. A lone client has none.
    pub fn id(&self) -> Option<PeerId> {
        self.id
    }
    pub fn side(&self) -> Side {
        self.side
    }
    /// The time passed to the last `update` of the owning endpoint.
    pub fn time(&self) -> f64 {
        f64::from_bits(self.time.load(Ordering::Acquire))
    }
    pub(crate) fn set_time(&self, time: f64) {
        self.time.store(time.to_bits(), Ordering::Release);
    }
    /// Encodes `body` behind `kind` and queues it for transmission.
    pub fn send(&self, kind: MessageKind, body: &impl Bytes) -> Result<()> {
        let msg = protocol::encode(kind, body)?;
        log::trace!("queued {:?} message ({} bytes)", kind, msg.len());
        self.push(Outgoing::Message(msg));
        Ok(())
    }
    /// Asks the owning controller to (re)connect to its target.
    pub fn request_connect(&self) {
        self.push(Outgoing::Connect);
    }
    /// Asks the owning controller to drop the connection.
    pub fn request_disconnect(&self, reason: DisconnectReason) {
        self.push(Outgoing::Disconnect(reason));
    }
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
    pub(crate) fn record_sent(&self, len: usize) {
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }
    pub(crate) fn record_received(&self, len: usize) {
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }
    pub(crate) fn drain(&self) -> Vec<Outgoing> {
        lock(&self.outbox).drain(..).collect()
    }
    pub(crate) fn clear(&self) {
        lock(&self.outbox).clear();
    }
    fn push(&self, outgoing: Outgoing) {
        lock(&self.outbox).push_back(outgoing);
    }
}

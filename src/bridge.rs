use std::{fmt, io, net::SocketAddr};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::{bytes::Bytes, error::Error};

/// Identifies one remote endpoint as seen by a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer {}", self.0)
    }
}

/// Why a connection ended, and whether the client should try to get it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub message: String,
    pub should_reconnect: bool,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>, should_reconnect: bool) -> Self {
        Self {
            message: message.into(),
            should_reconnect,
        }
    }
    /// A deliberate disconnect that must not trigger reconnection.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(message, false)
    }
    /// A connection loss the client is expected to recover from.
    pub fn lost(message: impl Into<String>) -> Self {
        Self::new(message, true)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (reconnect: {})", self.message, self.should_reconnect)
    }
}

impl Bytes for DisconnectReason {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        self.message.write_to(writer)?;
        writer.write_u8(self.should_reconnect as u8)
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let message = String::read_from(reader)?;
        let should_reconnect = reader.read_u8()? != 0;
        Ok(Self {
            message,
            should_reconnect,
        })
    }
}

/// An endpoint-level event raised by a bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Connected(PeerId),
    Disconnected(PeerId, DisconnectReason),
    Data(PeerId, Vec<u8>),
}

/// A uniform interface over one transport flavor.
///
/// Both the [`Client`](crate::Client) and the [`Server`](crate::Server) use a statically dispatched generic
/// type `B: Bridge`, which allows any stream socket, reliable-UDP library or in-memory pipe to carry the
/// session protocol. The bridge is expected to deliver the payloads of one peer reliably and in order.
///
/// See [`NetworkSimulator`](crate::simulator::NetworkSimulator) for an in-memory implementation.
pub trait Bridge {
    type IntoError: Into<Error>;
    /// Returns the local address of the bridge (i.e. the address it is bound to).
    fn addr(&self) -> SocketAddr;
    /// Begins accepting connections and processing I/O.
    fn start(&mut self) -> Result<(), Self::IntoError> {
        Ok(())
    }
    /// Stops all I/O. Connections are dropped without notifying the remote side.
    fn stop(&mut self) {}
    /// Starts connecting to `target`.
    ///
    /// Should **NOT** block. The outcome is reported later as a [`BridgeEvent`].
    fn connect(&mut self, target: SocketAddr) -> Result<(), Self::IntoError>;
    /// Closes the connection to `peer`, handing `reason` to the remote side.
    fn disconnect(&mut self, peer: PeerId, reason: &DisconnectReason)
        -> Result<(), Self::IntoError>;
    /// Sends one message to `peer`.
    ///
    /// Should **NOT** block if the message cannot be sent.
    fn send(&mut self, peer: PeerId, payload: &[u8]) -> Result<usize, Self::IntoError>;
    /// Advances the transport clock and performs pending I/O.
    fn tick(&mut self, time: f64) -> Result<(), Self::IntoError>;
    /// Returns the next event raised since the last call, if any.
    fn poll(&mut self) -> Option<BridgeEvent>;
}

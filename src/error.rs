use thiserror::Error;

use crate::bridge::PeerId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Malformed(std::io::Error),
    #[error("unknown message kind {0:#04x}")]
    UnknownMessageKind(u8),
    #[error("message size exceeded, got {0} bytes")]
    MessageSizeExceeded(usize),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("endpoint is not connected")]
    NotConnected,
    #[error("tried to reach a peer that doesn't exist: {0}")]
    PeerNotFound(PeerId),
    #[error("feature `{0}` is not installed")]
    FeatureMissing(&'static str),
    #[error("feature `{0}` is not enabled")]
    FeatureDisabled(&'static str),
    #[error("every correlation id is held by a pending request")]
    RequestIdsExhausted,
    #[error("synchronized entity id pool is exhausted")]
    IdPoolExhausted,
    #[error("synchronized type `{0}` is not registered")]
    UnknownSyncType(String),
    #[error("synchronized entity {0} has been destroyed")]
    EntityDestroyed(u16),
    #[error("synchronized entity {parent} has no property `{name}`")]
    UnknownProperty { parent: u16, name: String },
    #[error("property index {index} is out of range for entity {parent}")]
    PropertyOutOfRange { parent: u16, index: u8 },
    #[error("property {index} of entity {parent} holds {expected:?}, got {got:?}")]
    ValueKindMismatch {
        parent: u16,
        index: u8,
        expected: crate::ValueKind,
        got: crate::ValueKind,
    },
}

/// Failure reported by a user-registered request handler.
///
/// Handler failures are logged at the call site and never cross the feature boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

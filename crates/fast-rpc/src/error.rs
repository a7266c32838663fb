//! Error types for the Fast protocol.

use crate::packet::PacketId;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Fast protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Fast protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-related errors.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Codec errors during serialization/deserialization.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The remote endpoint reported that the call failed.
    #[error("Remote fault: {0}")]
    Remote(String),

    /// The call did not complete within its timeout.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error means the connection is gone.
    #[must_use]
    pub const fn is_connection_closed(&self) -> bool {
        matches!(self, Self::Connection(ConnectionError::Closed))
    }
}

/// Connection-specific errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection is closed or the session has been disposed.
    #[error("Connection closed")]
    Closed,

    /// The transport refused the frame.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid frame received.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame too large.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// API name does not fit the length prefix.
    #[error("API name length {len} exceeds maximum {max}")]
    ApiNameTooLong {
        /// Length of the API name in bytes.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A boolean flag byte was neither 0 nor 1.
    #[error("Invalid value {value:#04x} for flag {field}")]
    InvalidFlag {
        /// Name of the flag.
        field: &'static str,
        /// The byte found on the wire.
        value: u8,
    },

    /// A pending call is already registered under this id.
    #[error("Packet id {0} is already pending")]
    DuplicateId(PacketId),
}

/// Codec-related errors.
#[derive(Clone, Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),
}

/// Errors produced by the local dispatch collaborator.
///
/// The display text of a dispatch error becomes the fault description sent
/// back to the caller in a `success=false` response.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No API registered under this name.
    #[error("No API registered with name: {0}")]
    NotFound(String),

    /// An API with this name is already registered.
    #[error("API already registered with name: {0}")]
    AlreadyRegistered(String),

    /// The API ran and failed.
    #[error("{0}")]
    Failed(String),

    /// Arguments or return value could not be converted.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DispatchError {
    /// Create a failure with the given description.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

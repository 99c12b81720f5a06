//! Error types for iproto-client.

use std::fmt;

use thiserror::Error;

/// Server error code for a request or response that is not valid msgpack.
pub const ER_INVALID_MSGPACK: u32 = 0x14;

/// Server error code reported when there is no usable connection.
pub const ER_NO_CONNECTION: u32 = 0x4d;

/// Server error code reported when a call times out.
pub const ER_TIMEOUT: u32 = 0x4e;

/// Main error type for all iproto operations.
#[derive(Debug, Error)]
pub enum IprotoError {
    /// The query could not be serialized. Never reaches the network.
    #[error("Encode error: {0}")]
    Encode(String),

    /// MsgPack serialization error from a typed value.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame (wrong marker, zero length, bad header map).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Response body did not match the expected schema.
    #[error("Decode error: {0}")]
    Decode(String),

    /// MsgPack deserialization error into a typed value.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Deadline elapsed before the call completed.
    #[error("{0} timeout")]
    Timeout(&'static str),

    /// Operation issued against, or interrupted by, a torn-down connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Error reply sent by the server.
    #[error("Server error {code:#x}: {message}")]
    Server { code: u32, message: String },
}

/// Coarse classification of an [`IprotoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LocalEncoding,
    Transport,
    Protocol,
    Decoding,
    Timeout,
    ConnectionClosed,
    Server,
}

impl IprotoError {
    pub(crate) fn encode(err: impl fmt::Display) -> Self {
        IprotoError::Encode(err.to_string())
    }

    pub(crate) fn decode(err: impl fmt::Display) -> Self {
        IprotoError::Decode(err.to_string())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IprotoError::Encode(_) | IprotoError::MsgPackEncode(_) => ErrorKind::LocalEncoding,
            IprotoError::Io(_) => ErrorKind::Transport,
            IprotoError::Protocol(_) => ErrorKind::Protocol,
            IprotoError::Decode(_) | IprotoError::MsgPackDecode(_) => ErrorKind::Decoding,
            IprotoError::Timeout(_) => ErrorKind::Timeout,
            IprotoError::ConnectionClosed => ErrorKind::ConnectionClosed,
            IprotoError::Server { .. } => ErrorKind::Server,
        }
    }

    /// Numeric error code in the server's error-code space.
    pub fn code(&self) -> u32 {
        match self {
            IprotoError::Server { code, .. } => *code,
            IprotoError::Timeout(_) => ER_TIMEOUT,
            _ => match self.kind() {
                ErrorKind::LocalEncoding | ErrorKind::Decoding => ER_INVALID_MSGPACK,
                _ => ER_NO_CONNECTION,
            },
        }
    }

    /// True for errors that tear down the whole connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::Protocol | ErrorKind::ConnectionClosed
        )
    }
}

/// Result type alias using IprotoError.
pub type Result<T> = std::result::Result<T, IprotoError>;

//! Error types
//!
//! [`Error`] is what every proxy operation returns. Upstream failures are
//! carried as [`UpstreamError`], which is cheap to clone so a single broker
//! failure can be handed to every subscriber of the affected channel.

use crate::message::{ChannelType, MessageKind};
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Status class of an upstream failure, gRPC style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Broker unreachable or connection lost
    Unavailable,
    /// Call cancelled
    Cancelled,
    /// Referenced object (channel, bus) does not exist
    NotFound,
    /// Request rejected as malformed
    InvalidArgument,
    /// Broker reported an internal failure
    Internal,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Unavailable => "unavailable",
            StatusCode::Cancelled => "cancelled",
            StatusCode::NotFound => "not found",
            StatusCode::InvalidArgument => "invalid argument",
            StatusCode::Internal => "internal",
            StatusCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Failure reported by the upstream broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    /// Status class
    pub code: StatusCode,
    /// Detail from the broker
    pub message: String,
}

impl UpstreamError {
    /// Create an upstream error
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Broker unreachable
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// A downstream stream could not accept a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    /// Why the write failed
    pub reason: String,
}

impl SendError {
    /// Create a send error
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The downstream peer has gone away
    pub fn disconnected() -> Self {
        Self::new("downstream disconnected")
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for SendError {}

/// Error type for proxy operations
#[derive(Debug)]
pub enum Error {
    /// The broker rejected a call or its stream failed
    Upstream(UpstreamError),
    /// Invalid registry request
    Registry(RegistryError),
    /// Subscriber queue stayed full past the send timeout and was evicted
    SlowConsumer {
        kind: MessageKind,
        channel_type: ChannelType,
    },
    /// Writing to the downstream stream failed
    Downstream(SendError),
    /// Operation is not supported by this proxy
    Unimplemented(&'static str),
    /// Node registration with the directory service failed
    Registration(String),
    /// I/O error
    Io(std::io::Error),
}

impl Error {
    /// Whether this error ends the process rather than a single call
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Registration(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Upstream(e) => write!(f, "Upstream error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::SlowConsumer { kind, channel_type } => write!(
                f,
                "Subscriber too slow on {} channel {}, disconnected",
                kind, channel_type
            ),
            Error::Downstream(e) => write!(f, "Downstream send failed: {}", e),
            Error::Unimplemented(op) => write!(f, "{} is not supported by the proxy", op),
            Error::Registration(msg) => write!(f, "Node registration failed: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Upstream(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Downstream(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UpstreamError> for Error {
    fn from(e: UpstreamError) -> Self {
        Error::Upstream(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        Error::Downstream(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

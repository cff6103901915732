//! Error types for routing and the server lifecycle.

use std::io;

use thiserror::Error;

use central_protocol::CodecError;

use crate::allocation::AllocationError;
use crate::transport::TransportError;

/// Failure reported by a route handler.
///
/// The dispatcher turns it into a failed response; its message is what the
/// peer sees after the `failed to process request: ` prefix.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Request content did not match the route's payload shape.
    #[error(transparent)]
    Content(#[from] CodecError),
    /// The allocation engine rejected the request.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// The handler result could not be serialised.
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
    /// Any other handler-specific failure.
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Creates a handler error from a plain message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Errors surfaced while routing a request.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No route matches the request type.
    #[error("no handler found for request type: {kind}")]
    UnknownRoute { kind: String },
    /// The matched handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Errors surfaced by the server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called on a server that is not stopped.
    #[error("server is already running")]
    AlreadyRunning,
    /// `stop` was called on a server that is not running.
    #[error("server is not running")]
    NotRunning,
    /// The transport endpoint could not be bound.
    #[error("failed to bind transport endpoint: {source}")]
    Bind {
        #[source]
        source: TransportError,
    },
    /// A dispatch thread could not be spawned.
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },
    /// A dispatch thread panicked outside message processing.
    #[error("{role} thread panicked")]
    ThreadPanic { role: &'static str },
}

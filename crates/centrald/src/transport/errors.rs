//! Error types for transport endpoints.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use central_protocol::framing::FrameError;

/// Errors surfaced while binding a socket endpoint.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix { endpoint: String },
    #[cfg(unix)]
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        path: String,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("existing unix socket {path} is already in use")]
    UnixInUse { path: String },
    #[cfg(unix)]
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket { path: String },
    #[cfg(unix)]
    #[error("failed to inspect existing unix socket {path}: {source}")]
    UnixProbe {
        path: String,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn accept thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced by a running endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be constructed.
    #[error(transparent)]
    Bind(#[from] ListenerError),
    /// The endpoint was closed.
    #[error("transport endpoint is closed")]
    Closed,
    /// An outbound message lacked a usable identity frame.
    #[error("outbound message has no valid identity frame")]
    MissingIdentity,
    /// No connected peer carries the identity.
    #[error("no connected peer with identity {identity}")]
    UnknownPeer { identity: String },
    /// Writing to the peer failed.
    #[error("failed to write to peer {identity}: {source}")]
    Write {
        identity: String,
        #[source]
        source: FrameError,
    },
    /// Shared endpoint state was poisoned by a panicking thread.
    #[error("transport state lock poisoned")]
    Poisoned,
}

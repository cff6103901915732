//! Identity-framed message endpoints.
//!
//! An endpoint multiplexes many remote peers behind one logical socket. Every
//! inbound message starts with an identity frame naming the peer it came
//! from; replies carry the same identity frame so the endpoint can route them
//! back. The dispatch engine only sees the [`Endpoint`] capability, so the
//! socket implementation and the in-memory one used by tests are
//! interchangeable.

mod errors;
mod memory;
mod socket;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use central_config::SocketEndpoint;
use central_protocol::framing::Frames;

pub use self::errors::{ListenerError, TransportError};
pub use self::memory::MemoryEndpoint;
pub use self::socket::SocketTransport;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Bidirectional, identity-addressed message channel.
///
/// `receive` is only ever called from the dispatch reader thread, while
/// `send` is called concurrently from every worker.
pub trait Endpoint: Send + Sync + 'static {
    /// Waits up to `timeout` for the next inbound message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A zero timeout polls
    /// without blocking.
    fn receive(&self, timeout: Duration) -> Result<Option<Frames>, TransportError>;

    /// Sends `frames` to the peer named by the first frame.
    fn send(&self, frames: Frames) -> Result<(), TransportError>;

    /// Releases the endpoint. Further sends fail with [`TransportError::Closed`].
    fn close(&self);
}

impl<T> Endpoint for Arc<T>
where
    T: Endpoint,
{
    fn receive(&self, timeout: Duration) -> Result<Option<Frames>, TransportError> {
        (**self).receive(timeout)
    }

    fn send(&self, frames: Frames) -> Result<(), TransportError> {
        (**self).send(frames)
    }

    fn close(&self) {
        (**self).close();
    }
}

/// Constructs an endpoint when the server starts.
pub trait EndpointBinder {
    /// Endpoint produced by a successful bind.
    type Endpoint: Endpoint;

    /// Binds the endpoint.
    fn bind(self) -> Result<Self::Endpoint, TransportError>;
}

impl EndpointBinder for &SocketEndpoint {
    type Endpoint = SocketTransport;

    fn bind(self) -> Result<Self::Endpoint, TransportError> {
        Ok(SocketTransport::bind(self)?)
    }
}

impl<T> EndpointBinder for Arc<T>
where
    T: Endpoint,
{
    type Endpoint = Arc<T>;

    fn bind(self) -> Result<Self::Endpoint, TransportError> {
        Ok(self)
    }
}

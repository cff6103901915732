//! Wire protocol shared by the central allocation server and its peers.
//!
//! A peer talks to the server by exchanging multipart messages over a stream
//! socket (see [`framing`]). The payload frame carries a JSON envelope: a
//! [`Request`] naming a route and carrying opaque `content`, answered by a
//! [`Response`] that echoes the request id and holds either a result or an
//! error string, never both.
//!
//! ```json
//! {"id":7,"type":"allocate","content":{"semester":"2025-1","faculty":"Medicina","programs":[]}}
//! {"id":7,"type":"allocate","success":true,"content":{"semester":"2025-1","faculty":"Medicina","programs":[]}}
//! {"id":8,"type":"bogus","success":false,"error":"failed to process request: no handler found for request type: bogus"}
//! ```
//!
//! The typed payloads for the built-in routes live in [`allocation`], and a
//! blocking [`Client`] wraps the whole exchange for callers that issue one
//! request at a time.

pub mod allocation;
mod client;
mod envelope;
pub mod framing;

pub use allocation::{
    AllocateRequest, AllocateResponse, ConfirmRequest, ConfirmResponse, ProgramAllocation,
    ProgramDemand,
};
pub use client::{Client, ClientError};
pub use envelope::{CodecError, Outcome, Request, RequestHeader, Response};

/// Route names understood by the server.
pub mod routes {
    /// Liveness probe; always answered with [`HEALTH_ACK`].
    pub const HEALTH_CHECK: &str = "health-check";
    /// Reserve rooms for a faculty's programs.
    pub const ALLOCATE: &str = "allocate";
    /// Accept or reject a previous allocation.
    pub const CONFIRM: &str = "confirm";
    /// Fixed payload returned by the health route.
    pub const HEALTH_ACK: &str = "OK";
}

//! Request dispatch.
//!
//! One reader thread moves identity-framed messages from the endpoint into a
//! zero-capacity queue; a pool of workers decodes each envelope, looks the
//! request type up in the [`RoutingTable`], runs the handler, and sends the
//! encoded response back under the same identity. Failures of any kind are
//! answered with a failed response rather than crossing the transport.

mod errors;
mod routing;
mod server;
mod worker;

pub use self::errors::{HandlerError, RouteError, ServerError};
pub use self::routing::{RouteHandler, RoutingTable, RoutingTableBuilder};
pub use self::server::{Server, ServerState};

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

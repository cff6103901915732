//! Central room-allocation server.
//!
//! Faculties ask the server for classrooms and laboratories for a semester
//! and later accept or release what they were given. Requests arrive as JSON
//! envelopes over a multiplexed, identity-framed transport configured through
//! [`central_config`]; one reader thread hands each message to a pool of
//! workers, which route it by request type and answer on the same identity.
//!
//! Every allocation runs in a single store transaction. A request either
//! claims all of the rooms it asks for or none of them, and two concurrent
//! requests never receive the same room. Allocation is deliberately not
//! idempotent: repeating a successful request claims a second set of rooms.
//!
//! Startup follows a fixed sequence, each step reported through
//! [`HealthReporter`]: load configuration, install telemetry, open the room
//! store, bind the endpoint, and start the dispatch engine. On a termination
//! signal the engine stops reading, answers everything already received, and
//! only then releases the endpoint.

pub mod allocation;
mod bootstrap;
pub mod dispatch;
pub mod handlers;
mod health;
mod process;
pub mod store;
mod telemetry;
pub mod transport;

pub use allocation::{AllocationEngine, AllocationError};
pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_server};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;

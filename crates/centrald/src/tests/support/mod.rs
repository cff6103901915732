//! Test harness utilities shared by the behavioural suites.

mod config_loader;
mod reporter;
mod shutdown;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use shutdown::ImmediateShutdown;

//! Shutdown signal that fires as soon as the server is listening.

use crate::process::{ShutdownError, ShutdownSignal};

/// Returns from `wait` immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateShutdown;

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        Ok(())
    }
}

//! Defines the unified error surface for server launch and supervision.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::dispatch::ServerError;
use crate::store::StoreError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the server failed.
    #[error("server bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The room store could not be opened or prepared.
    #[error("room store unavailable: {source}")]
    Store {
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// The dispatch engine failed to start or stop.
    #[error("dispatch engine failed: {source}")]
    Server {
        /// Underlying server error.
        #[source]
        source: ServerError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<StoreError> for LaunchError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

impl From<ServerError> for LaunchError {
    fn from(source: ServerError) -> Self {
        Self::Server { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

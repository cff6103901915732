//! Shared configuration for the central allocation server and its peers.
//!
//! Values are layered by [`ortho_config`]: defaults first, then an optional
//! configuration file, then `CENTRAL_*` environment variables, and finally
//! command-line flags. The server binary and the protocol client both read
//! the listening endpoint from here so they agree on where to meet.

mod defaults;
mod logging;
mod socket;
mod store;

use std::thread;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DATABASE_URL, DEFAULT_LOG_FILTER, DEFAULT_TCP_PORT, default_database_url,
    default_listen_endpoint, default_log_filter, default_log_filter_string, default_log_format,
    default_store_backend,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};
pub use store::{StoreBackend, StoreBackendParseError};

/// Resolved configuration for the central server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CENTRAL")]
pub struct Config {
    /// Endpoint the multiplexed transport listens on.
    #[ortho_config(default = default_listen_endpoint())]
    pub listen: SocketEndpoint,
    /// Worker thread count; zero selects the host parallelism.
    #[ortho_config(default = 0)]
    pub workers: usize,
    /// Postgres connection string for the room store.
    #[ortho_config(default = default_database_url())]
    pub database_url: String,
    /// Which room store backs the allocation engine.
    #[ortho_config(default = default_store_backend())]
    pub store: StoreBackend,
    /// Classrooms seeded into an empty store at startup.
    #[ortho_config(default = 0)]
    pub populate_classrooms: u32,
    /// Laboratories seeded into an empty store at startup.
    #[ortho_config(default = 0)]
    pub populate_laboratories: u32,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            workers: 0,
            database_url: default_database_url(),
            store: default_store_backend(),
            populate_classrooms: 0,
            populate_laboratories: 0,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Endpoint the server binds to.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Number of worker threads to spawn, resolving zero to the host
    /// parallelism.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    /// Connection string handed to the Postgres store.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Selected store backend.
    #[must_use]
    pub fn store(&self) -> StoreBackend {
        self.store
    }

    /// Number of classrooms and laboratories to seed into an empty store.
    #[must_use]
    pub fn populate(&self) -> (u32, u32) {
        (self.populate_classrooms, self.populate_laboratories)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

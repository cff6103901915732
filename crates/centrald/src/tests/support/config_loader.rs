//! Test configuration loaders covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};

use central_config::{Config, SocketEndpoint, StoreBackend};

use crate::bootstrap::ConfigLoader;

/// Loader for an in-memory store listening on an ephemeral loopback port.
#[derive(Debug, Clone)]
pub struct TestConfigLoader {
    listen: SocketEndpoint,
    workers: usize,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listen: SocketEndpoint::tcp("127.0.0.1", 0),
            workers: 2,
        }
    }

    /// Listens on `endpoint` instead of an ephemeral port.
    #[must_use]
    pub fn listening_on(mut self, endpoint: SocketEndpoint) -> Self {
        self.listen = endpoint;
        self
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            listen: self.listen.clone(),
            workers: self.workers,
            store: StoreBackend::Memory,
            populate_classrooms: 30,
            populate_laboratories: 5,
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an invalid listening endpoint.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("centrald"),
            OsString::from("--listen"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}

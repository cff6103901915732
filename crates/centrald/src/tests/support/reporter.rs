//! Test double for [`HealthReporter`] that records lifecycle events.

use std::sync::Mutex;

use central_config::{Config, SocketEndpoint, StoreBackend};

use crate::bootstrap::BootstrapError;
use crate::dispatch::ServerError;
use crate::health::HealthReporter;
use crate::store::StoreError;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    StoreOpening(StoreBackend),
    StoreReady(StoreBackend),
    StoreFailed(String),
    ServerListening { workers: usize },
    ServerFailed(String),
    ServerDraining,
    ServerStopped,
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn store_opening(&self, backend: StoreBackend) {
        self.record(HealthEvent::StoreOpening(backend));
    }

    fn store_ready(&self, backend: StoreBackend) {
        self.record(HealthEvent::StoreReady(backend));
    }

    fn store_failed(&self, error: &StoreError) {
        self.record(HealthEvent::StoreFailed(error.to_string()));
    }

    fn server_listening(&self, _endpoint: &SocketEndpoint, workers: usize) {
        self.record(HealthEvent::ServerListening { workers });
    }

    fn server_failed(&self, error: &ServerError) {
        self.record(HealthEvent::ServerFailed(error.to_string()));
    }

    fn server_draining(&self) {
        self.record(HealthEvent::ServerDraining);
    }

    fn server_stopped(&self) {
        self.record(HealthEvent::ServerStopped);
    }
}

//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use central_config::{Config, SocketEndpoint, StoreBackend};

use crate::bootstrap::BootstrapError;
use crate::dispatch::ServerError;
use crate::store::StoreError;

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked before the room store is opened.
    fn store_opening(&self, backend: StoreBackend);

    /// Invoked once the room store accepts transactions.
    fn store_ready(&self, backend: StoreBackend);

    /// Invoked when the room store cannot be opened.
    fn store_failed(&self, error: &StoreError);

    /// Invoked after the dispatch engine is running.
    fn server_listening(&self, endpoint: &SocketEndpoint, workers: usize);

    /// Invoked when the dispatch engine fails to start or stop cleanly.
    fn server_failed(&self, error: &ServerError);

    /// Invoked when shutdown begins draining in-flight work.
    fn server_draining(&self);

    /// Invoked after every dispatch thread has exited.
    fn server_stopped(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn store_opening(&self, backend: StoreBackend) {
        (**self).store_opening(backend);
    }

    fn store_ready(&self, backend: StoreBackend) {
        (**self).store_ready(backend);
    }

    fn store_failed(&self, error: &StoreError) {
        (**self).store_failed(error);
    }

    fn server_listening(&self, endpoint: &SocketEndpoint, workers: usize) {
        (**self).server_listening(endpoint, workers);
    }

    fn server_failed(&self, error: &ServerError) {
        (**self).server_failed(error);
    }

    fn server_draining(&self) {
        (**self).server_draining();
    }

    fn server_stopped(&self) {
        (**self).server_stopped();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: "centrald::health",
            event = "bootstrap_starting",
            "starting server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: "centrald::health",
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            store = %config.store(),
            workers = config.worker_count(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: "centrald::health",
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn store_opening(&self, backend: StoreBackend) {
        tracing::info!(
            target: "centrald::health",
            event = "store_opening",
            store = %backend,
            "opening room store"
        );
    }

    fn store_ready(&self, backend: StoreBackend) {
        tracing::info!(
            target: "centrald::health",
            event = "store_ready",
            store = %backend,
            "room store ready"
        );
    }

    fn store_failed(&self, error: &StoreError) {
        tracing::error!(
            target: "centrald::health",
            event = "store_failed",
            error = %error,
            "room store unavailable"
        );
    }

    fn server_listening(&self, endpoint: &SocketEndpoint, workers: usize) {
        tracing::info!(
            target: "centrald::health",
            event = "server_listening",
            endpoint = %endpoint,
            workers,
            "server listening"
        );
    }

    fn server_failed(&self, error: &ServerError) {
        tracing::error!(
            target: "centrald::health",
            event = "server_failed",
            error = %error,
            "dispatch engine failed"
        );
    }

    fn server_draining(&self) {
        tracing::info!(
            target: "centrald::health",
            event = "server_draining",
            "draining in-flight requests"
        );
    }

    fn server_stopped(&self) {
        tracing::info!(
            target: "centrald::health",
            event = "server_stopped",
            "server stopped"
        );
    }
}

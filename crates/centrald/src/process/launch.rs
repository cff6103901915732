//! Supervises server launch sequencing and shutdown.

use std::sync::Arc;

use tracing::info;

use central_config::{Config, StoreBackend};

use crate::allocation::AllocationEngine;
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::Server;
use crate::handlers::standard_routes;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::store::{MemoryRoomStore, PgRoomStore, RoomStore, StoreError};
use crate::transport::SocketTransport;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Collaborators required to launch the server.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) shutdown: S,
}

/// Runs the server using the production collaborators until a termination
/// signal arrives.
///
/// # Errors
///
/// Returns the first step of the launch sequence that failed.
pub fn run_server() -> Result<(), LaunchError> {
    run_server_with(LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        shutdown: SystemShutdownSignal,
    })
}

/// Runs the server with injected collaborators.
pub(crate) fn run_server_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        shutdown,
    } = plan;

    let bootstrapped = bootstrap_with(&loader, Arc::clone(&reporter))?;
    let config = bootstrapped.config();

    let store = open_store(config, reporter.as_ref())?;
    let engine = Arc::new(AllocationEngine::new(store));
    let routes = Arc::new(standard_routes(engine));

    let mut server: Server<SocketTransport> = Server::new(routes, config.worker_count());
    if let Err(error) = server.start(config.listen()) {
        reporter.server_failed(&error);
        return Err(error.into());
    }
    if let Some(address) = server.endpoint().and_then(SocketTransport::local_addr) {
        info!(target: PROCESS_TARGET, %address, "accepting connections");
    }
    reporter.server_listening(config.listen(), server.worker_count());

    let waited = shutdown.wait();

    reporter.server_draining();
    if let Err(error) = server.stop() {
        reporter.server_failed(&error);
        return Err(error.into());
    }
    reporter.server_stopped();
    waited?;

    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

fn open_store(
    config: &Config,
    reporter: &dyn HealthReporter,
) -> Result<Box<dyn RoomStore>, LaunchError> {
    let backend = config.store();
    reporter.store_opening(backend);
    match build_store(config) {
        Ok(store) => {
            reporter.store_ready(backend);
            Ok(store)
        }
        Err(error) => {
            reporter.store_failed(&error);
            Err(error.into())
        }
    }
}

fn build_store(config: &Config) -> Result<Box<dyn RoomStore>, StoreError> {
    let (classrooms, laboratories) = config.populate();
    match config.store() {
        StoreBackend::Memory => Ok(Box::new(MemoryRoomStore::populated(
            classrooms,
            laboratories,
        ))),
        StoreBackend::Postgres => {
            let store = PgRoomStore::connect(config.database_url())?;
            store.migrate()?;
            if classrooms > 0 || laboratories > 0 {
                let seeded = store.populate(classrooms, laboratories)?;
                info!(target: PROCESS_TARGET, seeded, "room store populated");
            }
            Ok(Box::new(store))
        }
    }
}

//! Dispatch engine lifecycle.
//!
//! Threads and their hand-off:
//!
//! ```text
//! endpoint ──receive──▶ reader ──bounded(0)──▶ worker × W ──send──▶ endpoint
//! ```
//!
//! The queue has no capacity, so the reader blocks until a worker is free and
//! bursts stay in the endpoint's receive buffer. Stopping raises a flag the
//! reader polls; it then hands off whatever the endpoint had already received
//! and exits, which drops the only sender. Workers drain the queue, observe
//! the disconnect and exit, and only then is the endpoint closed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use tracing::{debug, error, info, warn};

use central_protocol::framing::Frames;

use crate::transport::{Endpoint, EndpointBinder};

use super::DISPATCH_TARGET;
use super::errors::ServerError;
use super::routing::RoutingTable;
use super::worker::run_worker;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No threads and no endpoint.
    Stopped,
    /// Accepting and processing messages.
    Running,
    /// No longer pulling messages; finishing queued work.
    Draining,
}

impl fmt::Display for ServerState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Draining => "draining",
        };
        formatter.write_str(label)
    }
}

struct Running<E> {
    endpoint: Arc<E>,
    stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Multi-threaded request dispatcher over an [`Endpoint`].
pub struct Server<E: Endpoint> {
    routes: Arc<RoutingTable>,
    workers: usize,
    state: ServerState,
    running: Option<Running<E>>,
}

impl<E: Endpoint> Server<E> {
    /// Creates a stopped server. A worker count of zero is raised to one.
    #[must_use]
    pub fn new(routes: Arc<RoutingTable>, workers: usize) -> Self {
        Self {
            routes,
            workers: workers.max(1),
            state: ServerState::Stopped,
            running: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Number of worker threads spawned on start.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// The bound endpoint while the server runs.
    #[must_use]
    pub fn endpoint(&self) -> Option<&E> {
        self.running.as_ref().map(|running| running.endpoint.as_ref())
    }

    /// Binds the endpoint and spawns the worker pool and the reader.
    ///
    /// # Errors
    ///
    /// Fails with [`ServerError::AlreadyRunning`] unless stopped, and with
    /// [`ServerError::Bind`] before any thread exists when the endpoint
    /// cannot be bound.
    pub fn start<B>(&mut self, binder: B) -> Result<(), ServerError>
    where
        B: EndpointBinder<Endpoint = E>,
    {
        if self.state != ServerState::Stopped {
            return Err(ServerError::AlreadyRunning);
        }
        let endpoint = Arc::new(
            binder
                .bind()
                .map_err(|source| ServerError::Bind { source })?,
        );
        let (sender, receiver) = bounded::<Frames>(0);

        let mut workers = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let queue = receiver.clone();
            let worker_endpoint = Arc::clone(&endpoint);
            let routes = Arc::clone(&self.routes);
            let spawned = thread::Builder::new()
                .name(format!("centrald-worker-{index}"))
                .spawn(move || run_worker(index, &queue, worker_endpoint.as_ref(), &routes));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    drop(sender);
                    abandon(&endpoint, workers);
                    return Err(ServerError::Spawn {
                        role: "worker",
                        source,
                    });
                }
            }
        }
        drop(receiver);

        let stop = Arc::new(AtomicBool::new(false));
        let reader_endpoint = Arc::clone(&endpoint);
        let reader_stop = Arc::clone(&stop);
        let reader = match thread::Builder::new()
            .name("centrald-reader".to_owned())
            .spawn(move || run_reader(reader_endpoint.as_ref(), &reader_stop, &sender))
        {
            Ok(handle) => handle,
            Err(source) => {
                abandon(&endpoint, workers);
                return Err(ServerError::Spawn {
                    role: "reader",
                    source,
                });
            }
        };

        info!(
            target: DISPATCH_TARGET,
            workers = self.workers,
            "dispatch engine running"
        );
        self.running = Some(Running {
            endpoint,
            stop,
            reader,
            workers,
        });
        self.state = ServerState::Running;
        Ok(())
    }

    /// Drains in-flight work, joins every thread, then closes the endpoint.
    ///
    /// Requests already handed to the reader are answered before this
    /// returns; handlers are never interrupted.
    ///
    /// # Errors
    ///
    /// Fails with [`ServerError::NotRunning`] unless running, or reports the
    /// first dispatch thread that panicked. The endpoint is closed either way.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        let Some(running) = self.running.take() else {
            return Err(ServerError::NotRunning);
        };
        self.state = ServerState::Draining;
        info!(target: DISPATCH_TARGET, "dispatch engine draining");

        let Running {
            endpoint,
            stop,
            reader,
            workers,
        } = running;
        stop.store(true, Ordering::SeqCst);

        let mut outcome = Ok(());
        if !join_dispatch_thread("reader", reader) {
            outcome = Err(ServerError::ThreadPanic { role: "reader" });
        }
        for worker in workers {
            if !join_dispatch_thread("worker", worker) && outcome.is_ok() {
                outcome = Err(ServerError::ThreadPanic { role: "worker" });
            }
        }
        endpoint.close();

        self.state = ServerState::Stopped;
        info!(target: DISPATCH_TARGET, "dispatch engine stopped");
        outcome
    }
}

impl<E: Endpoint> Drop for Server<E> {
    fn drop(&mut self) {
        if self.running.is_some()
            && let Err(error) = self.stop()
        {
            warn!(target: DISPATCH_TARGET, error = %error, "server stopped with errors");
        }
    }
}

fn run_reader<E: Endpoint>(endpoint: &E, stop: &AtomicBool, queue: &Sender<Frames>) {
    debug!(target: DISPATCH_TARGET, "reader started");
    while !stop.load(Ordering::SeqCst) {
        match endpoint.receive(POLL_INTERVAL) {
            Ok(Some(message)) => {
                if queue.send(message).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(error) => {
                warn!(target: DISPATCH_TARGET, error = %error, "transport receive failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    let mut drained = 0_usize;
    while let Ok(Some(message)) = endpoint.receive(Duration::ZERO) {
        if queue.send(message).is_err() {
            return;
        }
        drained += 1;
    }
    debug!(target: DISPATCH_TARGET, drained, "reader stopped");
}

/// Joins a dispatch thread, returning `false` if it panicked.
fn join_dispatch_thread(role: &'static str, handle: JoinHandle<()>) -> bool {
    if handle.join().is_ok() {
        return true;
    }
    error!(target: DISPATCH_TARGET, role, "dispatch thread panicked");
    false
}

/// Tears down a partially started server, returning how many of the
/// already spawned workers panicked.
fn abandon<E: Endpoint>(endpoint: &E, workers: Vec<JoinHandle<()>>) -> usize {
    let panicked = workers
        .into_iter()
        .map(|worker| join_dispatch_thread("worker", worker))
        .filter(|joined| !joined)
        .count();
    endpoint.close();
    panicked
}

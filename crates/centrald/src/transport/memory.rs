//! In-process endpoint for driving the dispatch engine without sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use central_protocol::framing::Frames;

use super::{Endpoint, TransportError};

/// Endpoint whose peers are the caller.
///
/// [`MemoryEndpoint::deliver`] plays the part of a remote peer: the frames are
/// queued exactly as a socket endpoint would queue them, identity first.
/// Replies sent by workers are captured in order and can be collected with
/// [`MemoryEndpoint::next_sent`] or [`MemoryEndpoint::sent`].
#[derive(Debug)]
pub struct MemoryEndpoint {
    inbound_tx: Sender<Frames>,
    inbound_rx: Receiver<Frames>,
    outbound_tx: Sender<Frames>,
    outbound_rx: Receiver<Frames>,
    closed: AtomicBool,
}

impl Default for MemoryEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEndpoint {
    #[must_use]
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Queues an inbound message.
    pub fn deliver(&self, frames: Frames) {
        // Both halves live in `self`, so the channel cannot be disconnected.
        let _ = self.inbound_tx.send(frames);
    }

    /// Number of inbound messages not yet taken by the reader.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbound_rx.len()
    }

    /// Waits up to `timeout` for the next captured reply.
    #[must_use]
    pub fn next_sent(&self, timeout: Duration) -> Option<Frames> {
        self.outbound_rx.recv_timeout(timeout).ok()
    }

    /// Drains every reply captured so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Frames> {
        self.outbound_rx.try_iter().collect()
    }

    /// Reports whether the endpoint has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Endpoint for MemoryEndpoint {
    fn receive(&self, timeout: Duration) -> Result<Option<Frames>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.inbound_rx.recv_timeout(timeout) {
            Ok(frames) => Ok(Some(frames)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn send(&self, frames: Frames) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if frames.first().is_none_or(Vec::is_empty) {
            return Err(TransportError::MissingIdentity);
        }
        self.outbound_tx
            .send(frames)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

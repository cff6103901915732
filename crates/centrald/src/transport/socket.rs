//! Socket endpoint multiplexing framed peer connections.
//!
//! A background thread accepts connections and assigns each one a 5-byte
//! identity (`0x00` followed by a big-endian counter). Every connection gets
//! a reader thread that decodes framed messages, prefixes the identity, and
//! queues them in a bounded inbox; a full inbox stalls the reading thread so
//! the kernel socket buffers absorb bursts. Replies are written through a
//! per-peer writer handle looked up by identity.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use tracing::{debug, info, warn};

use central_config::SocketEndpoint;
use central_protocol::framing::{self, Frames};

use super::stream::ConnectionStream;
use super::{Endpoint, ListenerError, TRANSPORT_TARGET, TransportError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const INBOX_CAPACITY: usize = 1000;
const INBOX_RETRY: Duration = Duration::from_millis(100);
const IDENTITY_MARKER: u8 = 0x00;
const IDENTITY_LEN: usize = 5;

type Peers = Mutex<HashMap<u32, Arc<Mutex<ConnectionStream>>>>;

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// State shared between the endpoint, its accept thread and peer readers.
struct Shared {
    endpoint: SocketEndpoint,
    closed: AtomicBool,
    next_identity: AtomicU32,
    peers: Peers,
    inbox: Sender<Frames>,
}

/// Endpoint bound to a TCP or Unix socket.
pub struct SocketTransport {
    shared: Arc<Shared>,
    inbox: Receiver<Frames>,
    local_addr: Option<SocketAddr>,
    accept: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SocketTransport {
    /// Binds `endpoint` and starts accepting peers.
    ///
    /// # Errors
    ///
    /// Returns a [`ListenerError`] when the address cannot be resolved or
    /// bound, including when another process already owns it.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            SocketEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    ListenerKind::Unix(bind_unix(path.as_std_path())?)
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    return Err(ListenerError::UnsupportedUnix {
                        endpoint: endpoint.to_string(),
                    });
                }
            }
        };

        let nonblocking = match &listener {
            ListenerKind::Tcp(tcp) => tcp.set_nonblocking(true),
            #[cfg(unix)]
            ListenerKind::Unix(unix) => unix.set_nonblocking(true),
        };
        if let Err(source) = nonblocking {
            #[cfg(unix)]
            cleanup_unix_socket(endpoint);
            return Err(ListenerError::NonBlocking { source });
        }

        let local_addr = match &listener {
            ListenerKind::Tcp(tcp) => tcp.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        };
        let (inbox_tx, inbox_rx) = bounded(INBOX_CAPACITY);
        let shared = Arc::new(Shared {
            endpoint: endpoint.clone(),
            closed: AtomicBool::new(false),
            next_identity: AtomicU32::new(1),
            peers: Mutex::new(HashMap::new()),
            inbox: inbox_tx,
        });

        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("centrald-accept".to_owned())
            .spawn(move || run_accept_loop(&listener, &accept_shared))
            .map_err(|source| {
                #[cfg(unix)]
                cleanup_unix_socket(endpoint);
                ListenerError::Spawn { source }
            })?;

        Ok(Self {
            shared,
            inbox: inbox_rx,
            local_addr,
            accept: Mutex::new(Some(accept)),
        })
    }

    /// Address of a TCP endpoint; `None` for Unix sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of currently connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.shared
            .peers
            .lock()
            .map(|peers| peers.len())
            .unwrap_or_default()
    }

    fn writer_for(&self, identity: u32) -> Result<Arc<Mutex<ConnectionStream>>, TransportError> {
        let peers = self
            .shared
            .peers
            .lock()
            .map_err(|_| TransportError::Poisoned)?;
        peers
            .get(&identity)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer {
                identity: format_identity(identity),
            })
    }
}

impl Endpoint for SocketTransport {
    fn receive(&self, timeout: Duration) -> Result<Option<Frames>, TransportError> {
        match self.inbox.recv_timeout(timeout) {
            Ok(frames) => Ok(Some(frames)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn send(&self, frames: Frames) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let identity = frames
            .first()
            .and_then(|frame| parse_identity(frame))
            .ok_or(TransportError::MissingIdentity)?;
        let writer = self.writer_for(identity)?;
        let mut stream = writer.lock().map_err(|_| TransportError::Poisoned)?;
        let payload = frames.get(1..).unwrap_or_default();
        framing::write_frames(&mut *stream, payload).map_err(|source| {
            TransportError::Write {
                identity: format_identity(identity),
                source,
            }
        })
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self.accept.lock().ok().and_then(|mut accept| accept.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(target: TRANSPORT_TARGET, "accept thread panicked");
        }
        let peers = match self.shared.peers.lock() {
            Ok(mut peers) => peers.drain().collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for (identity, writer) in peers {
            if let Ok(stream) = writer.lock()
                && let Err(error) = stream.shutdown()
                && error.kind() != io::ErrorKind::NotConnected
            {
                debug!(
                    target: TRANSPORT_TARGET,
                    peer = %format_identity(identity),
                    error = %error,
                    "failed to shut down peer connection"
                );
            }
        }
        info!(
            target: TRANSPORT_TARGET,
            endpoint = %self.shared.endpoint,
            "transport endpoint closed"
        );
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_accept_loop(listener: &ListenerKind, shared: &Arc<Shared>) {
    info!(
        target: TRANSPORT_TARGET,
        endpoint = %shared.endpoint,
        "socket endpoint listening"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shared.closed.load(Ordering::SeqCst) {
        match accept_connection(listener) {
            Ok(Some(stream)) => {
                last_error = None;
                register_peer(shared, stream);
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: TRANSPORT_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    #[cfg(unix)]
    cleanup_unix_socket(&shared.endpoint);
}

fn accept_connection(listener: &ListenerKind) -> io::Result<Option<ConnectionStream>> {
    let accepted = match listener {
        ListenerKind::Tcp(tcp) => tcp.accept().map(|(stream, _)| ConnectionStream::Tcp(stream)),
        #[cfg(unix)]
        ListenerKind::Unix(unix) => unix
            .accept()
            .map(|(stream, _)| ConnectionStream::Unix(stream)),
    };
    match accepted {
        Ok(stream) => {
            stream.set_blocking()?;
            Ok(Some(stream))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

fn register_peer(shared: &Arc<Shared>, stream: ConnectionStream) {
    let identity = shared.next_identity.fetch_add(1, Ordering::SeqCst);
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(error) => {
            warn!(
                target: TRANSPORT_TARGET,
                error = %error,
                "failed to clone peer stream"
            );
            return;
        }
    };
    match shared.peers.lock() {
        Ok(mut peers) => {
            peers.insert(identity, Arc::new(Mutex::new(stream)));
        }
        Err(_) => {
            warn!(target: TRANSPORT_TARGET, "peer table poisoned; dropping connection");
            return;
        }
    }
    debug!(
        target: TRANSPORT_TARGET,
        peer = %format_identity(identity),
        "peer connected"
    );
    let reader_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("centrald-peer-{identity}"))
        .spawn(move || run_peer_reader(&reader_shared, identity, reader));
    if let Err(error) = spawned {
        warn!(
            target: TRANSPORT_TARGET,
            error = %error,
            "failed to spawn peer reader"
        );
        forget_peer(shared, identity);
    }
}

fn run_peer_reader(shared: &Shared, identity: u32, mut stream: ConnectionStream) {
    let identity_frame = encode_identity(identity);
    loop {
        match framing::read_frames(&mut stream) {
            Ok(Some(frames)) => {
                let mut message = Vec::with_capacity(frames.len() + 1);
                message.push(identity_frame.clone());
                message.extend(frames);
                if !enqueue(shared, message) {
                    break;
                }
            }
            Ok(None) => {
                debug!(
                    target: TRANSPORT_TARGET,
                    peer = %format_identity(identity),
                    "peer disconnected"
                );
                break;
            }
            Err(error) => {
                if !shared.closed.load(Ordering::SeqCst) {
                    warn!(
                        target: TRANSPORT_TARGET,
                        peer = %format_identity(identity),
                        error = %error,
                        "dropping peer after read failure"
                    );
                }
                break;
            }
        }
    }
    forget_peer(shared, identity);
}

/// Queues `message`, retrying while the inbox is full. Returns `false` once
/// the endpoint is closed.
fn enqueue(shared: &Shared, mut message: Frames) -> bool {
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            return false;
        }
        match shared.inbox.send_timeout(message, INBOX_RETRY) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => message = returned,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn forget_peer(shared: &Shared, identity: u32) {
    let removed = shared
        .peers
        .lock()
        .ok()
        .and_then(|mut peers| peers.remove(&identity));
    if let Some(writer) = removed
        && let Ok(stream) = writer.lock()
    {
        let _ = stream.shutdown();
    }
}

fn encode_identity(identity: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(IDENTITY_LEN);
    frame.push(IDENTITY_MARKER);
    frame.extend_from_slice(&identity.to_be_bytes());
    frame
}

fn parse_identity(frame: &[u8]) -> Option<u32> {
    match frame {
        [IDENTITY_MARKER, a, b, c, d] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

fn format_identity(identity: u32) -> String {
    format!("{identity:08x}")
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixProbe {
            path: path.display().to_string(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket {
                path: path.display().to_string(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(ListenerError::UnixInUse {
                    path: path.display().to_string(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: path.display().to_string(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(ListenerError::UnixProbe {
                    path: path.display().to_string(),
                    source,
                });
            }
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let SocketEndpoint::Unix { path } = endpoint else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: TRANSPORT_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::net::TcpStream;

    const WAIT: Duration = Duration::from_secs(2);

    fn bind_local() -> (SocketTransport, SocketAddr) {
        let transport =
            SocketTransport::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind transport");
        let addr = transport.local_addr().expect("tcp address");
        (transport, addr)
    }

    #[rstest]
    fn identities_round_trip() {
        let frame = encode_identity(0x0102_0304);
        assert_eq!(frame, vec![0x00, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(parse_identity(&frame), Some(0x0102_0304));
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"\x01\x00\x00\x00\x01".as_slice())]
    #[case(b"\x00\x00\x00\x01".as_slice())]
    fn malformed_identities_are_rejected(#[case] frame: &[u8]) {
        assert_eq!(parse_identity(frame), None);
    }

    fn wait_for_peers(transport: &SocketTransport, expected: usize) {
        let deadline = std::time::Instant::now() + WAIT;
        while transport.peer_count() != expected {
            assert!(
                std::time::Instant::now() < deadline,
                "expected {expected} peers, found {}",
                transport.peer_count()
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[rstest]
    fn disconnected_peers_are_forgotten() {
        let (transport, addr) = bind_local();
        assert_eq!(transport.peer_count(), 0);
        let first = TcpStream::connect(addr).expect("connect first");
        let second = TcpStream::connect(addr).expect("connect second");
        wait_for_peers(&transport, 2);

        drop(first);
        wait_for_peers(&transport, 1);
        drop(second);
        wait_for_peers(&transport, 0);
        transport.close();
    }

    #[rstest]
    fn inbound_messages_carry_the_peer_identity() {
        let (transport, addr) = bind_local();
        let mut peer = TcpStream::connect(addr).expect("connect peer");
        framing::write_frames(&mut peer, &[b"hello".as_slice()]).expect("write");

        let frames = transport
            .receive(WAIT)
            .expect("receive")
            .expect("message before timeout");
        assert_eq!(frames.len(), 2);
        assert!(frames.first().and_then(|f| parse_identity(f)).is_some());
        assert_eq!(frames.get(1).map(Vec::as_slice), Some(b"hello".as_slice()));
        transport.close();
    }

    #[rstest]
    fn replies_reach_only_the_originating_peer() {
        let (transport, addr) = bind_local();
        let mut first = TcpStream::connect(addr).expect("connect first");
        let mut second = TcpStream::connect(addr).expect("connect second");
        framing::write_frames(&mut first, &[b"one".as_slice()]).expect("write first");
        framing::write_frames(&mut second, &[b"two".as_slice()]).expect("write second");

        let mut inbound = Vec::new();
        while inbound.len() < 2 {
            let frames = transport
                .receive(WAIT)
                .expect("receive")
                .expect("message before timeout");
            inbound.push(frames);
        }
        for frames in inbound {
            let identity = frames.first().cloned().expect("identity");
            let body = frames.get(1).cloned().expect("payload");
            let mut reply = body.clone();
            reply.extend_from_slice(b"-ack");
            transport.send(vec![identity, reply]).expect("send reply");
        }

        let first_reply = framing::read_frames(&mut first)
            .expect("read")
            .expect("reply");
        let second_reply = framing::read_frames(&mut second)
            .expect("read")
            .expect("reply");
        assert_eq!(first_reply, vec![b"one-ack".to_vec()]);
        assert_eq!(second_reply, vec![b"two-ack".to_vec()]);
        transport.close();
    }

    #[rstest]
    fn sending_to_unknown_peer_fails() {
        let (transport, _) = bind_local();
        let error = transport
            .send(vec![encode_identity(999), b"orphan".to_vec()])
            .expect_err("unknown peer");
        assert!(matches!(error, TransportError::UnknownPeer { .. }));
        transport.close();
    }

    #[rstest]
    fn binding_an_occupied_port_fails() {
        let (transport, addr) = bind_local();
        let error = SocketTransport::bind(&SocketEndpoint::tcp("127.0.0.1", addr.port()))
            .err()
            .expect("second bind should fail");
        assert!(matches!(error, ListenerError::BindTcp { .. }));
        transport.close();
    }

    #[rstest]
    fn close_rejects_further_sends() {
        let (transport, _) = bind_local();
        transport.close();
        assert!(matches!(
            transport.send(vec![encode_identity(1), b"late".to_vec()]),
            Err(TransportError::Closed)
        ));
    }

    #[cfg(unix)]
    #[rstest]
    fn unix_endpoint_cleans_stale_socket_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("centrald.sock");
        {
            let _stale = UnixListener::bind(&path).expect("bind stale listener");
        }
        assert!(path.exists(), "stale socket should remain");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path").to_owned());
        let transport = SocketTransport::bind(&endpoint).expect("bind over stale socket");
        let mut peer = UnixStream::connect(&path).expect("connect unix peer");
        framing::write_frames(&mut peer, &[b"ping".as_slice()]).expect("write");
        let frames = transport
            .receive(WAIT)
            .expect("receive")
            .expect("message before timeout");
        assert_eq!(frames.get(1).map(Vec::as_slice), Some(b"ping".as_slice()));

        transport.close();
        assert!(!path.exists(), "endpoint should remove its socket on close");
    }

    #[cfg(unix)]
    #[rstest]
    fn unix_endpoint_rejects_socket_in_use() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("centrald.sock");
        let _existing = UnixListener::bind(&path).expect("bind existing listener");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path").to_owned());
        let error = SocketTransport::bind(&endpoint)
            .err()
            .expect("bind should fail");
        assert!(matches!(error, ListenerError::UnixInUse { .. }));
    }
}

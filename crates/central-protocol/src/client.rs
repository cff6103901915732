//! Blocking client for the central allocation server.
//!
//! The client keeps at most one request in flight, so the next reply on the
//! connection always answers the request it just sent. The server routes the
//! reply back by connection identity; the client double-checks the echoed id.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use central_config::SocketEndpoint;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::allocation::{AllocateRequest, AllocateResponse, ConfirmRequest, ConfirmResponse};
use crate::envelope::{CodecError, Outcome, Request, Response, decode_content};
use crate::framing::{self, FrameError, Frames};
use crate::routes;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint host could not be resolved.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Connecting to the endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Unix endpoints are unavailable on this platform.
    #[error("unix sockets are unsupported for endpoint {0}")]
    UnsupportedUnix(String),
    /// Configuring the socket failed.
    #[error("failed to configure socket: {0}")]
    Socket(#[source] io::Error),
    /// Reading or writing a framed message failed.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The envelope could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The server closed the connection before replying.
    #[error("server closed the connection")]
    Disconnected,
    /// The reply carried no payload frame.
    #[error("reply contained no payload frame")]
    EmptyReply,
    /// The reply answered a different request.
    #[error("reply id {received} does not match request id {expected}")]
    Mismatched { expected: i64, received: i64 },
    /// The server reported a failure.
    #[error("server error: {0}")]
    Remote(String),
}

enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Synchronous request/reply client.
pub struct Client {
    connection: Connection,
    next_id: i64,
}

impl Client {
    /// Connects to the server at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be resolved or the connection
    /// is refused.
    pub fn connect(endpoint: &SocketEndpoint) -> Result<Self, ClientError> {
        let connection = match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let address =
                    resolve_tcp_address(host, *port).map_err(|source| ClientError::Resolve {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                let stream = TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT).map_err(
                    |source| ClientError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    },
                )?;
                stream.set_nodelay(true).map_err(ClientError::Socket)?;
                Connection::Tcp(stream)
            }
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    let stream = UnixStream::connect(path.as_std_path()).map_err(|source| {
                        ClientError::Connect {
                            endpoint: endpoint.to_string(),
                            source,
                        }
                    })?;
                    Connection::Unix(stream)
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    return Err(ClientError::UnsupportedUnix(endpoint.to_string()));
                }
            }
        };
        Ok(Self {
            connection,
            next_id: 1,
        })
    }

    /// Bounds how long a reply may take; `None` waits forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket rejects the timeout.
    pub fn set_reply_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        let result = match &self.connection {
            Connection::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.set_read_timeout(timeout),
        };
        result.map_err(ClientError::Socket)
    }

    /// Sends raw frames without any envelope handling.
    ///
    /// # Errors
    ///
    /// Returns an error if the frames cannot be written.
    pub fn send_frames<F: AsRef<[u8]>>(&mut self, frames: &[F]) -> Result<(), ClientError> {
        framing::write_frames(&mut self.connection, frames)?;
        Ok(())
    }

    /// Receives the next raw message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] when the server closes the
    /// connection, or a frame error.
    pub fn receive_frames(&mut self) -> Result<Frames, ClientError> {
        framing::read_frames(&mut self.connection)?.ok_or(ClientError::Disconnected)
    }

    /// Sends `request` and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or codec failure, or when the reply
    /// does not echo the request id. A failed response is returned as `Ok`.
    pub fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        let payload = request.encode()?;
        self.send_frames(&[payload])?;
        let frames = self.receive_frames()?;
        let reply = frames.first().ok_or(ClientError::EmptyReply)?;
        let response = Response::decode(reply)?;
        if response.id() != request.id {
            return Err(ClientError::Mismatched {
                expected: request.id,
                received: response.id(),
            });
        }
        Ok(response)
    }

    /// Calls `route` with typed content and decodes the typed result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] when the server answers with a failure,
    /// plus any error from [`Client::request`].
    pub fn call<T, R>(&mut self, route: &str, content: &T) -> Result<R, ClientError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;
        let request = Request::with_content(id, route, content)?;
        match self.request(&request)?.into_outcome() {
            Outcome::Success(content) => Ok(decode_content(content)?),
            Outcome::Failure(error) => Err(ClientError::Remote(error)),
        }
    }

    /// Probes server liveness, returning the acknowledgement payload.
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn health_check(&mut self) -> Result<String, ClientError> {
        self.call(routes::HEALTH_CHECK, &serde_json::Value::Null)
    }

    /// Requests room allocations.
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn allocate(&mut self, request: &AllocateRequest) -> Result<AllocateResponse, ClientError> {
        self.call(routes::ALLOCATE, request)
    }

    /// Accepts or rejects a previous allocation.
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn confirm(&mut self, request: &ConfirmRequest) -> Result<ConfirmResponse, ClientError> {
        self.call(routes::CONFIRM, request)
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

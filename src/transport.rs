//! # Transport
//!
//! Socket plumbing shared by the coordinator and workers. An [`Address`]
//! selects TCP or a Unix domain socket; everything above this module only sees
//! a [`Connection`] made of boxed read and write halves.
//!
//! The coordinator drives many connections from one event loop. Each accepted
//! connection gets a reader task that forwards [`ConnectionEvent`]s into the
//! loop and a writer task fed through a [`ConnectionHandle`], so protocol
//! handlers never wait on the network.

use crate::codec::{CodecError, ConnectionId};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Read buffer size for connection reader tasks.
const READ_BUFFER_SIZE: usize = 8192;

/// Errors raised by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// I/O error.
  #[error("Network error: {0}")]
  Io(#[from] io::Error),
  /// The address string could not be parsed.
  #[error("Invalid address: {0}")]
  InvalidAddress(String),
  /// Unix domain sockets are not available on this platform.
  #[error("Unix domain sockets are not supported on this platform")]
  UnixUnsupported,
  /// The connection is already closed.
  #[error("Connection closed")]
  Closed,
  /// Connecting took longer than allowed.
  #[error("Connection timeout after {0:?}")]
  Timeout(Duration),
  /// A message could not be framed.
  #[error("Codec error: {0}")]
  Codec(#[from] CodecError),
}

/// Where a coordinator listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
  /// `host:port`.
  Tcp {
    /// Host name or IP.
    host: String,
    /// Port.
    port: u16,
  },
  /// Path of a Unix domain socket.
  Unix(PathBuf),
}

impl Address {
  /// TCP address.
  #[must_use]
  pub fn tcp(host: impl Into<String>, port: u16) -> Self {
    Address::Tcp {
      host: host.into(),
      port,
    }
  }

  /// Unix domain socket address.
  #[must_use]
  pub fn unix(path: impl Into<PathBuf>) -> Self {
    Address::Unix(path.into())
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Address::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
      Address::Unix(path) => write!(f, "unix://{}", path.display()),
    }
  }
}

impl FromStr for Address {
  type Err = TransportError;

  /// Accepts `unix://<path>`, `tcp://<host>:<port>` and bare `<host>:<port>`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if let Some(path) = s.strip_prefix("unix://") {
      if path.is_empty() {
        return Err(TransportError::InvalidAddress(s.to_string()));
      }
      return Ok(Address::unix(path));
    }

    let rest = s.strip_prefix("tcp://").unwrap_or(s);
    let (host, port) = rest
      .rsplit_once(':')
      .ok_or_else(|| TransportError::InvalidAddress(s.to_string()))?;
    let port = port
      .parse::<u16>()
      .map_err(|_| TransportError::InvalidAddress(s.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
      return Err(TransportError::InvalidAddress(s.to_string()));
    }
    Ok(Address::tcp(host, port))
  }
}

/// Boxed read half of a connection.
pub type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a connection.
pub type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// An established connection.
pub struct Connection {
  /// Incoming bytes.
  pub reader: ReadHalf,
  /// Outgoing bytes.
  pub writer: WriteHalf,
  /// Human-readable peer description for logs.
  pub peer: String,
}

impl fmt::Debug for Connection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Connection").field("peer", &self.peer).finish()
  }
}

impl Connection {
  fn from_tcp(stream: TcpStream, peer: String) -> Self {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    Self {
      reader: Box::new(reader),
      writer: Box::new(writer),
      peer,
    }
  }

  #[cfg(unix)]
  fn from_unix(stream: UnixStream, peer: String) -> Self {
    let (reader, writer) = stream.into_split();
    Self {
      reader: Box::new(reader),
      writer: Box::new(writer),
      peer,
    }
  }
}

/// Opens a connection to `address`, giving up after `limit`.
pub async fn connect_timeout(address: &Address, limit: Duration) -> Result<Connection, TransportError> {
  within(limit, connect(address)).await
}

pub(crate) async fn within<T, F>(limit: Duration, operation: F) -> Result<T, TransportError>
where
  F: Future<Output = Result<T, TransportError>>,
{
  timeout(limit, operation)
    .await
    .map_err(|_| TransportError::Timeout(limit))?
}

/// Opens a connection to `address`.
pub async fn connect(address: &Address) -> Result<Connection, TransportError> {
  match address {
    Address::Tcp { host, port } => {
      let stream = TcpStream::connect((host.as_str(), *port)).await?;
      Ok(Connection::from_tcp(stream, address.to_string()))
    }
    #[cfg(unix)]
    Address::Unix(path) => {
      let stream = UnixStream::connect(path).await?;
      Ok(Connection::from_unix(stream, address.to_string()))
    }
    #[cfg(not(unix))]
    Address::Unix(_) => Err(TransportError::UnixUnsupported),
  }
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
  /// TCP listener.
  Tcp(TcpListener),
  /// Unix domain socket listener.
  #[cfg(unix)]
  Unix(UnixListener, PathBuf),
}

impl Listener {
  /// Binds to `address`.
  pub async fn bind(address: &Address) -> Result<Self, TransportError> {
    match address {
      Address::Tcp { host, port } => {
        let listener = TcpListener::bind((host.as_str(), *port)).await?;
        Ok(Listener::Tcp(listener))
      }
      #[cfg(unix)]
      Address::Unix(path) => {
        let listener = UnixListener::bind(path)?;
        Ok(Listener::Unix(listener, path.clone()))
      }
      #[cfg(not(unix))]
      Address::Unix(_) => Err(TransportError::UnixUnsupported),
    }
  }

  /// The address peers should connect to.
  pub fn local_address(&self) -> Result<Address, TransportError> {
    match self {
      Listener::Tcp(listener) => {
        let addr = listener.local_addr()?;
        Ok(Address::tcp(addr.ip().to_string(), addr.port()))
      }
      #[cfg(unix)]
      Listener::Unix(_, path) => Ok(Address::Unix(path.clone())),
    }
  }

  /// Waits for the next incoming connection.
  pub async fn accept(&self) -> Result<Connection, TransportError> {
    match self {
      Listener::Tcp(listener) => {
        let (stream, peer) = listener.accept().await?;
        Ok(Connection::from_tcp(stream, peer.to_string()))
      }
      #[cfg(unix)]
      Listener::Unix(listener, path) => {
        let (stream, _) = listener.accept().await?;
        Ok(Connection::from_unix(stream, path.display().to_string()))
      }
    }
  }
}

/// Something that happened on a connection, delivered to the event loop.
#[derive(Debug)]
pub enum ConnectionEvent {
  /// Bytes arrived.
  Data(ConnectionId, Bytes),
  /// The connection failed.
  Error(ConnectionId, io::Error),
  /// The connection closed, cleanly or not. Always the last event.
  Closed(ConnectionId),
}

enum Command {
  Send(Bytes),
  Close,
}

/// Non-blocking handle used to write to, or close, a driven connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
  id: ConnectionId,
  peer: String,
  commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Command::Send(bytes) => write!(f, "Send({} bytes)", bytes.len()),
      Command::Close => f.write_str("Close"),
    }
  }
}

impl ConnectionHandle {
  /// Connection ID.
  #[must_use]
  pub fn id(&self) -> ConnectionId {
    self.id
  }

  /// Peer description.
  #[must_use]
  pub fn peer(&self) -> &str {
    &self.peer
  }

  /// Queues `frame` for writing.
  pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
    self
      .commands
      .send(Command::Send(frame))
      .map_err(|_| TransportError::Closed)
  }

  /// Flushes queued frames, then closes the connection.
  pub fn close(&self) {
    let _ = self.commands.send(Command::Close);
  }
}

/// Spawns reader and writer tasks for `connection`.
///
/// Reads are reported on `events` as [`ConnectionEvent::Data`]; the final
/// event is always [`ConnectionEvent::Closed`].
pub fn drive(
  id: ConnectionId,
  connection: Connection,
  events: mpsc::UnboundedSender<ConnectionEvent>,
) -> ConnectionHandle {
  let Connection {
    mut reader,
    mut writer,
    peer,
  } = connection;
  let (commands, mut queue) = mpsc::unbounded_channel::<Command>();

  let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

  tokio::spawn(async move {
    while let Some(command) = queue.recv().await {
      match command {
        Command::Send(frame) => {
          if let Err(e) = writer.write_all(&frame).await {
            warn!(connection = id, error = %e, "Error writing frame");
            break;
          }
        }
        Command::Close => break,
      }
    }
    let _ = writer.shutdown().await;
    let _ = shutdown_tx.send(());
    trace!(connection = id, "Writer stopped");
  });

  let reader_events = events;
  tokio::spawn(async move {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
      tokio::select! {
        read = reader.read(&mut buffer) => match read {
          Ok(0) => break,
          Ok(n) => {
            let data = Bytes::copy_from_slice(&buffer[..n]);
            if reader_events.send(ConnectionEvent::Data(id, data)).is_err() {
              break;
            }
          }
          Err(e) => {
            let _ = reader_events.send(ConnectionEvent::Error(id, e));
            break;
          }
        },
        _ = &mut shutdown_rx => break,
      }
    }
    debug!(connection = id, "Reader stopped");
    let _ = reader_events.send(ConnectionEvent::Closed(id));
  });

  ConnectionHandle {
    id,
    peer,
    commands,
  }
}

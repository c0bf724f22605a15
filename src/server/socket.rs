//! # Socket Server
//!
//! Tokio implementation of the coordinator's listener.
//!
//! ## Lifecycle
//!
//! ```text
//! new --initialize--> running --start--> (event loop) --protocol stops--> stopped
//!                        |                                                  ^
//!                        +-------------------- stop ------------------------+
//! ```
//!
//! All connections are multiplexed on one loop. Reader tasks forward bytes as
//! events; the loop reassembles frames, hands each message to the
//! [`ServerProtocol`] and queues replies on the connection's writer task. The
//! protocol therefore runs without locks and never waits on a socket.
//!
//! Worker exits reported through [`SocketServer::track_exits`] are fed to the
//! same loop, so a worker that dies before identifying cannot keep the run
//! open.

use super::ServerError;
use super::protocol::{Client, ProtocolError, RunSummary, Server, ServerProtocol};
use crate::codec::{ConnectionId, FrameCodec};
use crate::message::{Message, WorkerId};
use crate::serializer::{JsonSerializer, Serializer};
use crate::transport::{self, Address, ConnectionEvent, ConnectionHandle, Listener, TransportError};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Longest Unix socket path accepted (the BSD `sun_path` limit).
const MAX_SOCKET_PATH_LEN: usize = 104;

struct Initialized {
  listener: Listener,
  protocol: ServerProtocol,
  address: Address,
}

/// Listener that runs a [`ServerProtocol`] over TCP or a Unix domain socket.
pub struct SocketServer {
  address: Address,
  serializer: Arc<dyn Serializer>,
  socket_path: Option<PathBuf>,
  state: Option<Initialized>,
  exits: Option<mpsc::UnboundedReceiver<WorkerId>>,
}

impl SocketServer {
  /// Server listening on `127.0.0.1:<port>`. Port 0 picks a free port.
  #[must_use]
  pub fn tcp(port: u16) -> Self {
    Self::bind(Address::tcp("127.0.0.1", port))
  }

  /// Server listening on a fresh socket file inside `folder`.
  pub fn unix_domain(folder: impl AsRef<Path>) -> Result<Self, ServerError> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
      return Err(ServerError::InvalidSocketFolder(folder.to_path_buf()));
    }

    let token: String = rand::thread_rng()
      .sample_iter(&Alphanumeric)
      .take(13)
      .map(char::from)
      .collect();
    let path = folder.join(format!("socket{}.sock", token));
    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH_LEN {
      return Err(ServerError::SocketPathTooLong {
        max: MAX_SOCKET_PATH_LEN,
        len,
      });
    }

    let mut server = Self::bind(Address::Unix(path.clone()));
    server.socket_path = Some(path);
    Ok(server)
  }

  /// Server listening on an arbitrary address.
  #[must_use]
  pub fn bind(address: Address) -> Self {
    Self {
      address,
      serializer: Arc::new(JsonSerializer),
      socket_path: None,
      state: None,
      exits: None,
    }
  }

  /// Replaces the wire serializer.
  #[must_use]
  pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
    self.serializer = serializer;
    self
  }

  /// Receives the IDs of launched workers as they exit.
  pub fn track_exits(&mut self, exits: mpsc::UnboundedReceiver<WorkerId>) {
    self.exits = Some(exits);
  }

  /// Address workers should connect to; the bound one once initialized.
  #[must_use]
  pub fn host(&self) -> Address {
    self
      .state
      .as_ref()
      .map_or_else(|| self.address.clone(), |state| state.address.clone())
  }

  /// Binds the listener and installs the protocol.
  pub async fn initialize(&mut self, protocol: ServerProtocol) -> Result<(), ServerError> {
    if self.state.is_some() {
      return Err(ServerError::AlreadyInitialized);
    }

    debug!(address = %self.address, "Initializing server");
    let listener = Listener::bind(&self.address).await?;
    let address = listener.local_address()?;
    self.state = Some(Initialized {
      listener,
      protocol,
      address,
    });
    Ok(())
  }

  /// Whether the server is initialized and not yet stopped.
  #[must_use]
  pub fn is_running(&self) -> bool {
    self.state.is_some()
  }

  /// Runs the event loop until the protocol stops the server.
  pub async fn start(&mut self) -> Result<RunSummary, ServerError> {
    let Initialized {
      listener,
      mut protocol,
      address,
    } = self.state.take().ok_or(ServerError::NotInitialized)?;

    let started = Instant::now();
    info!(address = %address, workers = protocol.pool().count(), "Starting server");

    let mut exits = self.exits.take();
    let mut codec = FrameCodec::new(Arc::clone(&self.serializer));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ConnectionEvent>();
    let mut control = LoopControl {
      running: true,
      connections: HashMap::new(),
    };
    let mut next_id: ConnectionId = 0;
    let mut failure: Option<ProtocolError> = None;

    while control.running {
      tokio::select! {
        accepted = listener.accept() => match accepted {
          Ok(connection) => {
            next_id += 1;
            debug!(connection = next_id, peer = %connection.peer, "Client connected");
            let handle = transport::drive(next_id, connection, events_tx.clone());
            control.connections.insert(next_id, handle);
          }
          Err(e) => warn!(error = %e, "Error accepting connection"),
        },
        Some(event) = events_rx.recv() => {
          if let Err(e) = dispatch(event, &mut codec, &mut protocol, &mut control) {
            error!(error = %e, "Aborting run");
            control.shutdown();
            failure = Some(e);
          }
        }
        Some(id) = next_exit(&mut exits) => {
          debug!(worker = %id, "Worker exited");
          if let Err(e) = protocol.handle_exit(&id, &mut control) {
            error!(error = %e, "Aborting run");
            control.shutdown();
            failure = Some(e);
          }
        }
      }
    }

    drop(listener);
    self.remove_socket_file();

    let summary = protocol.summary();
    info!(
      total_time_sec = started.elapsed().as_secs_f64(),
      dispatched = summary.dispatched,
      lost_workers = summary.lost_workers,
      undelivered = summary.undelivered,
      "Server stopped"
    );

    match failure {
      Some(e) => Err(e.into()),
      None => Ok(summary),
    }
  }

  /// Stops a server that was initialized but never started.
  pub fn stop(&mut self) -> Result<(), ServerError> {
    if self.state.take().is_none() {
      return Err(ServerError::AlreadyStopped);
    }
    self.remove_socket_file();
    debug!(address = %self.address, "Server stopped");
    Ok(())
  }

  fn remove_socket_file(&self) {
    if let Some(path) = &self.socket_path
      && path.exists()
      && let Err(e) = std::fs::remove_file(path)
    {
      warn!(path = %path.display(), error = %e, "Failed to remove socket file");
    }
  }
}

impl Drop for SocketServer {
  fn drop(&mut self) {
    self.remove_socket_file();
  }
}

async fn next_exit(exits: &mut Option<mpsc::UnboundedReceiver<WorkerId>>) -> Option<WorkerId> {
  match exits {
    Some(exits) => exits.recv().await,
    None => std::future::pending().await,
  }
}

fn dispatch(
  event: ConnectionEvent,
  codec: &mut FrameCodec,
  protocol: &mut ServerProtocol,
  control: &mut LoopControl,
) -> Result<(), ProtocolError> {
  match event {
    ConnectionEvent::Data(id, data) => {
      let frames = match codec.feed_with_sizes(id, &data) {
        Ok(messages) => messages,
        Err(e) => {
          warn!(connection = id, error = %e, "Undecodable frame, disconnecting");
          if let Some(handle) = control.connections.get(&id) {
            handle.close();
          }
          return Ok(());
        }
      };

      for (message, size) in frames {
        let Some(handle) = control.connections.get(&id).cloned() else {
          break;
        };
        debug!(
          connection = id,
          message = %message.message_type(),
          size,
          "Message received"
        );
        let mut client = ConnectionClient {
          handle,
          codec: &*codec,
        };
        protocol.handle(message, &mut client, &mut *control)?;
        if !control.running {
          break;
        }
      }
      Ok(())
    }
    ConnectionEvent::Error(id, e) => {
      warn!(connection = id, error = %e, "Connection error");
      Ok(())
    }
    ConnectionEvent::Closed(id) => {
      codec.release(id);
      control.connections.remove(&id);
      debug!(connection = id, "Client disconnected");
      if control.running {
        protocol.handle_close(id, &mut *control)?;
      }
      Ok(())
    }
  }
}

struct LoopControl {
  running: bool,
  connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl LoopControl {
  fn shutdown(&mut self) {
    self.running = false;
    for handle in self.connections.values() {
      handle.close();
    }
    self.connections.clear();
  }
}

impl Server for LoopControl {
  fn is_running(&self) -> bool {
    self.running
  }

  fn stop(&mut self) -> Result<(), ServerError> {
    if !self.running {
      return Err(ServerError::AlreadyStopped);
    }
    debug!(connections = self.connections.len(), "Stopping server");
    self.shutdown();
    Ok(())
  }
}

struct ConnectionClient<'a> {
  handle: ConnectionHandle,
  codec: &'a FrameCodec,
}

impl Client for ConnectionClient<'_> {
  fn connection_id(&self) -> ConnectionId {
    self.handle.id()
  }

  fn send(&mut self, message: Message) -> Result<(), TransportError> {
    let frame = self.codec.encode(&message)?;
    self.handle.send(frame)
  }

  fn disconnect(&mut self) {
    debug!(connection = self.handle.id(), peer = self.handle.peer(), "Disconnecting client");
    self.handle.close();
  }
}

//! Tokio socket client running a [`ClientProtocol`] against a coordinator.

use super::WorkerError;
use super::protocol::{ClientProtocol, CoordinatorLink};
use crate::codec::{ConnectionId, FrameCodec};
use crate::message::Message;
use crate::serializer::{JsonSerializer, Serializer};
use crate::transport::{self, Address, TransportError};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// The single connection a worker holds.
const COORDINATOR_CONNECTION: ConnectionId = 0;

/// Default limit for reaching the coordinator.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects a worker to its coordinator and runs it until the coordinator
/// closes the connection.
#[derive(Debug, Clone)]
pub struct SocketClient {
  serializer: Arc<dyn Serializer>,
  connect_timeout: Duration,
}

impl Default for SocketClient {
  fn default() -> Self {
    Self::new()
  }
}

impl SocketClient {
  /// Client using the JSON serializer.
  #[must_use]
  pub fn new() -> Self {
    Self {
      serializer: Arc::new(JsonSerializer),
      connect_timeout: DEFAULT_CONNECT_TIMEOUT,
    }
  }

  /// Replaces the wire serializer.
  #[must_use]
  pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
    self.serializer = serializer;
    self
  }

  /// Limits how long connecting to the coordinator may take.
  #[must_use]
  pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
    self.connect_timeout = connect_timeout;
    self
  }

  /// Connects to `address`, identifies and processes batches until the
  /// coordinator disconnects. Returns the protocol for inspection.
  pub async fn connect(
    &self,
    address: &Address,
    mut protocol: ClientProtocol,
  ) -> Result<ClientProtocol, WorkerError> {
    let started = Instant::now();
    debug!(worker = %protocol.id(), address = %address, "Connecting to server");

    let mut connection = transport::connect_timeout(address, self.connect_timeout).await?;
    debug!(worker = %protocol.id(), peer = %connection.peer, "Connected to server");

    let mut codec = FrameCodec::new(Arc::clone(&self.serializer));
    let mut outbox = Outbox {
      codec: &codec,
      frames: Vec::new(),
    };
    protocol.identify(&mut outbox)?;
    let frames = outbox.frames;
    flush(&mut connection.writer, frames).await?;

    let mut buffer = BytesMut::with_capacity(8192);
    loop {
      buffer.clear();
      let n = connection
        .reader
        .read_buf(&mut buffer)
        .await
        .map_err(TransportError::from)?;
      if n == 0 {
        break;
      }

      for (message, size) in codec.feed_with_sizes(COORDINATOR_CONNECTION, &buffer)? {
        debug!(
          worker = %protocol.id(),
          message = %message.message_type(),
          size,
          "Received from server"
        );
        let mut outbox = Outbox {
          codec: &codec,
          frames: Vec::new(),
        };
        protocol.handle(message, &mut outbox)?;
        let frames = outbox.frames;
        flush(&mut connection.writer, frames).await?;
      }
    }

    codec.release(COORDINATOR_CONNECTION);
    info!(
      worker = %protocol.id(),
      processed = protocol.processed(),
      total_connection_time_sec = started.elapsed().as_secs_f64(),
      "Server closed connection, worker stopped"
    );
    Ok(protocol)
  }
}

struct Outbox<'a> {
  codec: &'a FrameCodec,
  frames: Vec<Bytes>,
}

impl CoordinatorLink for Outbox<'_> {
  fn send(&mut self, message: Message) -> Result<(), TransportError> {
    self.frames.push(self.codec.encode(&message)?);
    Ok(())
  }
}

async fn flush(writer: &mut transport::WriteHalf, frames: Vec<Bytes>) -> Result<(), TransportError> {
  for frame in frames {
    writer.write_all(&frame).await?;
  }
  writer.flush().await?;
  Ok(())
}

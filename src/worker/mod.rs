//! Worker side: the reactive protocol and the socket client that runs it.

mod client;
mod protocol;

pub use client::{DEFAULT_CONNECT_TIMEOUT, SocketClient};
pub use protocol::{ClientProtocol, ClientState, CoordinatorLink};

use crate::cache::CacheError;
use crate::codec::CodecError;
use crate::message::MessageType;
use crate::processor::ProcessorError;
use crate::transport::TransportError;

/// Errors that end a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  /// Connecting or talking to the coordinator failed.
  #[error("Communication error: {0}")]
  Transport(#[from] TransportError),
  /// A frame from the coordinator could not be decoded.
  #[error("Invalid frame: {0}")]
  Codec(#[from] CodecError),
  /// The coordinator sent a message the worker cannot handle in its state.
  #[error("Unexpected {message} message while {state}")]
  UnexpectedMessage {
    /// Received message type.
    message: MessageType,
    /// Worker state at the time.
    state: ClientState,
  },
  /// Running the pipeline failed.
  #[error("Processing failed: {0}")]
  Processor(#[from] ProcessorError),
  /// Writing results to the cache failed.
  #[error("Cache error: {0}")]
  Cache(#[from] CacheError),
}

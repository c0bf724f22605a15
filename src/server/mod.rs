//! Coordinator side: the protocol state machine and the socket server that
//! drives it.

mod protocol;
mod socket;

pub use protocol::{Client, ProtocolError, RunSummary, Server, ServerProtocol};
pub use socket::SocketServer;

use crate::transport::TransportError;
use std::path::PathBuf;

/// Server lifecycle and runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
  /// `initialize` was called on a server that is already initialized.
  #[error("Server already initialized")]
  AlreadyInitialized,
  /// `start` was called before `initialize`.
  #[error("Server not initialized")]
  NotInitialized,
  /// `stop` was called on a server that is not running.
  #[error("Server already stopped")]
  AlreadyStopped,
  /// The Unix socket folder is missing or not a directory.
  #[error("Given path does not exist or is not a directory: {0}")]
  InvalidSocketFolder(PathBuf),
  /// The generated Unix socket path is too long for the platform.
  #[error("Socket path is too long, max {max} bytes, given {len}")]
  SocketPathTooLong {
    /// Maximum length.
    max: usize,
    /// Actual length.
    len: usize,
  },
  /// Binding or accepting failed.
  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),
  /// The protocol aborted the run.
  #[error("Protocol error: {0}")]
  Protocol(#[source] Box<ProtocolError>),
}

impl From<ProtocolError> for ServerError {
  fn from(e: ProtocolError) -> Self {
    ServerError::Protocol(Box::new(e))
  }
}

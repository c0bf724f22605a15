//! # Coordinator/Worker Messages
//!
//! Typed envelopes exchanged between the coordinator and its workers.
//!
//! ## Overview
//!
//! A conversation always follows the same shape:
//!
//! ```text
//! worker                      coordinator
//!   | ---- Identify { id } ------> |
//!   | <--- Setup { pipes, .. } --- |
//!   | ---- Fetch { id } ---------> |
//!   | <--- Process { batch } ----- |
//!   | ---- Fetch { id } ---------> |
//!   |            ...               |
//!   | <--- (connection closed) --- |
//! ```
//!
//! Every variant carries exactly the fields its type needs, so a message can
//! never be missing a required payload entry.

use crate::batch::Batch;
use crate::cache::CacheRef;
use crate::pipes::{Partitioning, Pipes};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of generated worker identifiers.
const WORKER_ID_LEN: usize = 16;

/// Unique identifier of a worker inside a [`Pool`](crate::pool::Pool).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
  /// Creates a worker ID from an existing string.
  #[must_use]
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  /// Generates a fresh random worker ID.
  #[must_use]
  pub fn generate() -> Self {
    let token: String = rand::thread_rng()
      .sample_iter(&Alphanumeric)
      .take(WORKER_ID_LEN)
      .map(char::from)
      .collect();
    Self(format!("worker-{}", token))
  }

  /// Returns the ID as a string slice.
  #[must_use]
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<String> for WorkerId {
  fn from(s: String) -> Self {
    WorkerId(s)
  }
}

impl From<&str> for WorkerId {
  fn from(s: &str) -> Self {
    WorkerId(s.to_string())
  }
}

impl fmt::Display for WorkerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Discriminant of a [`Message`], used for logging and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
  /// Worker announces its identity.
  Identify,
  /// Coordinator hands the pipeline to a worker.
  Setup,
  /// Worker asks for the next batch.
  Fetch,
  /// Coordinator sends a batch to process.
  Process,
}

impl fmt::Display for MessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      MessageType::Identify => "IDENTIFY",
      MessageType::Setup => "SETUP",
      MessageType::Fetch => "FETCH",
      MessageType::Process => "PROCESS",
    };
    f.write_str(name)
  }
}

/// A message exchanged over a coordinator/worker connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
  /// Sent by a worker right after connecting.
  Identify {
    /// Identity assigned to the worker at launch.
    id: WorkerId,
  },
  /// Sent by the coordinator once a worker has been identified.
  Setup {
    /// Stages the worker must run for every batch.
    pipes: Pipes,
    /// Partition rules applied before the stages.
    partitioning: Partitioning,
    /// Shared result sink every worker writes into.
    cache: CacheRef,
    /// Key under which results are appended in the sink.
    cache_id: String,
  },
  /// Sent by a worker when it is ready for the next batch.
  Fetch {
    /// Identity of the requesting worker.
    id: WorkerId,
  },
  /// Sent by the coordinator in response to a [`Message::Fetch`].
  Process {
    /// The batch to run through the pipeline.
    batch: Batch,
  },
}

impl Message {
  /// Builds an identify message.
  #[must_use]
  pub fn identify(id: WorkerId) -> Self {
    Message::Identify { id }
  }

  /// Builds a setup message.
  #[must_use]
  pub fn setup(
    pipes: Pipes,
    partitioning: Partitioning,
    cache: CacheRef,
    cache_id: impl Into<String>,
  ) -> Self {
    Message::Setup {
      pipes,
      partitioning,
      cache,
      cache_id: cache_id.into(),
    }
  }

  /// Builds a fetch message.
  #[must_use]
  pub fn fetch(id: WorkerId) -> Self {
    Message::Fetch { id }
  }

  /// Builds a process message.
  #[must_use]
  pub fn process(batch: Batch) -> Self {
    Message::Process { batch }
  }

  /// Returns the type of this message.
  #[must_use]
  pub fn message_type(&self) -> MessageType {
    match self {
      Message::Identify { .. } => MessageType::Identify,
      Message::Setup { .. } => MessageType::Setup,
      Message::Fetch { .. } => MessageType::Fetch,
      Message::Process { .. } => MessageType::Process,
    }
  }
}

//! Worker-side protocol state machine.
//!
//! ```text
//! Connected --identify--> Identified --SETUP--> Ready --PROCESS--> Ready ...
//! ```
//!
//! The worker only reacts: every `PROCESS` is answered with exactly one
//! `FETCH` after the batch has been processed and written to the cache.

use super::WorkerError;
use crate::cache::Cache;
use crate::message::{Message, WorkerId};
use crate::processor::Processor;
use crate::transport::TransportError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The coordinator as seen by a worker.
pub trait CoordinatorLink {
  /// Sends a message to the coordinator.
  fn send(&mut self, message: Message) -> Result<(), TransportError>;
}

/// Where a worker is in its conversation with the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
  /// Connected, identity not sent yet.
  Connected,
  /// Identity sent, waiting for setup.
  Identified,
  /// Pipeline installed, processing batches.
  Ready,
}

impl fmt::Display for ClientState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ClientState::Connected => "connected",
      ClientState::Identified => "identified",
      ClientState::Ready => "ready",
    };
    f.write_str(name)
  }
}

struct Sink {
  cache: Arc<dyn Cache>,
  cache_id: String,
}

/// Worker-side protocol driving one [`Processor`].
pub struct ClientProtocol {
  processor: Processor,
  state: ClientState,
  sink: Option<Sink>,
  processed: usize,
}

impl ClientProtocol {
  /// Creates the protocol around `processor`.
  #[must_use]
  pub fn new(processor: Processor) -> Self {
    Self {
      processor,
      state: ClientState::Connected,
      sink: None,
      processed: 0,
    }
  }

  /// Identity of this worker.
  #[must_use]
  pub fn id(&self) -> &WorkerId {
    self.processor.id()
  }

  /// Current state.
  #[must_use]
  pub fn state(&self) -> ClientState {
    self.state
  }

  /// Number of batches processed so far.
  #[must_use]
  pub fn processed(&self) -> usize {
    self.processed
  }

  /// The processor, with whatever pipeline setup installed.
  #[must_use]
  pub fn processor(&self) -> &Processor {
    &self.processor
  }

  /// Sends the identify message. Called once, right after connecting.
  pub fn identify(&mut self, link: &mut dyn CoordinatorLink) -> Result<(), WorkerError> {
    debug!(worker = %self.id(), "Identifying");
    link.send(Message::identify(self.id().clone()))?;
    self.state = ClientState::Identified;
    Ok(())
  }

  /// Handles one message from the coordinator.
  pub fn handle(
    &mut self,
    message: Message,
    link: &mut dyn CoordinatorLink,
  ) -> Result<(), WorkerError> {
    match (message, self.state) {
      (
        Message::Setup {
          pipes,
          partitioning,
          cache,
          cache_id,
        },
        ClientState::Identified | ClientState::Ready,
      ) => {
        if self.state == ClientState::Ready {
          warn!(worker = %self.id(), "Setup received again, replacing pipeline");
        }
        info!(worker = %self.id(), stages = pipes.stages().len(), cache_id = %cache_id, "Setup received");
        self.processor.setup(pipes, partitioning);
        self.sink = Some(Sink {
          cache: cache.open(),
          cache_id,
        });
        self.state = ClientState::Ready;
        link.send(Message::fetch(self.id().clone()))?;
        Ok(())
      }
      (Message::Process { batch }, ClientState::Ready) => {
        let rows = batch.len();
        let output = self.processor.process(batch).map_err(|e| {
          error!(worker = %self.id(), rows, error = %e, "Batch processing failed");
          WorkerError::from(e)
        })?;

        if let Some(sink) = &self.sink {
          sink.cache.append(&sink.cache_id, &output).map_err(|e| {
            error!(worker = %self.id(), rows, error = %e, "Failed to store batch");
            WorkerError::from(e)
          })?;
        }

        self.processed += 1;
        debug!(worker = %self.id(), rows, output_rows = output.len(), "Batch processed");
        link.send(Message::fetch(self.id().clone()))?;
        Ok(())
      }
      (message, state) => Err(WorkerError::UnexpectedMessage {
        message: message.message_type(),
        state,
      }),
    }
  }
}

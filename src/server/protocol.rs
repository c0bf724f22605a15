//! Coordinator-side protocol state machine.
//!
//! [`ServerProtocol::handle`] is called once per decoded message from the
//! server's event loop. It issues at most one outbound action per call and
//! never waits on the network:
//!
//! - `IDENTIFY(id)` with a pool member that is not connected yet marks it
//!   connected and replies `SETUP`; anything else disconnects the client.
//! - `FETCH(id)` replies `PROCESS(batch)` while the extractor has data. Once it
//!   is exhausted the worker is disconnected, and when no worker is left
//!   connected the server is stopped.
//!
//! A new batch is only ever sent in answer to a `FETCH`, so each worker has at
//! most one batch in flight.
//!
//! A worker that is lost, or that exits before identifying, no longer holds the
//! run open: once every pool member has identified or exited and nothing is
//! connected, the server is stopped.

use crate::cache::CacheRef;
use crate::codec::ConnectionId;
use crate::extractor::{ExtractError, Extractor};
use crate::message::{Message, WorkerId};
use crate::pipes::{Partitioning, Pipes};
use crate::pool::{Pool, WorkerStatus};
use crate::server::ServerError;
use crate::transport::TransportError;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Errors that abort the whole run.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
  /// The extractor failed.
  #[error("Extractor failed: {0}")]
  Extract(#[from] ExtractError),
  /// Stopping the server failed.
  #[error("Server error: {0}")]
  Server(#[from] ServerError),
}

/// The coordinator's view of one worker connection.
pub trait Client {
  /// Connection this client talks over.
  fn connection_id(&self) -> ConnectionId;

  /// Sends a message to the worker.
  fn send(&mut self, message: Message) -> Result<(), TransportError>;

  /// Closes the connection.
  fn disconnect(&mut self);
}

/// The listener as seen by the protocol.
pub trait Server {
  /// Whether the listener is still accepting connections.
  fn is_running(&self) -> bool;

  /// Stops the listener and closes every tracked connection.
  fn stop(&mut self) -> Result<(), ServerError>;
}

/// Counters describing a finished (or stopped) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
  /// Batches sent to workers.
  pub dispatched: usize,
  /// Workers whose connection ended while they were still expected to fetch.
  pub lost_workers: usize,
  /// Batches that could not be written to their worker.
  pub undelivered: usize,
}

impl RunSummary {
  /// Whether every batch reached a worker and no worker was lost.
  #[must_use]
  pub fn is_complete(&self) -> bool {
    self.lost_workers == 0 && self.undelivered == 0
  }
}

/// Coordinator-side protocol.
pub struct ServerProtocol {
  cache: CacheRef,
  cache_id: String,
  pool: Pool,
  extractor: Box<dyn Extractor>,
  pipes: Pipes,
  partitioning: Partitioning,
  connections: HashMap<ConnectionId, WorkerId>,
  identified: HashSet<WorkerId>,
  exited: HashSet<WorkerId>,
  summary: RunSummary,
}

impl ServerProtocol {
  /// Creates the protocol for one run.
  pub fn new(
    cache: CacheRef,
    cache_id: impl Into<String>,
    pool: Pool,
    extractor: impl Extractor + 'static,
    pipes: Pipes,
  ) -> Self {
    Self {
      cache,
      cache_id: cache_id.into(),
      pool,
      extractor: Box::new(extractor),
      pipes,
      partitioning: Partitioning::none(),
      connections: HashMap::new(),
      identified: HashSet::new(),
      exited: HashSet::new(),
      summary: RunSummary::default(),
    }
  }

  /// Sets the partition rules sent to workers.
  #[must_use]
  pub fn with_partitioning(mut self, partitioning: Partitioning) -> Self {
    self.partitioning = partitioning;
    self
  }

  /// The worker registry.
  #[must_use]
  pub fn pool(&self) -> &Pool {
    &self.pool
  }

  /// Counters so far.
  #[must_use]
  pub fn summary(&self) -> RunSummary {
    self.summary
  }

  /// Handles one message received from `client`.
  pub fn handle(
    &mut self,
    message: Message,
    client: &mut dyn Client,
    server: &mut dyn Server,
  ) -> Result<(), ProtocolError> {
    match message {
      Message::Identify { id } => self.identify(id, client, server),
      Message::Fetch { id } => self.fetch(id, client, server),
      other => {
        warn!(
          connection = client.connection_id(),
          message = %other.message_type(),
          "Unexpected message from worker, disconnecting"
        );
        self.drop_client(client, server)
      }
    }
  }

  /// Handles the end of a connection that the protocol did not close itself.
  pub fn handle_close(
    &mut self,
    connection: ConnectionId,
    server: &mut dyn Server,
  ) -> Result<(), ProtocolError> {
    let Some(id) = self.connections.remove(&connection) else {
      return Ok(());
    };
    if self.pool.status(&id) != Some(WorkerStatus::Connected) {
      return Ok(());
    }

    error!(worker = %id, connection, "Worker connection lost");
    self.lose_worker(&id, server)
  }

  /// Handles the exit of a launched worker.
  ///
  /// Only a worker that never identified is affected: it is counted as lost.
  /// Workers that did identify are accounted for by their connection.
  pub fn handle_exit(
    &mut self,
    id: &WorkerId,
    server: &mut dyn Server,
  ) -> Result<(), ProtocolError> {
    if self.pool.status(id).is_none() || self.identified.contains(id) {
      return Ok(());
    }
    if !self.exited.insert(id.clone()) {
      return Ok(());
    }

    error!(worker = %id, "Worker exited before identifying");
    self.summary.lost_workers += 1;
    self.stop_when_settled(server)
  }

  fn identify(
    &mut self,
    id: WorkerId,
    client: &mut dyn Client,
    server: &mut dyn Server,
  ) -> Result<(), ProtocolError> {
    if let Some(bound) = self.connections.get(&client.connection_id()) {
      warn!(
        worker = %id,
        bound = %bound,
        connection = client.connection_id(),
        "Connection is already identified, disconnecting"
      );
      return self.drop_client(client, server);
    }
    if self.exited.contains(&id) {
      warn!(worker = %id, "Identify from an exited worker, disconnecting");
      client.disconnect();
      return Ok(());
    }

    match self.pool.status(&id) {
      None => {
        warn!(worker = %id, "Unknown worker identified, disconnecting");
        client.disconnect();
        return Ok(());
      }
      Some(WorkerStatus::Connected) => {
        warn!(worker = %id, "Worker is already connected, disconnecting duplicate");
        client.disconnect();
        return Ok(());
      }
      Some(WorkerStatus::Disconnected) => {}
    }

    self.pool.connect(&id);
    self.identified.insert(id.clone());
    self
      .connections
      .insert(client.connection_id(), id.clone());

    let setup = Message::setup(
      self.pipes.clone(),
      self.partitioning.clone(),
      self.cache.clone(),
      self.cache_id.clone(),
    );
    match client.send(setup) {
      Ok(()) => {
        info!(worker = %id, "Worker identified, setup sent");
        Ok(())
      }
      Err(e) => {
        warn!(worker = %id, error = %e, "Failed to send setup");
        self.connections.remove(&client.connection_id());
        self.lose_worker(&id, server)
      }
    }
  }

  fn fetch(
    &mut self,
    id: WorkerId,
    client: &mut dyn Client,
    server: &mut dyn Server,
  ) -> Result<(), ProtocolError> {
    let bound = self.connections.get(&client.connection_id());
    if bound != Some(&id) || self.pool.status(&id) != Some(WorkerStatus::Connected) {
      warn!(
        worker = %id,
        connection = client.connection_id(),
        "Fetch from unidentified worker, disconnecting"
      );
      return self.drop_client(client, server);
    }

    match self.extractor.next_batch()? {
      Some(batch) => {
        let rows = batch.len();
        match client.send(Message::process(batch)) {
          Ok(()) => {
            self.summary.dispatched += 1;
            debug!(worker = %id, rows, "Batch dispatched");
          }
          Err(e) => {
            error!(worker = %id, rows, error = %e, "Failed to dispatch batch");
            self.summary.undelivered += 1;
          }
        }
        Ok(())
      }
      None => {
        debug!(worker = %id, "No batches left, disconnecting worker");
        self.connections.remove(&client.connection_id());
        client.disconnect();
        self.pool.disconnect(&id);
        self.stop_when_drained(server)
      }
    }
  }

  fn drop_client(
    &mut self,
    client: &mut dyn Client,
    server: &mut dyn Server,
  ) -> Result<(), ProtocolError> {
    client.disconnect();
    match self.connections.remove(&client.connection_id()) {
      Some(id) if self.pool.status(&id) == Some(WorkerStatus::Connected) => {
        self.lose_worker(&id, server)
      }
      _ => Ok(()),
    }
  }

  fn lose_worker(&mut self, id: &WorkerId, server: &mut dyn Server) -> Result<(), ProtocolError> {
    self.pool.disconnect(id);
    self.summary.lost_workers += 1;
    self.stop_when_settled(server)
  }

  // Keep waiting while some pool members may still identify.
  fn stop_when_settled(&mut self, server: &mut dyn Server) -> Result<(), ProtocolError> {
    if self.identified.len() + self.exited.len() == self.pool.count() {
      self.stop_when_drained(server)?;
    }
    Ok(())
  }

  fn stop_when_drained(&mut self, server: &mut dyn Server) -> Result<(), ProtocolError> {
    if self.pool.only_connected().count() == 0 && server.is_running() {
      info!(
        dispatched = self.summary.dispatched,
        lost_workers = self.summary.lost_workers,
        "All workers disconnected, stopping server"
      );
      server.stop()?;
    }
    Ok(())
  }
}

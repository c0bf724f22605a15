//! Worker registry.
//!
//! A [`Pool`] is generated once per run with a fixed number of workers and is
//! the single source of truth for how many workers the coordinator expects.
//! Workers are never added or removed afterwards; only their status toggles.

use crate::message::WorkerId;

/// Connection status of a pool member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerStatus {
  /// The worker has not identified yet, or its connection ended.
  #[default]
  Disconnected,
  /// The worker identified itself and its connection is open.
  Connected,
}

/// A registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
  id: WorkerId,
  status: WorkerStatus,
}

impl Worker {
  /// Creates a disconnected worker.
  #[must_use]
  pub fn new(id: WorkerId) -> Self {
    Self {
      id,
      status: WorkerStatus::Disconnected,
    }
  }

  /// Returns the worker ID.
  #[must_use]
  pub fn id(&self) -> &WorkerId {
    &self.id
  }

  /// Returns the current status.
  #[must_use]
  pub fn status(&self) -> WorkerStatus {
    self.status
  }

  /// Whether the worker is connected.
  #[must_use]
  pub fn is_connected(&self) -> bool {
    self.status == WorkerStatus::Connected
  }
}

/// Ordered, fixed-size set of workers keyed by ID.
///
/// `connect` and `disconnect` do not validate the ID; callers check
/// [`Pool::has`] first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pool {
  workers: Vec<Worker>,
}

impl Pool {
  /// Generates `size` disconnected workers with fresh unique IDs.
  #[must_use]
  pub fn generate(size: usize) -> Self {
    let mut workers: Vec<Worker> = Vec::with_capacity(size);
    while workers.len() < size {
      let id = WorkerId::generate();
      if workers.iter().all(|w| w.id != id) {
        workers.push(Worker::new(id));
      }
    }
    Self { workers }
  }

  /// Builds a pool from known IDs, all disconnected. Duplicates are skipped.
  #[must_use]
  pub fn from_ids(ids: impl IntoIterator<Item = WorkerId>) -> Self {
    let mut workers: Vec<Worker> = Vec::new();
    for id in ids {
      if workers.iter().all(|w| w.id != id) {
        workers.push(Worker::new(id));
      }
    }
    Self { workers }
  }

  /// Marks `id` as connected.
  pub fn connect(&mut self, id: &WorkerId) {
    if let Some(worker) = self.find_mut(id) {
      worker.status = WorkerStatus::Connected;
    }
  }

  /// Marks `id` as disconnected.
  pub fn disconnect(&mut self, id: &WorkerId) {
    if let Some(worker) = self.find_mut(id) {
      worker.status = WorkerStatus::Disconnected;
    }
  }

  /// Whether `id` belongs to this pool.
  #[must_use]
  pub fn has(&self, id: &WorkerId) -> bool {
    self.workers.iter().any(|w| &w.id == id)
  }

  /// Returns the status of `id`, if it belongs to the pool.
  #[must_use]
  pub fn status(&self, id: &WorkerId) -> Option<WorkerStatus> {
    self.workers.iter().find(|w| &w.id == id).map(Worker::status)
  }

  /// IDs in generation order.
  #[must_use]
  pub fn ids(&self) -> Vec<WorkerId> {
    self.workers.iter().map(|w| w.id.clone()).collect()
  }

  /// A fresh pool containing only the connected workers.
  #[must_use]
  pub fn only_connected(&self) -> Pool {
    Pool {
      workers: self
        .workers
        .iter()
        .filter(|w| w.is_connected())
        .cloned()
        .collect(),
    }
  }

  /// Number of workers in this pool.
  #[must_use]
  pub fn count(&self) -> usize {
    self.workers.len()
  }

  /// Whether the pool has no workers.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.workers.is_empty()
  }

  /// Iterates over the workers.
  pub fn iter(&self) -> impl Iterator<Item = &Worker> {
    self.workers.iter()
  }

  fn find_mut(&mut self, id: &WorkerId) -> Option<&mut Worker> {
    self.workers.iter_mut().find(|w| &w.id == id)
  }
}

//! Pull-based batch sources consumed by the coordinator.
//!
//! The coordinator pulls one batch per `FETCH` from inside its event loop, so
//! implementations must return quickly: either batches already in memory or
//! a bounded-latency read.

use crate::batch::{Batch, Row};
use std::collections::VecDeque;

/// Errors raised by an extractor.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
  /// The underlying source failed.
  #[error("Extraction failed: {0}")]
  Source(String),
}

/// Supplies the dataset to dispatch, one batch at a time.
pub trait Extractor: Send {
  /// Returns the next batch, or `None` once the source is exhausted.
  fn next_batch(&mut self) -> Result<Option<Batch>, ExtractError>;
}

/// Extractor over batches held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecExtractor {
  batches: VecDeque<Batch>,
}

impl VecExtractor {
  /// Creates an extractor yielding `batches` in order.
  #[must_use]
  pub fn new(batches: Vec<Batch>) -> Self {
    Self {
      batches: batches.into(),
    }
  }

  /// Batches not yet extracted.
  #[must_use]
  pub fn remaining(&self) -> usize {
    self.batches.len()
  }
}

impl Extractor for VecExtractor {
  fn next_batch(&mut self) -> Result<Option<Batch>, ExtractError> {
    Ok(self.batches.pop_front())
  }
}

/// Extractor that cuts a row iterator into batches of `batch_size` rows.
pub struct ChunkExtractor<I> {
  rows: I,
  batch_size: usize,
}

impl<I> ChunkExtractor<I>
where
  I: Iterator<Item = Row> + Send,
{
  /// Creates the extractor. A `batch_size` of zero is treated as one.
  #[must_use]
  pub fn new(rows: impl IntoIterator<IntoIter = I>, batch_size: usize) -> Self {
    Self {
      rows: rows.into_iter(),
      batch_size: batch_size.max(1),
    }
  }
}

impl<I> Extractor for ChunkExtractor<I>
where
  I: Iterator<Item = Row> + Send,
{
  fn next_batch(&mut self) -> Result<Option<Batch>, ExtractError> {
    let rows: Vec<Row> = self.rows.by_ref().take(self.batch_size).collect();
    if rows.is_empty() {
      Ok(None)
    } else {
      Ok(Some(Batch::new(rows)))
    }
  }
}

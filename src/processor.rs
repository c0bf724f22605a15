//! Worker-local execution of the pipeline over one batch.

use crate::batch::{Batch, BatchError};
use crate::message::WorkerId;
use crate::pipes::{Partitioning, Pipes, SaveMode, StageError};
use tracing::debug;

/// Errors raised while processing a batch.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
  /// Partitioning the batch failed.
  #[error("Partitioning failed: {0}")]
  Partition(#[from] BatchError),
  /// A stage failed.
  #[error("Stage failed: {0}")]
  Stage(#[from] StageError),
}

/// Runs the configured pipeline over batches for one worker.
///
/// Loaders always run in [`SaveMode::Append`], whatever the pipeline says:
/// several workers write to the same output concurrently, and an overwrite
/// from one would erase what the others produced.
#[derive(Debug, Clone)]
pub struct Processor {
  id: WorkerId,
  pipes: Pipes,
  partitioning: Partitioning,
}

impl Processor {
  /// Creates a processor with an empty pipeline.
  #[must_use]
  pub fn new(id: WorkerId) -> Self {
    Self {
      id,
      pipes: Pipes::empty(),
      partitioning: Partitioning::none(),
    }
  }

  /// Worker this processor runs for.
  #[must_use]
  pub fn id(&self) -> &WorkerId {
    &self.id
  }

  /// Installs the pipeline and partition rules, replacing any previous ones.
  pub fn setup(&mut self, pipes: Pipes, partitioning: Partitioning) {
    debug!(
      worker = %self.id,
      stages = pipes.stages().len(),
      save_mode = ?pipes.save_mode(),
      partition_by = ?partitioning.partition_by,
      "Processor configured"
    );
    self.pipes = pipes;
    self.partitioning = partitioning;
  }

  /// Currently installed pipeline.
  #[must_use]
  pub fn pipes(&self) -> &Pipes {
    &self.pipes
  }

  /// Currently installed partition rules.
  #[must_use]
  pub fn partitioning(&self) -> &Partitioning {
    &self.partitioning
  }

  /// Runs the pipeline over `batch` and returns the combined output.
  pub fn process(&self, batch: Batch) -> Result<Batch, ProcessorError> {
    if !self.partitioning.filter.accepts(batch.partitions()) {
      debug!(worker = %self.id, rows = batch.len(), "Batch rejected by partition filter");
      return Ok(Batch::empty().with_partitions(batch.partitions().to_vec()));
    }

    let parts = batch.partition_by(&self.partitioning.partition_by)?;
    let mut outputs = Vec::with_capacity(parts.len());
    for part in parts {
      outputs.push(self.pipes.run(part, SaveMode::Append)?);
    }
    Ok(Batch::merge(outputs))
  }
}

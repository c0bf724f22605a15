//! # Pipeline Description
//!
//! Serializable description of "what to run" on every batch. The coordinator
//! owns a [`Pipes`] value and ships it to each worker once, at setup; workers
//! treat it as read-only.
//!
//! ## Stages
//!
//! - **Transforms**: [`Stage::AddEntry`], [`Stage::RenameEntry`],
//!   [`Stage::RemoveEntries`], [`Stage::KeepEntries`], [`Stage::FilterEquals`]
//! - **Loaders**: [`Stage::WriteJson`] writes rows as JSON lines, one file per
//!   call, under `name=value` partition directories
//!
//! Stages run in order; each receives the previous stage's output.

use crate::batch::{Batch, Partition};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Errors raised while running a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
  /// A stage referenced an entry the row does not have.
  #[error("Row has no entry '{0}'")]
  MissingEntry(String),
  /// Output already exists and the save mode forbids writing.
  #[error("Output already exists: {0}")]
  AlreadyExists(PathBuf),
  /// Filesystem failure.
  #[error("I/O error at {path}: {source}")]
  Io {
    /// Path being written.
    path: PathBuf,
    /// Underlying error.
    #[source]
    source: io::Error,
  },
  /// A row could not be encoded.
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// How loaders treat output that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
  /// Add new files next to existing output.
  #[default]
  Append,
  /// Remove existing output before writing.
  Overwrite,
  /// Fail when output already exists.
  ExceptionIfExists,
  /// Skip writing when output already exists.
  Ignore,
}

/// Which partitions a worker accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionFilter {
  /// Accept every batch.
  #[default]
  All,
  /// Accept batches whose partition `name` has one of `values`.
  ///
  /// Unpartitioned batches, and batches not partitioned by `name`, pass.
  OneOf {
    /// Partition column.
    name: String,
    /// Accepted values.
    values: Vec<String>,
  },
}

impl PartitionFilter {
  /// Whether a batch tagged with `partitions` is accepted.
  #[must_use]
  pub fn accepts(&self, partitions: &[Partition]) -> bool {
    match self {
      PartitionFilter::All => true,
      PartitionFilter::OneOf { name, values } => partitions
        .iter()
        .filter(|p| &p.name == name)
        .all(|p| values.contains(&p.value)),
    }
  }
}

/// Partition rules sent to workers alongside the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioning {
  /// Columns each batch is split by before the stages run.
  #[serde(default)]
  pub partition_by: Vec<String>,
  /// Filter applied to incoming batches.
  #[serde(default)]
  pub filter: PartitionFilter,
}

impl Partitioning {
  /// No partitioning at all.
  #[must_use]
  pub fn none() -> Self {
    Self::default()
  }

  /// Splits batches by `columns`.
  #[must_use]
  pub fn by(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self {
      partition_by: columns.into_iter().map(Into::into).collect(),
      filter: PartitionFilter::All,
    }
  }

  /// Sets the partition filter.
  #[must_use]
  pub fn with_filter(mut self, filter: PartitionFilter) -> Self {
    self.filter = filter;
    self
  }
}

/// A single processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
  /// Sets entry `name` to `value` on every row.
  AddEntry {
    /// Entry name.
    name: String,
    /// Value to set.
    value: Value,
  },
  /// Renames entry `from` to `to`.
  RenameEntry {
    /// Current name.
    from: String,
    /// New name.
    to: String,
  },
  /// Removes the listed entries when present.
  RemoveEntries {
    /// Entries to drop.
    names: Vec<String>,
  },
  /// Keeps only the listed entries.
  KeepEntries {
    /// Entries to keep.
    names: Vec<String>,
  },
  /// Keeps rows whose entry `name` equals `value`.
  FilterEquals {
    /// Entry name.
    name: String,
    /// Expected value.
    value: Value,
  },
  /// Writes rows as JSON lines below `path`.
  WriteJson {
    /// Output directory.
    path: PathBuf,
  },
}

impl Stage {
  /// Runs the stage over `batch`.
  pub fn apply(&self, batch: Batch, save_mode: SaveMode) -> Result<Batch, StageError> {
    match self {
      Stage::AddEntry { name, value } => Ok(batch.map(|mut row| {
        row.insert(name.clone(), value.clone());
        row
      })),
      Stage::RenameEntry { from, to } => {
        if batch.rows().iter().any(|row| !row.contains_key(from)) {
          return Err(StageError::MissingEntry(from.clone()));
        }
        Ok(batch.map(|mut row| {
          if let Some(value) = row.remove(from) {
            row.insert(to.clone(), value);
          }
          row
        }))
      }
      Stage::RemoveEntries { names } => Ok(batch.map(|mut row| {
        for name in names {
          row.remove(name);
        }
        row
      })),
      Stage::KeepEntries { names } => {
        Ok(batch.map(|row| row.into_iter().filter(|(k, _)| names.contains(k)).collect()))
      }
      Stage::FilterEquals { name, value } => {
        Ok(batch.filter(|row| row.get(name) == Some(value)))
      }
      Stage::WriteJson { path } => {
        write_json(path, &batch, save_mode)?;
        Ok(batch)
      }
    }
  }

  /// Whether the stage writes output.
  #[must_use]
  pub fn is_loader(&self) -> bool {
    matches!(self, Stage::WriteJson { .. })
  }
}

/// Ordered stage list plus the save mode loaders use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipes {
  stages: Vec<Stage>,
  #[serde(default)]
  save_mode: SaveMode,
}

impl Pipes {
  /// Creates a pipeline from stages.
  #[must_use]
  pub fn new(stages: Vec<Stage>) -> Self {
    Self {
      stages,
      save_mode: SaveMode::default(),
    }
  }

  /// A pipeline that passes batches through untouched.
  #[must_use]
  pub fn empty() -> Self {
    Self::default()
  }

  /// Appends a stage.
  #[must_use]
  pub fn with_stage(mut self, stage: Stage) -> Self {
    self.stages.push(stage);
    self
  }

  /// Sets the save mode.
  #[must_use]
  pub fn with_save_mode(mut self, save_mode: SaveMode) -> Self {
    self.save_mode = save_mode;
    self
  }

  /// Stages in execution order.
  #[must_use]
  pub fn stages(&self) -> &[Stage] {
    &self.stages
  }

  /// Configured save mode.
  #[must_use]
  pub fn save_mode(&self) -> SaveMode {
    self.save_mode
  }

  /// Runs every stage in order.
  pub fn run(&self, batch: Batch, save_mode: SaveMode) -> Result<Batch, StageError> {
    self
      .stages
      .iter()
      .try_fold(batch, |batch, stage| stage.apply(batch, save_mode))
  }
}

fn write_json(root: &Path, batch: &Batch, save_mode: SaveMode) -> Result<(), StageError> {
  if batch.is_empty() {
    return Ok(());
  }

  let dir = batch
    .partitions()
    .iter()
    .fold(root.to_path_buf(), |dir, p| dir.join(p.path_segment()));
  let exists = has_entries(&dir).map_err(io_err(&dir))?;
  match save_mode {
    SaveMode::Append => {}
    SaveMode::Overwrite => {
      if exists {
        fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
      }
    }
    SaveMode::ExceptionIfExists => {
      if exists {
        return Err(StageError::AlreadyExists(dir));
      }
    }
    SaveMode::Ignore => {
      if exists {
        return Ok(());
      }
    }
  }

  fs::create_dir_all(&dir).map_err(io_err(&dir))?;
  let file_path = dir.join(unique_file_name());
  let file = File::create(&file_path).map_err(io_err(&file_path))?;
  let mut writer = BufWriter::new(file);
  for row in batch.rows() {
    serde_json::to_writer(&mut writer, row)?;
    writer.write_all(b"\n").map_err(io_err(&file_path))?;
  }
  writer.flush().map_err(io_err(&file_path))?;
  Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StageError {
  let path = path.to_path_buf();
  move |source| StageError::Io { path, source }
}

fn has_entries(dir: &Path) -> io::Result<bool> {
  match fs::read_dir(dir) {
    Ok(mut entries) => Ok(entries.next().is_some()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(e),
  }
}

fn unique_file_name() -> String {
  let token: String = rand::thread_rng()
    .sample_iter(&Alphanumeric)
    .take(12)
    .map(char::from)
    .collect();
  format!("part-{}.jsonl", token)
}

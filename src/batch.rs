//! Batches of rows moved between coordinator and workers.
//!
//! The coordination protocol never looks inside a [`Batch`]; only the worker's
//! [`Processor`](crate::processor::Processor) and its stages do.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single row: entry name to value.
pub type Row = serde_json::Map<String, Value>;

/// Errors raised by batch-level operations.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
  /// A row has no entry for a partition column.
  #[error("Row has no entry '{0}' to partition by")]
  MissingPartitionEntry(String),
  /// A partition column holds a value that cannot name a partition.
  #[error("Entry '{name}' cannot be used as a partition: {value}")]
  InvalidPartitionValue {
    /// Column name.
    name: String,
    /// Offending value.
    value: Value,
  },
}

/// One `name=value` component of a partition path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
  /// Column the partition was derived from.
  pub name: String,
  /// Rendered value.
  pub value: String,
}

impl Partition {
  /// Creates a partition component.
  #[must_use]
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
    }
  }

  /// Directory name for this partition, `name=value`.
  #[must_use]
  pub fn path_segment(&self) -> String {
    format!("{}={}", self.name, self.value)
  }
}

/// An ordered chunk of rows, optionally tagged with the partition it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
  rows: Vec<Row>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  partitions: Vec<Partition>,
}

impl Batch {
  /// Creates an unpartitioned batch.
  #[must_use]
  pub fn new(rows: Vec<Row>) -> Self {
    Self {
      rows,
      partitions: Vec::new(),
    }
  }

  /// Creates an empty batch.
  #[must_use]
  pub fn empty() -> Self {
    Self::default()
  }

  /// Tags the batch with partitions.
  #[must_use]
  pub fn with_partitions(mut self, partitions: Vec<Partition>) -> Self {
    self.partitions = partitions;
    self
  }

  /// Rows in order.
  #[must_use]
  pub fn rows(&self) -> &[Row] {
    &self.rows
  }

  /// Consumes the batch, returning its rows.
  #[must_use]
  pub fn into_rows(self) -> Vec<Row> {
    self.rows
  }

  /// Partitions this batch belongs to.
  #[must_use]
  pub fn partitions(&self) -> &[Partition] {
    &self.partitions
  }

  /// Number of rows.
  #[must_use]
  pub fn len(&self) -> usize {
    self.rows.len()
  }

  /// Whether the batch has no rows.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Applies `f` to every row, keeping partitions.
  #[must_use]
  pub fn map(self, f: impl FnMut(Row) -> Row) -> Self {
    Self {
      rows: self.rows.into_iter().map(f).collect(),
      partitions: self.partitions,
    }
  }

  /// Keeps the rows for which `f` returns `true`.
  #[must_use]
  pub fn filter(self, mut f: impl FnMut(&Row) -> bool) -> Self {
    Self {
      rows: self.rows.into_iter().filter(|row| f(row)).collect(),
      partitions: self.partitions,
    }
  }

  /// Splits the batch into one batch per distinct combination of `columns`.
  ///
  /// Output is ordered by partition values. Every row must hold a scalar value
  /// for each column.
  pub fn partition_by(self, columns: &[String]) -> Result<Vec<Batch>, BatchError> {
    if columns.is_empty() {
      return Ok(vec![self]);
    }

    let mut groups: BTreeMap<Vec<Partition>, Vec<Row>> = BTreeMap::new();
    for row in self.rows {
      let mut key = self.partitions.clone();
      for column in columns {
        let value = row
          .get(column)
          .ok_or_else(|| BatchError::MissingPartitionEntry(column.clone()))?;
        let rendered =
          partition_value(value).ok_or_else(|| BatchError::InvalidPartitionValue {
            name: column.clone(),
            value: value.clone(),
          })?;
        key.push(Partition::new(column.clone(), rendered));
      }
      groups.entry(key).or_default().push(row);
    }

    Ok(
      groups
        .into_iter()
        .map(|(partitions, rows)| Batch { rows, partitions })
        .collect(),
    )
  }

  /// Concatenates batches. Partition tags are dropped unless every input shares them.
  #[must_use]
  pub fn merge(batches: Vec<Batch>) -> Batch {
    let mut iter = batches.into_iter();
    let Some(mut merged) = iter.next() else {
      return Batch::empty();
    };
    for batch in iter {
      if batch.partitions != merged.partitions {
        merged.partitions.clear();
      }
      merged.rows.extend(batch.rows);
    }
    merged
  }
}

fn partition_value(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() && !s.contains(['/', '=']) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

//! Starting workers.
//!
//! The coordinator only needs something that, given the pool's worker IDs and
//! the address it listens on, gets one worker per ID running. [`ProcessLauncher`]
//! spawns a worker executable per ID; tests plug in launchers that run workers
//! as tasks in the same process.

use crate::message::WorkerId;
use crate::serializer::SerializerKind;
use crate::transport::Address;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors raised while launching workers.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
  /// The worker process could not be spawned.
  #[error("Failed to spawn worker {id} ({program}): {source}")]
  Spawn {
    /// Worker being launched.
    id: WorkerId,
    /// Executable.
    program: PathBuf,
    /// Underlying error.
    #[source]
    source: io::Error,
  },
  /// Any other launcher-specific failure.
  #[error("Launch failed: {0}")]
  Other(String),
}

/// Starts one worker per ID, each connecting back to `address`.
///
/// Returns one handle per ID, in the order of `ids`. Each handle completes
/// when its worker has exited.
#[async_trait]
pub trait Launcher: Send + Sync {
  /// Launches the workers.
  async fn launch(
    &self,
    ids: &[WorkerId],
    address: &Address,
  ) -> Result<Vec<JoinHandle<()>>, LaunchError>;
}

/// Launches each worker as a child process.
///
/// The child receives `--id=<id>`, either `--host=<host> --port=<port>` or
/// `--socket=<path>`, and `--serializer=<kind>` after any fixed arguments.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
  program: PathBuf,
  args: Vec<String>,
  serializer: SerializerKind,
}

impl ProcessLauncher {
  /// Launcher running `program`.
  #[must_use]
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      serializer: SerializerKind::default(),
    }
  }

  /// Fixed arguments placed before the worker arguments.
  #[must_use]
  pub fn with_args(mut self, args: Vec<String>) -> Self {
    self.args = args;
    self
  }

  /// Serializer the workers must use.
  #[must_use]
  pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
    self.serializer = serializer;
    self
  }

  /// Full argument list for worker `id`.
  #[must_use]
  pub fn worker_args(&self, id: &WorkerId, address: &Address) -> Vec<String> {
    let mut args = self.args.clone();
    args.push(format!("--id={}", id));
    match address {
      Address::Tcp { host, port } => {
        args.push(format!("--host={}", host));
        args.push(format!("--port={}", port));
      }
      Address::Unix(path) => args.push(format!("--socket={}", path.display())),
    }
    args.push(format!("--serializer={}", self.serializer));
    args
  }
}

#[async_trait]
impl Launcher for ProcessLauncher {
  async fn launch(
    &self,
    ids: &[WorkerId],
    address: &Address,
  ) -> Result<Vec<JoinHandle<()>>, LaunchError> {
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
      let args = self.worker_args(id, address);
      debug!(worker = %id, program = %self.program.display(), ?args, "Launching worker");

      let mut child = Command::new(&self.program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| LaunchError::Spawn {
          id: id.clone(),
          program: self.program.clone(),
          source,
        })?;

      let stdout = child.stdout.take().map(|out| forward(id.clone(), out, false));
      let stderr = child.stderr.take().map(|err| forward(id.clone(), err, true));

      let id = id.clone();
      handles.push(tokio::spawn(async move {
        match child.wait().await {
          Ok(status) if status.success() => debug!(worker = %id, "Worker exited"),
          Ok(status) => error!(worker = %id, %status, "Worker exited with failure"),
          Err(e) => error!(worker = %id, error = %e, "Failed to wait for worker"),
        }
        for task in [stdout, stderr].into_iter().flatten() {
          let _ = task.await;
        }
      }));
    }
    Ok(handles)
  }
}

fn forward<R>(id: WorkerId, stream: R, is_stderr: bool) -> JoinHandle<()>
where
  R: AsyncRead + Send + Unpin + 'static,
{
  tokio::spawn(async move {
    let mut lines = BufReader::new(stream).lines();
    loop {
      match lines.next_line().await {
        Ok(Some(line)) if line.trim().is_empty() => {}
        Ok(Some(line)) if is_stderr => error!(worker = %id, "{}", line),
        Ok(Some(line)) => info!(worker = %id, "{}", line),
        Ok(None) => break,
        Err(e) => {
          warn!(worker = %id, error = %e, "Failed to read worker output");
          break;
        }
      }
    }
  })
}

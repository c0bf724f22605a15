//! One distributed run: pool, listener, launched workers.
//!
//! ```text
//! Pool::generate -> SocketServer::initialize -> Launcher::launch
//!                -> SocketServer::start (until every worker is done)
//!                -> wait for worker exits
//! ```
//!
//! Worker exits are reported to the server while it runs, so workers that die
//! before identifying end the run as incomplete instead of stalling it.

use crate::config::{CoordinatorConfig, TransportConfig};
use crate::extractor::Extractor;
use crate::launcher::{LaunchError, Launcher};
use crate::message::WorkerId;
use crate::pipes::{Partitioning, Pipes};
use crate::pool::Pool;
use crate::server::{RunSummary, ServerError, ServerProtocol, SocketServer};
use crate::transport::Address;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Errors that fail a run.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
  /// The configuration asks for no workers.
  #[error("A run needs at least one worker")]
  NoWorkers,
  /// The listener failed.
  #[error("Server error: {0}")]
  Server(#[from] ServerError),
  /// Workers could not be launched.
  #[error("Launch error: {0}")]
  Launch(#[from] LaunchError),
  /// The run ended but some batches were not processed.
  #[error(
    "Run incomplete: {} workers lost, {} batches undelivered",
    .0.lost_workers,
    .0.undelivered
  )]
  Incomplete(RunSummary),
}

/// Drives a complete run for a [`CoordinatorConfig`].
pub struct Coordinator {
  config: CoordinatorConfig,
  launcher: Arc<dyn Launcher>,
}

impl Coordinator {
  /// Creates a coordinator launching workers through `launcher`.
  pub fn new(config: CoordinatorConfig, launcher: impl Launcher + 'static) -> Self {
    Self {
      config,
      launcher: Arc::new(launcher),
    }
  }

  /// Configuration in use.
  #[must_use]
  pub fn config(&self) -> &CoordinatorConfig {
    &self.config
  }

  /// Distributes every batch of `extractor` over the workers, running `pipes`
  /// on each, and returns once all workers have finished.
  pub async fn run(
    &self,
    extractor: impl Extractor + 'static,
    pipes: Pipes,
    partitioning: Partitioning,
  ) -> Result<RunSummary, CoordinatorError> {
    if self.config.workers == 0 {
      return Err(CoordinatorError::NoWorkers);
    }
    let started = Instant::now();

    let pool = Pool::generate(self.config.workers);
    let ids = pool.ids();
    let protocol = ServerProtocol::new(
      self.config.cache.clone(),
      self.config.cache_id.clone(),
      pool,
      extractor,
      pipes,
    )
    .with_partitioning(partitioning);

    let mut server = match &self.config.transport {
      TransportConfig::Tcp { host, port } => SocketServer::bind(Address::tcp(host.clone(), *port)),
      TransportConfig::Unix { folder } => SocketServer::unix_domain(folder)?,
    }
    .with_serializer(self.config.serializer.build());

    server.initialize(protocol).await?;
    let address = server.host();
    info!(address = %address, workers = ids.len(), cache_id = %self.config.cache_id, "Launching workers");

    let handles = match self.launcher.launch(&ids, &address).await {
      Ok(handles) if handles.len() == ids.len() => handles,
      Ok(handles) => {
        error!(
          expected = ids.len(),
          launched = handles.len(),
          "Launcher returned wrong number of workers"
        );
        server.stop()?;
        return Err(
          LaunchError::Other(format!(
            "expected {} worker handles, got {}",
            ids.len(),
            handles.len()
          ))
          .into(),
        );
      }
      Err(e) => {
        error!(error = %e, "Failed to launch workers");
        server.stop()?;
        return Err(e.into());
      }
    };

    let (exits_tx, exits_rx) = mpsc::unbounded_channel();
    server.track_exits(exits_rx);
    let watchers: Vec<JoinHandle<()>> = ids
      .into_iter()
      .zip(handles)
      .map(|(id, handle)| watch(id, handle, exits_tx.clone()))
      .collect();
    drop(exits_tx);

    let summary = server.start().await?;
    join_all(watchers).await;

    info!(
      total_time_sec = started.elapsed().as_secs_f64(),
      dispatched = summary.dispatched,
      lost_workers = summary.lost_workers,
      "Run finished"
    );

    if !summary.is_complete() {
      return Err(CoordinatorError::Incomplete(summary));
    }
    Ok(summary)
  }
}

fn watch(
  id: WorkerId,
  handle: JoinHandle<()>,
  exits: mpsc::UnboundedSender<WorkerId>,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    if let Err(e) = handle.await {
      warn!(worker = %id, error = %e, "Worker task did not finish cleanly");
    }
    // The server may already be gone.
    let _ = exits.send(id);
  })
}

//! # StreamWeave Pool
//!
//! Distributes batch pipelines over a pool of worker processes.
//!
//! A coordinator pulls batches from an [`extractor::Extractor`] and hands them
//! to workers that connect back over TCP or a Unix domain socket. Each worker
//! runs the same [`pipes::Pipes`] over every batch it receives and appends the
//! result to a shared [`cache::Cache`]. Work is pulled, never pushed: a worker
//! gets its next batch only after asking for it, so a slow worker simply
//! receives fewer batches.
//!
//! ## Protocol
//!
//! ```text
//! worker                         coordinator
//!   | --- IDENTIFY(id) ------------> |
//!   | <-- SETUP(pipes, cache) ------ |
//!   | --- FETCH(id) ---------------> |
//!   | <-- PROCESS(batch) ----------- |
//!   | --- FETCH(id) ---------------> |
//!   |            ...                 |
//!   | <-- (disconnect) ------------- |   no batches left
//! ```
//!
//! Messages travel as length-prefixed frames, see [`codec`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use streamweave_pool::config::CoordinatorConfig;
//! use streamweave_pool::coordinator::Coordinator;
//! use streamweave_pool::extractor::VecExtractor;
//! use streamweave_pool::launcher::ProcessLauncher;
//! use streamweave_pool::pipes::{Partitioning, Pipes, Stage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoordinatorConfig::default().with_workers(4);
//! let coordinator = Coordinator::new(config, ProcessLauncher::new("streamweave-worker"));
//! let pipes = Pipes::new(vec![Stage::WriteJson { path: "out".into() }]);
//! let summary = coordinator
//!   .run(VecExtractor::new(vec![]), pipes, Partitioning::none())
//!   .await?;
//! println!("{} batches processed", summary.dispatched);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Row batches and partition tags.
pub mod batch;
/// Shared sink for processed batches.
pub mod cache;
/// Length-prefixed message framing.
pub mod codec;
/// Coordinator and worker configuration.
pub mod config;
/// Orchestration of a complete run.
pub mod coordinator;
/// Batch sources.
pub mod extractor;
/// Worker launchers.
pub mod launcher;
/// Protocol messages.
pub mod message;
/// Pipeline stages and save modes.
pub mod pipes;
/// Worker registry.
pub mod pool;
/// Worker-local batch execution.
pub mod processor;
/// Wire serializers.
pub mod serializer;
/// Coordinator-side protocol and listener.
pub mod server;
/// Sockets and connection tasks.
pub mod transport;
/// Worker-side protocol and client.
pub mod worker;

pub use batch::{Batch, Partition, Row};
pub use cache::{Cache, CacheRef, LocalFilesystemCache};
pub use config::{CoordinatorConfig, TransportConfig, WorkerArgs};
pub use coordinator::{Coordinator, CoordinatorError};
pub use extractor::Extractor;
pub use launcher::{Launcher, ProcessLauncher};
pub use message::{Message, WorkerId};
pub use pipes::{Partitioning, Pipes, SaveMode, Stage};
pub use pool::Pool;
pub use processor::Processor;
pub use server::{RunSummary, ServerProtocol, SocketServer};
pub use transport::Address;
pub use worker::{ClientProtocol, SocketClient};

#[cfg(test)]
mod cache_test;
#[cfg(test)]
mod codec_test;
#[cfg(test)]
mod pool_test;
#[cfg(test)]
mod serializer_test;

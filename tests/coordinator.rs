use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::Duration;
use streamweave_pool::batch::Row;
use streamweave_pool::cache::Cache;
use streamweave_pool::config::{CoordinatorConfig, TransportConfig};
use streamweave_pool::coordinator::{Coordinator, CoordinatorError};
use streamweave_pool::extractor::ChunkExtractor;
use streamweave_pool::launcher::{LaunchError, Launcher};
use streamweave_pool::message::WorkerId;
use streamweave_pool::pipes::{Partitioning, Pipes, SaveMode, Stage};
use streamweave_pool::processor::Processor;
use streamweave_pool::serializer::SerializerKind;
use streamweave_pool::transport::Address;
use streamweave_pool::worker::{ClientProtocol, SocketClient};
use streamweave_pool::CacheRef;
use tempfile::TempDir;
use tokio::task::JoinHandle;

// Runs every worker as a task in this process.
struct TaskLauncher {
  serializer: SerializerKind,
}

impl TaskLauncher {
  fn new() -> Self {
    Self {
      serializer: SerializerKind::Json,
    }
  }
}

#[async_trait]
impl Launcher for TaskLauncher {
  async fn launch(
    &self,
    ids: &[WorkerId],
    address: &Address,
  ) -> Result<Vec<JoinHandle<()>>, LaunchError> {
    Ok(
      ids
        .iter()
        .map(|id| {
          let client = SocketClient::new().with_serializer(self.serializer.build());
          let protocol = ClientProtocol::new(Processor::new(id.clone()));
          let address = address.clone();
          tokio::spawn(async move {
            let _ = client.connect(&address, protocol).await;
          })
        })
        .collect(),
    )
  }
}

// Workers that exit before ever connecting.
struct DeadLauncher;

#[async_trait]
impl Launcher for DeadLauncher {
  async fn launch(
    &self,
    ids: &[WorkerId],
    _address: &Address,
  ) -> Result<Vec<JoinHandle<()>>, LaunchError> {
    Ok(ids.iter().map(|_| tokio::spawn(async {})).collect())
  }
}

struct NoLauncher;

#[async_trait]
impl Launcher for NoLauncher {
  async fn launch(
    &self,
    _ids: &[WorkerId],
    _address: &Address,
  ) -> Result<Vec<JoinHandle<()>>, LaunchError> {
    Err(LaunchError::Other("no launcher available".to_string()))
  }
}

fn rows(n: usize) -> Vec<Row> {
  (0..n)
    .filter_map(|i| {
      let group = if i % 2 == 0 { "even" } else { "odd" };
      json!({ "id": i, "group": group }).as_object().cloned()
    })
    .collect()
}

fn output_rows(dir: &Path) -> Vec<Row> {
  let mut out = Vec::new();
  let Ok(entries) = fs::read_dir(dir) else {
    return out;
  };
  for entry in entries {
    let path = entry.unwrap().path();
    if path.is_dir() {
      out.extend(output_rows(&path));
    } else {
      for line in fs::read_to_string(&path).unwrap().lines() {
        out.push(serde_json::from_str(line).unwrap());
      }
    }
  }
  out
}

fn sorted_ids(rows: &[Row]) -> Vec<u64> {
  let mut ids: Vec<u64> = rows.iter().filter_map(|r| r["id"].as_u64()).collect();
  ids.sort_unstable();
  ids
}

#[tokio::test]
async fn test_run_over_tcp() {
  let cache_dir = TempDir::new().unwrap();
  let out_dir = TempDir::new().unwrap();
  let config = CoordinatorConfig::default()
    .with_workers(3)
    .with_cache(CacheRef::filesystem(cache_dir.path()))
    .with_cache_id("tcp-run");

  let pipes = Pipes::new(vec![
    Stage::AddEntry {
      name: "processed".to_string(),
      value: json!(true),
    },
    Stage::WriteJson {
      path: out_dir.path().to_path_buf(),
    },
  ])
  .with_save_mode(SaveMode::Overwrite);

  let summary = Coordinator::new(config.clone(), TaskLauncher::new())
    .run(ChunkExtractor::new(rows(100), 7), pipes, Partitioning::none())
    .await
    .unwrap();

  assert_eq!(summary.dispatched, 15);
  assert!(summary.is_complete());

  let written = output_rows(out_dir.path());
  assert_eq!(sorted_ids(&written), (0..100).collect::<Vec<_>>());
  assert!(written.iter().all(|r| r["processed"] == json!(true)));

  let cached: Vec<Row> = config
    .cache
    .open()
    .read("tcp-run")
    .unwrap()
    .into_iter()
    .flat_map(|b| b.into_rows())
    .collect();
  assert_eq!(sorted_ids(&cached), (0..100).collect::<Vec<_>>());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_over_unix_socket_with_base64() {
  let socket_dir = TempDir::new().unwrap();
  let cache_dir = TempDir::new().unwrap();
  let out_dir = TempDir::new().unwrap();
  let config = CoordinatorConfig::default()
    .with_workers(2)
    .with_transport(TransportConfig::Unix {
      folder: socket_dir.path().to_path_buf(),
    })
    .with_cache(CacheRef::filesystem(cache_dir.path()))
    .with_cache_id("unix-run")
    .with_serializer(SerializerKind::Base64Json);
  let launcher = TaskLauncher {
    serializer: SerializerKind::Base64Json,
  };

  let pipes = Pipes::new(vec![Stage::WriteJson {
    path: out_dir.path().to_path_buf(),
  }]);
  let summary = Coordinator::new(config, launcher)
    .run(
      ChunkExtractor::new(rows(40), 5),
      pipes,
      Partitioning::by(["group"]),
    )
    .await
    .unwrap();

  assert_eq!(summary.dispatched, 8);
  assert_eq!(output_rows(&out_dir.path().join("group=even")).len(), 20);
  assert_eq!(output_rows(&out_dir.path().join("group=odd")).len(), 20);
  // The socket file is gone once the run is over.
  assert_eq!(fs::read_dir(socket_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failing_worker_makes_run_incomplete() {
  let cache_dir = TempDir::new().unwrap();
  let config = CoordinatorConfig::default()
    .with_workers(1)
    .with_cache(CacheRef::filesystem(cache_dir.path()));
  let pipes = Pipes::new(vec![Stage::RenameEntry {
    from: "missing".to_string(),
    to: "x".to_string(),
  }]);

  let err = Coordinator::new(config, TaskLauncher::new())
    .run(ChunkExtractor::new(rows(10), 2), pipes, Partitioning::none())
    .await
    .unwrap_err();

  match err {
    CoordinatorError::Incomplete(summary) => {
      assert_eq!(summary.dispatched, 1);
      assert_eq!(summary.lost_workers, 1);
    }
    other => panic!("Unexpected error: {}", other),
  }
}

#[tokio::test]
async fn test_launch_failure_is_reported() {
  let err = Coordinator::new(CoordinatorConfig::default(), NoLauncher)
    .run(ChunkExtractor::new(rows(1), 1), Pipes::empty(), Partitioning::none())
    .await
    .unwrap_err();
  assert!(matches!(err, CoordinatorError::Launch(LaunchError::Other(_))));
}

#[tokio::test]
async fn test_zero_workers_is_rejected() {
  let config = CoordinatorConfig::default().with_workers(0);
  let err = Coordinator::new(config, TaskLauncher::new())
    .run(ChunkExtractor::new(rows(1), 1), Pipes::empty(), Partitioning::none())
    .await
    .unwrap_err();
  assert!(matches!(err, CoordinatorError::NoWorkers));
}

#[tokio::test]
async fn test_workers_exiting_before_identify_end_run() {
  let config = CoordinatorConfig::default().with_workers(2);
  let coordinator = Coordinator::new(config, DeadLauncher);
  let run = coordinator.run(
    ChunkExtractor::new(rows(10), 2),
    Pipes::empty(),
    Partitioning::none(),
  );

  let err = tokio::time::timeout(Duration::from_secs(10), run)
    .await
    .expect("run should end")
    .unwrap_err();

  match err {
    CoordinatorError::Incomplete(summary) => {
      assert_eq!(summary.dispatched, 0);
      assert_eq!(summary.lost_workers, 2);
    }
    other => panic!("Unexpected error: {}", other),
  }
}

#[tokio::test]
async fn test_serializer_mismatch_ends_run() {
  let cache_dir = TempDir::new().unwrap();
  let config = CoordinatorConfig::default()
    .with_workers(1)
    .with_cache(CacheRef::filesystem(cache_dir.path()));
  let launcher = TaskLauncher {
    serializer: SerializerKind::Base64Json,
  };
  let coordinator = Coordinator::new(config, launcher);
  let run = coordinator.run(
    ChunkExtractor::new(rows(4), 2),
    Pipes::empty(),
    Partitioning::none(),
  );

  let err = tokio::time::timeout(Duration::from_secs(10), run)
    .await
    .expect("run should end")
    .unwrap_err();

  assert!(matches!(err, CoordinatorError::Incomplete(s) if s.lost_workers == 1));
}

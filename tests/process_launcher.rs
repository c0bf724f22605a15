use serde_json::json;
use std::fs;
use std::path::Path;
use streamweave_pool::cache::Cache;
use streamweave_pool::config::CoordinatorConfig;
use streamweave_pool::coordinator::Coordinator;
use streamweave_pool::extractor::VecExtractor;
use streamweave_pool::launcher::{LaunchError, Launcher, ProcessLauncher};
use streamweave_pool::message::WorkerId;
use streamweave_pool::pipes::{Partitioning, Pipes, Stage};
use streamweave_pool::serializer::SerializerKind;
use streamweave_pool::transport::Address;
use streamweave_pool::{Batch, CacheRef};
use tempfile::TempDir;

const WORKER_BIN: &str = env!("CARGO_BIN_EXE_streamweave-worker");

fn count_lines(dir: &Path) -> usize {
  fs::read_dir(dir)
    .map(|entries| {
      entries
        .map(|e| e.unwrap().path())
        .map(|p| {
          if p.is_dir() {
            count_lines(&p)
          } else {
            fs::read_to_string(&p).unwrap().lines().count()
          }
        })
        .sum()
    })
    .unwrap_or(0)
}

#[test]
fn test_worker_args() {
  let launcher = ProcessLauncher::new("worker")
    .with_args(vec!["--quiet".to_string()])
    .with_serializer(SerializerKind::Base64Json);
  let id = WorkerId::new("w1");

  assert_eq!(
    launcher.worker_args(&id, &Address::tcp("127.0.0.1", 9000)),
    vec![
      "--quiet",
      "--id=w1",
      "--host=127.0.0.1",
      "--port=9000",
      "--serializer=base64_json"
    ]
  );
  assert_eq!(
    launcher.worker_args(&id, &Address::unix("/tmp/s.sock")),
    vec![
      "--quiet",
      "--id=w1",
      "--socket=/tmp/s.sock",
      "--serializer=base64_json"
    ]
  );
}

#[tokio::test]
async fn test_spawn_failure() {
  let launcher = ProcessLauncher::new("/nonexistent/streamweave-worker");
  let err = launcher
    .launch(&[WorkerId::new("w1")], &Address::tcp("127.0.0.1", 1))
    .await
    .unwrap_err();
  assert!(matches!(err, LaunchError::Spawn { .. }));
}

#[tokio::test]
async fn test_run_with_worker_processes() {
  let cache_dir = TempDir::new().unwrap();
  let out_dir = TempDir::new().unwrap();
  let batches: Vec<Batch> = (0..12)
    .map(|i| {
      let rows = json!({ "n": i }).as_object().cloned().into_iter().collect();
      Batch::new(rows)
    })
    .collect();

  let config = CoordinatorConfig::default()
    .with_workers(2)
    .with_cache(CacheRef::filesystem(cache_dir.path()))
    .with_cache_id("processes");
  let pipes = Pipes::new(vec![Stage::WriteJson {
    path: out_dir.path().to_path_buf(),
  }]);

  let summary = Coordinator::new(config.clone(), ProcessLauncher::new(WORKER_BIN))
    .run(VecExtractor::new(batches), pipes, Partitioning::none())
    .await
    .unwrap();

  assert_eq!(summary.dispatched, 12);
  assert_eq!(count_lines(out_dir.path()), 12);
  assert_eq!(config.cache.open().read("processes").unwrap().len(), 12);
}

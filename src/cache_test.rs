//! Tests for the filesystem cache.

use crate::batch::{Batch, Row};
use crate::cache::{Cache, CacheError, CacheRef, LocalFilesystemCache};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn batch(n: i64) -> Batch {
  let rows: Vec<Row> = json!({ "n": n }).as_object().cloned().into_iter().collect();
  Batch::new(rows)
}

#[test]
fn test_append_and_read() {
  let dir = TempDir::new().unwrap();
  let cache = LocalFilesystemCache::new(dir.path());

  assert!(!cache.has("run").unwrap());
  assert!(cache.read("run").unwrap().is_empty());

  cache.append("run", &batch(1)).unwrap();
  cache.append("run", &batch(2)).unwrap();

  assert!(cache.has("run").unwrap());
  let mut ns: Vec<_> = cache
    .read("run")
    .unwrap()
    .iter()
    .map(|b| b.rows()[0]["n"].as_i64().unwrap())
    .collect();
  ns.sort_unstable();
  assert_eq!(ns, vec![1, 2]);
}

#[test]
fn test_keys_are_independent() {
  let dir = TempDir::new().unwrap();
  let cache = LocalFilesystemCache::new(dir.path());

  cache.append("a", &batch(1)).unwrap();
  assert!(!cache.has("b").unwrap());

  cache.clear("a").unwrap();
  assert!(!cache.has("a").unwrap());
  cache.clear("never-written").unwrap();
}

#[test]
fn test_invalid_ids() {
  let dir = TempDir::new().unwrap();
  let cache = LocalFilesystemCache::new(dir.path());

  for id in ["", ".", "..", "a/b"] {
    assert!(matches!(
      cache.append(id, &batch(1)),
      Err(CacheError::InvalidId(_))
    ));
  }
}

#[test]
fn test_concurrent_appends_do_not_conflict() {
  let dir = TempDir::new().unwrap();
  let cache: Arc<dyn Cache> = CacheRef::filesystem(dir.path()).open();

  let handles: Vec<_> = (0..8)
    .map(|i| {
      let cache = Arc::clone(&cache);
      thread::spawn(move || {
        for j in 0..10 {
          cache.append("shared", &batch(i * 10 + j)).unwrap();
        }
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap();
  }

  assert_eq!(cache.read("shared").unwrap().len(), 80);
}

#[test]
fn test_cache_ref_serde() {
  let cache = CacheRef::filesystem("/tmp/results");
  let value = serde_json::to_value(&cache).unwrap();
  assert_eq!(value, json!({ "kind": "filesystem", "path": "/tmp/results" }));
  assert_eq!(serde_json::from_value::<CacheRef>(value).unwrap(), cache);
}

//! Tests for the worker registry.

use crate::message::WorkerId;
use crate::pool::{Pool, WorkerStatus};
use std::collections::HashSet;

#[test]
fn test_generate_creates_unique_disconnected_workers() {
  let pool = Pool::generate(5);

  assert_eq!(pool.count(), 5);
  let ids: HashSet<_> = pool.ids().into_iter().collect();
  assert_eq!(ids.len(), 5);
  assert!(pool.iter().all(|w| w.status() == WorkerStatus::Disconnected));
  assert_eq!(pool.only_connected().count(), 0);
}

#[test]
fn test_generate_empty() {
  let pool = Pool::generate(0);
  assert!(pool.is_empty());
  assert!(pool.ids().is_empty());
}

#[test]
fn test_from_ids_skips_duplicates() {
  let pool = Pool::from_ids(["a", "b", "a"].map(WorkerId::from));
  assert_eq!(pool.ids(), vec![WorkerId::new("a"), WorkerId::new("b")]);
}

#[test]
fn test_connect_and_disconnect() {
  let mut pool = Pool::from_ids(["a", "b"].map(WorkerId::from));
  let a = WorkerId::new("a");

  pool.connect(&a);
  assert_eq!(pool.status(&a), Some(WorkerStatus::Connected));
  assert_eq!(pool.only_connected().ids(), vec![a.clone()]);
  // The filtered view does not change the pool itself.
  assert_eq!(pool.count(), 2);

  pool.disconnect(&a);
  assert_eq!(pool.status(&a), Some(WorkerStatus::Disconnected));
  assert_eq!(pool.only_connected().count(), 0);
}

#[test]
fn test_unknown_ids_are_ignored() {
  let mut pool = Pool::from_ids(["a"].map(WorkerId::from));
  let ghost = WorkerId::new("ghost");

  pool.connect(&ghost);
  pool.disconnect(&ghost);

  assert!(!pool.has(&ghost));
  assert_eq!(pool.status(&ghost), None);
  assert_eq!(pool.count(), 1);
  assert_eq!(pool.only_connected().count(), 0);
}

#[test]
fn test_connect_is_idempotent() {
  let mut pool = Pool::from_ids(["a"].map(WorkerId::from));
  let a = WorkerId::new("a");

  pool.connect(&a);
  pool.connect(&a);
  assert_eq!(pool.only_connected().count(), 1);
}

//! Tests for IndexStore
//!
//! These tests verify:
//! - Durable, never-reused id allocation
//! - Primary offsets (immediate and staged/committed)
//! - Secondary index buckets
//! - Visibility of changes made through another instance
//! - Quarantine of corrupt documents

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use flatstore::config::SyncStrategy;
use flatstore::error::FlatError;
use flatstore::index::IndexStore;
use flatstore::metrics::{Metrics, NoopMetrics};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_store(temp: &TempDir) -> IndexStore {
    IndexStore::open(
        "posts",
        temp.path(),
        SyncStrategy::OsBuffered,
        Arc::new(NoopMetrics),
    )
    .unwrap()
}

fn setup_temp_index() -> (TempDir, IndexStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    (temp_dir, store)
}

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

// =============================================================================
// Id Allocation Tests
// =============================================================================

#[test]
fn test_next_id_starts_at_one() {
    let (_temp, mut store) = setup_temp_index();

    assert_eq!(store.next_id().unwrap(), 1);
    assert_eq!(store.next_id().unwrap(), 2);
    assert_eq!(store.next_id().unwrap(), 3);
}

#[test]
fn test_next_id_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut store = open_store(&temp_dir);
        store.next_id().unwrap();
        store.next_id().unwrap();
    }

    let mut store = open_store(&temp_dir);
    assert_eq!(store.next_id().unwrap(), 3);
}

#[test]
fn test_next_id_unique_across_instances() {
    let temp_dir = TempDir::new().unwrap();
    let mut a = open_store(&temp_dir);
    let mut b = open_store(&temp_dir);

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(a.next_id().unwrap());
        ids.push(b.next_id().unwrap());
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
}

#[test]
fn test_ids_not_reused_after_removal_and_rebuild() {
    let (_temp, mut store) = setup_temp_index();
    let id = store.next_id().unwrap();
    store.set(id, 0).unwrap();
    store.remove(id).unwrap();

    store.rebuild_primary(BTreeMap::new()).unwrap();

    assert_eq!(store.next_id().unwrap(), id + 1);
}

#[test]
fn test_rebuild_moves_counter_past_highest_id() {
    let (_temp, mut store) = setup_temp_index();

    store.rebuild_primary(BTreeMap::from([(40, 0), (41, 64)])).unwrap();

    assert_eq!(store.next_id().unwrap(), 42);
}

// =============================================================================
// Primary Offset Tests
// =============================================================================

#[test]
fn test_set_get_remove() {
    let (_temp, mut store) = setup_temp_index();

    store.set(1, 0).unwrap();
    store.set(2, 57).unwrap();

    assert_eq!(store.get(1).unwrap(), Some(0));
    assert_eq!(store.get(2).unwrap(), Some(57));
    assert_eq!(store.len().unwrap(), 2);

    assert!(store.remove(1).unwrap());
    assert!(!store.remove(1).unwrap());
    assert_eq!(store.get(1).unwrap(), None);
    assert_eq!(store.ids().unwrap(), vec![2]);
}

#[test]
fn test_offsets_persist_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut store = open_store(&temp_dir);
        store.set(7, 128).unwrap();
    }

    let mut store = open_store(&temp_dir);
    assert_eq!(store.get(7).unwrap(), Some(128));
}

#[test]
fn test_changes_visible_to_other_instance() {
    let temp_dir = TempDir::new().unwrap();
    let mut a = open_store(&temp_dir);
    let mut b = open_store(&temp_dir);

    a.set(1, 0).unwrap();
    b.set(2, 40).unwrap();

    // Neither write clobbered the other
    assert_eq!(a.snapshot().unwrap(), BTreeMap::from([(1, 0), (2, 40)]));
    assert_eq!(b.snapshot().unwrap(), BTreeMap::from([(1, 0), (2, 40)]));
}

#[test]
fn test_staged_changes_commit_once() {
    let temp_dir = TempDir::new().unwrap();
    let metrics = Arc::new(Metrics::new());
    let mut store = IndexStore::open(
        "posts",
        temp_dir.path(),
        SyncStrategy::OsBuffered,
        metrics.clone(),
    )
    .unwrap();

    for id in 1..=10 {
        store.stage(id, Some(id * 100));
    }
    assert!(store.has_pending());
    assert_eq!(store.get(3).unwrap(), Some(300));

    // Not persisted yet
    let mut other = open_store(&temp_dir);
    assert_eq!(other.len().unwrap(), 0);

    let before = metrics.snapshot().offset_persists;
    store.commit().unwrap();
    assert_eq!(metrics.snapshot().offset_persists - before, 1);
    assert!(!store.has_pending());
    assert_eq!(other.len().unwrap(), 10);
}

#[test]
fn test_staged_removal() {
    let (_temp, mut store) = setup_temp_index();
    store.set(1, 0).unwrap();

    store.stage(1, None);
    assert_eq!(store.get(1).unwrap(), None);

    store.commit().unwrap();
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_discard_pending() {
    let (_temp, mut store) = setup_temp_index();
    store.stage(1, Some(0));

    store.discard_pending();

    assert_eq!(store.get(1).unwrap(), None);
    assert!(!store.has_pending());
}

#[test]
fn test_clear_primary_keeps_counter() {
    let (_temp, mut store) = setup_temp_index();
    let id = store.next_id().unwrap();
    store.set(id, 0).unwrap();

    store.clear_primary().unwrap();

    assert!(store.is_empty().unwrap());
    assert_eq!(store.next_id().unwrap(), id + 1);
}

// =============================================================================
// Secondary Index Tests
// =============================================================================

#[test]
fn test_create_index_declares_field() {
    let (_temp, mut store) = setup_temp_index();

    assert!(store.create_index("status").unwrap());
    assert!(!store.create_index("status").unwrap());

    assert!(store.is_indexed("status").unwrap());
    assert_eq!(store.indexed_fields().unwrap(), vec!["status".to_string()]);
    assert!(store.secondary_path("status").exists());
}

#[test]
fn test_create_index_rejects_bad_field_name() {
    let (_temp, mut store) = setup_temp_index();

    let result = store.create_index("../etc");

    assert!(matches!(result, Err(FlatError::InvalidIdentifier { .. })));
}

#[test]
fn test_secondary_add_lookup_remove() {
    let (_temp, mut store) = setup_temp_index();
    store.create_index("status").unwrap();

    store.add_secondary("status", "active", 3).unwrap();
    store.add_secondary("status", "active", 1).unwrap();
    store.add_secondary("status", "active", 1).unwrap();
    store.add_secondary("status", "draft", 2).unwrap();

    assert_eq!(store.lookup_secondary("status", &keys(&["active"])).unwrap(), vec![1, 3]);
    assert_eq!(
        store.lookup_secondary("status", &keys(&["active", "draft"])).unwrap(),
        vec![1, 2, 3]
    );

    store.remove_secondary("status", "draft", 2).unwrap();
    let buckets = store.secondary_buckets("status").unwrap();
    assert!(!buckets.contains_key("draft"));
    assert!(store.lookup_secondary("status", &keys(&["missing"])).unwrap().is_empty());
}

#[test]
fn test_rebuild_secondary_replaces_buckets() {
    let (_temp, mut store) = setup_temp_index();
    store.create_index("status").unwrap();
    store.add_secondary("status", "old", 1).unwrap();

    let buckets = BTreeMap::from([("new".to_string(), vec![1, 2])]);
    store.rebuild_secondary("status", buckets.clone()).unwrap();

    assert_eq!(store.secondary_buckets("status").unwrap(), buckets);
}

#[test]
fn test_drop_index_removes_file() {
    let (_temp, mut store) = setup_temp_index();
    store.create_index("status").unwrap();
    let path = store.secondary_path("status");

    assert!(store.drop_index("status").unwrap());
    assert!(!store.drop_index("status").unwrap());

    assert!(!path.exists());
    assert!(!store.is_indexed("status").unwrap());
}

#[test]
fn test_secondary_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut store = open_store(&temp_dir);
        store.create_index("status").unwrap();
        store.add_secondary("status", "active", 5).unwrap();
    }

    let mut store = open_store(&temp_dir);
    assert_eq!(store.lookup_secondary("status", &keys(&["active"])).unwrap(), vec![5]);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupt_primary_is_quarantined() {
    let temp_dir = TempDir::new().unwrap();
    let path = IndexStore::primary_path_in(temp_dir.path(), "posts");
    fs::write(&path, b"{not json").unwrap();

    let result = IndexStore::open(
        "posts",
        temp_dir.path(),
        SyncStrategy::OsBuffered,
        Arc::new(NoopMetrics),
    );

    match result {
        Err(FlatError::Corruption { quarantined, .. }) => assert!(quarantined.exists()),
        other => panic!("expected corruption, got {:?}", other.err()),
    }
    assert!(!path.exists());

    // Next open starts from empty
    let mut store = open_store(&temp_dir);
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_corrupt_secondary_is_quarantined_and_reset() {
    let (temp, mut store) = setup_temp_index();
    store.create_index("status").unwrap();
    store.add_secondary("status", "active", 1).unwrap();

    let path = IndexStore::secondary_path_in(temp.path(), "posts", "status");
    fs::write(&path, b"[broken").unwrap();

    // A fresh instance loads the document on first use
    let mut other = open_store(&temp);
    let result = other.lookup_secondary("status", &keys(&["active"]));
    assert!(matches!(result, Err(FlatError::Corruption { .. })));

    assert!(other.lookup_secondary("status", &keys(&["active"])).unwrap().is_empty());
}

// =============================================================================
// Backup Tests
// =============================================================================

#[test]
fn test_backup_copies_every_document() {
    let (temp, mut store) = setup_temp_index();
    store.set(1, 0).unwrap();
    store.create_index("status").unwrap();

    let copied = store.backup_to(&temp.path().join("backup")).unwrap();

    assert_eq!(copied.len(), 2);
    assert!(copied.iter().all(|p| p.exists()));
}

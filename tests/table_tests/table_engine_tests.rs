//! Tests for TableEngine
//!
//! These tests verify:
//! - insert/select/update/delete semantics and the record lifecycle
//! - No-op updates write nothing
//! - find with and without a secondary index
//! - Secondary index consistency across mutations
//! - Compaction, schema, clear and backup
//! - Recovery from a corrupt primary index without reusing ids
//! - Compensation when an index persist fails
//! - Concurrent inserts, and reads and writes racing compaction

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use flatstore::config::{Config, SyncStrategy};
use flatstore::error::FlatError;
use flatstore::metrics::{Metrics, MetricsSink, NoopMetrics};
use flatstore::record::{Record, Value};
use flatstore::table::{Condition, Operator, TableEngine};
use flatstore::validation::FieldType;
use flatstore::record;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(temp: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp.path())
        .sync_strategy(SyncStrategy::OsBuffered)
        .build()
}

fn open_table(temp: &TempDir, metrics: Arc<dyn MetricsSink>) -> TableEngine {
    TableEngine::open("posts", &test_config(temp), metrics).unwrap()
}

fn setup_temp_table() -> (TempDir, TableEngine) {
    let temp_dir = TempDir::new().unwrap();
    let table = open_table(&temp_dir, Arc::new(NoopMetrics));
    (temp_dir, table)
}

fn setup_temp_table_with_metrics() -> (TempDir, TableEngine, Arc<Metrics>) {
    let temp_dir = TempDir::new().unwrap();
    let metrics = Arc::new(Metrics::new());
    let table = open_table(&temp_dir, metrics.clone());
    (temp_dir, table, metrics)
}

fn ids(records: &[Record]) -> Vec<u64> {
    records.iter().filter_map(Record::id).collect()
}

fn field<'a>(record: &'a Record, name: &str) -> Option<&'a Value> {
    record.get(name)
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_table_files() {
    let (temp, table) = setup_temp_table();
    table.insert(record! { "title" => "x" }).unwrap();

    for name in ["posts_data", "posts_index", "posts_log"] {
        assert!(temp.path().join(name).exists(), "{} missing", name);
    }
}

#[test]
fn test_open_rejects_bad_table_name() {
    let temp_dir = TempDir::new().unwrap();

    let result = TableEngine::open("bad/name", &test_config(&temp_dir), Arc::new(NoopMetrics));

    assert!(matches!(result, Err(FlatError::InvalidIdentifier { .. })));
}

// =============================================================================
// Insert & Select Tests
// =============================================================================

#[test]
fn test_insert_assigns_sequential_ids() {
    let (_temp, table) = setup_temp_table();

    assert_eq!(table.insert(record! { "title" => "a" }).unwrap(), 1);
    assert_eq!(table.insert(record! { "title" => "b" }).unwrap(), 2);
    assert_eq!(table.insert(record! { "title" => "c" }).unwrap(), 3);
    assert_eq!(table.count().unwrap(), 3);
}

#[test]
fn test_insert_sets_managed_fields() {
    let (_temp, table) = setup_temp_table();

    let id = table.insert(record! { "title" => "a" }).unwrap();
    let post = table.select(id).unwrap().unwrap();

    assert_eq!(post.id(), Some(id));
    assert!(field(&post, "created_at").and_then(Value::as_u64).is_some());
    assert!(field(&post, "updated_at").is_none());
    assert!(!post.contains_key("_deleted"));
}

#[test]
fn test_insert_ignores_caller_reserved_fields() {
    let (_temp, table) = setup_temp_table();

    let id = table
        .insert(record! { "id" => 99, "_deleted" => true, "title" => "a" })
        .unwrap();

    assert_eq!(id, 1);
    let post = table.select(1).unwrap().unwrap();
    assert_eq!(post.id(), Some(1));
    assert!(table.select(99).unwrap().is_none());
}

#[test]
fn test_insert_rejects_non_finite_numbers() {
    let (_temp, table, metrics) = setup_temp_table_with_metrics();

    let nan = table.insert(record! { "score" => f64::NAN });
    let inf = table.insert(record! { "score" => f64::INFINITY });

    assert!(matches!(nan, Err(FlatError::Validation(_))));
    assert!(matches!(inf, Err(FlatError::Validation(_))));
    assert_eq!(metrics.snapshot().appends, 0);
    assert_eq!(table.data_size().unwrap(), 0);
}

#[test]
fn test_select_missing_returns_none() {
    let (_temp, table) = setup_temp_table();
    assert!(table.select(42).unwrap().is_none());
}

#[test]
fn test_select_served_from_cache_after_first_read() {
    let (_temp, table, metrics) = setup_temp_table_with_metrics();
    let id = table.insert(record! { "title" => "a" }).unwrap();

    table.select(id).unwrap();
    table.select(id).unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.cache_hits, 2);
    assert_eq!(snapshot.reads, 0);
}

#[test]
fn test_select_reads_file_when_cache_disabled() {
    let temp_dir = TempDir::new().unwrap();
    let metrics = Arc::new(Metrics::new());
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::OsBuffered)
        .cache_capacity(0)
        .build();
    let table = TableEngine::open("posts", &config, metrics.clone()).unwrap();
    let id = table.insert(record! { "title" => "a" }).unwrap();

    let post = table.select(id).unwrap().unwrap();

    assert_eq!(field(&post, "title"), Some(&Value::from("a")));
    assert_eq!(metrics.snapshot().reads, 1);
    assert_eq!(table.cached_records(), 0);
}

#[test]
fn test_select_all_ordered_by_id() {
    let (_temp, table) = setup_temp_table();
    for title in ["c", "a", "b"] {
        table.insert(record! { "title" => title }).unwrap();
    }
    table.delete(2).unwrap();

    assert_eq!(ids(&table.select_all().unwrap()), vec![1, 3]);
}

#[test]
fn test_records_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let table = open_table(&temp_dir, Arc::new(NoopMetrics));
        table.insert(record! { "title" => "a" }).unwrap();
        table.insert(record! { "title" => "b" }).unwrap();
        table.delete(1).unwrap();
    }

    let table = open_table(&temp_dir, Arc::new(NoopMetrics));
    assert!(table.select(1).unwrap().is_none());
    assert_eq!(
        field(&table.select(2).unwrap().unwrap(), "title"),
        Some(&Value::from("b"))
    );
    assert_eq!(table.insert(record! { "title" => "c" }).unwrap(), 3);
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_merges_fields() {
    let (_temp, table) = setup_temp_table();
    let id = table.insert(record! { "title" => "a", "views" => 1 }).unwrap();
    let created = table.select(id).unwrap().unwrap()["created_at"].clone();

    assert!(table.update(id, record! { "views" => 2, "tag" => "new" }).unwrap());

    let post = table.select(id).unwrap().unwrap();
    assert_eq!(field(&post, "title"), Some(&Value::from("a")));
    assert_eq!(field(&post, "views"), Some(&Value::from(2)));
    assert_eq!(field(&post, "tag"), Some(&Value::from("new")));
    assert_eq!(field(&post, "created_at"), Some(&created));
    assert!(field(&post, "updated_at").is_some());
}

#[test]
fn test_update_rejects_non_finite_numbers() {
    let (_temp, table) = setup_temp_table();
    let id = table.insert(record! { "score" => 1.5 }).unwrap();
    let size = table.data_size().unwrap();

    let result = table.update(id, record! { "score" => f64::NEG_INFINITY });

    assert!(matches!(result, Err(FlatError::Validation(_))));
    assert_eq!(table.data_size().unwrap(), size);
    let post = table.select(id).unwrap().unwrap();
    assert_eq!(field(&post, "score"), Some(&Value::Float(1.5)));
}

#[test]
fn test_update_missing_returns_false() {
    let (_temp, table) = setup_temp_table();
    assert!(!table.update(5, record! { "title" => "x" }).unwrap());
}

#[test]
fn test_update_cannot_change_id() {
    let (_temp, table) = setup_temp_table();
    let id = table.insert(record! { "title" => "a" }).unwrap();

    table.update(id, record! { "id" => 50, "title" => "b" }).unwrap();

    assert!(table.select(50).unwrap().is_none());
    assert_eq!(table.select(id).unwrap().unwrap().id(), Some(id));
}

#[test]
fn test_noop_update_writes_nothing() {
    let (_temp, table, metrics) = setup_temp_table_with_metrics();
    let id = table.insert(record! { "title" => "a", "views" => 1 }).unwrap();
    let size = table.data_size().unwrap();
    let appends = metrics.snapshot().appends;

    assert!(table.update(id, record! { "title" => "a" }).unwrap());

    assert_eq!(metrics.snapshot().appends, appends);
    assert_eq!(table.data_size().unwrap(), size);
    assert!(field(&table.select(id).unwrap().unwrap(), "updated_at").is_none());
}

#[test]
fn test_update_appends_tombstone_then_new_version() {
    let (_temp, table, metrics) = setup_temp_table_with_metrics();
    let id = table.insert(record! { "title" => "a" }).unwrap();
    let before = metrics.snapshot().appends;

    table.update(id, record! { "title" => "b" }).unwrap();

    assert_eq!(metrics.snapshot().appends - before, 2);
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_hides_record() {
    let (_temp, table) = setup_temp_table();
    let id = table.insert(record! { "title" => "a" }).unwrap();

    assert!(table.delete(id).unwrap());

    assert!(table.select(id).unwrap().is_none());
    assert_eq!(table.count().unwrap(), 0);
}

#[test]
fn test_delete_is_terminal() {
    let (_temp, table) = setup_temp_table();
    let id = table.insert(record! { "title" => "a" }).unwrap();
    table.delete(id).unwrap();

    assert!(!table.delete(id).unwrap());
    assert!(!table.update(id, record! { "title" => "back" }).unwrap());
    assert!(table.select(id).unwrap().is_none());

    table.compact().unwrap();
    assert!(table.select(id).unwrap().is_none());
    assert_ne!(table.insert(record! { "title" => "new" }).unwrap(), id);
}

#[test]
fn test_ids_never_reused_after_delete_and_compact() {
    let (_temp, table) = setup_temp_table();
    for _ in 0..3 {
        table.insert(record! { "title" => "x" }).unwrap();
    }
    table.delete(3).unwrap();
    table.compact().unwrap();

    assert_eq!(table.insert(record! { "title" => "y" }).unwrap(), 4);
}

// =============================================================================
// Find Tests
// =============================================================================

fn seed_people(table: &TableEngine) {
    let people = [
        ("ann", 31, "oslo"),
        ("bob", 25, "lima"),
        ("cid", 47, "oslo"),
        ("dee", 25, "pune"),
    ];
    for (name, age, city) in people {
        table
            .insert(record! { "name" => name, "age" => age, "city" => city })
            .unwrap();
    }
}

#[test]
fn test_find_with_operators() {
    let (_temp, table) = setup_temp_table();
    seed_people(&table);

    let find = |conditions: &[Condition]| ids(&table.find(conditions, None, 0).unwrap());

    assert_eq!(find(&[Condition::eq("city", "oslo")]), vec![1, 3]);
    assert_eq!(find(&[Condition::new("age", Operator::Gt, 30)]), vec![1, 3]);
    assert_eq!(find(&[Condition::new("age", Operator::Le, 25)]), vec![2, 4]);
    assert_eq!(find(&[Condition::new("city", Operator::Ne, "oslo")]), vec![2, 4]);
    assert_eq!(
        find(&[Condition::eq("age", 25), Condition::eq("city", "pune")]),
        vec![4]
    );
    assert!(find(&[Condition::eq("city", "rome")]).is_empty());
}

#[test]
fn test_find_coerces_by_stored_type() {
    let (_temp, table) = setup_temp_table();
    seed_people(&table);

    let result = table.find(&[Condition::eq("age", "25")], None, 0).unwrap();

    assert_eq!(ids(&result), vec![2, 4]);
}

#[test]
fn test_find_missing_field_only_matches_not_equal() {
    let (_temp, table) = setup_temp_table();
    seed_people(&table);
    table.insert(record! { "name" => "eve" }).unwrap();

    let ne = table.find(&[Condition::new("age", Operator::Ne, 25)], None, 0).unwrap();
    let gt = table.find(&[Condition::new("age", Operator::Gt, 0)], None, 0).unwrap();

    assert_eq!(ids(&ne), vec![1, 3, 5]);
    assert_eq!(ids(&gt), vec![1, 2, 3, 4]);
}

#[test]
fn test_find_pagination() {
    let (_temp, table) = setup_temp_table();
    for i in 0..10 {
        table.insert(record! { "n" => i }).unwrap();
    }

    let page = table.find(&[], Some(3), 4).unwrap();

    assert_eq!(ids(&page), vec![5, 6, 7]);
    assert!(table.find(&[], Some(3), 20).unwrap().is_empty());
}

#[test]
fn test_find_ignores_superseded_versions() {
    let (_temp, table) = setup_temp_table();
    let id = table.insert(record! { "status" => "draft" }).unwrap();
    table.update(id, record! { "status" => "live" }).unwrap();

    assert!(table.find(&[Condition::eq("status", "draft")], None, 0).unwrap().is_empty());
    assert_eq!(
        ids(&table.find(&[Condition::eq("status", "live")], None, 0).unwrap()),
        vec![id]
    );
}

#[test]
fn test_find_same_results_with_and_without_index() {
    let (_temp, table) = setup_temp_table();
    let statuses = ["draft", "live", "archived"];
    for i in 0..1000u64 {
        let mut post = record! {
            "status" => statuses[(i % 3) as usize],
            "views" => (i % 50) as i64,
        };
        if i % 7 == 0 {
            post.set("score", (i % 5) as f64);
        }
        // Neighbours beyond 2^53 collapse to one f64
        if i == 2 || i == 3 {
            post.set("big", 9_007_199_254_740_991 + i as i64);
        }
        table.insert(post).unwrap();
    }
    for id in (1..=1000).step_by(11) {
        table.delete(id).unwrap();
    }
    for id in (2..=1000).step_by(13) {
        table.update(id, record! { "status" => "live" }).unwrap();
    }

    let queries: Vec<Vec<Condition>> = vec![
        vec![Condition::eq("status", "live")],
        vec![Condition::eq("status", "draft"), Condition::new("views", Operator::Gt, 20)],
        vec![Condition::eq("views", 7)],
        vec![Condition::eq("views", "7")],
        vec![Condition::eq("score", 2)],
        vec![Condition::eq("score", 2.0)],
        vec![Condition::eq("status", "missing")],
        vec![Condition::eq("big", 9_007_199_254_740_993i64)],
        vec![Condition::eq("big", "9007199254740994")],
    ];

    let scanned: Vec<_> = queries
        .iter()
        .map(|q| table.find(q, None, 0).unwrap())
        .collect();

    assert_eq!(ids(&scanned[7]), vec![3]);
    assert_eq!(ids(&scanned[8]), vec![4]);

    for field in ["status", "views", "score", "big"] {
        assert!(table.create_index(field).unwrap());
    }

    for (query, expected) in queries.iter().zip(&scanned) {
        let indexed = table.find(query, None, 0).unwrap();
        assert_eq!(&indexed, expected, "query {:?}", query);
    }
    assert!(!scanned[0].is_empty());
}

// =============================================================================
// Secondary Index Tests
// =============================================================================

#[test]
fn test_index_tracks_mutations() {
    let (_temp, table) = setup_temp_table();
    table.create_index("status").unwrap();

    let a = table.insert(record! { "status" => "draft" }).unwrap();
    let b = table.insert(record! { "status" => "draft" }).unwrap();
    let c = table.insert(record! { "title" => "no status" }).unwrap();

    let buckets = table.index_buckets("status").unwrap();
    assert_eq!(buckets.get("draft"), Some(&vec![a, b]));

    table.update(a, record! { "status" => "live" }).unwrap();
    table.delete(b).unwrap();
    table.update(c, record! { "status" => "live" }).unwrap();

    let buckets = table.index_buckets("status").unwrap();
    assert!(!buckets.contains_key("draft"));
    assert_eq!(buckets.get("live"), Some(&vec![a, c]));
}

#[test]
fn test_create_index_builds_from_existing_records() {
    let (_temp, table) = setup_temp_table();
    seed_people(&table);
    table.delete(1).unwrap();

    assert!(table.create_index("city").unwrap());
    assert!(!table.create_index("city").unwrap());

    let buckets = table.index_buckets("city").unwrap();
    assert_eq!(buckets.get("oslo"), Some(&vec![3]));
    assert_eq!(buckets.get("lima"), Some(&vec![2]));
    assert_eq!(table.indexed_fields().unwrap(), vec!["city".to_string()]);
}

#[test]
fn test_drop_index_falls_back_to_scan() {
    let (_temp, table) = setup_temp_table();
    seed_people(&table);
    table.create_index("city").unwrap();

    assert!(table.drop_index("city").unwrap());

    assert!(table.indexed_fields().unwrap().is_empty());
    assert_eq!(
        ids(&table.find(&[Condition::eq("city", "oslo")], None, 0).unwrap()),
        vec![1, 3]
    );
}

#[test]
fn test_indexed_find_counts_as_one_find() {
    let (_temp, table, metrics) = setup_temp_table_with_metrics();
    seed_people(&table);
    table.create_index("city").unwrap();

    let found = table.find(&[Condition::eq("city", "oslo")], None, 0).unwrap();

    assert_eq!(ids(&found), vec![1, 3]);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.finds, 1);
    assert_eq!(snapshot.selects, 0);
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compaction_scenario() {
    let (_temp, table) = setup_temp_table();
    for title in ["a", "b", "c"] {
        table.insert(record! { "title" => title }).unwrap();
    }
    table.delete(2).unwrap();

    let report = table.compact().unwrap();

    assert_eq!(ids(&table.select_all().unwrap()), vec![1, 3]);
    assert_eq!(table.count().unwrap(), 2);
    assert_eq!(report.records_retained, 2);
    assert_eq!(report.versions_dropped, 2);
}

#[test]
fn test_compaction_preserves_content_and_shrinks() {
    let (_temp, table) = setup_temp_table();
    for i in 0..20 {
        table.insert(record! { "n" => i, "status" => "draft" }).unwrap();
    }
    for id in 1..=10 {
        table.update(id, record! { "status" => "live" }).unwrap();
    }
    for id in 15..=20 {
        table.delete(id).unwrap();
    }
    let before = table.select_all().unwrap();
    let size_before = table.data_size().unwrap();

    let report = table.compact().unwrap();

    assert_eq!(table.select_all().unwrap(), before);
    assert!(report.bytes_after <= report.bytes_before);
    assert!(table.data_size().unwrap() < size_before);
    assert!(report.bytes_reclaimed() > 0);
}

#[test]
fn test_compaction_rebuilds_secondary_indexes() {
    let (_temp, table) = setup_temp_table();
    table.create_index("status").unwrap();
    let a = table.insert(record! { "status" => "draft" }).unwrap();
    let b = table.insert(record! { "status" => "draft" }).unwrap();
    table.delete(a).unwrap();

    table.compact().unwrap();

    let buckets = table.index_buckets("status").unwrap();
    assert_eq!(buckets.get("draft"), Some(&vec![b]));
    assert_eq!(
        ids(&table.find(&[Condition::eq("status", "draft")], None, 0).unwrap()),
        vec![b]
    );
}

#[test]
fn test_compaction_of_unchanged_table_keeps_size() {
    let (_temp, table) = setup_temp_table();
    for i in 0..5 {
        table.insert(record! { "n" => i }).unwrap();
    }
    let size = table.data_size().unwrap();

    let report = table.compact().unwrap();

    assert_eq!(report.bytes_after, size);
    assert_eq!(report.versions_dropped, 0);
}

// =============================================================================
// Schema Tests
// =============================================================================

#[test]
fn test_schema_rejects_before_write() {
    let (_temp, table, metrics) = setup_temp_table_with_metrics();
    table
        .set_schema(
            vec!["title".to_string()],
            [("views".to_string(), FieldType::Integer)].into_iter().collect(),
        )
        .unwrap();

    let missing = table.insert(record! { "views" => 1 });
    let wrong = table.insert(record! { "title" => "a", "views" => "lots" });

    assert!(matches!(missing, Err(FlatError::MissingField(_))));
    assert!(matches!(wrong, Err(FlatError::FieldType { .. })));
    assert_eq!(metrics.snapshot().appends, 0);
    assert_eq!(table.count().unwrap(), 0);
}

#[test]
fn test_schema_checked_on_merged_update() {
    let (_temp, table) = setup_temp_table();
    table
        .set_schema(
            vec![],
            [("views".to_string(), FieldType::Integer)].into_iter().collect(),
        )
        .unwrap();
    let id = table.insert(record! { "views" => 1 }).unwrap();

    let result = table.update(id, record! { "views" => "many" });

    assert!(result.unwrap_err().is_validation());
    assert_eq!(
        field(&table.select(id).unwrap().unwrap(), "views"),
        Some(&Value::from(1))
    );
}

#[test]
fn test_schema_persists_and_clears() {
    let temp_dir = TempDir::new().unwrap();
    {
        let table = open_table(&temp_dir, Arc::new(NoopMetrics));
        table.set_schema(vec!["title".to_string()], Default::default()).unwrap();
    }

    let table = open_table(&temp_dir, Arc::new(NoopMetrics));
    assert_eq!(table.schema().unwrap().required, vec!["title".to_string()]);
    assert!(table.insert(record! { "views" => 1 }).is_err());

    table.clear_schema().unwrap();
    assert!(table.schema().is_none());
    assert!(table.insert(record! { "views" => 1 }).is_ok());
}

// =============================================================================
// Clear & Backup Tests
// =============================================================================

#[test]
fn test_clear_removes_records_but_keeps_counter() {
    let (_temp, table) = setup_temp_table();
    table.create_index("status").unwrap();
    table.insert(record! { "status" => "a" }).unwrap();
    table.insert(record! { "status" => "b" }).unwrap();

    table.clear().unwrap();

    assert_eq!(table.count().unwrap(), 0);
    assert!(table.select(1).unwrap().is_none());
    assert!(table.index_buckets("status").unwrap().is_empty());
    assert_eq!(table.indexed_fields().unwrap(), vec!["status".to_string()]);
    assert_eq!(table.insert(record! { "status" => "c" }).unwrap(), 3);
}

#[test]
fn test_backup_copies_table_files() {
    let (temp, table) = setup_temp_table();
    table.create_index("status").unwrap();
    table.insert(record! { "status" => "a" }).unwrap();

    let backup_dir = temp.path().join("backup");
    let copied = table.backup(&backup_dir).unwrap();

    let names: BTreeSet<String> = copied
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    for expected in ["posts_data", "posts_index", "posts_index_status", "posts_log"] {
        assert!(names.contains(expected), "{} not backed up", expected);
    }
}

// =============================================================================
// Audit Tests
// =============================================================================

#[test]
fn test_mutations_are_journaled() {
    let (_temp, table) = setup_temp_table();
    let id = table.insert(record! { "title" => "a" }).unwrap();
    table.update(id, record! { "title" => "b" }).unwrap();
    table.update(id, record! { "title" => "b" }).unwrap();
    table.delete(id).unwrap();
    table.clear().unwrap();

    let actions: Vec<String> = table
        .audit()
        .read(usize::MAX, 0)
        .unwrap()
        .iter()
        .map(|e| serde_json::to_value(e.action).unwrap().as_str().unwrap().to_string())
        .collect();

    assert_eq!(actions, vec!["insert", "update", "delete", "clear"]);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupt_primary_index_recovered_by_compaction() {
    let temp_dir = TempDir::new().unwrap();
    {
        let table = open_table(&temp_dir, Arc::new(NoopMetrics));
        for title in ["a", "b", "c"] {
            table.insert(record! { "title" => title }).unwrap();
        }
        table.delete(2).unwrap();
    }
    std::fs::write(temp_dir.path().join("posts_index"), b"{{{").unwrap();

    let first = TableEngine::open("posts", &test_config(&temp_dir), Arc::new(NoopMetrics));
    assert!(matches!(first, Err(FlatError::Corruption { .. })));

    let table = open_table(&temp_dir, Arc::new(NoopMetrics));
    assert_eq!(table.count().unwrap(), 0);

    table.compact().unwrap();

    assert_eq!(ids(&table.select_all().unwrap()), vec![1, 3]);
    assert_eq!(table.insert(record! { "title" => "d" }).unwrap(), 4);
}

#[test]
fn test_corrupt_primary_index_does_not_reuse_ids() {
    let temp_dir = TempDir::new().unwrap();
    {
        let table = open_table(&temp_dir, Arc::new(NoopMetrics));
        for title in ["a", "b", "c"] {
            table.insert(record! { "title" => title }).unwrap();
        }
    }
    std::fs::write(temp_dir.path().join("posts_index"), b"{{{").unwrap();
    assert!(TableEngine::open("posts", &test_config(&temp_dir), Arc::new(NoopMetrics)).is_err());

    let table = open_table(&temp_dir, Arc::new(NoopMetrics));
    assert_eq!(table.insert(record! { "title" => "d" }).unwrap(), 4);

    table.compact().unwrap();

    let all = table.select_all().unwrap();
    assert_eq!(ids(&all), vec![1, 2, 3, 4]);
    let titles: Vec<_> = all.iter().filter_map(|r| field(r, "title")).cloned().collect();
    assert_eq!(
        titles,
        vec![Value::from("a"), Value::from("b"), Value::from("c"), Value::from("d")]
    );
}

#[test]
fn test_compaction_after_index_reset_keeps_deleted_ids_allocated() {
    let temp_dir = TempDir::new().unwrap();
    {
        let table = open_table(&temp_dir, Arc::new(NoopMetrics));
        for title in ["a", "b", "c"] {
            table.insert(record! { "title" => title }).unwrap();
        }
        table.delete(3).unwrap();
    }
    std::fs::write(temp_dir.path().join("posts_index"), b"not json").unwrap();
    assert!(TableEngine::open("posts", &test_config(&temp_dir), Arc::new(NoopMetrics)).is_err());

    let table = open_table(&temp_dir, Arc::new(NoopMetrics));
    table.compact().unwrap();

    assert_eq!(ids(&table.select_all().unwrap()), vec![1, 2]);
    assert_eq!(table.insert(record! { "title" => "d" }).unwrap(), 4);
}

// =============================================================================
// Failure Tests
// =============================================================================

/// Index persists fail while a directory sits at the temp path
fn block_index_writes(temp: &TempDir) -> std::path::PathBuf {
    let blocker = temp.path().join("posts_index.tmp");
    std::fs::create_dir(&blocker).unwrap();
    blocker
}

fn last_version_is_live(temp: &TempDir, id: u64) -> bool {
    let lines = std::fs::read_to_string(temp.path().join("posts_data")).unwrap();
    let last = lines
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .filter(|version| version["id"] == serde_json::json!(id))
        .last()
        .unwrap();
    last["_deleted"] == serde_json::json!(false)
}

#[test]
fn test_failed_delete_is_compensated() {
    let (temp, table) = setup_temp_table();
    table.insert(record! { "title" => "keep" }).unwrap();
    let blocker = block_index_writes(&temp);

    let result = table.delete(1);

    assert!(matches!(result, Err(FlatError::Mutation { id: 1, .. })));
    let post = table.select(1).unwrap().unwrap();
    assert_eq!(field(&post, "title"), Some(&Value::from("keep")));
    assert!(last_version_is_live(&temp, 1));

    std::fs::remove_dir(&blocker).unwrap();
    table.compact().unwrap();
    assert_eq!(table.count().unwrap(), 1);
    assert!(table.select(1).unwrap().is_some());
}

#[test]
fn test_failed_update_repoint_keeps_old_content_until_compaction() {
    let (temp, table) = setup_temp_table();
    table.insert(record! { "title" => "old" }).unwrap();
    let blocker = block_index_writes(&temp);

    let result = table.update(1, record! { "title" => "new" });

    assert!(matches!(result, Err(FlatError::Mutation { id: 1, .. })));
    let post = table.select(1).unwrap().unwrap();
    assert_eq!(field(&post, "title"), Some(&Value::from("old")));

    std::fs::remove_dir(&blocker).unwrap();
    table.compact().unwrap();

    let post = table.select(1).unwrap().unwrap();
    assert_eq!(field(&post, "title"), Some(&Value::from("new")));
    assert_eq!(table.count().unwrap(), 1);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_inserts_get_unique_ids() {
    let (_temp, table) = setup_temp_table();
    let table = Arc::new(table);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                (0..25)
                    .map(|i| table.insert(record! { "thread" => t, "i" => i }).unwrap())
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    all.sort();
    all.dedup();

    assert_eq!(all.len(), 100);
    assert_eq!(table.count().unwrap(), 100);
    assert_eq!(table.select_all().unwrap().len(), 100);
}

#[test]
fn test_two_instances_share_one_table() {
    let temp_dir = TempDir::new().unwrap();
    let a = Arc::new(open_table(&temp_dir, Arc::new(NoopMetrics)));
    let b = Arc::new(open_table(&temp_dir, Arc::new(NoopMetrics)));

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|table| {
            thread::spawn(move || {
                for i in 0..20 {
                    table.insert(record! { "i" => i }).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(a.count().unwrap(), 40);
    assert_eq!(b.select_all().unwrap().len(), 40);
    // Every line in the data file decodes
    let report = a.compact().unwrap();
    assert_eq!(report.records_retained, 40);
}

#[test]
fn test_cache_dropped_after_compaction_by_other_instance() {
    let temp_dir = TempDir::new().unwrap();
    let a = open_table(&temp_dir, Arc::new(NoopMetrics));
    let b = open_table(&temp_dir, Arc::new(NoopMetrics));
    a.insert(record! { "title" => "old" }).unwrap();
    a.insert(record! { "title" => "other" }).unwrap();
    assert_eq!(field(&a.select(1).unwrap().unwrap(), "title"), Some(&Value::from("old")));

    // Compaction puts the new version of id 1 back at offset 0
    b.update(1, record! { "title" => "new" }).unwrap();
    b.compact().unwrap();

    let post = a.select(1).unwrap().unwrap();
    assert_eq!(field(&post, "title"), Some(&Value::from("new")));
}

#[test]
fn test_inserts_survive_concurrent_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(open_table(&temp_dir, Arc::new(NoopMetrics)));
    let compactor = Arc::new(open_table(&temp_dir, Arc::new(NoopMetrics)));

    let inserting = {
        let writer = Arc::clone(&writer);
        thread::spawn(move || {
            (0..40)
                .map(|i| writer.insert(record! { "i" => i }).unwrap())
                .collect::<Vec<u64>>()
        })
    };
    let compacting = {
        let compactor = Arc::clone(&compactor);
        thread::spawn(move || {
            for _ in 0..10 {
                compactor.compact().unwrap();
            }
        })
    };

    let inserted = inserting.join().unwrap();
    compacting.join().unwrap();

    assert_eq!(writer.count().unwrap(), 40);
    assert_eq!(compactor.count().unwrap(), 40);
    for id in inserted {
        assert!(compactor.select(id).unwrap().is_some(), "record {} lost", id);
    }
}

#[test]
fn test_find_during_compaction_sees_every_row() {
    let temp_dir = TempDir::new().unwrap();
    let reader = Arc::new(open_table(&temp_dir, Arc::new(NoopMetrics)));
    let compactor = Arc::new(open_table(&temp_dir, Arc::new(NoopMetrics)));
    for i in 0..20 {
        reader.insert(record! { "kind" => "seed", "i" => i }).unwrap();
    }
    for id in 1..=20 {
        reader.update(id, record! { "touched" => true }).unwrap();
    }

    let compacting = {
        let compactor = Arc::clone(&compactor);
        thread::spawn(move || {
            for _ in 0..10 {
                compactor.compact().unwrap();
            }
        })
    };
    let finding = {
        let reader = Arc::clone(&reader);
        thread::spawn(move || {
            for _ in 0..30 {
                let rows = reader.find(&[Condition::eq("kind", "seed")], None, 0).unwrap();
                assert_eq!(rows.len(), 20);
            }
        })
    };

    compacting.join().unwrap();
    finding.join().unwrap();
}

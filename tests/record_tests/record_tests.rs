//! Tests for Record, Value and RecordVersion
//!
//! These tests verify:
//! - Reserved field handling
//! - Content comparison ignoring engine-managed fields
//! - Index keys and coercing comparisons
//! - Line encoding/decoding rules

use std::cmp::Ordering;

use flatstore::error::FlatError;
use flatstore::record;
use flatstore::record::{is_reserved, Record, RecordVersion, Value};

// =============================================================================
// Record Tests
// =============================================================================

#[test]
fn test_record_macro_and_accessors() {
    let post = record! { "id" => 7, "title" => "hello", "views" => 3 };

    assert_eq!(post.id(), Some(7));
    assert_eq!(post.get("title"), Some(&Value::from("hello")));
    assert_eq!(post.len(), 3);
}

#[test]
fn test_id_must_be_positive_integer() {
    assert_eq!(record! { "id" => 0 }.id(), None);
    assert_eq!(record! { "id" => -4 }.id(), None);
    assert_eq!(record! { "id" => "7" }.id(), None);
    assert_eq!(record! { "title" => "x" }.id(), None);
}

#[test]
fn test_reserved_fields() {
    for field in ["id", "created_at", "updated_at", "deleted_at", "_deleted"] {
        assert!(is_reserved(field), "{} should be reserved", field);
    }
    assert!(!is_reserved("title"));

    let stripped = record! { "id" => 1, "created_at" => 5, "title" => "x" }.without_reserved();
    assert_eq!(stripped, record! { "title" => "x" });
}

#[test]
fn test_same_content_ignores_managed_fields() {
    let stored = record! { "id" => 1, "created_at" => 100, "title" => "x" };
    let merged = record! { "id" => 1, "created_at" => 100, "updated_at" => 200, "title" => "x" };
    let changed = record! { "id" => 1, "title" => "y" };

    assert!(stored.same_content(&merged));
    assert!(!stored.same_content(&changed));
}

#[test]
fn test_project_keeps_requested_fields() {
    let post = record! { "id" => 1, "title" => "x", "body" => "long" };

    let projected = post.project(&["id".to_string(), "title".to_string(), "missing".to_string()]);

    assert_eq!(projected, record! { "id" => 1, "title" => "x" });
}

#[test]
fn test_record_json_is_plain_object() {
    let post = record! { "title" => "x", "tags" => vec![Value::from("a")], "score" => 1.5 };

    let json = serde_json::to_string(&post).unwrap();
    assert_eq!(json, r#"{"score":1.5,"tags":["a"],"title":"x"}"#);

    let back: Record = serde_json::from_str(&json).unwrap();
    assert_eq!(back, post);
}

// =============================================================================
// Value Tests
// =============================================================================

#[test]
fn test_index_key_canonical_numbers() {
    assert_eq!(Value::from(5).index_key(), "5");
    assert_eq!(Value::from(5.0).index_key(), "5");
    assert_eq!(Value::from(5.5).index_key(), "5.5");
    assert_eq!(Value::from(true).index_key(), "true");
    assert_eq!(Value::Null.index_key(), "null");
}

#[test]
fn test_null_and_empty_string_are_distinct() {
    assert_ne!(Value::Null.index_key(), Value::from("").index_key());
    assert_eq!(Value::compare_stored(&Value::from(""), &Value::Null), Some(Ordering::Less));
}

#[test]
fn test_large_integers_compare_exactly() {
    let stored = Value::from(9_007_199_254_740_993i64);

    assert_eq!(
        Value::compare_stored(&stored, &Value::from(9_007_199_254_740_992i64)),
        Some(Ordering::Greater)
    );
    assert_eq!(
        Value::compare_stored(&stored, &Value::from("9007199254740993")),
        Some(Ordering::Equal)
    );
    assert_eq!(Value::compare_stored(&stored, &Value::from(1e16)), Some(Ordering::Less));
}

#[test]
fn test_is_finite_looks_inside_containers() {
    assert!(Value::from(1.5).is_finite());
    assert!(!Value::from(f64::NAN).is_finite());
    assert!(!Value::from(vec![Value::from(1), Value::from(f64::INFINITY)]).is_finite());
}

#[test]
fn test_compare_numeric_field_coerces_literal() {
    let stored = Value::from(30);

    assert_eq!(Value::compare_stored(&stored, &Value::from("30")), Some(Ordering::Equal));
    assert_eq!(Value::compare_stored(&stored, &Value::from(25.5)), Some(Ordering::Greater));
    assert_eq!(Value::compare_stored(&stored, &Value::from("abc")), None);
}

#[test]
fn test_compare_string_field_uses_literal_text() {
    let stored = Value::from("30");

    assert_eq!(Value::compare_stored(&stored, &Value::from(30)), Some(Ordering::Equal));
    assert_eq!(Value::compare_stored(&stored, &Value::from("4")), Some(Ordering::Less));
}

#[test]
fn test_compare_bool_field_uses_truthiness() {
    let stored = Value::from(true);

    assert_eq!(Value::compare_stored(&stored, &Value::from(1)), Some(Ordering::Equal));
    assert_eq!(Value::compare_stored(&stored, &Value::from("false")), Some(Ordering::Greater));
}

#[test]
fn test_lookup_keys_cover_coerced_buckets() {
    let keys = Value::from("5.0").lookup_keys();

    assert!(keys.contains(&"5.0".to_string()));
    assert!(keys.contains(&"5".to_string()));
}

// =============================================================================
// RecordVersion Tests
// =============================================================================

#[test]
fn test_encode_writes_marker_from_variant() {
    let record = record! { "id" => 1, "title" => "x" };

    let live = RecordVersion::Live(record.clone()).encode().unwrap();
    let dead = RecordVersion::Tombstone(record).encode().unwrap();

    assert_eq!(live, b"{\"_deleted\":false,\"id\":1,\"title\":\"x\"}\n".to_vec());
    assert!(String::from_utf8(dead).unwrap().contains("\"_deleted\":true"));
}

#[test]
fn test_decode_picks_variant() {
    let live = RecordVersion::decode(br#"{"_deleted":false,"id":3,"t":"a"}"#).unwrap();
    let dead = RecordVersion::decode(b"{\"_deleted\":true,\"id\":3}\n").unwrap();
    let legacy = RecordVersion::decode(br#"{"id":3}"#).unwrap();

    assert!(!live.is_tombstone());
    assert!(dead.is_tombstone());
    assert!(!legacy.is_tombstone());
    assert!(!live.record().contains_key("_deleted"));
}

#[test]
fn test_decode_rejects_bad_lines() {
    let lines: [&[u8]; 6] = [
        b"",
        b"\n",
        b"not json",
        br#"{"title":"x"}"#,
        br#"{"id":0}"#,
        br#"{"id":"1"}"#,
    ];
    for line in lines {
        let result = RecordVersion::decode(line);
        assert!(matches!(result, Err(FlatError::Decode(_))), "{:?}", line);
    }
}

mod common;

use chrono::{TimeZone, Utc};
use common::{Recorder, aliases, node, user_store};
use pathwatch::{Raw, RawData, RawNode, Store, StoreError, Value, WriteOptions};
use serde_json::json;

#[test]
fn test_get_resolves_paths() {
    let store = Store::from_json(json!({"user": {"name": "J", "tags": ["a", "b"]}})).unwrap();
    assert_eq!(store.get("user.name").unwrap().as_str(), Some("J"));
    assert_eq!(store.get("user.tags.1").unwrap().as_str(), Some("b"));
    assert_eq!(store.get("").unwrap(), Value::Node(store.root()));
    assert!(store.get("user.missing").is_none());
    assert!(store.get("user.name.first").is_none());
}

#[test]
fn test_get_non_numeric_segment_on_sequence_is_none() {
    let store = Store::from_json(json!({"tags": ["a"]})).unwrap();
    assert!(store.get("tags.first").is_none());
    assert!(store.get("tags.length").is_none());
}

#[test]
fn test_get_uses_parent_cache() {
    let store = user_store();
    let user = node(&store, "user");
    assert_eq!(store.get("user.age").unwrap().as_i64(), Some(1));
    user.set("age", 2).unwrap();
    assert_eq!(store.get("user.age").unwrap().as_i64(), Some(2));
}

#[test]
fn test_from_json_rejects_scalars() {
    let err = Store::from_json(json!(3)).unwrap_err();
    assert_eq!(err, StoreError::NotAContainer { path: String::new() });
}

#[test]
fn test_writes_go_through_to_raw_tree() {
    let raw = match Raw::from(json!({"count": 1})) {
        Raw::Node(n) => n,
        _ => unreachable!(),
    };
    let store = Store::new(raw.clone());
    store.root().set("count", 2).unwrap();
    assert_eq!(raw.to_json(), json!({"count": 2}));
    assert_eq!(store.raw_root(), raw);
}

#[test]
fn test_equal_scalar_write_is_noop() {
    let store = user_store();
    let rec = Recorder::new();
    rec.listen(&store, "user.name");
    rec.listen(&store, "user.*");

    let user = node(&store, "user");
    let current = user.get("name").unwrap();
    user.set("name", current).unwrap();
    assert_eq!(rec.count(), 0);

    user.set("name", "K").unwrap();
    assert_eq!(rec.count(), 2);
}

#[test]
fn test_change_carries_old_and_new_values() {
    let store = user_store();
    let rec = Recorder::new();
    rec.listen(&store, "user.name");
    node(&store, "user").set("name", "K").unwrap();

    let seen = rec.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].old, Some(json!("J")));
    assert_eq!(seen[0].new, Some(json!("K")));
    assert!(!seen[0].from_sibling);
    assert!(seen[0].autobind);
}

#[test]
fn test_new_key_has_no_old_value() {
    let store = user_store();
    let rec = Recorder::new();
    rec.listen(&store, "user.email");
    node(&store, "user").set("email", "j@x").unwrap();
    assert_eq!(rec.seen()[0].old, None);
}

#[test]
fn test_get_or_insert_materializes_missing_path() {
    let store = Store::from_json(json!({})).unwrap();
    let value = store.get_or_insert("a.b.0", 5).unwrap();
    assert_eq!(value.as_i64(), Some(5));
    assert_eq!(store.to_json(), json!({"a": {"b": [5]}}));
    assert_eq!(store.get("a.b.0").unwrap().as_i64(), Some(5));
    assert!(node(&store, "a.b").is_seq());
}

#[test]
fn test_get_or_insert_keeps_existing_value() {
    let store = user_store();
    let value = store.get_or_insert("user.name", "other").unwrap();
    assert_eq!(value.as_str(), Some("J"));
    assert_eq!(store.get("user.name").unwrap().as_str(), Some("J"));
}

#[test]
fn test_get_or_insert_notifies_each_creation() {
    let store = Store::from_json(json!({})).unwrap();
    let rec = Recorder::new();
    rec.listen(&store, "a");
    rec.listen(&store, "a.b");
    rec.listen(&store, "a.b.0");
    store.get_or_insert("a.b.0", true).unwrap();
    assert_eq!(rec.paths(), vec!["a", "a.b", "a.b.0"]);
}

#[test]
fn test_get_or_insert_through_scalar_fails() {
    let store = Store::from_json(json!({"a": 1})).unwrap();
    let err = store.get_or_insert("a.b", 2).unwrap_err();
    assert_eq!(err, StoreError::NotAContainer { path: "a".to_string() });
}

#[test]
fn test_get_or_insert_invalid_index_fails() {
    let store = Store::from_json(json!({"a": []})).unwrap();
    let err = store.get_or_insert("a.x", 2).unwrap_err();
    assert_eq!(
        err,
        StoreError::InvalidIndex {
            segment: "x".to_string(),
            path: "a".to_string()
        }
    );
}

#[test]
fn test_assigned_object_is_wrapped_with_alias() {
    let store = user_store();
    store
        .root()
        .set("profile", Raw::from(json!({"address": {"city": "P"}})))
        .unwrap();
    let address = node(&store, "profile.address");
    assert_eq!(aliases(&address), vec!["profile.address"]);
    assert_eq!(store.get("profile.address.city").unwrap().as_str(), Some("P"));
}

#[test]
fn test_overwritten_node_is_pruned() {
    let store = user_store();
    let old_user = node(&store, "user");
    assert_eq!(store.node_count(), 2);

    store.root().set("user", Raw::from(json!({"name": "Z"}))).unwrap();
    assert!(!old_user.is_live());
    assert_eq!(store.node_count(), 2);
    assert_eq!(store.get("user.name").unwrap().as_str(), Some("Z"));
    assert_eq!(old_user.set("name", "Q"), Err(StoreError::DetachedNode));
}

#[test]
fn test_overwritten_node_kept_without_pruning() {
    let store = Store::builder()
        .prune_orphans(false)
        .wrap_json(json!({"user": {"name": "J"}}))
        .unwrap();
    let old_user = node(&store, "user");
    store.root().set("user", Raw::from(json!({"name": "Z"}))).unwrap();
    assert!(old_user.is_live());
    assert!(old_user.aliases().is_empty());
    assert_eq!(store.node_count(), 3);
}

#[test]
fn test_shared_object_has_two_aliases() {
    let store = Store::from_json(json!({})).unwrap();
    let shared = RawNode::map();
    let root = store.root();
    root.set("a", shared.clone()).unwrap();
    root.set("b", shared.clone()).unwrap();

    let a = node(&store, "a");
    assert_eq!(a, node(&store, "b"));
    assert_eq!(aliases(&a), vec!["a", "b"]);

    let rec = Recorder::new();
    rec.listen(&store, "a.x");
    rec.listen(&store, "b.x");
    a.set("x", 1).unwrap();
    assert_eq!(rec.paths(), vec!["a.x", "b.x"]);
    assert_eq!(store.get("b.x").unwrap().as_i64(), Some(1));

    root.delete("a").unwrap();
    assert_eq!(aliases(&a), vec!["b"]);
    assert!(a.is_live());
}

#[test]
fn test_delete_removes_key() {
    let store = user_store();
    let rec = Recorder::new();
    rec.listen(&store, "user.age");
    let user = node(&store, "user");

    let removed = user.delete("age").unwrap();
    assert_eq!(removed.map(|r| r.to_json()), Some(json!(1)));
    assert_eq!(store.to_json(), json!({"user": {"name": "J"}}));
    assert_eq!(rec.seen()[0].new, None);
    assert!(store.get("user.age").is_none());

    assert_eq!(user.delete("age").unwrap().map(|r| r.to_json()), None);
    assert_eq!(rec.count(), 1);
}

#[test]
fn test_delete_on_sequence_fails() {
    let store = Store::from_json(json!({"tags": ["a"]})).unwrap();
    let err = node(&store, "tags").delete(0).unwrap_err();
    assert_eq!(err, StoreError::NotAMap { path: "tags".to_string() });
}

#[test]
fn test_set_non_numeric_key_on_sequence_fails() {
    let store = Store::from_json(json!({"tags": ["a"]})).unwrap();
    let err = node(&store, "tags").set("first", 1).unwrap_err();
    assert!(matches!(err, StoreError::InvalidIndex { .. }));
}

#[test]
fn test_set_past_end_pads_with_null() {
    let store = Store::from_json(json!({"list": []})).unwrap();
    let rec = Recorder::new();
    rec.listen(&store, "list.*");
    node(&store, "list").set(2, "x").unwrap();

    assert_eq!(store.to_json(), json!({"list": [null, null, "x"]}));
    assert_eq!(rec.paths(), vec!["list.2", "list.length"]);
    assert_eq!(rec.seen()[1].old, Some(json!(0)));
    assert_eq!(rec.seen()[1].new, Some(json!(3)));
}

#[test]
fn test_dates_are_normalized_on_write() {
    let store = user_store();
    let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    node(&store, "user").set("born", date).unwrap();

    assert_eq!(
        store.get("user.born").unwrap().as_str(),
        Some("2024-01-02T03:04:05.000Z")
    );
    assert_eq!(store.to_json()["user"]["born"], json!("2024-01-02T03:04:05.000Z"));
}

#[test]
fn test_dates_are_normalized_on_wrap() {
    let at = Utc.with_ymd_and_hms(2020, 5, 6, 7, 8, 9).unwrap();
    let raw = RawNode::new(RawData::Map(
        [("at".to_string(), Raw::Date(at))].into_iter().collect(),
    ));
    let store = Store::new(raw.clone());
    assert!(matches!(raw.get(&"at".into()), Some(Raw::String(_))));
    assert_eq!(store.get("at").unwrap().as_str(), Some("2020-05-06T07:08:09.000Z"));
}

#[test]
fn test_silent_write_skips_listeners() {
    let store = user_store();
    let rec = Recorder::new();
    rec.listen(&store, "user.name");
    let user = node(&store, "user");
    user.set_with("name", "K", WriteOptions::silent()).unwrap();
    assert_eq!(rec.count(), 0);
    assert_eq!(store.get("user.name").unwrap().as_str(), Some("K"));
}

#[test]
fn test_no_autobind_is_reported() {
    let store = user_store();
    let rec = Recorder::new();
    rec.listen(&store, "user.name");
    node(&store, "user")
        .set_with("name", "K", WriteOptions::no_autobind())
        .unwrap();
    assert!(!rec.seen()[0].autobind);
}

#[test]
fn test_wrap_is_idempotent() {
    let store = user_store();
    assert_eq!(store.wrap(store.raw_root()), store.root());
    let user = node(&store, "user");
    assert_eq!(store.wrap(user.raw().unwrap()), user);
}

#[test]
fn test_wrapped_fresh_node_gains_alias_on_assignment() {
    let store = user_store();
    let fresh = store.wrap(RawNode::seq());
    assert!(fresh.aliases().is_empty());
    fresh.push("x").unwrap();

    store.root().set("list", &fresh).unwrap();
    assert_eq!(aliases(&fresh), vec!["list"]);
    assert_eq!(store.get("list.0").unwrap().as_str(), Some("x"));
}

#[test]
fn test_keys_and_len() {
    let store = user_store();
    let user = node(&store, "user");
    assert_eq!(user.len(), 2);
    assert_eq!(
        user.keys().iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        vec!["name", "age"]
    );
    assert!(!user.is_seq());
}

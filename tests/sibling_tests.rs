mod common;

use common::{Recorder, aliases, node};
use pathwatch::{Raw, RawNode, Store, WriteOptions};
use serde_json::json;

fn shared_raw() -> RawNode {
    match Raw::from(json!({"user": {"name": "J"}, "items": [{"id": "A"}, {"id": "B"}, {"id": "C"}]})) {
        Raw::Node(n) => n,
        _ => unreachable!(),
    }
}

#[test]
fn test_write_reaches_sibling_listener() {
    let raw = shared_raw();
    let first = Store::new(raw.clone());
    let second = Store::new(raw.clone());
    let rec = Recorder::new();
    rec.listen(&second, "user.name");
    second.get("user.name");

    node(&first, "user").set("name", "K").unwrap();

    let seen = rec.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].from_sibling);
    assert_eq!(seen[0].old, Some(json!("J")));
    assert_eq!(seen[0].new, Some(json!("K")));
    assert_eq!(second.get("user.name").unwrap().as_str(), Some("K"));
}

#[test]
fn test_writing_store_is_not_marked_as_sibling() {
    let raw = shared_raw();
    let first = Store::new(raw.clone());
    let _second = Store::new(raw.clone());
    let rec = Recorder::new();
    rec.listen(&first, "user.name");
    node(&first, "user").set("name", "K").unwrap();
    assert_eq!(rec.count(), 1);
    assert!(!rec.seen()[0].from_sibling);
}

#[test]
fn test_three_siblings_each_dispatch_once() {
    let raw = shared_raw();
    let stores: Vec<Store> = (0..3).map(|_| Store::new(raw.clone())).collect();
    let recorders: Vec<Recorder> = stores
        .iter()
        .map(|store| {
            let rec = Recorder::new();
            rec.listen(store, "user.name");
            rec
        })
        .collect();

    node(&stores[1], "user").set("name", "K").unwrap();
    for rec in &recorders {
        assert_eq!(rec.count(), 1);
    }
    assert_eq!(raw.to_json()["user"]["name"], json!("K"));

    node(&stores[2], "user").set("name", "L").unwrap();
    for rec in &recorders {
        assert_eq!(rec.count(), 2);
    }
}

#[test]
fn test_sibling_at_different_path() {
    let raw = shared_raw();
    let first = Store::new(raw.clone());
    let user_raw = node(&first, "user").raw().unwrap();
    let second = Store::new(user_raw);
    let rec = Recorder::new();
    rec.listen(&second, "name");

    node(&first, "user").set("name", "K").unwrap();
    assert_eq!(rec.paths(), vec!["name"]);

    let back = Recorder::new();
    back.listen(&first, "user.name");
    second.root().set("name", "M").unwrap();
    assert_eq!(back.count(), 1);
    assert!(back.seen()[0].from_sibling);
}

#[test]
fn test_wrap_links_node_from_other_store() {
    let first = Store::new(shared_raw());
    let second = Store::from_json(json!({})).unwrap();
    let mirror = second.wrap(node(&first, "user").raw().unwrap());
    assert!(mirror.aliases().is_empty());
    second.root().set("mirror", &mirror).unwrap();
    assert_eq!(aliases(&mirror), vec!["mirror"]);

    let rec = Recorder::new();
    rec.listen(&second, "mirror.name");
    node(&first, "user").set("name", "K").unwrap();
    assert_eq!(rec.paths(), vec!["mirror.name"]);
}

#[test]
fn test_sibling_splice_reindexes() {
    let raw = shared_raw();
    let first = Store::new(raw.clone());
    let second = Store::new(raw.clone());
    let c = node(&second, "items.2");
    let rec = Recorder::new();
    rec.listen(&second, "items.length");

    node(&first, "items").remove(1).unwrap();

    assert_eq!(aliases(&c), vec!["items.1"]);
    assert_eq!(second.get("items.1.id").unwrap().as_str(), Some("C"));
    assert_eq!(rec.count(), 1);
    assert!(rec.seen()[0].from_sibling);
}

#[test]
fn test_new_object_is_linked_in_both_stores() {
    let raw = shared_raw();
    let first = Store::new(raw.clone());
    let second = Store::new(raw.clone());

    node(&first, "user")
        .set("profile", Raw::from(json!({"city": "P"})))
        .unwrap();
    let profile = node(&second, "user.profile");
    assert_eq!(aliases(&profile), vec!["user.profile"]);

    let rec = Recorder::new();
    rec.listen(&first, "user.profile.city");
    profile.set("city", "Q").unwrap();
    assert_eq!(rec.count(), 1);
    assert_eq!(first.get("user.profile.city").unwrap().as_str(), Some("Q"));
}

#[test]
fn test_silent_write_propagates_silently() {
    let raw = shared_raw();
    let first = Store::new(raw.clone());
    let second = Store::new(raw.clone());
    let rec = Recorder::new();
    rec.listen(&second, "user.name");

    node(&first, "user")
        .set_with("name", "K", WriteOptions::silent())
        .unwrap();
    assert_eq!(rec.count(), 0);
    assert_eq!(second.get("user.name").unwrap().as_str(), Some("K"));
}

#[test]
fn test_dropped_sibling_is_unlinked() {
    let raw = shared_raw();
    let first = Store::new(raw.clone());
    let second = Store::new(raw.clone());
    drop(second);

    let rec = Recorder::new();
    rec.listen(&first, "user.name");
    node(&first, "user").set("name", "K").unwrap();
    assert_eq!(rec.count(), 1);
    assert_eq!(raw.to_json()["user"]["name"], json!("K"));
}

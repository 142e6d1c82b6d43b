//! Tests for class extension, getter overrides, constructor hooks and merge
//! strategies.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use resq_store::validators::{identity, integer, optional, string, updated_on};
use resq_store::{EntityClass, MergeStrategy, Shape, Store, StoreError};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::Rc;

fn user_class(store: &Store) -> EntityClass {
    store.define_class(
        "User",
        Shape::new()
            .field("id", identity(string()))
            .field("name", string()),
    )
}

// ── Extension ───────────────────────────────────────────────────

#[test]
fn derived_class_merges_shapes() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let admin = user.extend("Admin", Shape::new().field("level", optional(integer())));

    let names: Vec<&str> = admin.shape().names().collect();

    assert_eq!(names, vec!["id", "name", "level"]);
    assert_eq!(user.shape().len(), 2);
    assert!(admin.is_a(&user));
    assert!(!user.is_a(&admin));
    assert_eq!(admin.root_id(), user.id());
    assert!(admin.parent().is_some_and(|p| p.ptr_eq(&user)));
}

#[test]
fn base_and_derived_share_field_values() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let admin = user.extend("Admin", Shape::new().field("level", optional(integer())));

    let u = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let a = admin
        .construct(&json!({ "id": "u1", "name": "Ann", "level": 3 }))
        .unwrap();

    assert!(!u.ptr_eq(&a));
    assert_eq!(user.len(), 1);
    assert_eq!(admin.len(), 1);
    assert_eq!(store.live_records(), 1);

    a.set("name", "Zed").unwrap();
    assert_eq!(u.get_str("name").as_deref(), Some("Zed"));

    u.set("name", "Yan").unwrap();
    assert_eq!(a.get_str("name").as_deref(), Some("Yan"));
}

#[test]
fn base_projection_omits_derived_fields() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let admin = user.extend("Admin", Shape::new().field("level", optional(integer())));

    let u = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let a = admin
        .construct(&json!({ "id": "u1", "name": "Ann", "level": 3 }))
        .unwrap();

    assert_eq!(u.to_json(), json!({ "id": "u1", "name": "Ann" }));
    assert_eq!(a.to_json(), json!({ "id": "u1", "name": "Ann", "level": 3 }));
}

#[test]
fn unrelated_root_classes_do_not_share_records() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let team = store.define_class(
        "Team",
        Shape::new()
            .field("id", identity(string()))
            .field("name", string()),
    );

    let u = user.construct(&json!({ "id": "x", "name": "Ann" })).unwrap();
    let t = team.construct(&json!({ "id": "x", "name": "Core" })).unwrap();

    assert_eq!(u.get_str("name").as_deref(), Some("Ann"));
    assert_eq!(t.get_str("name").as_deref(), Some("Core"));
    assert_eq!(store.live_records(), 2);
}

#[test]
fn derived_shape_may_replace_a_validator() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let lenient = user.extend("Lenient", Shape::new().field("name", optional(string())));

    assert!(lenient.construct(&json!({ "id": "u1" })).is_ok());
    assert!(user.construct(&json!({ "id": "u2" })).is_err());
}

// ── Getter overrides ────────────────────────────────────────────

#[test]
fn overridden_getter_shapes_reads_and_projection() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    user.override_getter("name", |_, stored| match stored {
        Value::String(s) => Value::String(s.to_uppercase()),
        other => other,
    });

    let u = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    assert_eq!(u.get_str("name").as_deref(), Some("ANN"));
    assert_eq!(u.peek("name"), Some(json!("ANN")));
    assert_eq!(u.to_json(), json!({ "id": "u1", "name": "ANN" }));
}

#[test]
fn derived_class_inherits_and_can_replace_getters() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    user.override_getter("name", |_, _| json!("base"));
    let admin = user.extend("Admin", Shape::new());
    let owner = user.extend("Owner", Shape::new());
    owner.override_getter("name", |_, _| json!("owner"));

    let a = admin.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let o = owner.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    assert_eq!(a.get_str("name").as_deref(), Some("base"));
    assert_eq!(o.get_str("name").as_deref(), Some("owner"));
}

#[test]
fn getter_can_derive_from_other_fields() {
    let (store, _) = Store::manual();
    let person = store.define_class(
        "Person",
        Shape::new()
            .field("id", identity(string()))
            .field("first", string())
            .field("last", string())
            .field("full", optional(string())),
    );
    person.override_getter("full", |p, _| {
        let first = p.peek("first").unwrap_or(Value::Null);
        let last = p.peek("last").unwrap_or(Value::Null);
        json!(format!(
            "{} {}",
            first.as_str().unwrap_or_default(),
            last.as_str().unwrap_or_default()
        ))
    });

    let p = person
        .construct(&json!({ "id": "p1", "first": "Ada", "last": "Lovelace" }))
        .unwrap();

    assert_eq!(p.get_str("full").as_deref(), Some("Ada Lovelace"));
}

// ── Constructor hooks ───────────────────────────────────────────

#[test]
fn hooks_run_ancestors_first_on_every_construction() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let admin = user.extend("Admin", Shape::new());
    let log = Rc::new(RefCell::new(Vec::new()));

    let base_log = Rc::clone(&log);
    user.on_construct(move |e| {
        base_log.borrow_mut().push(format!("user:{}", e.identity()));
        Ok(())
    });
    let admin_log = Rc::clone(&log);
    admin.on_construct(move |e| {
        admin_log.borrow_mut().push(format!("admin:{}", e.identity()));
        Ok(())
    });

    let _a = admin.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    admin.construct(&json!({ "id": "u1", "name": "Bea" })).unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["user:u1", "admin:u1", "user:u1", "admin:u1"]
    );
}

#[test]
fn hook_error_is_returned() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    user.on_construct(|e| {
        if e.get_str("name").as_deref() == Some("root") {
            return Err(StoreError::callback("reserved name"));
        }
        Ok(())
    });

    let err = user
        .construct(&json!({ "id": "u1", "name": "root" }))
        .unwrap_err();

    assert_eq!(err.to_string(), "reserved name");
}

// ── Merge strategy ──────────────────────────────────────────────

fn post_class(store: &Store) -> EntityClass {
    let post = store.define_class(
        "Post",
        Shape::new()
            .field("id", identity(string()))
            .field("title", string())
            .field("updated_on", updated_on()),
    );
    post.set_merge_strategy(MergeStrategy::LastWriterWins);
    post
}

#[test]
fn last_writer_wins_ignores_stale_constructions() {
    let (store, _) = Store::manual();
    let post = post_class(&store);

    let p = post
        .construct(&json!({ "id": "p1", "title": "second", "updated_on": 2_000 }))
        .unwrap();
    let stale = post
        .construct(&json!({ "id": "p1", "title": "first", "updated_on": 1_000 }))
        .unwrap();

    assert!(stale.ptr_eq(&p));
    assert_eq!(p.get_str("title").as_deref(), Some("second"));
    assert_eq!(p.updated_on(), Utc.timestamp_millis_opt(2_000).single());

    post.construct(&json!({ "id": "p1", "title": "third", "updated_on": 3_000 }))
        .unwrap();
    assert_eq!(p.get_str("title").as_deref(), Some("third"));
    assert_eq!(
        p.get_str("updated_on").as_deref(),
        Some("1970-01-01T00:00:03+00:00")
    );
}

#[test]
fn overwrite_applies_stale_constructions() {
    let (store, _) = Store::manual();
    let post = post_class(&store);
    post.set_merge_strategy(MergeStrategy::Overwrite);

    let p = post
        .construct(&json!({ "id": "p1", "title": "second", "updated_on": 2_000 }))
        .unwrap();
    post.construct(&json!({ "id": "p1", "title": "first", "updated_on": 1_000 }))
        .unwrap();

    assert_eq!(p.get_str("title").as_deref(), Some("first"));
}

#[test]
fn derived_class_inherits_merge_strategy() {
    let (store, _) = Store::manual();
    let post = post_class(&store);
    let pinned = post.extend("Pinned", Shape::new());

    assert_eq!(pinned.merge_strategy(), MergeStrategy::LastWriterWins);
    assert_eq!(MergeStrategy::default(), MergeStrategy::Overwrite);
    assert_eq!(
        serde_json::to_value(MergeStrategy::LastWriterWins).unwrap(),
        json!("last_writer_wins")
    );
}

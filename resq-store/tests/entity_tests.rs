//! Tests for canonical instances, the get/set paths and JSON projection.

use pretty_assertions::assert_eq;
use resq_events::Listener;
use resq_store::validators::{coerce_number, identity, integer, optional, string};
use resq_store::{
    Entity, EntityClass, EntityUpdate, FieldEvent, Shape, Store, StoreError, ValidationError,
};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

fn user_class(store: &Store) -> EntityClass {
    store.define_class(
        "User",
        Shape::new()
            .field("id", identity(string()))
            .field("name", string())
            .field("email", optional(string())),
    )
}

fn counter() -> (Rc<Cell<usize>>, Rc<Listener<FieldEvent>>) {
    let sets = Rc::new(Cell::new(0));
    let seen = Rc::clone(&sets);
    let listener: Rc<Listener<FieldEvent>> = Rc::new(move |event: &FieldEvent| {
        if event.is_set() {
            seen.set(seen.get() + 1);
        }
    });
    (sets, listener)
}

// ── Identity merge ──────────────────────────────────────────────

#[test]
fn same_identity_resolves_to_same_instance() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let b = user.construct(&json!({ "id": "u1", "name": "Bea" })).unwrap();

    assert!(a.ptr_eq(&b));
    assert_eq!(a, b);
    assert_eq!(a.get_str("name").as_deref(), Some("Bea"));
    assert_eq!(user.len(), 1);
}

#[test]
fn different_identities_are_distinct() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let b = user.construct(&json!({ "id": "u2", "name": "Ann" })).unwrap();

    assert!(!a.ptr_eq(&b));
    assert_eq!(user.len(), 2);
}

#[test]
fn absent_fields_keep_earlier_values() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    let a = user
        .construct(&json!({ "id": "u1", "name": "Ann", "email": "ann@example.com" }))
        .unwrap();
    user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    assert_eq!(a.get_str("email").as_deref(), Some("ann@example.com"));
}

#[test]
fn explicit_null_overwrites_optional_field() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    let a = user
        .construct(&json!({ "id": "u1", "name": "Ann", "email": "ann@example.com" }))
        .unwrap();
    user.construct(&json!({ "id": "u1", "name": "Ann", "email": null }))
        .unwrap();

    assert_eq!(a.get("email"), Some(json!(null)));
}

#[test]
fn missing_identity_field_generates_one() {
    let (store, _) = Store::manual();
    let note = store.define_class("Note", Shape::new().field("text", string()));

    let a = note.construct(&json!({ "text": "a" })).unwrap();
    let b = note.construct(&json!({ "text": "a" })).unwrap();

    assert!(!a.ptr_eq(&b));
    assert_ne!(a.identity(), b.identity());
}

#[test]
fn construct_as_uses_external_identity() {
    let (store, _) = Store::manual();
    let note = store.define_class("Note", Shape::new().field("text", string()));

    let a = note.construct_as("n1", &json!({ "text": "a" })).unwrap();
    let b = note.construct_as("n1", &json!({ "text": "b" })).unwrap();

    assert!(a.ptr_eq(&b));
    assert_eq!(a.identity().as_str(), "n1");
    assert_eq!(note.get("n1"), Some(a));
}

#[test]
fn numeric_identity_uses_decimal_string() {
    let (store, _) = Store::manual();
    let item = store.define_class("Item", Shape::new().field("id", identity(integer())));

    let a = item.construct(&json!({ "id": 42 })).unwrap();

    assert_eq!(a.identity().as_str(), "42");
    assert!(item.get("42").is_some());
}

// ── Validation ──────────────────────────────────────────────────

#[test]
fn non_object_input_is_rejected() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    let err = user.construct(&json!(["u1"])).unwrap_err();

    assert!(matches!(
        err,
        StoreError::Validation(ValidationError::NotAnObject("array"))
    ));
    assert!(user.is_empty());
}

#[test]
fn validation_reports_every_failing_field() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    let err = user
        .construct(&json!({ "id": true, "name": 7, "email": "ok" }))
        .unwrap_err();

    let StoreError::Validation(validation) = err else {
        panic!("expected a validation error");
    };
    let fields: Vec<&str> = validation
        .issues()
        .iter()
        .map(|i| i.field.as_str())
        .collect();
    assert_eq!(fields, vec!["id", "name"]);
    assert_eq!(validation.issues()[1].message, "expected string, got number");
    assert!(user.is_empty());
    assert_eq!(store.live_records(), 0);
}

#[test]
fn failed_construction_leaves_instance_untouched() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    assert!(
        user.construct(&json!({ "id": "u1", "name": 1, "email": "x@y" }))
            .is_err()
    );

    assert_eq!(a.get_str("name").as_deref(), Some("Ann"));
    assert_eq!(a.get("email"), None);
}

#[test]
fn coercing_validator_stores_parsed_value() {
    let (store, _) = Store::manual();
    let person = store.define_class(
        "Person",
        Shape::new()
            .field("id", identity(string()))
            .field("age", coerce_number()),
    );

    let p = person.construct(&json!({ "id": "p1", "age": "42" })).unwrap();

    assert_eq!(p.get("age"), Some(json!(42)));
    assert_eq!(p.get_number("age"), Some(42.0));
}

// ── Set path ────────────────────────────────────────────────────

#[test]
fn set_validates_and_stores() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    a.set("name", "Bea").unwrap();

    assert_eq!(a.get_str("name").as_deref(), Some("Bea"));
}

#[test]
fn failed_set_keeps_previous_value() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    let err = a.set("name", 12).unwrap_err();

    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(a.get_str("name").as_deref(), Some("Ann"));
}

#[test]
fn set_rejects_unknown_field() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    let err = a.set("age", 3).unwrap_err();

    assert!(matches!(err, StoreError::UnknownField { ref field, .. } if field == "age"));
}

#[test]
fn set_rejects_identity_change() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    assert!(a.set("id", "u1").is_ok());
    let err = a.set("id", "u2").unwrap_err();

    assert!(matches!(err, StoreError::IdentityChange { .. }));
    assert_eq!(a.identity().as_str(), "u1");
    assert!(user.get("u2").is_none());
}

#[test]
fn unchanged_write_is_a_noop() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let (sets, listener) = counter();
    let _sub = a.field_events().subscribe(&listener);

    a.set("name", "Ann").unwrap();
    user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    assert_eq!(sets.get(), 0);

    a.set("name", "Bea").unwrap();
    assert_eq!(sets.get(), 1);
}

#[test]
fn get_notifies_and_peek_does_not() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    let reads = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&reads);
    let listener: Rc<Listener<FieldEvent>> = Rc::new(move |event: &FieldEvent| {
        if event.is_get() {
            seen.borrow_mut().push(event.key.clone());
        }
    });
    let _sub = a.field_events().subscribe(&listener);

    a.peek("name");
    a.get("name");
    a.get("email");

    assert_eq!(*reads.borrow(), vec!["name".to_string(), "email".to_string()]);
}

// ── Class channel ───────────────────────────────────────────────

#[test]
fn class_channel_reports_creation_then_changes() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let updates = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&updates);
    let listener: Rc<Listener<EntityUpdate>> =
        Rc::new(move |u: &EntityUpdate| seen.borrow_mut().push(u.clone()));
    let _sub = user.updates().subscribe(&listener);

    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    a.set("name", "Bea").unwrap();
    user.construct(&json!({ "id": "u1", "name": "Cy" })).unwrap();

    assert_eq!(
        *updates.borrow(),
        vec![
            EntityUpdate::created("u1".into()),
            EntityUpdate::changed("u1".into(), "name"),
            EntityUpdate::changed("u1".into(), "name"),
        ]
    );
}

#[test]
fn changes_bus_coalesces_within_window() {
    let (store, scheduler) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    let deliveries = Rc::new(Cell::new(0));
    let seen = Rc::clone(&deliveries);
    let listener: Rc<Listener<Entity>> = Rc::new(move |_: &Entity| seen.set(seen.get() + 1));
    let _sub = a.changes().subscribe(&listener);

    a.set("name", "Bea").unwrap();
    a.set("name", "Cy").unwrap();
    a.set("email", "cy@example.com").unwrap();
    assert_eq!(deliveries.get(), 0);

    scheduler.advance(Duration::from_millis(100));
    assert_eq!(deliveries.get(), 1);
    assert_eq!(a.get_str("name").as_deref(), Some("Cy"));
}

#[test]
fn find_and_filter_scan_live_instances() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let _a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let _b = user.construct(&json!({ "id": "u2", "name": "Bea" })).unwrap();
    let _c = user.construct(&json!({ "id": "u3", "name": "Ann" })).unwrap();

    let anns = user.filter(|u| u.get_str("name").as_deref() == Some("Ann"));
    let bea = user.find(|u| u.get_str("name").as_deref() == Some("Bea"));

    assert_eq!(anns.len(), 2);
    assert_eq!(bea.map(|b| b.identity().to_string()), Some("u2".to_string()));
}

// ── Projection ──────────────────────────────────────────────────

#[test]
fn to_json_contains_exactly_declared_fields() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    assert_eq!(
        a.to_json(),
        json!({ "id": "u1", "name": "Ann", "email": null })
    );
    assert_eq!(serde_json::to_value(&a).unwrap(), a.to_json());
}

#[test]
fn to_json_ignores_undeclared_input() {
    let (store, _) = Store::manual();
    let user = user_class(&store);
    let a = user
        .construct(&json!({ "id": "u1", "name": "Ann", "extra": 1 }))
        .unwrap();

    assert_eq!(a.get("extra"), None);
    assert_eq!(
        a.to_json(),
        json!({ "id": "u1", "name": "Ann", "email": null })
    );
}

// ── Weak collectibility ─────────────────────────────────────────

#[test]
fn unreferenced_entities_are_collected() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    let a = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();
    let weak = a.downgrade();
    assert_eq!(store.live_records(), 1);

    drop(a);

    assert!(weak.upgrade().is_none());
    assert!(user.get("u1").is_none());
    assert!(user.is_empty());
    assert_eq!(store.live_records(), 0);
}

#[test]
fn reconstructing_after_collection_starts_fresh() {
    let (store, _) = Store::manual();
    let user = user_class(&store);

    drop(
        user.construct(&json!({ "id": "u1", "name": "Ann", "email": "a@b" }))
            .unwrap(),
    );
    let again = user.construct(&json!({ "id": "u1", "name": "Ann" })).unwrap();

    assert_eq!(again.get("email"), None);
}

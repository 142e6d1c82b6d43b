use crate::class::EntityClass;
use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use crate::schema::{ConstructionContext, FieldValidator, MergeStrategy};
use crate::updates::{Queries, UpdateManager};
use chrono::{DateTime, Utc};
use resq_events::{EventBus, Listener, Subscription};
use resq_types::{EntityUpdate, FieldEvent, Identity};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

pub(crate) struct EntityInner {
    class: EntityClass,
    identity: Identity,
    record: Rc<Record>,
    changes: EventBus<Entity>,
    forward: RefCell<Option<(Rc<Listener<FieldEvent>>, Subscription)>>,
    managers: RefCell<Vec<UpdateManager>>,
}

/// Handle to the canonical instance of a class for one identity.
///
/// Cloning is cheap and yields the same instance; equality is identity of the
/// instance, not of its field values.
#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
}

/// Non-owning handle to an [`Entity`].
#[derive(Clone)]
pub struct WeakEntity {
    inner: Weak<EntityInner>,
}

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        self.inner.upgrade().map(Entity::from_inner)
    }

    /// True while some strong handle exists.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEntity")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("class", &self.inner.class.name())
            .field("identity", &self.inner.identity)
            .field("fields", &self.to_json())
            .finish()
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl Entity {
    pub(crate) fn new(class: EntityClass, identity: Identity, record: Rc<Record>) -> Self {
        let changes = EventBus::debounced(
            class.store().config().change_debounce,
            class.store().scheduler(),
        );
        Self {
            inner: Rc::new(EntityInner {
                class,
                identity,
                record,
                changes,
                forward: RefCell::new(None),
                managers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<EntityInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<EntityInner> {
        &self.inner
    }

    /// Forwards set events of the shared record to this class's update
    /// channel and to this instance's debounced change bus.
    pub(crate) fn attach(&self) {
        let weak = Rc::downgrade(&self.inner);
        let listener: Rc<Listener<FieldEvent>> = Rc::new(move |event: &FieldEvent| {
            if !event.is_set() {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let entity = Entity::from_inner(inner);
            entity
                .inner
                .class
                .updates()
                .dispatch(EntityUpdate::changed(entity.inner.identity.clone(), &event.key));
            entity.inner.changes.dispatch(entity.clone());
        });
        let subscription = self.inner.record.events().subscribe(&listener);
        *self.inner.forward.borrow_mut() = Some((listener, subscription));
    }

    /// Writes staged construction values through the set path.
    pub(crate) fn apply(
        &self,
        staged: Vec<(String, Value)>,
        updated_on: Option<DateTime<Utc>>,
        strategy: MergeStrategy,
    ) -> bool {
        let record = &self.inner.record;
        if let Some(incoming) = updated_on {
            if strategy == MergeStrategy::LastWriterWins
                && record.updated_on().is_some_and(|current| incoming < current)
            {
                debug!(
                    class = %self.inner.class.name(),
                    identity = %self.inner.identity,
                    "Ignoring stale construction"
                );
                return false;
            }
            record.set_updated_on(incoming);
        }
        for (key, value) in staged {
            record.write(&key, value);
        }
        true
    }

    // ── Identity ─────────────────────────────────────────────────

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn class(&self) -> &EntityClass {
        &self.inner.class
    }

    pub fn downgrade(&self) -> WeakEntity {
        WeakEntity {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Source timestamp of the record, if an `updated_on` field set one.
    pub fn updated_on(&self) -> Option<DateTime<Utc>> {
        self.inner.record.updated_on()
    }

    // ── Get path ─────────────────────────────────────────────────

    /// Reads a field, notifying the identity's channel.
    ///
    /// Overridden getters see the stored value (null when absent).
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.record.notify_get(field);
        self.project(field)
    }

    /// Reads a field without notifying anyone.
    pub fn peek(&self, field: &str) -> Option<Value> {
        self.project(field)
    }

    fn project(&self, field: &str) -> Option<Value> {
        let stored = self.inner.record.read(field);
        match self.inner.class.getter(field) {
            Some(getter) => Some(getter(self, stored.unwrap_or(Value::Null))),
            None => stored,
        }
    }

    /// Reads a string field.
    pub fn get_str(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Reads a boolean field.
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(|v| v.as_bool())
    }

    /// Reads a numeric field.
    pub fn get_number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(|v| v.as_f64())
    }

    /// Reads a field and deserializes it. Absent, null or mismatched values
    /// yield `None`.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.get(field).and_then(|v| serde_json::from_value(v).ok())
    }

    // ── Set path ─────────────────────────────────────────────────

    /// Validates `raw` with the field's validator and stores it.
    ///
    /// Writing the current value is a no-op and notifies nobody. On failure
    /// the stored value is untouched.
    pub fn set(&self, field: &str, raw: impl Into<Value>) -> StoreResult<()> {
        let class = &self.inner.class;
        let validator = class
            .shape()
            .get(field)
            .ok_or_else(|| StoreError::UnknownField {
                class: class.name().to_string(),
                field: field.to_string(),
            })?;

        let mut ctx = ConstructionContext::new();
        let value = validator.validate(&raw.into(), &mut ctx)?;
        let (identity, updated_on) = ctx.into_parts();
        if let Some(to) = identity.filter(|id| *id != self.inner.identity) {
            return Err(StoreError::IdentityChange {
                class: class.name().to_string(),
                from: self.inner.identity.clone(),
                to,
            });
        }
        if let Some(at) = updated_on {
            self.inner.record.set_updated_on(at);
        }

        self.inner.record.write(field, value);
        Ok(())
    }

    /// Plain object with exactly the class's declared fields, overridden
    /// getters applied. Absent fields project as null.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for name in self.inner.class.shape().names() {
            map.insert(name.to_string(), self.project(name).unwrap_or(Value::Null));
        }
        Value::Object(map)
    }

    // ── Channels ─────────────────────────────────────────────────

    /// Debounced bus delivering this instance once per change window.
    pub fn changes(&self) -> &EventBus<Entity> {
        &self.inner.changes
    }

    /// Synchronous per-identity get/set channel, shared by every class
    /// instance of this record.
    pub fn field_events(&self) -> &EventBus<FieldEvent> {
        self.inner.record.events()
    }

    // ── Live updates ─────────────────────────────────────────────

    /// Declares live derived values for this entity.
    ///
    /// `callback` runs once now; errors from this first run are returned.
    /// After that it re-runs (debounced) whenever one of the entity sets it
    /// queried changes.
    pub fn with_updates<F>(&self, callback: F) -> StoreResult<UpdateManager>
    where
        F: Fn(&Entity, &mut Queries<'_>) -> StoreResult<()> + 'static,
    {
        let manager = UpdateManager::new(self, Box::new(callback));
        if let Err(e) = manager.run(self) {
            manager.cancel();
            return Err(e);
        }
        self.inner.managers.borrow_mut().push(manager.clone());
        Ok(manager)
    }

    /// Number of update managers registered on this instance.
    pub fn update_managers(&self) -> usize {
        self.inner.managers.borrow().len()
    }

    /// Cancels and forgets every update manager of this instance.
    pub fn cancel_updates(&self) {
        let managers = std::mem::take(&mut *self.inner.managers.borrow_mut());
        for manager in &managers {
            manager.cancel();
        }
    }
}

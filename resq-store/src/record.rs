//! Shared field values of one logical entity.

use chrono::{DateTime, Utc};
use resq_events::EventBus;
use resq_types::FieldEvent;
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};

/// Field values for one `(root class, identity)` pair.
///
/// Every class instance in the lineage that constructs this identity holds the
/// same `Rc<Record>`, which is what keeps a base-class view and a derived-class
/// view of the same entity consistent. The store itself only keeps a weak
/// reference.
pub(crate) struct Record {
    values: RefCell<Map<String, Value>>,
    updated_on: Cell<Option<DateTime<Utc>>>,
    events: EventBus<FieldEvent>,
}

impl Record {
    pub(crate) fn new() -> Self {
        Self {
            values: RefCell::new(Map::new()),
            updated_on: Cell::new(None),
            events: EventBus::new(),
        }
    }

    pub(crate) fn events(&self) -> &EventBus<FieldEvent> {
        &self.events
    }

    /// Reads a value without notifying anyone.
    pub(crate) fn read(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    pub(crate) fn notify_get(&self, key: &str) {
        self.events.dispatch(FieldEvent::get(key));
    }

    /// Stores `value` and dispatches a set event, unless it equals the
    /// current value. Returns whether anything changed.
    pub(crate) fn write(&self, key: &str, value: Value) -> bool {
        {
            let mut values = self.values.borrow_mut();
            if values.get(key) == Some(&value) {
                return false;
            }
            values.insert(key.to_string(), value);
        }
        self.events.dispatch(FieldEvent::set(key));
        true
    }

    pub(crate) fn updated_on(&self) -> Option<DateTime<Utc>> {
        self.updated_on.get()
    }

    pub(crate) fn set_updated_on(&self, at: DateTime<Utc>) {
        self.updated_on.set(Some(at));
    }
}

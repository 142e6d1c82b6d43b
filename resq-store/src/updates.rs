//! Incremental update manager.
//!
//! An entity declares live derived values with [`Entity::with_updates`]. The
//! callback receives a [`Queries`] handle; every `query_*` call claims the next
//! positional slot, whose cached value is kept current from the source class's
//! update channel. Any change to a slot schedules a debounced re-run of the
//! callback.

use crate::class::EntityClass;
use crate::entity::{Entity, WeakEntity};
use crate::error::{StoreError, StoreResult};
use resq_events::{Listener, Scheduler, Subscription, TaskId};
use resq_types::EntityUpdate;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, error};

pub(crate) type UpdateCallback = dyn Fn(&Entity, &mut Queries<'_>) -> StoreResult<()>;

type Predicate = Rc<dyn Fn(&Entity) -> bool>;

/// Which query produced a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMethod {
    One,
    Many,
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => f.write_str("query_one"),
            Self::Many => f.write_str("query_many"),
        }
    }
}

/// A cached match. The manager's own owner is held weakly so a manager never
/// keeps its entity alive; every other match is held strongly.
enum Held {
    Strong(Entity),
    Owner(WeakEntity),
}

impl Held {
    fn new(entity: &Entity, owner: &WeakEntity) -> Self {
        if owner.upgrade().is_some_and(|o| o.ptr_eq(entity)) {
            Self::Owner(entity.downgrade())
        } else {
            Self::Strong(entity.clone())
        }
    }

    fn get(&self) -> Option<Entity> {
        match self {
            Self::Strong(entity) => Some(entity.clone()),
            Self::Owner(weak) => weak.upgrade(),
        }
    }

    fn is(&self, entity: &Entity) -> bool {
        self.get().is_some_and(|e| e.ptr_eq(entity))
    }
}

/// Cached result of one slot.
enum SlotValue {
    One(Option<Held>),
    Many(Vec<Held>),
}

impl SlotValue {
    fn one(&self) -> Option<Entity> {
        match self {
            Self::One(current) => current.as_ref().and_then(Held::get),
            Self::Many(_) => None,
        }
    }

    fn many(&self) -> Vec<Entity> {
        match self {
            Self::Many(list) => list.iter().filter_map(Held::get).collect(),
            Self::One(_) => Vec::new(),
        }
    }

    /// Folds one source update into the cached value. Returns true if the
    /// callback should re-run.
    ///
    /// `rescan` finds the replacement for a `query_one` slot whose entity
    /// stopped matching.
    fn observe(
        &mut self,
        entity: &Entity,
        wants: bool,
        owner: &WeakEntity,
        rescan: impl FnOnce() -> Option<Entity>,
    ) -> bool {
        match self {
            Self::One(current) => {
                let held = current.as_ref().and_then(Held::get);
                match held {
                    None if wants => {
                        *current = Some(Held::new(entity, owner));
                        true
                    }
                    None => false,
                    Some(held) if held.ptr_eq(entity) => {
                        if !wants {
                            *current = rescan().map(|next| Held::new(&next, owner));
                        }
                        true
                    }
                    Some(_) => false,
                }
            }
            Self::Many(list) => {
                list.retain(|h| h.get().is_some());
                let position = list.iter().position(|h| h.is(entity));
                match (position, wants) {
                    (Some(_), true) => true,
                    (Some(i), false) => {
                        list.remove(i);
                        true
                    }
                    (None, true) => {
                        list.push(Held::new(entity, owner));
                        true
                    }
                    (None, false) => false,
                }
            }
        }
    }
}

struct Slot {
    method: QueryMethod,
    class: EntityClass,
    value: Rc<RefCell<SlotValue>>,
}

impl Slot {
    fn describe(method: QueryMethod, class: &EntityClass) -> String {
        format!("{method} on {}", class.name())
    }
}

struct ManagerInner {
    owner: WeakEntity,
    callback: Box<UpdateCallback>,
    slots: RefCell<Vec<Slot>>,
    cursor: Cell<usize>,
    listeners: RefCell<Vec<(Rc<Listener<EntityUpdate>>, Subscription)>>,
    scheduler: Rc<dyn Scheduler>,
    window: Duration,
    pending: Cell<Option<TaskId>>,
    cancelled: Cell<bool>,
    runs: Cell<usize>,
    last_error: RefCell<Option<Rc<StoreError>>>,
    violation: RefCell<Option<StoreError>>,
}

impl ManagerInner {
    /// Drops every source subscription and rewinds the slot cursor.
    fn reset(&self) {
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for (_, subscription) in &listeners {
            subscription.unsubscribe();
        }
        self.cursor.set(0);
    }

    fn schedule_rerun(self: &Rc<Self>) {
        if self.cancelled.get() {
            return;
        }
        if let Some(pending) = self.pending.take() {
            self.scheduler.cancel(pending);
        }
        let manager = Rc::downgrade(self);
        let id = self.scheduler.schedule(
            self.window,
            Box::new(move || {
                if let Some(manager) = manager.upgrade() {
                    manager.pending.set(None);
                    manager.rerun();
                }
            }),
        );
        self.pending.set(Some(id));
    }

    fn rerun(self: &Rc<Self>) {
        if self.cancelled.get() {
            return;
        }
        let Some(owner) = self.owner.upgrade() else {
            self.cancel();
            return;
        };
        debug!(
            class = %owner.class().name(),
            identity = %owner.identity(),
            run = self.runs.get() + 1,
            "Re-running update callback"
        );
        match self.execute(&owner) {
            Ok(()) => {
                self.last_error.borrow_mut().take();
            }
            Err(e) => {
                error!(
                    class = %owner.class().name(),
                    identity = %owner.identity(),
                    "Update callback failed: {}",
                    e
                );
                if matches!(e, StoreError::OrderingViolation { .. }) {
                    self.cancel();
                }
                *self.last_error.borrow_mut() = Some(Rc::new(e));
            }
        }
    }

    fn execute(self: &Rc<Self>, owner: &Entity) -> StoreResult<()> {
        if self.cancelled.get() {
            return Err(StoreError::Cancelled);
        }
        self.reset();
        self.violation.borrow_mut().take();
        self.runs.set(self.runs.get() + 1);
        let mut queries = Queries { manager: self };
        let result = (self.callback)(owner, &mut queries);
        // A violation fails the run even if the callback swallowed it.
        let violation = self.violation.borrow_mut().take();
        match violation {
            Some(violation) => Err(violation),
            None => result,
        }
    }

    fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        if let Some(pending) = self.pending.take() {
            self.scheduler.cancel(pending);
        }
        self.slots.borrow_mut().clear();
        self.reset();
    }

    /// Claims the next slot for `(method, class)`. Returns the cached value if
    /// the slot already exists.
    fn claim(
        &self,
        method: QueryMethod,
        class: &EntityClass,
    ) -> StoreResult<(usize, Option<Rc<RefCell<SlotValue>>>)> {
        if self.cancelled.get() {
            return Err(StoreError::Cancelled);
        }
        let index = self.cursor.get();
        self.cursor.set(index + 1);

        let slots = self.slots.borrow();
        match slots.get(index) {
            Some(slot) if slot.method == method && slot.class.ptr_eq(class) => {
                Ok((index, Some(Rc::clone(&slot.value))))
            }
            Some(slot) => {
                let violation = || StoreError::OrderingViolation {
                    slot: index,
                    expected: Slot::describe(slot.method, &slot.class),
                    found: Slot::describe(method, class),
                };
                let mut recorded = self.violation.borrow_mut();
                if recorded.is_none() {
                    *recorded = Some(violation());
                }
                Err(violation())
            }
            None => Ok((index, None)),
        }
    }

    fn store(
        &self,
        method: QueryMethod,
        class: &EntityClass,
        value: SlotValue,
    ) -> Rc<RefCell<SlotValue>> {
        let value = Rc::new(RefCell::new(value));
        self.slots.borrow_mut().push(Slot {
            method,
            class: class.clone(),
            value: Rc::clone(&value),
        });
        value
    }

    /// Subscribes the slot to its source class for the current run.
    fn watch(
        self: &Rc<Self>,
        class: &EntityClass,
        predicate: Predicate,
        value: Rc<RefCell<SlotValue>>,
    ) {
        let manager = Rc::downgrade(self);
        let source = class.clone();
        let listener: Rc<Listener<EntityUpdate>> = Rc::new(move |update: &EntityUpdate| {
            on_source_update(&manager, &source, &predicate, &value, update);
        });
        let subscription = class.updates().subscribe(&listener);
        self.listeners.borrow_mut().push((listener, subscription));
    }
}

fn on_source_update(
    manager: &Weak<ManagerInner>,
    source: &EntityClass,
    predicate: &Predicate,
    value: &RefCell<SlotValue>,
    update: &EntityUpdate,
) {
    let Some(manager) = manager.upgrade() else {
        return;
    };
    if manager.cancelled.get() {
        return;
    }
    let Some(entity) = source.get(update.identity.as_str()) else {
        return;
    };
    let wants = predicate(&entity);
    let rescan = || source.find(|e| predicate(e));
    let changed = value
        .borrow_mut()
        .observe(&entity, wants, &manager.owner, rescan);
    if changed {
        manager.schedule_rerun();
    }
}

/// Query handle passed to an update callback.
///
/// Queries must be issued in the same order, against the same classes, on
/// every run: slot `i` is identified by its position alone.
pub struct Queries<'a> {
    manager: &'a Rc<ManagerInner>,
}

impl Queries<'_> {
    /// First live instance of `class` matching `predicate`.
    ///
    /// Once cached, the slot only moves when its current value stops matching
    /// (to the next match, if any) or, while empty, when some instance starts
    /// matching.
    pub fn query_one<P>(
        &mut self,
        class: &EntityClass,
        predicate: P,
    ) -> StoreResult<Option<Entity>>
    where
        P: Fn(&Entity) -> bool + 'static,
    {
        let manager = self.manager;
        let (_, cached) = manager.claim(QueryMethod::One, class)?;
        let value = match cached {
            Some(value) => value,
            None => {
                let found = class
                    .find(&predicate)
                    .map(|e| Held::new(&e, &manager.owner));
                manager.store(QueryMethod::One, class, SlotValue::One(found))
            }
        };
        let result = value.borrow().one();
        manager.watch(class, Rc::new(predicate), value);
        Ok(result)
    }

    /// Every live instance of `class` matching `predicate`, in arrival order.
    pub fn query_many<P>(
        &mut self,
        class: &EntityClass,
        predicate: P,
    ) -> StoreResult<Vec<Entity>>
    where
        P: Fn(&Entity) -> bool + 'static,
    {
        self.many(class, predicate, None)
    }

    /// Like [`Queries::query_many`], but a new slot starts from `seed` instead
    /// of scanning the class. Every seed entity must match `predicate`.
    pub fn query_many_seeded<P>(
        &mut self,
        class: &EntityClass,
        predicate: P,
        seed: &[Entity],
    ) -> StoreResult<Vec<Entity>>
    where
        P: Fn(&Entity) -> bool + 'static,
    {
        self.many(class, predicate, Some(seed))
    }

    fn many<P>(
        &mut self,
        class: &EntityClass,
        predicate: P,
        seed: Option<&[Entity]>,
    ) -> StoreResult<Vec<Entity>>
    where
        P: Fn(&Entity) -> bool + 'static,
    {
        let manager = self.manager;
        let (index, cached) = manager.claim(QueryMethod::Many, class)?;
        let value = match cached {
            Some(value) => value,
            None => {
                let initial = match seed {
                    Some(seed) => {
                        if let Some(bad) = seed.iter().find(|e| !predicate(e)) {
                            manager.cursor.set(index);
                            return Err(StoreError::SeedMismatch {
                                class: class.name().to_string(),
                                identity: bad.identity().clone(),
                            });
                        }
                        seed.to_vec()
                    }
                    None => class.filter(&predicate),
                };
                let held = initial
                    .iter()
                    .map(|e| Held::new(e, &manager.owner))
                    .collect();
                manager.store(QueryMethod::Many, class, SlotValue::Many(held))
            }
        };
        let result = value.borrow().many();
        manager.watch(class, Rc::new(predicate), value);
        Ok(result)
    }
}

/// Handle to the live queries of one entity. Cloning yields another handle
/// to the same manager.
#[derive(Clone)]
pub struct UpdateManager {
    inner: Rc<ManagerInner>,
}

impl fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateManager")
            .field("slots", &self.slot_count())
            .field("runs", &self.run_count())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl UpdateManager {
    pub(crate) fn new(owner: &Entity, callback: Box<UpdateCallback>) -> Self {
        let store = owner.class().store();
        Self {
            inner: Rc::new(ManagerInner {
                owner: owner.downgrade(),
                callback,
                slots: RefCell::new(Vec::new()),
                cursor: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
                scheduler: store.scheduler(),
                window: store.config().update_debounce,
                pending: Cell::new(None),
                cancelled: Cell::new(false),
                runs: Cell::new(0),
                last_error: RefCell::new(None),
                violation: RefCell::new(None),
            }),
        }
    }

    /// Runs the callback immediately.
    pub(crate) fn run(&self, owner: &Entity) -> StoreResult<()> {
        self.inner.execute(owner)
    }

    /// Stops all re-runs and drops every slot. Safe to call more than once.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    pub fn slot_count(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// How many times the callback has been invoked.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    pub fn has_pending_rerun(&self) -> bool {
        self.inner.pending.get().is_some()
    }

    /// The error raised by the latest re-run, cleared by a successful one.
    pub fn last_error(&self) -> Option<Rc<StoreError>> {
        self.inner.last_error.borrow().clone()
    }
}

//! Entity classes: one per composed shape.

use crate::entity::{Entity, EntityInner};
use crate::error::{FieldIssue, StoreResult, ValidationError};
use crate::schema::{ConstructionContext, FieldValidator, MergeStrategy, Shape};
use crate::store::Store;
use crate::validators::type_name;
use resq_events::{EventBus, WeakMap};
use resq_types::{ClassId, EntityUpdate, Identity};
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Overridden field accessor: receives the stored value (null when absent)
/// and returns what readers see.
pub type Getter = dyn Fn(&Entity, Value) -> Value;

/// Constructor body, run every time a construction resolves to an instance.
pub type ConstructHook = dyn Fn(&Entity) -> StoreResult<()>;

pub(crate) struct ClassInner {
    id: ClassId,
    root: ClassId,
    name: String,
    parent: Option<EntityClass>,
    shape: Shape,
    store: Store,
    merge: Cell<MergeStrategy>,
    instances: RefCell<WeakMap<Identity, EntityInner>>,
    updates: EventBus<EntityUpdate>,
    getters: RefCell<HashMap<String, Rc<Getter>>>,
    hooks: RefCell<Vec<Rc<ConstructHook>>>,
}

/// A class of entities sharing one merged shape and one instance cache.
///
/// Extending a class produces a new class whose shape is the union of both,
/// with its own canonical instances but the same field records as its
/// ancestors. Cloning yields another handle to the same class.
#[derive(Clone)]
pub struct EntityClass {
    inner: Rc<ClassInner>,
}

impl fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClass")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("shape", &self.inner.shape)
            .finish()
    }
}

impl EntityClass {
    pub(crate) fn root(store: Store, name: String, shape: Shape) -> Self {
        let id = ClassId::next();
        Self::build(store, id, id, name, None, shape)
    }

    fn build(
        store: Store,
        id: ClassId,
        root: ClassId,
        name: String,
        parent: Option<EntityClass>,
        shape: Shape,
    ) -> Self {
        let merge = parent
            .as_ref()
            .map_or(MergeStrategy::default(), EntityClass::merge_strategy);
        Self {
            inner: Rc::new(ClassInner {
                id,
                root,
                name,
                parent,
                shape,
                store,
                merge: Cell::new(merge),
                instances: RefCell::new(WeakMap::new()),
                updates: EventBus::new(),
                getters: RefCell::new(HashMap::new()),
                hooks: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Derives a class whose shape is this class's shape extended by `fields`.
    pub fn extend(&self, name: impl Into<String>, fields: Shape) -> EntityClass {
        Self::build(
            self.inner.store.clone(),
            ClassId::next(),
            self.inner.root,
            name.into(),
            Some(self.clone()),
            self.inner.shape.extend(&fields),
        )
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> ClassId {
        self.inner.id
    }

    /// Class at the top of this lineage. Field records are keyed by it.
    pub fn root_id(&self) -> ClassId {
        self.inner.root
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&EntityClass> {
        self.inner.parent.as_ref()
    }

    /// The merged shape.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        self.inner.merge.get()
    }

    pub fn set_merge_strategy(&self, strategy: MergeStrategy) {
        self.inner.merge.set(strategy);
    }

    /// Channel carrying an [`EntityUpdate`] for every creation and field change
    /// of this class's canonical instances.
    pub fn updates(&self) -> &EventBus<EntityUpdate> {
        &self.inner.updates
    }

    pub fn ptr_eq(&self, other: &EntityClass) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// True if `self` is `ancestor` or extends it.
    pub fn is_a(&self, ancestor: &EntityClass) -> bool {
        let mut class = Some(self);
        while let Some(c) = class {
            if c.ptr_eq(ancestor) {
                return true;
            }
            class = c.parent();
        }
        false
    }

    // ── Behaviour ────────────────────────────────────────────────

    /// Registers a constructor hook. Hooks of ancestors run first.
    pub fn on_construct<F>(&self, hook: F)
    where
        F: Fn(&Entity) -> StoreResult<()> + 'static,
    {
        self.inner.hooks.borrow_mut().push(Rc::new(hook));
    }

    /// Overrides how `field` is read by `Entity::get` and `Entity::to_json`.
    /// Derived classes inherit the override unless they define their own.
    pub fn override_getter<F>(&self, field: impl Into<String>, getter: F)
    where
        F: Fn(&Entity, Value) -> Value + 'static,
    {
        self.inner
            .getters
            .borrow_mut()
            .insert(field.into(), Rc::new(getter));
    }

    pub(crate) fn getter(&self, field: &str) -> Option<Rc<Getter>> {
        if let Some(getter) = self.inner.getters.borrow().get(field) {
            return Some(Rc::clone(getter));
        }
        self.inner.parent.as_ref()?.getter(field)
    }

    fn hooks(&self) -> Vec<Rc<ConstructHook>> {
        let mut hooks = self
            .inner
            .parent
            .as_ref()
            .map(EntityClass::hooks)
            .unwrap_or_default();
        hooks.extend(self.inner.hooks.borrow().iter().cloned());
        hooks
    }

    fn run_hooks(&self, entity: &Entity) -> StoreResult<()> {
        for hook in self.hooks() {
            hook(entity)?;
        }
        Ok(())
    }

    // ── Instances ────────────────────────────────────────────────

    /// The canonical instance for `identity`, if one is alive.
    pub fn get(&self, identity: &str) -> Option<Entity> {
        self.inner
            .instances
            .borrow_mut()
            .get(identity)
            .map(Entity::from_inner)
    }

    /// Every live canonical instance, in no particular order.
    pub fn instances(&self) -> Vec<Entity> {
        let mut instances = self.inner.instances.borrow_mut();
        instances.prune();
        instances.values().map(Entity::from_inner).collect()
    }

    /// Number of live canonical instances.
    pub fn len(&self) -> usize {
        self.inner.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First live instance matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&Entity) -> bool) -> Option<Entity> {
        self.instances().into_iter().find(|e| predicate(e))
    }

    /// Every live instance matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Entity) -> bool) -> Vec<Entity> {
        self.instances().into_iter().filter(|e| predicate(e)).collect()
    }

    // ── Construction ─────────────────────────────────────────────

    /// Validates `raw` against the merged shape and resolves it to the
    /// canonical instance for its identity.
    ///
    /// The identity comes from the field marked with
    /// [`validators::identity`](crate::validators::identity); without one a
    /// fresh identity is generated.
    pub fn construct(&self, raw: &Value) -> StoreResult<Entity> {
        self.construct_inner(None, raw)
    }

    /// Like [`EntityClass::construct`] with an externally assigned identity.
    pub fn construct_as(&self, identity: impl Into<Identity>, raw: &Value) -> StoreResult<Entity> {
        self.construct_inner(Some(identity.into()), raw)
    }

    fn construct_inner(&self, identity: Option<Identity>, raw: &Value) -> StoreResult<Entity> {
        let input = raw
            .as_object()
            .ok_or(ValidationError::NotAnObject(type_name(raw)))?;
        let (staged, ctx) = self.validate(input)?;
        let (captured, updated_on) = ctx.into_parts();
        let identity = identity.or(captured).unwrap_or_else(Identity::generate);

        if let Some(existing) = self.get(identity.as_str()) {
            debug!(class = %self.inner.name, identity = %identity, "Updating canonical instance");
            existing.cancel_updates();
            existing.apply(staged, updated_on, self.merge_strategy());
            self.run_hooks(&existing)?;
            return Ok(existing);
        }

        let record = self.inner.store.record(self.inner.root, &identity);
        let entity = Entity::new(self.clone(), identity.clone(), record);
        entity.apply(staged, updated_on, self.merge_strategy());
        self.inner
            .instances
            .borrow_mut()
            .insert(identity.clone(), entity.inner());
        entity.attach();
        debug!(class = %self.inner.name, identity = %identity, "Created canonical instance");

        self.inner.updates.dispatch(EntityUpdate::created(identity));
        self.run_hooks(&entity)?;
        Ok(entity)
    }

    /// Runs every field validator, staging the fields present in `input`
    /// (or produced non-null by a validator). Nothing is written here.
    fn validate(
        &self,
        input: &Map<String, Value>,
    ) -> Result<(Vec<(String, Value)>, ConstructionContext), ValidationError> {
        let mut ctx = ConstructionContext::new();
        let mut staged = Vec::with_capacity(self.inner.shape.len());
        let mut issues = Vec::new();

        for (name, validator) in self.inner.shape.iter() {
            let raw = input.get(name).unwrap_or(&Value::Null);
            match validator.validate(raw, &mut ctx) {
                Ok(value) if input.contains_key(name) || !value.is_null() => {
                    staged.push((name.to_string(), value));
                }
                Ok(_) => {}
                Err(e) => issues.push(FieldIssue::new(name, e.to_string())),
            }
        }

        if !issues.is_empty() {
            return Err(ValidationError::Fields(issues));
        }
        Ok((staged, ctx))
    }
}

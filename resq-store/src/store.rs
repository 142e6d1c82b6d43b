use crate::class::EntityClass;
use crate::config::StoreConfig;
use crate::record::Record;
use crate::schema::Shape;
use resq_events::{ManualScheduler, Scheduler, WeakMap};
use resq_types::{ClassId, Identity};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct StoreInner {
    config: StoreConfig,
    scheduler: Rc<dyn Scheduler>,
    records: RefCell<WeakMap<(ClassId, Identity), Record>>,
}

/// Root of an entity cache: configuration, scheduler and the registry of
/// shared field records. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("live_records", &self.live_records())
            .finish()
    }
}

impl Store {
    /// Creates a store driven by `scheduler`.
    pub fn new(config: StoreConfig, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                config,
                scheduler,
                records: RefCell::new(WeakMap::new()),
            }),
        }
    }

    /// Creates a store with the default configuration on a fresh
    /// [`ManualScheduler`], returning both.
    pub fn manual() -> (Self, Rc<ManualScheduler>) {
        Self::manual_with_config(StoreConfig::default())
    }

    pub fn manual_with_config(config: StoreConfig) -> (Self, Rc<ManualScheduler>) {
        let scheduler = Rc::new(ManualScheduler::new());
        let store = Self::new(config, Rc::clone(&scheduler) as Rc<dyn Scheduler>);
        (store, scheduler)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.inner.scheduler)
    }

    /// Declares a root entity class.
    pub fn define_class(&self, name: impl Into<String>, shape: Shape) -> EntityClass {
        EntityClass::root(self.clone(), name.into(), shape)
    }

    /// Number of field records still referenced by some entity.
    pub fn live_records(&self) -> usize {
        self.inner.records.borrow().len()
    }

    /// Returns the shared record for `identity` in `root`'s lineage,
    /// creating it if no live entity holds one.
    pub(crate) fn record(&self, root: ClassId, identity: &Identity) -> Rc<Record> {
        let key = (root, identity.clone());
        let mut records = self.inner.records.borrow_mut();
        if let Some(record) = records.get(&key) {
            return record;
        }
        let record = Rc::new(Record::new());
        records.insert(key, &record);
        record
    }
}

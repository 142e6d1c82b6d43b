//! A single cached query and its loading/result/error state machine.

use crate::error::QueryError;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use resq_events::{Listener, Scheduler, Subscription};
use resq_store::Entity;
use resq_types::FieldEvent;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};
use tracing::{debug, error, warn};

pub(crate) const LOADING: &str = "loading";
pub(crate) const RESULT: &str = "result";
pub(crate) const ERROR: &str = "error";

/// Outcome of one operation run.
pub type QueryOutcome = anyhow::Result<Option<Value>>;

/// Operation bound to its arguments.
pub(crate) type BoundOperation = dyn Fn(Query) -> LocalBoxFuture<'static, QueryOutcome>;

/// Snapshot of a query's state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState {
    /// Never settled with a value or an error.
    Pending,
    /// An operation run is in flight.
    Loading,
    Success(Value),
    Failed(QueryError),
}

pub(crate) struct QueryInner {
    entity: Entity,
    key: String,
    run: Box<BoundOperation>,
    scheduler: Rc<dyn Scheduler>,
    started: Cell<bool>,
    lazy_start: RefCell<Option<(Rc<Listener<FieldEvent>>, Subscription)>>,
}

/// Handle to a cached query. Cloning yields the same query.
///
/// The query's state lives in its entity (fields `loading`, `result`,
/// `error`). Reading any of them through the entity's get path, or through
/// [`Query::loading`], [`Query::result`] and [`Query::error`], starts the
/// first run.
#[derive(Clone)]
pub struct Query {
    inner: Rc<QueryInner>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.entity.serialize(serializer)
    }
}

impl Query {
    pub(crate) fn new(
        entity: Entity,
        key: String,
        run: Box<BoundOperation>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        let inner = Rc::new(QueryInner {
            entity,
            key,
            run,
            scheduler,
            started: Cell::new(false),
            lazy_start: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let listener: Rc<Listener<FieldEvent>> = Rc::new(move |event: &FieldEvent| {
            if event.is_get() {
                if let Some(query) = Query::upgrade(&weak) {
                    query.start();
                }
            }
        });
        let subscription = inner.entity.field_events().subscribe(&listener);
        *inner.lazy_start.borrow_mut() = Some((listener, subscription));

        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<QueryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<QueryInner> {
        &self.inner
    }

    fn upgrade(weak: &Weak<QueryInner>) -> Option<Query> {
        weak.upgrade().map(Query::from_inner)
    }

    /// Cache key, which is also the identity of the query entity.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The entity holding this query's state.
    pub fn entity(&self) -> &Entity {
        &self.inner.entity
    }

    pub fn ptr_eq(&self, other: &Query) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// True once the first run has been triggered.
    pub fn is_started(&self) -> bool {
        self.inner.started.get()
    }

    // ── Observed reads ───────────────────────────────────────────

    pub fn loading(&self) -> bool {
        self.inner.entity.get_bool(LOADING).unwrap_or(false)
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.entity.get(RESULT).filter(|v| !v.is_null())
    }

    /// The result deserialized into `T`; `None` when absent or mismatched.
    pub fn result_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.result().and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn error(&self) -> Option<QueryError> {
        self.inner.entity.get_str(ERROR).map(QueryError::new)
    }

    /// Current state. Unlike the other accessors this does not start the
    /// query.
    pub fn state(&self) -> QueryState {
        let entity = &self.inner.entity;
        if self.is_loading() {
            return QueryState::Loading;
        }
        if let Some(Value::String(message)) = entity.peek(ERROR) {
            return QueryState::Failed(QueryError::new(message));
        }
        match entity.peek(RESULT) {
            Some(value) if !value.is_null() => QueryState::Success(value),
            _ => QueryState::Pending,
        }
    }

    fn is_loading(&self) -> bool {
        self.inner.entity.peek(LOADING) == Some(Value::Bool(true))
    }

    // ── Execution ────────────────────────────────────────────────

    /// Triggers the first run. Later calls do nothing.
    fn start(&self) {
        if self.inner.started.replace(true) {
            return;
        }
        let lazy_start = self.inner.lazy_start.borrow_mut().take();
        if let Some((_, subscription)) = lazy_start {
            subscription.unsubscribe();
        }
        self.invalidate();
    }

    /// Runs the operation again. Does nothing while a run is in flight.
    pub fn invalidate(&self) {
        if !self.inner.started.get() {
            self.start();
            return;
        }
        if self.is_loading() {
            debug!(key = %self.inner.key, "Query already loading");
            return;
        }

        debug!(key = %self.inner.key, "Running query");
        self.write(LOADING, Value::Bool(true));
        let query = self.clone();
        self.inner.scheduler.spawn(
            async move {
                let run = AssertUnwindSafe(async { (query.inner.run)(query.clone()).await });
                let outcome = run.catch_unwind().await;
                query.settle(outcome);
            }
            .boxed_local(),
        );
    }

    /// Resolves once the query is not loading, starting it first if needed.
    pub fn resolved(&self) -> impl Future<Output = Query> + use<> {
        let weak = self.inner.entity.downgrade();
        let settled = self.inner.entity.field_events().subscribe_until(move |event| {
            event.is_set()
                && event.key == LOADING
                && weak
                    .upgrade()
                    .is_some_and(|e| e.peek(LOADING) == Some(Value::Bool(false)))
        });
        self.start();

        let query = self.clone();
        async move {
            if query.is_loading() {
                settled.await;
            }
            query
        }
    }

    /// Invalidates and waits for the run to settle.
    pub fn refresh(&self) -> impl Future<Output = Query> + use<> {
        self.invalidate();
        self.resolved()
    }

    fn settle(&self, outcome: Result<QueryOutcome, Box<dyn Any + Send>>) {
        match outcome {
            Ok(Ok(Some(value))) if !value.is_null() => self.succeed(value),
            // Null is not a result.
            Ok(Ok(_)) => debug!(key = %self.inner.key, "Query settled without an update"),
            Ok(Err(e)) => self.fail(QueryError::from(e)),
            Err(panic) => self.fail(QueryError::from_panic(panic)),
        }
        self.write(LOADING, Value::Bool(false));
    }

    fn succeed(&self, value: Value) {
        if let Err(e) = self.inner.entity.set(RESULT, value) {
            self.fail(QueryError::new(e.to_string()));
            return;
        }
        self.write(ERROR, Value::Null);
    }

    fn fail(&self, error: QueryError) {
        warn!(key = %self.inner.key, error = %error, "Query failed");
        self.write(ERROR, Value::String(error.message().to_string()));
        self.write(RESULT, Value::Null);
    }

    /// Writes one of the bookkeeping fields, whose validators accept every
    /// value written here.
    fn write(&self, field: &str, value: Value) {
        if let Err(e) = self.inner.entity.set(field, value) {
            error!(key = %self.inner.key, field, "Failed to update query state: {}", e);
        }
    }
}

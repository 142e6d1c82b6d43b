use crate::query::{BoundOperation, ERROR, LOADING, Query, QueryInner, QueryOutcome, RESULT};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use resq_events::WeakMap;
use resq_store::validators::{any, boolean, optional, string};
use resq_store::{EntityClass, FieldValidator, Shape, Store, StoreResult};
use serde::Serialize;
use serde_json::json;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tracing::debug;

type Operation<A> = dyn Fn(Query, A) -> LocalBoxFuture<'static, QueryOutcome>;
type CacheKey<A> = dyn Fn(&A) -> String;

/// A named async operation whose runs are cached per argument value.
///
/// Every definition is its own entity class with the fields `loading`,
/// `result` and `error`. [`QueryDefinition::get`] returns the live query for
/// an argument value, creating it if needed. The cache holds queries weakly:
/// a query nobody references is dropped and the next `get` starts over.
pub struct QueryDefinition<A> {
    class: EntityClass,
    operation: Rc<Operation<A>>,
    cache_key: Option<Box<CacheKey<A>>>,
    cache: RefCell<WeakMap<String, QueryInner>>,
}

impl<A> fmt::Debug for QueryDefinition<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDefinition")
            .field("name", &self.class.name())
            .field("cached", &self.len())
            .finish()
    }
}

impl<A> QueryDefinition<A>
where
    A: Serialize + Clone + 'static,
{
    /// Defines a query whose results are stored as-is.
    ///
    /// `operation` receives the query itself and the arguments. `Ok(None)`
    /// leaves the previous result or error in place.
    pub fn new<F, Fut>(store: &Store, name: impl Into<String>, operation: F) -> Self
    where
        F: Fn(Query, A) -> Fut + 'static,
        Fut: Future<Output = QueryOutcome> + 'static,
    {
        Self::with_result_validator(store, name, any(), operation)
    }

    /// Defines a query whose results must pass `validator`. A result that
    /// fails is recorded as the query's error.
    pub fn with_result_validator<F, Fut>(
        store: &Store,
        name: impl Into<String>,
        validator: impl FieldValidator + 'static,
        operation: F,
    ) -> Self
    where
        F: Fn(Query, A) -> Fut + 'static,
        Fut: Future<Output = QueryOutcome> + 'static,
    {
        let shape = Shape::new()
            .field(LOADING, boolean())
            .field(RESULT, optional(validator))
            .field(ERROR, optional(string()));
        Self {
            class: store.define_class(name, shape),
            operation: Rc::new(move |query: Query, args: A| operation(query, args).boxed_local()),
            cache_key: None,
            cache: RefCell::new(WeakMap::new()),
        }
    }

    /// Replaces the default cache key (the JSON of the arguments).
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Fn(&A) -> String + 'static) -> Self {
        self.cache_key = Some(Box::new(key));
        self
    }

    /// The entity class holding this definition's queries.
    pub fn class(&self) -> &EntityClass {
        &self.class
    }

    /// Cache key for `args`.
    pub fn key_for(&self, args: &A) -> StoreResult<String> {
        match &self.cache_key {
            Some(key) => Ok(key(args)),
            None => Ok(serde_json::to_string(args)?),
        }
    }

    /// Returns the live query for `args`, creating it if none is cached.
    /// Creating a query does not run it.
    pub fn get(&self, args: A) -> StoreResult<Query> {
        let key = self.key_for(&args)?;
        if let Some(inner) = self.cache.borrow_mut().get(&key) {
            debug!(query = %self.class.name(), key = %key, "Query cache hit");
            return Ok(Query::from_inner(inner));
        }

        // The entity outlives its query handle if someone kept it; reuse it
        // so its state is not reset.
        let entity = match self.class.get(&key) {
            Some(entity) => entity,
            None => self
                .class
                .construct_as(key.as_str(), &json!({ "loading": false }))?,
        };

        let operation = Rc::clone(&self.operation);
        let run: Box<BoundOperation> = Box::new(move |query: Query| operation(query, args.clone()));
        let query = Query::new(entity, key.clone(), run, self.class.store().scheduler());
        self.cache.borrow_mut().insert(key.clone(), query.inner());
        debug!(query = %self.class.name(), key = %key, "Created query");
        Ok(query)
    }
}

impl<A> QueryDefinition<A> {
    /// Number of live cached queries.
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

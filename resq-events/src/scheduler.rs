//! Scheduling abstraction.
//!
//! Every debounce window and every async query operation goes through a
//! [`Scheduler`]. Two implementations ship:
//!
//! - [`ManualScheduler`]: a virtual clock advanced explicitly by tests. Futures
//!   are driven by a [`LocalPool`] whenever time advances.
//! - [`TokioScheduler`]: timers are `tokio::time::sleep` tasks spawned with
//!   `spawn_local`. Must run inside a [`tokio::task::LocalSet`].

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// A deferred callback.
pub type Task = Box<dyn FnOnce()>;

/// A spawned future.
pub type LocalTask = LocalBoxFuture<'static, ()>;

/// Handle for a scheduled timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Timer and spawn capability.
pub trait Scheduler {
    /// Runs `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task) -> TaskId;

    /// Cancels a scheduled task. Unknown or already-run ids are ignored.
    fn cancel(&self, id: TaskId);

    /// Runs a future to completion in the background.
    fn spawn(&self, future: LocalTask);
}

// ── Manual scheduler ─────────────────────────────────────────────

/// Upper bound on timers fired by one [`ManualScheduler::run_all`] call.
const MAX_RUN_ALL_STEPS: usize = 10_000;

/// Deterministic scheduler driven by a virtual clock.
pub struct ManualScheduler {
    now: Cell<Duration>,
    next_id: Cell<u64>,
    timers: RefCell<BTreeMap<(Duration, TaskId), Task>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            now: Cell::new(Duration::ZERO),
            next_id: Cell::new(0),
            timers: RefCell::new(BTreeMap::new()),
            pool: RefCell::new(pool),
            spawner,
        }
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now.get())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl ManualScheduler {
    /// Creates a scheduler with its clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Number of timers waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Polls spawned futures until none can make progress.
    ///
    /// Re-entrant calls (from inside a spawned future) are ignored.
    pub fn run_until_stalled(&self) {
        if let Ok(mut pool) = self.pool.try_borrow_mut() {
            pool.run_until_stalled();
        }
    }

    /// Moves the clock forward by `by`, firing every timer that falls due in
    /// deadline order and draining spawned futures between timers.
    pub fn advance(&self, by: Duration) {
        let target = self.now.get() + by;
        loop {
            self.run_until_stalled();
            let due = {
                let mut timers = self.timers.borrow_mut();
                match timers.first_key_value() {
                    Some(((deadline, _), _)) if *deadline <= target => timers.pop_first(),
                    _ => None,
                }
            };
            let Some(((deadline, _), task)) = due else {
                break;
            };
            self.now.set(deadline.max(self.now.get()));
            task();
        }
        self.now.set(target);
        self.run_until_stalled();
    }

    /// Fires timers until none remain, advancing the clock to each deadline.
    pub fn run_all(&self) {
        for _ in 0..MAX_RUN_ALL_STEPS {
            self.run_until_stalled();
            let next = self.timers.borrow_mut().pop_first();
            let Some(((deadline, _), task)) = next else {
                return;
            };
            self.now.set(deadline.max(self.now.get()));
            task();
        }
        warn!(
            steps = MAX_RUN_ALL_STEPS,
            "run_all stopped: timers keep rescheduling themselves"
        );
    }

    fn next_task_id(&self) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        TaskId(id)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        let id = self.next_task_id();
        let deadline = self.now.get() + delay;
        self.timers.borrow_mut().insert((deadline, id), task);
        id
    }

    fn cancel(&self, id: TaskId) {
        self.timers.borrow_mut().retain(|(_, task_id), _| *task_id != id);
    }

    fn spawn(&self, future: LocalTask) {
        if let Err(e) = self.spawner.spawn_local(future) {
            warn!("Failed to spawn task on manual scheduler: {}", e);
        }
    }
}

// ── Tokio scheduler ──────────────────────────────────────────────

/// Scheduler backed by the current tokio `LocalSet`.
#[derive(Default)]
pub struct TokioScheduler {
    next_id: Cell<u64>,
    handles: Rc<RefCell<HashMap<TaskId, AbortHandle>>>,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending_timers", &self.handles.borrow().len())
            .finish()
    }
}

impl TokioScheduler {
    /// Creates a scheduler for the current `LocalSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.handles.borrow().len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let handles = Rc::clone(&self.handles);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            handles.borrow_mut().remove(&id);
            task();
        });
        self.handles
            .borrow_mut()
            .insert(id, handle.abort_handle());
        id
    }

    fn cancel(&self, id: TaskId) {
        if let Some(handle) = self.handles.borrow_mut().remove(&id) {
            debug!(task = id.0, "Cancelling scheduled task");
            handle.abort();
        }
    }

    fn spawn(&self, future: LocalTask) {
        tokio::task::spawn_local(future);
    }
}

//! Event plumbing for resq.
//!
//! Three building blocks used by the entity store and the query engine:
//! - [`WeakMap`]: key/value map that never keeps its values alive
//! - [`EventBus`]: publish/subscribe channel with weakly-held listeners and an
//!   optional debounce window
//! - [`Scheduler`]: the timer/spawn abstraction every debounce and async
//!   operation goes through, with a [`ManualScheduler`] for deterministic
//!   tests and a [`TokioScheduler`] for `LocalSet`-based runtimes
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). Nothing is `Send`.

mod bus;
mod scheduler;
mod weak_map;

pub use bus::{EventBus, Listener, Subscription, Until};
pub use scheduler::{LocalTask, ManualScheduler, Scheduler, Task, TaskId, TokioScheduler};
pub use weak_map::WeakMap;

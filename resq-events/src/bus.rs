//! Publish/subscribe channel with weakly-held listeners.
//!
//! A bus never owns its listeners: `subscribe` takes an `Rc` and keeps only a
//! `Weak`. Whoever registered the listener decides how long it lives, and a
//! listener nobody holds simply stops firing.
//!
//! A debounced bus delays delivery by a fixed window. Dispatches that land
//! inside a pending window replace the pending value, so listeners receive the
//! latest value once per window rather than a queue.

use crate::scheduler::{Scheduler, TaskId};
use futures::FutureExt;
use futures::channel::oneshot;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

/// A bus listener.
pub type Listener<T> = dyn Fn(&T);

struct Debounce {
    window: Duration,
    scheduler: Rc<dyn Scheduler>,
    pending: Cell<Option<TaskId>>,
}

struct BusInner<T> {
    listeners: RefCell<Vec<(u64, Weak<Listener<T>>)>>,
    next_id: Cell<u64>,
    debounce: Option<Debounce>,
}

impl<T> BusInner<T> {
    fn is_subscribed(&self, id: u64) -> bool {
        self.listeners.borrow().iter().any(|(i, _)| *i == id)
    }

    fn deliver(&self, value: &T) {
        let live: Vec<(u64, Rc<Listener<T>>)> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|(_, w)| w.strong_count() > 0);
            listeners
                .iter()
                .filter_map(|(id, w)| w.upgrade().map(|l| (*id, l)))
                .collect()
        };

        for (id, listener) in live {
            // An earlier listener may have unsubscribed this one.
            if self.is_subscribed(id) {
                listener(value);
            }
        }
    }
}

/// Publish/subscribe channel. Cloning yields another handle to the same bus.
pub struct EventBus<T> {
    inner: Rc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("window", &self.window())
            .finish()
    }
}

impl<T: 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventBus<T> {
    /// Creates a bus that delivers synchronously on `dispatch`.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(BusInner {
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                debounce: None,
            }),
        }
    }

    /// Creates a bus that coalesces dispatches within `window`.
    ///
    /// A zero window behaves exactly like [`EventBus::new`].
    pub fn debounced(window: Duration, scheduler: Rc<dyn Scheduler>) -> Self {
        if window.is_zero() {
            return Self::new();
        }
        Self {
            inner: Rc::new(BusInner {
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                debounce: Some(Debounce {
                    window,
                    scheduler,
                    pending: Cell::new(None),
                }),
            }),
        }
    }

    /// The debounce window, zero for synchronous buses.
    pub fn window(&self) -> Duration {
        self.inner
            .debounce
            .as_ref()
            .map_or(Duration::ZERO, |d| d.window)
    }

    /// Registers a listener. The bus keeps only a weak reference.
    pub fn subscribe(&self, listener: &Rc<Listener<T>>) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::downgrade(listener)));

        let bus = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(bus) = bus.upgrade() {
                bus.listeners.borrow_mut().retain(|(i, _)| *i != id);
            }
        })
    }

    /// Delivers `value` to every live listener, now or after the window.
    pub fn dispatch(&self, value: T) {
        let Some(debounce) = &self.inner.debounce else {
            self.inner.deliver(&value);
            return;
        };

        if let Some(pending) = debounce.pending.take() {
            debounce.scheduler.cancel(pending);
        }

        let bus = Rc::downgrade(&self.inner);
        let id = debounce.scheduler.schedule(
            debounce.window,
            Box::new(move || {
                if let Some(bus) = bus.upgrade() {
                    if let Some(d) = &bus.debounce {
                        d.pending.set(None);
                    }
                    bus.deliver(&value);
                }
            }),
        );
        debounce.pending.set(Some(id));
    }

    /// Returns true while a debounced delivery is waiting for its window.
    pub fn has_pending(&self) -> bool {
        self.inner
            .debounce
            .as_ref()
            .is_some_and(|d| d.pending.get().is_some())
    }

    /// Number of listeners that are still alive and subscribed.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .borrow()
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }

    /// Resolves with the first dispatched value for which `predicate` holds,
    /// then unsubscribes. Dropping the future drops the listener.
    pub fn subscribe_until<P>(&self, predicate: P) -> Until<T>
    where
        P: Fn(&T) -> bool + 'static,
        T: Clone,
    {
        let (tx, rx) = oneshot::channel();
        let tx = RefCell::new(Some(tx));
        let listener: Rc<Listener<T>> = Rc::new(move |value: &T| {
            if !predicate(value) {
                return;
            }
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send(value.clone());
            }
        });
        let subscription = self.subscribe(&listener);
        Until {
            _listener: listener,
            subscription,
            rx,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it does not unsubscribe; dropping the listener does.
pub struct Subscription {
    detach: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: RefCell::new(Some(Box::new(detach))),
        }
    }

    /// Removes the listener from its bus. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let detach = self.detach.borrow_mut().take();
        if let Some(detach) = detach {
            detach();
        }
    }

    /// Returns false once `unsubscribe` has been called.
    pub fn is_active(&self) -> bool {
        self.detach.borrow().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Future returned by [`EventBus::subscribe_until`].
pub struct Until<T> {
    _listener: Rc<Listener<T>>,
    subscription: Subscription,
    rx: oneshot::Receiver<T>,
}

impl<T> fmt::Debug for Until<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Until")
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl<T> Future for Until<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(value)) => {
                self.subscription.unsubscribe();
                Poll::Ready(value)
            }
            // The sender lives inside the listener this future owns.
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}

//! Per-worker event loop handle.
//!
//! Each worker thread owns exactly one [`EventLoop`]. It carries the
//! worker's [`ThreadInstanceCache`] and the list of detached child requests
//! the worker is still driving. The handle is reference counted and not
//! `Send`; requests only keep an [`EventLoopRef`] to it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::debug;

use crate::error::ModuleError;
use crate::module::{ModuleInstance, ThreadInstance, ThreadInstanceCache};
use crate::request::Request;
use crate::unlang::io::{IoAction, IoFinal, IoState, Signal};

const EVENT_TARGET: &str = "rad_server::event";

/// Default number of detachable children a worker tracks at once.
pub const DEFAULT_DETACHED_CAPACITY: usize = 1024;

/// Owning handle to a worker's event loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<EventLoopInner>,
}

struct EventLoopInner {
    worker: usize,
    capacity: usize,
    reserved: Cell<usize>,
    // Declared before `threads` so tracked requests drop their thread
    // instance references before the cache detaches.
    detached: RefCell<Vec<Request>>,
    threads: ThreadInstanceCache,
}

impl EventLoop {
    /// Creates the event loop for worker `worker`.
    #[must_use]
    pub fn new(worker: usize) -> Self {
        Self::with_detached_capacity(worker, DEFAULT_DETACHED_CAPACITY)
    }

    /// Creates an event loop tracking at most `capacity` detachable children.
    #[must_use]
    pub fn with_detached_capacity(worker: usize, capacity: usize) -> Self {
        Self {
            inner: Rc::new(EventLoopInner {
                worker,
                capacity,
                reserved: Cell::new(0),
                detached: RefCell::new(Vec::new()),
                threads: ThreadInstanceCache::default(),
            }),
        }
    }

    /// Worker identifier.
    #[must_use]
    pub fn worker(&self) -> usize {
        self.inner.worker
    }

    /// Weak reference suitable for storing in requests.
    #[must_use]
    pub fn downgrade(&self) -> EventLoopRef {
        EventLoopRef(Rc::downgrade(&self.inner))
    }

    /// This worker's thread-instance cache.
    #[must_use]
    pub fn threads(&self) -> &ThreadInstanceCache {
        &self.inner.threads
    }

    /// Looks up or creates this worker's thread instance for `instance`.
    ///
    /// # Errors
    ///
    /// Returns an error when the module's thread-instantiate callback fails
    /// or the instance has not been instantiated.
    pub fn thread_instance(
        &self,
        instance: &Arc<ModuleInstance>,
    ) -> Result<Rc<ThreadInstance>, ModuleError> {
        self.inner.threads.find(self, instance)
    }

    /// Reserves a slot for a detachable child. Returns `None` when the
    /// tracking list is full.
    pub(crate) fn reserve_detached(&self) -> Option<DetachedSlot> {
        let reserved = self.inner.reserved.get();
        if reserved >= self.inner.capacity {
            return None;
        }
        self.inner.reserved.set(reserved + 1);
        Some(DetachedSlot(Rc::downgrade(&self.inner)))
    }

    /// Number of detachable children currently alive on this worker.
    #[must_use]
    pub fn detached_count(&self) -> usize {
        self.inner.reserved.get()
    }

    /// Hands a yielded detachable child to the loop so it can be driven
    /// independently of the request that spawned it.
    pub fn track(&self, request: Request) {
        debug!(
            target: EVENT_TARGET,
            worker = self.inner.worker,
            request = request.number(),
            "tracking detached request"
        );
        self.inner.detached.borrow_mut().push(request);
    }

    /// Number of detached requests waiting to be driven.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.inner.detached.borrow().len()
    }

    /// Drives every tracked request with `action`, dropping the ones that
    /// finish. Returns how many completed.
    ///
    /// A signal answers `done` without finishing the request, so only
    /// requests whose state is [`IoState::Done`] afterwards are dropped.
    pub fn run_detached(&self, action: IoAction) -> usize {
        let pending = std::mem::take(&mut *self.inner.detached.borrow_mut());
        let mut completed = 0;
        let mut still_waiting = Vec::with_capacity(pending.len());
        for mut request in pending {
            let outcome = request.process(action);
            if outcome == IoFinal::Yield || request.io_state() != IoState::Done {
                still_waiting.push(request);
            } else {
                completed += 1;
            }
        }
        self.inner.detached.borrow_mut().extend(still_waiting);
        completed
    }

    /// Cancels every tracked request and drops it.
    pub fn cancel_detached(&self) -> usize {
        self.run_detached(IoAction::Signal(Signal::Cancel))
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("worker", &self.inner.worker)
            .field("detached", &self.inner.reserved.get())
            .field("threads", &self.inner.threads.len())
            .finish()
    }
}

/// Non-owning reference to an [`EventLoop`], held by requests.
#[derive(Clone, Default)]
pub struct EventLoopRef(Weak<EventLoopInner>);

impl EventLoopRef {
    /// Returns the event loop if it is still running.
    #[must_use]
    pub fn upgrade(&self) -> Option<EventLoop> {
        self.0.upgrade().map(|inner| EventLoop { inner })
    }
}

impl fmt::Debug for EventLoopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.upgrade() {
            Some(inner) => write!(f, "EventLoopRef(worker {})", inner.worker),
            None => f.write_str("EventLoopRef(gone)"),
        }
    }
}

/// Occupied slot in a worker's detached-request list; released on drop.
pub(crate) struct DetachedSlot(Weak<EventLoopInner>);

impl Drop for DetachedSlot {
    fn drop(&mut self) {
        if let Some(inner) = self.0.upgrade() {
            inner.reserved.set(inner.reserved.get().saturating_sub(1));
        }
    }
}

impl fmt::Debug for DetachedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DetachedSlot")
    }
}

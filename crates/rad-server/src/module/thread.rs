//! Per-worker module state.
//!
//! Every worker lazily materialises one [`ThreadInstance`] per module
//! instance it calls. The records live in the worker's
//! [`ThreadInstanceCache`], which is owned by its
//! [`EventLoop`](crate::EventLoop) and therefore never leaves the thread.

use std::any::Any;
use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{LifecyclePhase, ModuleError};
use crate::event::{EventLoop, EventLoopRef};
use crate::module::MODULE_TARGET;
use crate::module::instance::ModuleInstance;
use crate::module::registry::ModuleRegistry;

/// One module instance's state on one worker.
pub struct ThreadInstance {
    instance: Arc<ModuleInstance>,
    data: RefCell<Option<Box<dyn Any>>>,
    mod_data: Option<usize>,
    el: EventLoopRef,
    total_calls: Cell<u64>,
    active_callers: Cell<u64>,
}

impl ThreadInstance {
    /// Module instance this record belongs to.
    #[must_use]
    pub const fn instance(&self) -> &Arc<ModuleInstance> {
        &self.instance
    }

    /// Event loop of the owning worker.
    #[must_use]
    pub fn event_loop(&self) -> Option<EventLoop> {
        self.el.upgrade()
    }

    /// Number of calls dispatched to the instance on this worker.
    #[must_use]
    pub const fn total_calls(&self) -> u64 {
        self.total_calls.get()
    }

    /// Number of calls currently suspended in the instance on this worker.
    #[must_use]
    pub const fn active_callers(&self) -> u64 {
        self.active_callers.get()
    }

    /// Returns `true` once the thread data has been released.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.data.borrow().is_none()
    }

    /// Runs `f` against the thread data if it has type `T` and is not
    /// already borrowed by a call in progress.
    pub fn with_data<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut data = self.data.try_borrow_mut().ok()?;
        let typed = data.as_mut()?.downcast_mut::<T>()?;
        Some(f(typed))
    }

    pub(crate) fn borrow_data(&self) -> Option<RefMut<'_, Box<dyn Any>>> {
        let data = self.data.try_borrow_mut().ok()?;
        RefMut::filter_map(data, Option::as_mut).ok()
    }

    pub(crate) fn record_call(&self) {
        self.total_calls.set(self.total_calls.get().saturating_add(1));
    }

    pub(crate) fn record_yield(&self) {
        self.active_callers
            .set(self.active_callers.get().saturating_add(1));
    }

    pub(crate) fn record_resumed(&self) {
        self.active_callers
            .set(self.active_callers.get().saturating_sub(1));
    }

    fn detach(&self) -> Result<bool, ModuleError> {
        let Ok(mut slot) = self.data.try_borrow_mut() else {
            return Err(ModuleError::OutOfOrder {
                instance: self.instance.name().to_owned(),
                phase: LifecyclePhase::ThreadDetach,
                message: "thread data is in use".to_owned(),
            });
        };
        let Some(data) = slot.take() else {
            return Ok(false);
        };
        drop(slot);
        self.instance.module().thread_detach(data)?;
        Ok(true)
    }
}

impl fmt::Debug for ThreadInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadInstance")
            .field("instance", &self.instance.name())
            .field("total_calls", &self.total_calls.get())
            .field("active_callers", &self.active_callers.get())
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}

/// Worker-local map from module instance to its [`ThreadInstance`].
///
/// Thread data is detached when [`detach_all`](Self::detach_all) runs or,
/// failing that, when the cache is dropped with its event loop.
#[derive(Default)]
pub struct ThreadInstanceCache {
    by_instance: RefCell<HashMap<usize, Rc<ThreadInstance>>>,
    by_data: RefCell<HashMap<usize, usize>>,
}

fn instance_key(instance: &Arc<ModuleInstance>) -> usize {
    Arc::as_ptr(instance).addr()
}

impl ThreadInstanceCache {
    /// Returns the thread instance for `instance`, creating it with the
    /// module's thread-instantiate callback on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::OutOfOrder`] if the instance is not
    /// instantiated, or the callback's error if it fails.
    pub fn find(
        &self,
        el: &EventLoop,
        instance: &Arc<ModuleInstance>,
    ) -> Result<Rc<ThreadInstance>, ModuleError> {
        let key = instance_key(instance);
        if let Some(existing) = self.by_instance.borrow().get(&key) {
            return Ok(Rc::clone(existing));
        }

        // No borrow is held while the module runs; it may look up other
        // instances through the same cache.
        let data = instance
            .module()
            .thread_instantiate(instance.config(), el)?;
        let created = Rc::new(ThreadInstance {
            instance: Arc::clone(instance),
            data: RefCell::new(Some(data)),
            mod_data: instance.data_address(),
            el: el.downgrade(),
            total_calls: Cell::new(0),
            active_callers: Cell::new(0),
        });
        debug!(
            target: MODULE_TARGET,
            instance = instance.name(),
            worker = el.worker(),
            "thread instance created"
        );

        if let Some(address) = created.mod_data {
            self.by_data.borrow_mut().insert(address, key);
        }
        let stored = Rc::clone(
            self.by_instance
                .borrow_mut()
                .entry(key)
                .or_insert(created),
        );
        Ok(stored)
    }

    /// Looks up a thread instance from the instance data a module was
    /// handed. Returns `None` if this worker has not called the instance.
    #[must_use]
    pub fn by_data<I: 'static>(&self, data: &I) -> Option<Rc<ThreadInstance>> {
        let address = std::ptr::from_ref(data).addr();
        let key = *self.by_data.borrow().get(&address)?;
        self.by_instance.borrow().get(&key).cloned()
    }

    /// Creates thread instances for every instantiated instance in
    /// `registry`.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first thread-instantiate failure.
    pub fn instantiate_all(
        &self,
        el: &EventLoop,
        registry: &ModuleRegistry,
    ) -> Result<(), ModuleError> {
        for instance in registry.iter() {
            self.find(el, instance)?;
        }
        Ok(())
    }

    /// Detaches every thread instance, newest instance first, and empties
    /// the cache. Failures are logged; detaching continues.
    pub fn detach_all(&self) -> usize {
        let mut entries: Vec<Rc<ThreadInstance>> = self
            .by_instance
            .borrow_mut()
            .drain()
            .map(|(_, thread)| thread)
            .collect();
        self.by_data.borrow_mut().clear();
        entries.sort_by_key(|thread| std::cmp::Reverse(thread.instance.number()));

        let mut detached = 0;
        for thread in entries {
            match thread.detach() {
                Ok(true) => {
                    detached += 1;
                    debug!(
                        target: MODULE_TARGET,
                        instance = thread.instance.name(),
                        "thread instance detached"
                    );
                }
                Ok(false) => {}
                Err(error) => warn!(
                    target: MODULE_TARGET,
                    instance = thread.instance.name(),
                    phase = %LifecyclePhase::ThreadDetach,
                    error = %error,
                    "thread detach failed"
                ),
            }
        }
        detached
    }

    /// Number of thread instances on this worker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_instance.borrow().len()
    }

    /// Returns `true` when the worker has no thread instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_instance.borrow().is_empty()
    }
}

impl Drop for ThreadInstanceCache {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl fmt::Debug for ThreadInstanceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadInstanceCache")
            .field("len", &self.len())
            .finish()
    }
}

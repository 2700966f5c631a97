//! Configured module instances and their type-erased module state.

use std::any::Any;
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use rad_config::ConfigSection;
use tracing::error;

use crate::error::{LifecyclePhase, ModuleError};
use crate::event::EventLoop;
use crate::module::MODULE_TARGET;
use crate::module::descriptor::{InstanceRef, MethodCtx, ModuleDescriptor, ModuleFlags, Pending};
use crate::module::section::Section;
use crate::rcode::Rcode;
use crate::request::Request;
use crate::unlang::io::Signal;

/// Instance data wrapper chosen from the module's thread-safety flag.
///
/// Thread-unsafe modules get a mutex that is held for exactly one method,
/// resume or signal invocation and released before control returns to the
/// dispatcher, so it never spans a yield.
pub(crate) enum InstanceCell<I> {
    Concurrent(I),
    Serialized(Mutex<I>),
}

impl<I> InstanceCell<I> {
    fn new(data: I, flags: ModuleFlags) -> Self {
        if flags.thread_unsafe {
            Self::Serialized(Mutex::new(data))
        } else {
            Self::Concurrent(data)
        }
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&I) -> R) -> R {
        match self {
            Self::Concurrent(data) => f(data),
            Self::Serialized(mutex) => {
                let guard: MutexGuard<'_, I> = mutex.lock().unwrap_or_else(PoisonError::into_inner);
                f(&guard)
            }
        }
    }

    /// Like [`with`](Self::with), but serialized data is handed out
    /// mutably for as long as the lock is held.
    fn enter<R>(&self, f: impl FnOnce(InstanceRef<'_, I>) -> R) -> R {
        match self {
            Self::Concurrent(data) => f(InstanceRef::Shared(data)),
            Self::Serialized(mutex) => {
                let mut guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
                f(InstanceRef::Exclusive(&mut *guard))
            }
        }
    }

    fn address(&self) -> usize {
        self.with(|data| std::ptr::from_ref(data).addr())
    }
}

/// Opaque state a module saved when it yielded.
pub(crate) struct Suspension(Box<dyn Any>);

/// Result of one erased method, resume or signal call.
pub(crate) struct Step {
    pub(crate) rcode: Rcode,
    pub(crate) suspension: Option<Suspension>,
}

impl Step {
    const fn done(rcode: Rcode) -> Self {
        Self {
            rcode,
            suspension: None,
        }
    }
}

/// Object-safe view of a [`ModuleDescriptor`] bound to one instance.
pub(crate) trait LoadedModule: Send + Sync {
    fn kind(&self) -> &'static str;
    fn flags(&self) -> ModuleFlags;
    fn supports(&self, section: Section) -> bool;
    fn is_bootstrapped(&self) -> bool;
    fn is_instantiated(&self) -> bool;
    fn data_address(&self) -> Option<usize>;
    fn bootstrap(&self, config: &ConfigSection) -> Result<(), ModuleError>;
    fn instantiate(&self, config: &ConfigSection) -> Result<(), ModuleError>;
    fn thread_instantiate(
        &self,
        config: &ConfigSection,
        el: &EventLoop,
    ) -> Result<Box<dyn Any>, ModuleError>;
    fn thread_detach(&self, data: Box<dyn Any>) -> Result<(), ModuleError>;
    fn call(
        &self,
        name: &str,
        section: Section,
        thread: &mut dyn Any,
        request: &mut Request,
    ) -> Step;
    fn resume(
        &self,
        name: &str,
        section: Section,
        thread: &mut dyn Any,
        request: &mut Request,
        suspension: Suspension,
    ) -> Step;
    fn signal(
        &self,
        name: &str,
        section: Section,
        thread: &mut dyn Any,
        request: &mut Request,
        suspension: &mut Suspension,
        signal: Signal,
    );
    fn thread_data_type(&self) -> &'static str;
    fn instance_data(&self) -> Option<&dyn Any>;
}

/// Builds a fresh [`LoadedModule`] for each configured instance.
pub(crate) trait ModuleFactory: Send + Sync {
    fn load(&self) -> Box<dyn LoadedModule>;
}

impl<I, T> ModuleFactory for ModuleDescriptor<I, T>
where
    I: Send + Sync + 'static,
    T: 'static,
{
    fn load(&self) -> Box<dyn LoadedModule> {
        Box::new(Loaded {
            descriptor: self.clone(),
            bootstrapped: Mutex::new(None),
            data: OnceLock::new(),
            address: OnceLock::new(),
        })
    }
}

struct Loaded<I, T> {
    descriptor: ModuleDescriptor<I, T>,
    // Between bootstrap and instantiate the data is still mutable.
    bootstrapped: Mutex<Option<I>>,
    data: OnceLock<InstanceCell<I>>,
    address: OnceLock<usize>,
}

impl<I, T> Loaded<I, T>
where
    I: Send + Sync + 'static,
    T: 'static,
{
    fn thread_data<'a>(&self, name: &str, thread: &'a mut dyn Any) -> Option<&'a mut T> {
        let data = thread.downcast_mut::<T>();
        if data.is_none() {
            error!(
                target: MODULE_TARGET,
                instance = name,
                expected = std::any::type_name::<T>(),
                "thread data has the wrong type"
            );
        }
        data
    }

    fn cell(&self, name: &str) -> Option<&InstanceCell<I>> {
        let cell = self.data.get();
        if cell.is_none() {
            error!(
                target: MODULE_TARGET,
                instance = name,
                "module called before instantiate"
            );
        }
        cell
    }

    fn run(
        &self,
        name: &str,
        section: Section,
        thread: &mut dyn Any,
        f: impl FnOnce(&mut MethodCtx<'_, I, T>) -> Rcode,
    ) -> Step {
        let Some(cell) = self.cell(name) else {
            return Step::done(Rcode::Fail);
        };
        let Some(thread) = self.thread_data(name, thread) else {
            return Step::done(Rcode::Fail);
        };
        cell.enter(|instance| {
            let mut ctx = MethodCtx::new(instance, thread, section, name);
            let rcode = f(&mut ctx);
            Step {
                rcode,
                suspension: ctx
                    .take_pending()
                    .map(|pending| Suspension(Box::new(pending))),
            }
        })
    }
}

impl<I, T> LoadedModule for Loaded<I, T>
where
    I: Send + Sync + 'static,
    T: 'static,
{
    fn kind(&self) -> &'static str {
        self.descriptor.name()
    }

    fn flags(&self) -> ModuleFlags {
        self.descriptor.flags()
    }

    fn supports(&self, section: Section) -> bool {
        self.descriptor.methods().get(section).is_some()
    }

    fn is_bootstrapped(&self) -> bool {
        self.is_instantiated()
            || self
                .bootstrapped
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    fn is_instantiated(&self) -> bool {
        self.data.get().is_some()
    }

    fn data_address(&self) -> Option<usize> {
        self.address.get().copied()
    }

    fn bootstrap(&self, config: &ConfigSection) -> Result<(), ModuleError> {
        let mut slot = self
            .bootstrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || self.data.get().is_some() {
            return Err(ModuleError::OutOfOrder {
                instance: config.name().to_owned(),
                phase: LifecyclePhase::Bootstrap,
                message: "already bootstrapped".to_owned(),
            });
        }
        *slot = Some((self.descriptor.bootstrap_fn())(config)?);
        Ok(())
    }

    fn instantiate(&self, config: &ConfigSection) -> Result<(), ModuleError> {
        let taken = self
            .bootstrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut data) = taken else {
            return Err(ModuleError::OutOfOrder {
                instance: config.name().to_owned(),
                phase: LifecyclePhase::Instantiate,
                message: "instance was not bootstrapped".to_owned(),
            });
        };
        if let Some(instantiate) = self.descriptor.instantiate_fn() {
            instantiate(&mut data, config)?;
        }
        let cell = self
            .data
            .get_or_init(|| InstanceCell::new(data, self.descriptor.flags()));
        self.address.get_or_init(|| cell.address());
        Ok(())
    }

    fn thread_instantiate(
        &self,
        config: &ConfigSection,
        el: &EventLoop,
    ) -> Result<Box<dyn Any>, ModuleError> {
        let Some(cell) = self.data.get() else {
            return Err(ModuleError::OutOfOrder {
                instance: config.name().to_owned(),
                phase: LifecyclePhase::ThreadInstantiate,
                message: "instance was not instantiated".to_owned(),
            });
        };
        let create = self.descriptor.thread_instantiate_fn();
        let data = cell.with(|instance| create(config, instance, el))?;
        Ok(Box::new(data))
    }

    fn thread_detach(&self, data: Box<dyn Any>) -> Result<(), ModuleError> {
        let Ok(data) = data.downcast::<T>() else {
            return Err(ModuleError::lifecycle(
                self.descriptor.name(),
                LifecyclePhase::ThreadDetach,
                "thread data has the wrong type",
            ));
        };
        match self.descriptor.thread_detach_fn() {
            Some(detach) => detach(*data),
            None => Ok(()),
        }
    }

    fn call(
        &self,
        name: &str,
        section: Section,
        thread: &mut dyn Any,
        request: &mut Request,
    ) -> Step {
        let Some(method) = self.descriptor.methods().get(section) else {
            return Step::done(Rcode::Noop);
        };
        self.run(name, section, thread, |ctx| method(ctx, request))
    }

    fn resume(
        &self,
        name: &str,
        section: Section,
        thread: &mut dyn Any,
        request: &mut Request,
        suspension: Suspension,
    ) -> Step {
        let Ok(pending) = suspension.0.downcast::<Pending<I, T>>() else {
            error!(
                target: MODULE_TARGET,
                instance = name,
                "suspension does not belong to this module"
            );
            return Step::done(Rcode::Fail);
        };
        let Pending {
            resume, mut rctx, ..
        } = *pending;
        self.run(name, section, thread, |ctx| {
            resume(ctx, request, rctx.as_mut())
        })
    }

    fn signal(
        &self,
        name: &str,
        section: Section,
        thread: &mut dyn Any,
        request: &mut Request,
        suspension: &mut Suspension,
        signal: Signal,
    ) {
        let Some(pending) = suspension.0.downcast_mut::<Pending<I, T>>() else {
            return;
        };
        let Some(on_signal) = pending.signal else {
            return;
        };
        let rctx = pending.rctx.as_mut();
        self.run(name, section, thread, |ctx| {
            on_signal(ctx, request, rctx, signal);
            Rcode::Noop
        });
    }

    fn thread_data_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn instance_data(&self) -> Option<&dyn Any> {
        match self.data.get()? {
            InstanceCell::Concurrent(data) => Some(data),
            InstanceCell::Serialized(_) => None,
        }
    }
}

/// A named, configured binding of a module kind.
///
/// Instances are created by the [`ModuleRegistry`](crate::ModuleRegistry)
/// and shared by reference count. Every
/// [`ThreadInstance`](crate::module::ThreadInstance) holds a reference, so the
/// instance data is released only after the last thread instance bound to it
/// has been detached.
pub struct ModuleInstance {
    name: String,
    number: u32,
    config: ConfigSection,
    module: Box<dyn LoadedModule>,
    force: Mutex<Option<Rcode>>,
}

impl ModuleInstance {
    pub(crate) fn new(
        name: String,
        number: u32,
        config: ConfigSection,
        module: Box<dyn LoadedModule>,
    ) -> Self {
        Self {
            name,
            number,
            config,
            module,
            force: Mutex::new(None),
        }
    }

    /// Instance name, unique within its registry.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number assigned in creation order.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Name of the module kind backing this instance.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.module.kind()
    }

    /// Configuration section for the instance.
    #[must_use]
    pub const fn config(&self) -> &ConfigSection {
        &self.config
    }

    /// Capability flags of the module kind.
    #[must_use]
    pub fn flags(&self) -> ModuleFlags {
        self.module.flags()
    }

    /// Returns `true` when the module binds a method to `section`.
    #[must_use]
    pub fn supports(&self, section: Section) -> bool {
        self.module.supports(section)
    }

    /// Returns `true` once bootstrap has succeeded.
    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        self.module.is_bootstrapped()
    }

    /// Returns `true` once instantiate has succeeded.
    #[must_use]
    pub fn is_instantiated(&self) -> bool {
        self.module.is_instantiated()
    }

    /// Code every dispatch currently answers with, if forced.
    #[must_use]
    pub fn forced(&self) -> Option<Rcode> {
        *self.force.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pins (or with `None`, unpins) the instance to a fixed result.
    pub fn set_force(&self, rcode: Option<Rcode>) {
        *self.force.lock().unwrap_or_else(PoisonError::into_inner) = rcode;
    }

    /// Shared instance data, for thread-safe modules whose data type is `I`.
    ///
    /// Thread-unsafe modules only expose their data inside method calls.
    #[must_use]
    pub fn data<I: 'static>(&self) -> Option<&I> {
        self.module.instance_data()?.downcast_ref::<I>()
    }

    pub(crate) fn module(&self) -> &dyn LoadedModule {
        self.module.as_ref()
    }

    pub(crate) fn data_address(&self) -> Option<usize> {
        self.module.data_address()
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("name", &self.name)
            .field("number", &self.number)
            .field("kind", &self.module.kind())
            .field("flags", &self.module.flags())
            .field("thread_data", &self.module.thread_data_type())
            .field("instantiated", &self.module.is_instantiated())
            .field("forced", &self.forced())
            .finish_non_exhaustive()
    }
}

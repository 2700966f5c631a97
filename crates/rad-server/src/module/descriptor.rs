//! Static capability table describing a module kind.
//!
//! A [`ModuleDescriptor`] is built once per module kind and registered with
//! the [`ModuleRegistry`](crate::ModuleRegistry). It names the module,
//! declares its capability flags, and holds the lifecycle callbacks plus a
//! method per supported [`Section`]. Instance data `I` is shared by every
//! worker; thread data `T` is private to one worker's event loop.

use std::any::Any;
use std::fmt;

use rad_config::ConfigSection;

use crate::error::ModuleError;
use crate::event::EventLoop;
use crate::module::section::Section;
use crate::rcode::Rcode;
use crate::request::Request;
use crate::unlang::io::Signal;

/// ABI version modules must be built against.
pub const MODULE_ABI_VERSION: u32 = 1;

/// Capability flags declared by a module kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleFlags {
    /// Calls into one instance must be serialised across workers.
    pub thread_unsafe: bool,
    /// Methods may return [`Rcode::Yield`] and be resumed later.
    pub resumable: bool,
}

impl ModuleFlags {
    /// Flags for a thread-safe module that never yields.
    pub const NONE: Self = Self {
        thread_unsafe: false,
        resumable: false,
    };

    /// Marks the module as requiring serialised calls.
    #[must_use]
    pub const fn thread_unsafe(mut self) -> Self {
        self.thread_unsafe = true;
        self
    }

    /// Marks the module as allowed to yield.
    #[must_use]
    pub const fn resumable(mut self) -> Self {
        self.resumable = true;
        self
    }
}

/// Creates instance data from the instance's configuration section.
pub type BootstrapFn<I> = fn(&ConfigSection) -> Result<I, ModuleError>;

/// Finalises instance data once every instance has bootstrapped.
pub type InstantiateFn<I> = fn(&mut I, &ConfigSection) -> Result<(), ModuleError>;

/// Creates the thread data for one worker.
pub type ThreadInstantiateFn<I, T> = fn(&ConfigSection, &I, &EventLoop) -> Result<T, ModuleError>;

/// Releases the thread data for one worker.
pub type ThreadDetachFn<T> = fn(T) -> Result<(), ModuleError>;

/// Section method: runs the module against a request.
pub type ModuleMethod<I, T> = fn(&mut MethodCtx<'_, I, T>, &mut Request) -> Rcode;

/// Continues a yielded call with the state saved by [`MethodCtx::yield_to`].
pub type ResumeMethod<I, T> = fn(&mut MethodCtx<'_, I, T>, &mut Request, &mut dyn Any) -> Rcode;

/// Delivers an out-of-band signal to a yielded call.
pub type SignalMethod<I, T> = fn(&mut MethodCtx<'_, I, T>, &mut Request, &mut dyn Any, Signal);

/// Section-indexed method table. Absent entries mean the section is not
/// supported.
pub struct SectionMethods<I, T> {
    entries: [Option<ModuleMethod<I, T>>; Section::COUNT],
}

impl<I, T> SectionMethods<I, T> {
    /// Creates a table with no supported sections.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [None; Section::COUNT],
        }
    }

    /// Returns the method bound to `section`, if any.
    #[must_use]
    pub fn get(&self, section: Section) -> Option<ModuleMethod<I, T>> {
        self.entries.get(section.index()).copied().flatten()
    }

    /// Binds `method` to `section`, replacing any previous entry.
    pub fn set(&mut self, section: Section, method: ModuleMethod<I, T>) {
        if let Some(slot) = self.entries.get_mut(section.index()) {
            *slot = Some(method);
        }
    }

    /// Iterates over the supported sections in table order.
    pub fn supported(&self) -> impl Iterator<Item = Section> + '_ {
        Section::ALL
            .into_iter()
            .filter(|section| self.get(*section).is_some())
    }
}

impl<I, T> Default for SectionMethods<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, T> Clone for SectionMethods<I, T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries,
        }
    }
}

/// Describes one module kind.
///
/// # Example
///
/// ```
/// use rad_config::ConfigSection;
/// use rad_server::{ModuleDescriptor, ModuleError, Rcode, Section};
///
/// #[derive(Default)]
/// struct Always;
///
/// fn bootstrap(_config: &ConfigSection) -> Result<Always, ModuleError> {
///     Ok(Always)
/// }
///
/// let descriptor: ModuleDescriptor<Always, ()> = ModuleDescriptor::new("always", bootstrap)
///     .with_method(Section::Authorize, |_ctx, _request| Rcode::Ok);
/// assert!(descriptor.methods().get(Section::Authorize).is_some());
/// assert!(descriptor.methods().get(Section::Accounting).is_none());
/// ```
pub struct ModuleDescriptor<I, T> {
    name: &'static str,
    abi_version: u32,
    flags: ModuleFlags,
    bootstrap: BootstrapFn<I>,
    instantiate: Option<InstantiateFn<I>>,
    thread_instantiate: ThreadInstantiateFn<I, T>,
    thread_detach: Option<ThreadDetachFn<T>>,
    methods: SectionMethods<I, T>,
}

impl<I, T> ModuleDescriptor<I, T>
where
    I: Send + Sync + 'static,
    T: Default + 'static,
{
    /// Starts a descriptor whose thread data is built with `T::default()`.
    #[must_use]
    pub fn new(name: &'static str, bootstrap: BootstrapFn<I>) -> Self {
        Self {
            name,
            abi_version: MODULE_ABI_VERSION,
            flags: ModuleFlags::NONE,
            bootstrap,
            instantiate: None,
            thread_instantiate: default_thread_data::<I, T>,
            thread_detach: None,
            methods: SectionMethods::new(),
        }
    }
}

fn default_thread_data<I, T: Default>(
    _config: &ConfigSection,
    _instance: &I,
    _el: &EventLoop,
) -> Result<T, ModuleError> {
    Ok(T::default())
}

impl<I, T> ModuleDescriptor<I, T> {
    /// Replaces the capability flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Overrides the ABI version; only useful for modules built elsewhere.
    #[must_use]
    pub const fn with_abi_version(mut self, abi_version: u32) -> Self {
        self.abi_version = abi_version;
        self
    }

    /// Sets the instantiate callback.
    #[must_use]
    pub const fn with_instantiate(mut self, instantiate: InstantiateFn<I>) -> Self {
        self.instantiate = Some(instantiate);
        self
    }

    /// Sets the per-thread instantiate callback.
    #[must_use]
    pub const fn with_thread_instantiate(
        mut self,
        thread_instantiate: ThreadInstantiateFn<I, T>,
    ) -> Self {
        self.thread_instantiate = thread_instantiate;
        self
    }

    /// Sets the per-thread detach callback.
    #[must_use]
    pub const fn with_thread_detach(mut self, thread_detach: ThreadDetachFn<T>) -> Self {
        self.thread_detach = Some(thread_detach);
        self
    }

    /// Binds a method to a section.
    #[must_use]
    pub fn with_method(mut self, section: Section, method: ModuleMethod<I, T>) -> Self {
        self.methods.set(section, method);
        self
    }

    /// Module kind name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// ABI version the module was built against.
    #[must_use]
    pub const fn abi_version(&self) -> u32 {
        self.abi_version
    }

    /// Capability flags.
    #[must_use]
    pub const fn flags(&self) -> ModuleFlags {
        self.flags
    }

    /// Section method table.
    #[must_use]
    pub const fn methods(&self) -> &SectionMethods<I, T> {
        &self.methods
    }

    pub(crate) const fn bootstrap_fn(&self) -> BootstrapFn<I> {
        self.bootstrap
    }

    pub(crate) const fn instantiate_fn(&self) -> Option<InstantiateFn<I>> {
        self.instantiate
    }

    pub(crate) const fn thread_instantiate_fn(&self) -> ThreadInstantiateFn<I, T> {
        self.thread_instantiate
    }

    pub(crate) const fn thread_detach_fn(&self) -> Option<ThreadDetachFn<T>> {
        self.thread_detach
    }
}

impl<I, T> Clone for ModuleDescriptor<I, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            abi_version: self.abi_version,
            flags: self.flags,
            bootstrap: self.bootstrap,
            instantiate: self.instantiate,
            thread_instantiate: self.thread_instantiate,
            thread_detach: self.thread_detach,
            methods: self.methods.clone(),
        }
    }
}

impl<I, T> fmt::Debug for ModuleDescriptor<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("abi_version", &self.abi_version)
            .field("flags", &self.flags)
            .field("sections", &self.methods.supported().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Call context handed to section, resume and signal methods.
///
/// Gives access to the instance data shared by all workers and to this
/// worker's thread data, and lets resumable methods suspend.
pub struct MethodCtx<'a, I, T> {
    instance: InstanceRef<'a, I>,
    thread: &'a mut T,
    section: Section,
    name: &'a str,
    pending: Option<Pending<I, T>>,
}

/// How a call holds the instance data.
pub(crate) enum InstanceRef<'a, I> {
    /// Shared with concurrent calls on other workers.
    Shared(&'a I),
    /// Held under the instance lock of a thread-unsafe module.
    Exclusive(&'a mut I),
}

impl<'a, I, T> MethodCtx<'a, I, T> {
    pub(crate) const fn new(
        instance: InstanceRef<'a, I>,
        thread: &'a mut T,
        section: Section,
        name: &'a str,
    ) -> Self {
        Self {
            instance,
            thread,
            section,
            name,
            pending: None,
        }
    }

    /// Instance data.
    #[must_use]
    pub const fn instance(&self) -> &I {
        match &self.instance {
            InstanceRef::Shared(data) => *data,
            InstanceRef::Exclusive(data) => &**data,
        }
    }

    /// Mutable instance data.
    ///
    /// Only thread-unsafe modules get `Some`: their calls hold the instance
    /// lock for the whole method, resume or signal invocation. Modules that
    /// run concurrently must keep mutable state in thread data or behind
    /// their own synchronisation.
    pub const fn instance_mut(&mut self) -> Option<&mut I> {
        match &mut self.instance {
            InstanceRef::Shared(_) => None,
            InstanceRef::Exclusive(data) => Some(&mut **data),
        }
    }

    /// This worker's thread data.
    pub const fn thread(&mut self) -> &mut T {
        self.thread
    }

    /// Section being processed.
    #[must_use]
    pub const fn section(&self) -> Section {
        self.section
    }

    /// Name of the module instance being called.
    #[must_use]
    pub const fn name(&self) -> &'a str {
        self.name
    }

    /// Suspends the call.
    ///
    /// `resume` runs when the request is next driven with `run`, receiving
    /// `rctx` back. `signal` receives out-of-band signals (cancellation,
    /// timeouts) while the call is suspended. Return the result of this
    /// function from the method.
    pub fn yield_to<R: Any>(
        &mut self,
        resume: ResumeMethod<I, T>,
        signal: Option<SignalMethod<I, T>>,
        rctx: R,
    ) -> Rcode {
        self.pending = Some(Pending {
            resume,
            signal,
            rctx: Box::new(rctx),
        });
        Rcode::Yield
    }

    pub(crate) fn take_pending(&mut self) -> Option<Pending<I, T>> {
        self.pending.take()
    }
}

/// Resume point recorded by [`MethodCtx::yield_to`].
pub(crate) struct Pending<I, T> {
    pub(crate) resume: ResumeMethod<I, T>,
    pub(crate) signal: Option<SignalMethod<I, T>>,
    pub(crate) rctx: Box<dyn Any>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Unit;

    fn bootstrap(_config: &ConfigSection) -> Result<Unit, ModuleError> {
        Ok(Unit)
    }

    fn authorize(_ctx: &mut MethodCtx<'_, Unit, ()>, _request: &mut Request) -> Rcode {
        Rcode::Ok
    }

    #[test]
    fn new_descriptor_has_current_abi_and_no_sections() {
        let descriptor: ModuleDescriptor<Unit, ()> = ModuleDescriptor::new("unit", bootstrap);
        assert_eq!(descriptor.abi_version(), MODULE_ABI_VERSION);
        assert_eq!(descriptor.flags(), ModuleFlags::NONE);
        assert_eq!(descriptor.methods().supported().count(), 0);
    }

    #[test]
    fn with_method_binds_only_that_section() {
        let descriptor: ModuleDescriptor<Unit, ()> =
            ModuleDescriptor::new("unit", bootstrap).with_method(Section::Authorize, authorize);
        let supported: Vec<Section> = descriptor.methods().supported().collect();
        assert_eq!(supported, [Section::Authorize]);
    }

    #[test]
    fn flags_compose() {
        let flags = ModuleFlags::NONE.thread_unsafe().resumable();
        assert!(flags.thread_unsafe && flags.resumable);
    }

    #[test]
    fn yield_to_records_resume_point() {
        fn resume(
            _ctx: &mut MethodCtx<'_, Unit, ()>,
            _request: &mut Request,
            _rctx: &mut dyn Any,
        ) -> Rcode {
            Rcode::Ok
        }

        let instance = Unit;
        let mut thread = ();
        let mut ctx = MethodCtx::new(
            InstanceRef::Shared(&instance),
            &mut thread,
            Section::Accounting,
            "unit",
        );
        assert_eq!(ctx.yield_to(resume, None, 7_u32), Rcode::Yield);
        let pending = ctx.take_pending().expect("pending resume point");
        assert_eq!(pending.rctx.downcast_ref::<u32>(), Some(&7));
        assert!(pending.signal.is_none());
    }
}

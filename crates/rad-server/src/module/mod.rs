//! Module descriptors, configured instances, per-worker state and the
//! dispatch boundary.
//!
//! A module kind is described once by a [`ModuleDescriptor`]. The
//! [`ModuleRegistry`] binds configured instance names to descriptors and
//! runs the two-phase bootstrap / instantiate lifecycle. Each worker keeps a
//! [`ThreadInstanceCache`] in its [`EventLoop`](crate::EventLoop), and the
//! interpreter reaches module methods only through [`dispatch::call`].

pub mod descriptor;
pub mod dispatch;
mod instance;
pub mod registry;
pub mod section;
mod thread;

pub use self::descriptor::{
    BootstrapFn, InstantiateFn, MODULE_ABI_VERSION, MethodCtx, ModuleDescriptor, ModuleFlags,
    ModuleMethod, ResumeMethod, SectionMethods, SignalMethod, ThreadDetachFn,
    ThreadInstantiateFn,
};
pub use self::dispatch::{Dispatch, Suspended};
pub use self::instance::ModuleInstance;
pub use self::registry::ModuleRegistry;
pub use self::section::Section;
pub use self::thread::{ThreadInstance, ThreadInstanceCache};

pub(crate) const MODULE_TARGET: &str = "rad_server::module";

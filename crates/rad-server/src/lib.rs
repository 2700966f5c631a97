//! Request-processing core of a modular AAA server.
//!
//! The `rad-server` crate hosts everything between the network layer and the
//! protocol modules: the module contract and its instance registry, the
//! per-worker thread-instance cache, the policy interpreter with its
//! resume/signal protocol, the child-request allocator and the registry of
//! virtual servers.
//!
//! # Architecture
//!
//! Modules describe themselves with a [`ModuleDescriptor`]. A process-wide
//! [`ModuleRegistry`] holds one [`ModuleInstance`](module::ModuleInstance)
//! per configured block and takes them through bootstrap and instantiate.
//! Each worker thread owns an [`EventLoop`] whose
//! [`ThreadInstanceCache`](module::ThreadInstanceCache) materialises
//! per-thread module state on first use.
//!
//! Virtual servers compile their sections into programs. A [`Request`]
//! runs a program through [`unlang::interpret`]; module calls that yield
//! leave a [`Suspended`](module::Suspended) token behind, and the next
//! `run` re-enters exactly that call. Child requests spawned by the
//! interpreter are driven by [`unlang::io::process_interpret`] and never
//! reply on the network.
//!
//! # Example
//!
//! ```rust
//! use rad_config::ConfigSection;
//! use rad_server::lifecycle::StructuredLifecycleReporter;
//! use rad_server::module::MethodCtx;
//! use rad_server::{
//!     EventLoop, ModuleDescriptor, ModuleError, ModuleRegistry, Rcode, Request, Section,
//! };
//!
//! fn bootstrap(_config: &ConfigSection) -> Result<(), ModuleError> {
//!     Ok(())
//! }
//!
//! fn authorize(_ctx: &mut MethodCtx<'_, (), ()>, request: &mut Request) -> Rcode {
//!     request.control_mut().add("Auth-Type", "Accept");
//!     Rcode::Ok
//! }
//!
//! let mut registry = ModuleRegistry::new();
//! registry
//!     .register_module(
//!         ModuleDescriptor::new("always", bootstrap).with_method(Section::Authorize, authorize),
//!     )
//!     .expect("register");
//! registry
//!     .add_instance("always", ConfigSection::new("always"))
//!     .expect("add instance");
//! let reporter = StructuredLifecycleReporter::new();
//! registry.bootstrap(&reporter).expect("bootstrap");
//! registry.instantiate(&reporter).expect("instantiate");
//!
//! let el = EventLoop::new(0);
//! let mut request = Request::new(1, &el);
//! let instance = registry.find("always").expect("instance");
//! let outcome = rad_server::module::dispatch::call(instance, Section::Authorize, &mut request);
//! assert_eq!(outcome.rcode(), Rcode::Ok);
//! ```

pub mod error;
pub mod event;
pub mod exfile;
pub mod lifecycle;
pub mod module;
pub mod pool;
pub mod rcode;
pub mod request;
pub mod telemetry;
pub mod unlang;
pub mod virtual_server;
pub mod xlat;

#[cfg(test)]
mod tests;

pub use self::error::{LifecyclePhase, ModuleError, ServerError};
pub use self::event::EventLoop;
pub use self::lifecycle::{LifecycleReporter, StructuredLifecycleReporter};
pub use self::module::{ModuleDescriptor, ModuleFlags, ModuleRegistry, Section};
pub use self::rcode::Rcode;
pub use self::request::{Listener, Request};
pub use self::unlang::io::{IoAction, IoFinal, Signal};
pub use self::virtual_server::{VirtualServer, VirtualServerRegistry};

//! Module catalog and configured instance registry.
//!
//! The [`ModuleRegistry`] holds two tables: the catalog of module kinds
//! (one [`ModuleDescriptor`] per kind, discovered by name) and the
//! configured instances built from those kinds. Instances go through
//! [`bootstrap`](ModuleRegistry::bootstrap) and then
//! [`instantiate`](ModuleRegistry::instantiate); both phases cover every
//! instance before the next one starts and the first failure aborts startup.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rad_config::{Config, ConfigSection, MODULE_KIND_ITEM};
use tracing::info;

use crate::error::{LifecyclePhase, ModuleError};
use crate::lifecycle::LifecycleReporter;
use crate::module::MODULE_TARGET;
use crate::module::descriptor::{MODULE_ABI_VERSION, ModuleDescriptor};
use crate::module::instance::{ModuleFactory, ModuleInstance};
use crate::pool::{AliveFn, ConnectionPool, CreateFn, PoolError};
use crate::rcode::Rcode;

/// Configuration item naming the instance whose connection pool to share.
pub const POOL_ITEM: &str = "pool";

/// Registry of module kinds and configured module instances.
///
/// # Example
///
/// ```
/// use rad_config::ConfigSection;
/// use rad_server::lifecycle::StructuredLifecycleReporter;
/// use rad_server::{ModuleDescriptor, ModuleError, ModuleRegistry, Rcode, Section};
///
/// fn bootstrap(_config: &ConfigSection) -> Result<(), ModuleError> {
///     Ok(())
/// }
///
/// let mut registry = ModuleRegistry::new();
/// registry
///     .register_module(
///         ModuleDescriptor::<(), ()>::new("always", bootstrap)
///             .with_method(Section::Authorize, |_ctx, _request| Rcode::Ok),
///     )
///     .expect("register module");
/// registry
///     .add_instance("always", ConfigSection::new("always"))
///     .expect("add instance");
///
/// let reporter = StructuredLifecycleReporter::new();
/// registry.bootstrap(&reporter).expect("bootstrap");
/// registry.instantiate(&reporter).expect("instantiate");
/// assert!(registry.find("always").is_some_and(|i| i.is_instantiated()));
/// ```
#[derive(Default)]
pub struct ModuleRegistry {
    catalog: HashMap<&'static str, Box<dyn ModuleFactory>>,
    instances: Vec<Arc<ModuleInstance>>,
    by_name: HashMap<String, usize>,
    pools: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module kind to the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::AbiMismatch`] if the descriptor was built for a
    /// different ABI, or [`ModuleError::DuplicateModule`] if the kind name is
    /// already registered.
    pub fn register_module<I, T>(
        &mut self,
        descriptor: ModuleDescriptor<I, T>,
    ) -> Result<(), ModuleError>
    where
        I: Send + Sync + 'static,
        T: 'static,
    {
        let name = descriptor.name();
        if descriptor.abi_version() != MODULE_ABI_VERSION {
            return Err(ModuleError::AbiMismatch {
                name: name.to_owned(),
                found: descriptor.abi_version(),
                expected: MODULE_ABI_VERSION,
            });
        }
        if self.catalog.contains_key(name) {
            return Err(ModuleError::DuplicateModule {
                name: name.to_owned(),
            });
        }
        self.catalog.insert(name, Box::new(descriptor));
        Ok(())
    }

    /// Returns `true` when a module kind with `name` is registered.
    #[must_use]
    pub fn has_module(&self, name: &str) -> bool {
        self.catalog.contains_key(name)
    }

    /// Creates an instance called `name` configured by `config`.
    ///
    /// The module kind is taken from the `module` item, or the instance name
    /// when that item is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownModule`] or
    /// [`ModuleError::DuplicateInstance`].
    pub fn add_instance(
        &mut self,
        name: &str,
        config: ConfigSection,
    ) -> Result<Arc<ModuleInstance>, ModuleError> {
        if self.by_name.contains_key(name) {
            return Err(ModuleError::DuplicateInstance {
                name: name.to_owned(),
            });
        }
        let kind = config.pair(MODULE_KIND_ITEM).unwrap_or(name);
        let factory = self
            .catalog
            .get(kind)
            .ok_or_else(|| ModuleError::UnknownModule {
                name: kind.to_owned(),
            })?;

        let number = u32::try_from(self.instances.len()).unwrap_or(u32::MAX);
        let instance = Arc::new(ModuleInstance::new(
            name.to_owned(),
            number,
            config,
            factory.load(),
        ));
        self.by_name.insert(name.to_owned(), self.instances.len());
        self.instances.push(Arc::clone(&instance));
        Ok(instance)
    }

    /// Creates an instance for every module section in `config`.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`add_instance`](Self::add_instance).
    pub fn load(&mut self, config: &Config) -> Result<(), ModuleError> {
        for section in config.modules() {
            self.add_instance(section.name(), section.clone())?;
        }
        Ok(())
    }

    /// Runs every instance's bootstrap callback in creation order.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later instances are not bootstrapped.
    pub fn bootstrap(&self, reporter: &dyn LifecycleReporter) -> Result<(), ModuleError> {
        self.run_phase(reporter, LifecyclePhase::Bootstrap, |instance| {
            instance.module().bootstrap(instance.config())
        })
    }

    /// Runs every instance's instantiate callback in creation order. Must
    /// follow a successful [`bootstrap`](Self::bootstrap).
    ///
    /// # Errors
    ///
    /// Returns the first failure; later instances are not instantiated.
    pub fn instantiate(&self, reporter: &dyn LifecycleReporter) -> Result<(), ModuleError> {
        self.run_phase(reporter, LifecyclePhase::Instantiate, |instance| {
            instance.module().instantiate(instance.config())
        })
    }

    fn run_phase(
        &self,
        reporter: &dyn LifecycleReporter,
        phase: LifecyclePhase,
        run: impl Fn(&ModuleInstance) -> Result<(), ModuleError>,
    ) -> Result<(), ModuleError> {
        for instance in &self.instances {
            reporter.phase_starting(instance.name(), phase);
            if let Err(error) = run(&**instance) {
                reporter.phase_failed(instance.name(), phase, &error);
                return Err(error);
            }
            reporter.phase_succeeded(instance.name(), phase);
        }
        Ok(())
    }

    /// Looks up an instance by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<ModuleInstance>> {
        let index = *self.by_name.get(name)?;
        self.instances.get(index)
    }

    /// Iterates over instances in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModuleInstance>> {
        self.instances.iter()
    }

    /// Number of configured instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` when no instances are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Pins `name` to always return `rcode`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InstanceNotFound`] for unknown names.
    pub fn force(&self, name: &str, rcode: Rcode) -> Result<(), ModuleError> {
        let instance = self.require(name)?;
        instance.set_force(Some(rcode));
        info!(
            target: MODULE_TARGET,
            instance = name,
            rcode = %rcode,
            "instance forced"
        );
        Ok(())
    }

    /// Removes a force override.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InstanceNotFound`] for unknown names.
    pub fn unforce(&self, name: &str) -> Result<(), ModuleError> {
        self.require(name)?.set_force(None);
        info!(target: MODULE_TARGET, instance = name, "instance unforced");
        Ok(())
    }

    fn require(&self, name: &str) -> Result<&Arc<ModuleInstance>, ModuleError> {
        self.find(name).ok_or_else(|| ModuleError::InstanceNotFound {
            name: name.to_owned(),
        })
    }

    /// Returns the connection pool for `instance`, creating it on first use.
    ///
    /// Instances whose configuration carries a `pool` item share the pool of
    /// the instance it names; others get a pool of their own, sized from
    /// their `pool` subsection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::TypeMismatch`] if the shared pool holds another
    /// connection type, or any error from creating the pool.
    pub fn connection_pool<C: Send + 'static>(
        &self,
        instance: &ConfigSection,
        log_prefix: &str,
        create: CreateFn<C>,
        alive: Option<AliveFn<C>>,
    ) -> Result<Arc<ConnectionPool<C>>, PoolError> {
        let key = instance.pair(POOL_ITEM).unwrap_or_else(|| instance.name());
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pools.get(key) {
            return Arc::clone(existing)
                .downcast::<ConnectionPool<C>>()
                .map_err(|_| PoolError::TypeMismatch {
                    pool: key.to_owned(),
                });
        }

        let pool = Arc::new(ConnectionPool::new(
            key,
            instance.subsection(POOL_ITEM),
            log_prefix,
            create,
            alive,
        )?);
        pools.insert(key.to_owned(), Arc::clone(&pool) as Arc<dyn Any + Send + Sync>);
        Ok(pool)
    }

    /// Drops the registry's references to every instance and shared pool.
    ///
    /// Instance data is released once the last worker holding a thread
    /// instance for it has detached.
    pub fn free(&mut self) {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.by_name.clear();
        for instance in self.instances.drain(..).rev() {
            info!(
                target: MODULE_TARGET,
                instance = instance.name(),
                workers_holding = Arc::strong_count(&instance).saturating_sub(1),
                "releasing instance"
            );
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.catalog.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("ModuleRegistry")
            .field("modules", &kinds)
            .field("instances", &self.instances)
            .finish_non_exhaustive()
    }
}

//! Domain errors raised by module and virtual-server lifecycle operations.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. Configuration errors are carried
//! by value; they are already cheap to clone.
//!
//! Runtime failures inside a module call never surface as these errors: the
//! dispatch boundary logs them and answers [`Rcode::Fail`](crate::Rcode).

use thiserror::Error;

use rad_config::ConfigError;

/// Errors arising from module registration, bootstrap, instantiation and
/// per-thread setup.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No descriptor with the requested module name has been registered.
    #[error("module '{name}' is not registered")]
    UnknownModule {
        /// Module name that was looked up.
        name: String,
    },

    /// A descriptor with the same module name is already registered.
    #[error("module '{name}' is already registered")]
    DuplicateModule {
        /// Module name.
        name: String,
    },

    /// A descriptor was built against a different module ABI version.
    #[error("module '{name}' was built for ABI version {found}, expected {expected}")]
    AbiMismatch {
        /// Module name.
        name: String,
        /// Version declared by the descriptor.
        found: u32,
        /// Version supported by this server.
        expected: u32,
    },

    /// An instance with the same name already exists.
    #[error("module instance '{name}' is already defined")]
    DuplicateInstance {
        /// Instance name.
        name: String,
    },

    /// No instance with the requested name exists.
    #[error("module instance '{name}' not found")]
    InstanceNotFound {
        /// Instance name that was looked up.
        name: String,
    },

    /// The instance's configuration was rejected.
    #[error("configuration error in module instance '{instance}': {source}")]
    Config {
        /// Instance name.
        instance: String,
        /// Underlying configuration error.
        #[source]
        source: ConfigError,
    },

    /// A lifecycle callback reported a failure.
    #[error("module instance '{instance}' failed to {phase}: {message}")]
    Lifecycle {
        /// Instance name.
        instance: String,
        /// Phase that failed.
        phase: LifecyclePhase,
        /// Human-readable failure description.
        message: String,
    },

    /// A lifecycle phase was invoked out of order.
    #[error("module instance '{instance}' cannot {phase}: {message}")]
    OutOfOrder {
        /// Instance name.
        instance: String,
        /// Phase that was attempted.
        phase: LifecyclePhase,
        /// Why the phase is not allowed now.
        message: String,
    },
}

/// Phases of the module lifecycle, used for error and log context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LifecyclePhase {
    /// Per-instance registration of dynamic side effects.
    Bootstrap,
    /// Per-instance finalisation after every instance bootstrapped.
    Instantiate,
    /// Per-thread state creation.
    ThreadInstantiate,
    /// Per-thread state destruction.
    ThreadDetach,
}

impl ModuleError {
    /// Builds a [`ModuleError::Lifecycle`] error for a module callback.
    #[must_use]
    pub fn lifecycle(
        instance: impl Into<String>,
        phase: LifecyclePhase,
        message: impl Into<String>,
    ) -> Self {
        Self::Lifecycle {
            instance: instance.into(),
            phase,
            message: message.into(),
        }
    }

    /// Wraps a configuration error for `instance`.
    #[must_use]
    pub fn config(instance: impl Into<String>, source: ConfigError) -> Self {
        Self::Config {
            instance: instance.into(),
            source,
        }
    }
}

/// Errors arising from virtual-server registration and compilation.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A namespace was registered twice.
    #[error("namespace '{namespace}' is already registered")]
    DuplicateNamespace {
        /// Namespace name.
        namespace: String,
    },

    /// A server names a namespace nobody registered.
    #[error("virtual server '{server}' uses unknown namespace '{namespace}'")]
    UnknownNamespace {
        /// Server name.
        server: String,
        /// Namespace name.
        namespace: String,
    },

    /// Two servers share a name.
    #[error("virtual server '{server}' is already defined")]
    DuplicateServer {
        /// Server name.
        server: String,
    },

    /// A server section could not be compiled.
    #[error("virtual server '{server}' failed to compile: {message}")]
    Compile {
        /// Server name.
        server: String,
        /// Description of the problem.
        message: String,
    },

    /// A server section is missing a required item or has an invalid one.
    #[error("virtual server '{server}' has invalid configuration: {source}")]
    Config {
        /// Server name.
        server: String,
        /// Underlying configuration error.
        #[source]
        source: ConfigError,
    },
}

impl ServerError {
    /// Builds a [`ServerError::Compile`] error.
    #[must_use]
    pub fn compile(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compile {
            server: server.into(),
            message: message.into(),
        }
    }
}

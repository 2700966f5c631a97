//! Connection pool shared by module instances.
//!
//! Pools are sized from a `pool` configuration subsection (`start`, `max`,
//! `spare`). Connections are created through a module-supplied callback,
//! optionally health-checked before reuse, and handed out as guards. A
//! guard is returned to the pool with [`PooledConnection::release`]; one
//! that is dropped instead closes its connection, since its state is
//! unknown.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rad_config::{ConfigError, ConfigSection};
use thiserror::Error;
use tracing::{debug, warn};

const POOL_TARGET: &str = "rad_server::pool";

/// Opens a new connection.
pub type CreateFn<C> = Box<dyn Fn() -> Result<C, PoolError> + Send + Sync>;

/// Returns `false` when a pooled connection is no longer usable.
pub type AliveFn<C> = Box<dyn Fn(&mut C) -> bool + Send + Sync>;

/// Errors raised by connection pools.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
    /// Opening a connection failed.
    #[error("pool '{pool}' failed to open a connection: {message}")]
    Connect {
        /// Pool name.
        pool: String,
        /// Failure description.
        message: String,
    },
    /// Every connection is in use and the pool is at its maximum size.
    #[error("pool '{pool}' has no free connections (max {max})")]
    Exhausted {
        /// Pool name.
        pool: String,
        /// Configured maximum.
        max: usize,
    },
    /// A shared pool holds a different connection type.
    #[error("pool '{pool}' holds a different connection type")]
    TypeMismatch {
        /// Pool name.
        pool: String,
    },
}

impl PoolError {
    /// Builds a [`PoolError::Connect`] error.
    #[must_use]
    pub fn connect(pool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            pool: pool.into(),
            message: message.into(),
        }
    }
}

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened when the pool is created.
    pub start: usize,
    /// Upper bound on open connections.
    pub max: usize,
    /// Idle connections kept when connections are returned.
    pub spare: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            start: 1,
            max: 8,
            spare: 2,
        }
    }
}

impl PoolConfig {
    /// Reads sizing from a `pool` subsection; absent items keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable numbers, a zero
    /// `max`, or a `start` above `max`.
    pub fn from_section(section: &ConfigSection) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            start: section.parse_or("start", defaults.start)?,
            max: section.parse_or("max", defaults.max)?,
            spare: section.parse_or("spare", defaults.spare)?,
        };
        if config.max == 0 {
            return Err(ConfigError::invalid_value(
                section.name(),
                "max",
                "0",
                "pool must allow at least one connection",
            ));
        }
        if config.start > config.max {
            return Err(ConfigError::invalid_value(
                section.name(),
                "start",
                config.start.to_string(),
                "start must not exceed max",
            ));
        }
        Ok(config)
    }
}

struct PoolState<C> {
    idle: Vec<C>,
    in_use: usize,
}

/// A bounded pool of connections of type `C`.
pub struct ConnectionPool<C> {
    name: String,
    log_prefix: String,
    config: PoolConfig,
    create: CreateFn<C>,
    alive: Option<AliveFn<C>>,
    state: Mutex<PoolState<C>>,
}

impl<C> ConnectionPool<C> {
    /// Creates a pool and opens its `start` connections.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] for invalid sizing or the first
    /// connection failure.
    pub fn new(
        name: &str,
        section: Option<&ConfigSection>,
        log_prefix: &str,
        create: CreateFn<C>,
        alive: Option<AliveFn<C>>,
    ) -> Result<Self, PoolError> {
        let config = section
            .map(PoolConfig::from_section)
            .transpose()?
            .unwrap_or_default();
        let idle = (0..config.start)
            .map(|_| create())
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            target: POOL_TARGET,
            pool = name,
            prefix = log_prefix,
            start = config.start,
            max = config.max,
            "connection pool started"
        );
        Ok(Self {
            name: name.to_owned(),
            log_prefix: log_prefix.to_owned(),
            config,
            create,
            alive,
            state: Mutex::new(PoolState { idle, in_use: 0 }),
        })
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool sizing.
    #[must_use]
    pub const fn config(&self) -> PoolConfig {
        self.config
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    /// Number of connections handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a connection, reusing a live idle one or opening a new one.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when `max` connections are in use,
    /// or the create callback's error.
    pub fn get(&self) -> Result<PooledConnection<'_, C>, PoolError> {
        let mut state = self.lock();
        while let Some(mut candidate) = state.idle.pop() {
            if self.alive.as_ref().is_none_or(|alive| alive(&mut candidate)) {
                state.in_use += 1;
                return Ok(PooledConnection {
                    connection: candidate,
                    lease: Lease { pool: self },
                });
            }
            warn!(
                target: POOL_TARGET,
                pool = %self.name,
                prefix = %self.log_prefix,
                "closing dead connection"
            );
        }

        if state.in_use >= self.config.max {
            return Err(PoolError::Exhausted {
                pool: self.name.clone(),
                max: self.config.max,
            });
        }
        state.in_use += 1;
        drop(state);

        // Dropping the lease on failure gives the reservation back.
        let lease = Lease { pool: self };
        let connection = (self.create)()?;
        Ok(PooledConnection { connection, lease })
    }

    fn park(&self, connection: C) {
        let mut state = self.lock();
        if state.idle.len() < self.config.spare.max(self.config.start) {
            state.idle.push(connection);
        }
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("idle", &self.idle())
            .field("in_use", &self.in_use())
            .finish_non_exhaustive()
    }
}

/// Accounts for one handed-out connection until dropped.
struct Lease<'a, C> {
    pool: &'a ConnectionPool<C>,
}

impl<C> Drop for Lease<'_, C> {
    fn drop(&mut self) {
        let mut state = self.pool.lock();
        state.in_use = state.in_use.saturating_sub(1);
    }
}

/// A connection borrowed from a [`ConnectionPool`].
///
/// Call [`release`](Self::release) to hand it back for reuse. Dropping the
/// guard closes the connection and frees its slot.
pub struct PooledConnection<'a, C> {
    connection: C,
    lease: Lease<'a, C>,
}

impl<C> PooledConnection<'_, C> {
    /// Returns the connection to the pool's idle list, or closes it when
    /// the pool already holds enough spare connections.
    pub fn release(self) {
        let Self { connection, lease } = self;
        lease.pool.park(connection);
    }

    /// Closes the connection instead of returning it to the pool.
    pub fn discard(self) {
        debug!(
            target: POOL_TARGET,
            pool = %self.lease.pool.name,
            "discarding connection"
        );
    }
}

impl<C> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

impl<C> fmt::Debug for PooledConnection<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.lease.pool.name)
            .finish_non_exhaustive()
    }
}

//! Pool configuration options

use crate::errors::{BoxError, PoolError, PoolResult};
use crate::factory::{self, ConnectionFactory, CreateFn, DestroyFn, ProbeFn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Capacity bounds and idle expiry for a pool
///
/// Kept separate from the injected behaviors so it can be loaded from an
/// application config file.
///
/// # Examples
///
/// ```
/// use grpc_connpool::PoolLimits;
/// use std::time::Duration;
///
/// let limits = PoolLimits {
///     initial_cap: 2,
///     max_idle: 5,
///     max_cap: 10,
///     idle_timeout: Duration::from_secs(60),
/// };
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolLimits {
    /// Connections dialed up front when the pool is built
    pub initial_cap: usize,

    /// Capacity of the idle buffer
    pub max_idle: usize,

    /// Ceiling on connections open at once, idle and checked out together
    pub max_cap: usize,

    /// How long a connection may sit idle before it is discarded; zero disables expiry
    pub idle_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            initial_cap: 0,
            max_idle: 10,
            max_cap: 10,
            idle_timeout: Duration::ZERO,
        }
    }
}

impl PoolLimits {
    /// Check `initial_cap <= max_idle <= max_cap`
    pub fn validate(&self) -> PoolResult<()> {
        if self.initial_cap <= self.max_idle && self.max_idle <= self.max_cap {
            Ok(())
        } else {
            Err(PoolError::InvalidCapacity {
                initial_cap: self.initial_cap,
                max_idle: self.max_idle,
                max_cap: self.max_cap,
            })
        }
    }
}

/// Configuration for a [`ChannelPool`](crate::ChannelPool)
///
/// # Examples
///
/// ```
/// use grpc_connpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::<u32>::new()
///     .with_initial_cap(2)
///     .with_max_idle(5)
///     .with_max_cap(10)
///     .with_idle_timeout(Duration::from_secs(30))
///     .with_create(|| Ok(42))
///     .with_destroy(|_conn| Ok(()));
///
/// assert_eq!(config.limits.max_cap, 10);
/// assert!(!config.has_probe());
/// ```
pub struct PoolConfiguration<C> {
    pub limits: PoolLimits,

    pub(crate) create: Option<CreateFn<C>>,

    pub(crate) destroy: Option<DestroyFn<C>>,

    pub(crate) probe: Option<ProbeFn<C>>,
}

impl<C> Default for PoolConfiguration<C> {
    fn default() -> Self {
        Self {
            limits: PoolLimits::default(),
            create: None,
            destroy: None,
            probe: None,
        }
    }
}

impl<C> Clone for PoolConfiguration<C> {
    fn clone(&self) -> Self {
        Self {
            limits: self.limits,
            create: self.create.clone(),
            destroy: self.destroy.clone(),
            probe: self.probe.clone(),
        }
    }
}

impl<C> fmt::Debug for PoolConfiguration<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("limits", &self.limits)
            .field("create", &self.create.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

impl<C> PoolConfiguration<C> {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections created eagerly
    pub fn with_initial_cap(mut self, initial_cap: usize) -> Self {
        self.limits.initial_cap = initial_cap;
        self
    }

    /// Set the idle buffer capacity
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.limits.max_idle = max_idle;
        self
    }

    /// Set the ceiling on simultaneously open connections
    pub fn with_max_cap(mut self, max_cap: usize) -> Self {
        self.limits.max_cap = max_cap;
        self
    }

    /// Set the idle timeout
    ///
    /// # Examples
    ///
    /// ```
    /// use grpc_connpool::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::<u8>::new()
    ///     .with_idle_timeout(Duration::from_secs(90));
    ///
    /// assert_eq!(config.limits.idle_timeout, Duration::from_secs(90));
    /// ```
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.limits.idle_timeout = timeout;
        self
    }

    /// Replace all numeric settings at once
    pub fn with_limits(mut self, limits: PoolLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_create<F>(mut self, create: F) -> Self
    where
        F: Fn() -> Result<C, BoxError> + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(create));
        self
    }

    pub fn with_destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(C) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(destroy));
        self
    }

    /// Enable liveness checking of idle connections before they are handed out
    pub fn with_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn(&C) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn has_probe(&self) -> bool {
        self.probe.is_some()
    }
}

impl<C: Send + 'static> PoolConfiguration<C> {
    /// Take create, destroy and (if supported) probe from one factory
    pub fn with_connection_factory<F>(mut self, factory: F) -> Self
    where
        F: ConnectionFactory<Connection = C>,
    {
        let (create, destroy, probe) = factory::split(factory);
        self.create = Some(create);
        self.destroy = Some(destroy);
        self.probe = probe;
        self
    }
}

/// Behaviors pulled out of a validated configuration
pub(crate) struct Behaviors<C> {
    pub create: CreateFn<C>,
    pub destroy: DestroyFn<C>,
    pub probe: Option<ProbeFn<C>>,
}

impl<C> PoolConfiguration<C> {
    /// Validate in the order capacity, factory, destroy
    pub(crate) fn into_parts(self) -> PoolResult<(PoolLimits, Behaviors<C>)> {
        self.limits.validate()?;
        let create = self.create.ok_or(PoolError::MissingFactory)?;
        let destroy = self.destroy.ok_or(PoolError::MissingDestroy)?;

        Ok((
            self.limits,
            Behaviors {
                create,
                destroy,
                probe: self.probe,
            },
        ))
    }
}

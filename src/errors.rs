//! Error types for the connection pool

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by injected create/destroy/probe behaviors
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a behavior error, kept behind an `Arc` so `PoolError` stays `Clone`
pub type ConnectionError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("invalid capacity settings: initial_cap={initial_cap}, max_idle={max_idle}, max_cap={max_cap}")]
    InvalidCapacity {
        initial_cap: usize,
        max_idle: usize,
        max_cap: usize,
    },

    #[error("invalid factory func settings")]
    MissingFactory,

    #[error("invalid close func settings")]
    MissingDestroy,

    #[error("pool is closed")]
    PoolClosed,

    #[error("max active connections reached")]
    MaxActiveReached,

    #[error("connection is nil, rejecting")]
    NilConnection,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("factory is not able to fill the pool: {0}")]
    Prefill(#[source] ConnectionError),

    #[error(transparent)]
    Connection(ConnectionError),
}

impl PoolError {
    /// Wrap an error produced by a create/destroy/probe behavior
    pub(crate) fn connection(err: BoxError) -> Self {
        PoolError::Connection(Arc::from(err))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

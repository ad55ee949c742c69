//! # grpc_connpool
//!
//! Bounded, thread-safe pool for long-lived RPC client connections that are
//! expensive to dial and must be shared by many concurrent callers.
//!
//! ## Features
//!
//! - Ceiling on simultaneously open connections (`max_cap`)
//! - Lock-free idle buffer bounded by `max_idle`; surplus returns are destroyed
//! - Callers beyond the ceiling queue and are served strictly FIFO
//! - Idle-timeout expiry and optional liveness probing before reuse
//! - Blocking, deadline and async acquisition; cancelled waits never lose a connection
//! - Pre-warming with `initial_cap` connections
//! - RAII guards that return connections on drop
//! - Metrics, Prometheus export and health status
//!
//! The pool does not know what a connection is: dialing, tearing down and
//! probing are injected as closures or through [`ConnectionFactory`].
//!
//! ## Quick Start
//!
//! ```rust
//! use grpc_connpool::{ChannelPool, Pool, PoolConfiguration};
//!
//! let pool = ChannelPool::new(
//!     PoolConfiguration::new()
//!         .with_initial_cap(1)
//!         .with_max_idle(4)
//!         .with_max_cap(8)
//!         .with_create(|| Ok("dialed".to_string()))
//!         .with_destroy(|_conn| Ok(())),
//! )
//! .unwrap();
//!
//! {
//!     let conn = pool.get_guarded().unwrap();
//!     println!("Got: {}", *conn);
//!     // Connection goes back to the pool when `conn` goes out of scope
//! }
//!
//! pool.release().unwrap();
//! ```

mod pool;
mod config;
mod connection;
mod factory;
mod metrics;
mod health;
mod waiter;
mod errors;

pub use pool::{ChannelPool, Pool, PooledConnection};
pub use config::{PoolConfiguration, PoolLimits};
pub use factory::ConnectionFactory;
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use health::HealthStatus;
pub use errors::{BoxError, ConnectionError, PoolError, PoolResult};

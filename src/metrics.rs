//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Point-in-time metrics for a pool
///
/// # Examples
///
/// ```
/// use grpc_connpool::{ChannelPool, Pool, PoolConfiguration};
///
/// let pool = ChannelPool::new(
///     PoolConfiguration::new()
///         .with_initial_cap(1)
///         .with_max_idle(2)
///         .with_max_cap(2)
///         .with_create(|| Ok(7u32))
///         .with_destroy(|_| Ok(())),
/// )
/// .unwrap();
///
/// let conn = pool.get().unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_created, 1);
/// assert_eq!(metrics.total_retrieved, 1);
/// assert_eq!(metrics.opening, 1);
/// pool.put(conn).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Connections successfully created, pre-fill included
    pub total_created: u64,

    /// Connections handed to the destroy behavior
    pub total_destroyed: u64,

    /// Successful acquisitions
    pub total_retrieved: u64,

    /// Connections given back through `put`
    pub total_returned: u64,

    /// Returns delivered straight to a waiting caller
    pub total_handoffs: u64,

    /// Idle connections discarded for expiry or a failed probe
    pub total_evicted: u64,

    /// Acquisitions that had to queue behind the ceiling
    pub total_waits: u64,

    /// Waits abandoned on a deadline or cancellation
    pub total_cancelled: u64,

    /// Connections currently open, idle and checked out
    pub opening: usize,

    /// Connections sitting in the idle buffer
    pub idle: usize,

    /// Callers currently queued
    pub waiting: usize,

    /// Ceiling on open connections
    pub max_cap: usize,

    /// `opening / max_cap` (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_retrieved".to_string(), self.total_retrieved.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("total_handoffs".to_string(), self.total_handoffs.to_string());
        metrics.insert("total_evicted".to_string(), self.total_evicted.to_string());
        metrics.insert("total_waits".to_string(), self.total_waits.to_string());
        metrics.insert("total_cancelled".to_string(), self.total_cancelled.to_string());
        metrics.insert("opening".to_string(), self.opening.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("max_cap".to_string(), self.max_cap.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus text exposition
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Render metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use grpc_connpool::{ChannelPool, PoolConfiguration};
    /// use std::collections::HashMap;
    ///
    /// let pool = ChannelPool::new(
    ///     PoolConfiguration::new()
    ///         .with_create(|| Ok(()))
    ///         .with_destroy(|_| Ok(())),
    /// )
    /// .unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "user".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("user_rpc", Some(&tags)).unwrap();
    /// assert!(output.contains("connpool_connections_open"));
    /// assert!(output.contains("service=\"user\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = tags.cloned().unwrap_or_default();
        labels.insert("pool".to_string(), pool_name.to_string());
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let registry = Registry::new();

        let gauges = [
            ("connpool_connections_open", "Connections currently open", metrics.opening),
            ("connpool_connections_idle", "Connections in the idle buffer", metrics.idle),
            ("connpool_waiters", "Callers waiting for a connection", metrics.waiting),
            ("connpool_max_connections", "Ceiling on open connections", metrics.max_cap),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("connpool_utilization", "Open connections over ceiling"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("connpool_created_total", "Connections created", metrics.total_created),
            ("connpool_destroyed_total", "Connections destroyed", metrics.total_destroyed),
            ("connpool_retrieved_total", "Successful acquisitions", metrics.total_retrieved),
            ("connpool_returned_total", "Connections returned", metrics.total_returned),
            ("connpool_handoffs_total", "Returns handed straight to a waiter", metrics.total_handoffs),
            ("connpool_evicted_total", "Idle connections evicted", metrics.total_evicted),
            ("connpool_waits_total", "Acquisitions that waited", metrics.total_waits),
            ("connpool_cancelled_total", "Waits abandoned", metrics.total_cancelled),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub retrieved: AtomicU64,
    pub returned: AtomicU64,
    pub handoffs: AtomicU64,
    pub evicted: AtomicU64,
    pub waits: AtomicU64,
    pub cancelled: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, opening: usize, idle: usize, waiting: usize, max_cap: usize) -> PoolMetrics {
        let utilization = if max_cap > 0 {
            opening as f64 / max_cap as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_created: self.created.load(Ordering::Relaxed),
            total_destroyed: self.destroyed.load(Ordering::Relaxed),
            total_retrieved: self.retrieved.load(Ordering::Relaxed),
            total_returned: self.returned.load(Ordering::Relaxed),
            total_handoffs: self.handoffs.load(Ordering::Relaxed),
            total_evicted: self.evicted.load(Ordering::Relaxed),
            total_waits: self.waits.load(Ordering::Relaxed),
            total_cancelled: self.cancelled.load(Ordering::Relaxed),
            opening,
            idle,
            waiting,
            max_cap,
            utilization,
        }
    }
}

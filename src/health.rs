//! Health monitoring for connection pools

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use grpc_connpool::{ChannelPool, PoolConfiguration};
///
/// let pool = ChannelPool::new(
///     PoolConfiguration::new()
///         .with_initial_cap(2)
///         .with_max_idle(4)
///         .with_max_cap(4)
///         .with_create(|| Ok(0u8))
///         .with_destroy(|_| Ok(())),
/// )
/// .unwrap();
///
/// let health = pool.get_health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_connections, 2);
/// assert_eq!(health.open_connections, 2);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Open connections over the ceiling (0.0 to 1.0)
    pub utilization: f64,

    /// Connections sitting in the idle buffer
    pub idle_connections: usize,

    /// Connections open, idle and checked out
    pub open_connections: usize,

    /// Callers queued behind the ceiling
    pub waiting_callers: usize,

    /// Ceiling on open connections
    pub max_connections: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn new(idle: usize, opening: usize, waiting: usize, max_cap: usize) -> Self {
        let utilization = if max_cap > 0 {
            opening as f64 / max_cap as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        // Saturated and callers are already queuing.
        if utilization > 0.9 && waiting > 0 {
            warnings.push(format!(
                "Pool saturated: {:.1}% of connections open, {} callers waiting",
                utilization * 100.0,
                waiting
            ));
            is_healthy = false;
        } else if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
        }

        if idle == 0 && max_cap > 0 {
            warnings.push("No idle connections".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_connections: idle,
            open_connections: opening,
            waiting_callers: waiting,
            max_connections: max_cap,
            warnings,
        }
    }

    /// A released pool is reported unhealthy
    pub fn closed() -> Self {
        Self {
            is_healthy: false,
            warning_count: 1,
            utilization: 0.0,
            idle_connections: 0,
            open_connections: 0,
            waiting_callers: 0,
            max_connections: 0,
            warnings: vec!["Pool is closed".to_string()],
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

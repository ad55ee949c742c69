//! Channel pool: the connection pool engine

use crate::config::{Behaviors, PoolConfiguration, PoolLimits};
use crate::connection::{IdleBuffer, IdleConnection};
use crate::errors::{PoolError, PoolResult};
use crate::factory::{CreateFn, DestroyFn, ProbeFn};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::waiter::WaiterQueue;

#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;

use async_trait::async_trait;
use crossbeam::channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Operations a caller needs from a connection pool
///
/// `put`, `close` and `ping` accept an `Option` so that an absent handle is
/// reported as [`PoolError::NilConnection`] instead of being silently ignored;
/// a plain connection converts into `Some` automatically.
#[async_trait]
pub trait Pool: Send + Sync {
    type Connection: Send + 'static;

    /// Get a connection, blocking the thread while the pool is at its ceiling
    fn get(&self) -> PoolResult<Self::Connection>;

    /// Like [`get`](Self::get) but gives up with [`PoolError::Cancelled`] after `timeout`
    fn get_timeout(&self, timeout: Duration) -> PoolResult<Self::Connection>;

    /// Get a connection without blocking the runtime; dropping the future cancels the wait
    async fn get_async(&self) -> PoolResult<Self::Connection>;

    /// Like [`get_async`](Self::get_async) but gives up with [`PoolError::Cancelled`] after `timeout`
    async fn get_timeout_async(&self, timeout: Duration) -> PoolResult<Self::Connection>;

    /// Return a connection to circulation
    fn put(&self, conn: impl Into<Option<Self::Connection>>) -> PoolResult<()>;

    /// Destroy a connection for good
    fn close(&self, conn: impl Into<Option<Self::Connection>>) -> PoolResult<()>;

    /// Run the liveness probe against a connection
    fn ping<'a>(&self, conn: impl Into<Option<&'a Self::Connection>>) -> PoolResult<()>;

    /// Shut the pool down and destroy every idle connection
    fn release(&self) -> PoolResult<()>;

    /// Number of idle connections right now
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutable engine state, guarded by one lock
struct State<C> {
    /// `None` once the pool is released
    idle: Option<Arc<IdleBuffer<C>>>,
    create: Option<CreateFn<C>>,
    probe: Option<ProbeFn<C>>,
    /// Connections open right now, idle and checked out
    opening: usize,
    waiters: WaiterQueue<C>,
}

struct Shared<C> {
    state: Mutex<State<C>>,
    limits: PoolLimits,
    // Outlives release so handles returned after shutdown are still torn down.
    destroy: DestroyFn<C>,
    metrics: MetricsTracker,
}

enum Attempt<C, W> {
    Ready(C),
    Queued(W),
}

/// Bounded pool of long-lived connections with FIFO waiters
///
/// Idle connections live in a lock-free bounded buffer so the common
/// get/put path only touches the state lock briefly. Once `max_cap`
/// connections are open, callers queue and are served in arrival order by
/// the next `put`.
///
/// Cloning is cheap and every clone drives the same pool.
///
/// # Examples
///
/// ```
/// use grpc_connpool::{ChannelPool, Pool, PoolConfiguration};
///
/// let pool = ChannelPool::new(
///     PoolConfiguration::new()
///         .with_initial_cap(2)
///         .with_max_idle(5)
///         .with_max_cap(5)
///         .with_create(|| Ok(String::from("conn")))
///         .with_destroy(|_conn| Ok(())),
/// )
/// .unwrap();
///
/// assert_eq!(pool.len(), 2);
/// let conn = pool.get().unwrap();
/// assert_eq!(pool.len(), 1);
/// pool.put(conn).unwrap();
/// assert_eq!(pool.len(), 2);
/// ```
pub struct ChannelPool<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for ChannelPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> fmt::Debug for ChannelPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ChannelPool")
            .field("limits", &self.shared.limits)
            .field("opening", &state.opening)
            .field("idle", &state.idle.as_ref().map_or(0, |idle| idle.len()))
            .field("waiting", &state.waiters.len())
            .field("closed", &state.idle.is_none())
            .finish()
    }
}

impl<C: Send + 'static> ChannelPool<C> {
    /// Validate the configuration and dial `initial_cap` connections
    ///
    /// If any of the initial connections cannot be created, the ones already
    /// made are destroyed and [`PoolError::Prefill`] is returned.
    pub fn new(config: PoolConfiguration<C>) -> PoolResult<Self> {
        let (limits, Behaviors { create, destroy, probe }) = config.into_parts()?;
        let idle = Arc::new(IdleBuffer::new(limits.max_idle));
        let metrics = MetricsTracker::new();

        for _ in 0..limits.initial_cap {
            match create() {
                Ok(conn) => {
                    MetricsTracker::incr(&metrics.created);
                    if let Err(extra) = idle.push(IdleConnection::new(conn)) {
                        // initial_cap <= max_idle, so this only trips on a racing bug
                        if let Err(err) = destroy(extra.into_inner()) {
                            warn!(error = %err, "failed to destroy connection that did not fit the idle buffer");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, created = idle.len(), "factory failed while filling the pool");
                    while let Some(conn) = idle.pop() {
                        if let Err(err) = destroy(conn.into_inner()) {
                            warn!(error = %err, "failed to destroy connection during pre-fill teardown");
                        }
                    }
                    return Err(PoolError::Prefill(Arc::from(err)));
                }
            }
        }

        info!(
            initial_cap = limits.initial_cap,
            max_idle = limits.max_idle,
            max_cap = limits.max_cap,
            idle_timeout = ?limits.idle_timeout,
            "connection pool ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    idle: Some(idle),
                    create: Some(create),
                    probe,
                    opening: limits.initial_cap,
                    waiters: WaiterQueue::default(),
                }),
                limits,
                destroy,
                metrics,
            }),
        })
    }

    /// Get a connection wrapped in a guard that puts it back when dropped
    pub fn get_guarded(&self) -> PoolResult<PooledConnection<C>> {
        let conn = self.get()?;
        Ok(PooledConnection::new(conn, self.clone()))
    }

    /// Async variant of [`get_guarded`](Self::get_guarded)
    pub async fn get_guarded_async(&self) -> PoolResult<PooledConnection<C>> {
        let conn = self.get_async().await?;
        Ok(PooledConnection::new(conn, self.clone()))
    }

    /// Connections open right now, idle and checked out
    pub fn opening(&self) -> usize {
        self.shared.state.lock().opening
    }

    /// Callers queued behind the ceiling
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    pub fn limits(&self) -> PoolLimits {
        self.shared.limits
    }

    /// Whether [`release`](Pool::release) has run
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().idle.is_none()
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (opening, idle, waiting) = {
            let state = self.shared.state.lock();
            (
                state.opening,
                state.idle.as_ref().map_or(0, |idle| idle.len()),
                state.waiters.len(),
            )
        };
        self.shared
            .metrics
            .get_metrics(opening, idle, waiting, self.shared.limits.max_cap)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        if self.is_closed() {
            return HealthStatus::closed();
        }
        let metrics = self.get_metrics();
        HealthStatus::new(metrics.idle, metrics.opening, metrics.waiting, metrics.max_cap)
    }

    /// Serve from the idle buffer, create under the ceiling, or queue.
    fn try_acquire<W>(
        &self,
        enqueue: impl FnOnce(&mut WaiterQueue<C>) -> W,
    ) -> PoolResult<Attempt<C, W>> {
        let limits = &self.shared.limits;
        loop {
            let (idle, probe) = {
                let state = self.shared.state.lock();
                (state.idle.clone(), state.probe.clone())
            };
            let idle = idle.ok_or(PoolError::PoolClosed)?;

            while let Some(candidate) = idle.pop() {
                if candidate.is_expired(limits.idle_timeout) {
                    debug!(idle_timeout = ?limits.idle_timeout, "discarding expired idle connection");
                    self.evict(candidate.into_inner());
                    continue;
                }
                if let Some(probe) = &probe
                    && let Err(err) = probe(&candidate.conn)
                {
                    debug!(error = %err, "discarding idle connection that failed its probe");
                    self.evict(candidate.into_inner());
                    continue;
                }
                MetricsTracker::incr(&self.shared.metrics.retrieved);
                return Ok(Attempt::Ready(candidate.into_inner()));
            }

            let mut state = self.shared.state.lock();
            let Some(create) = state.create.clone() else {
                return Err(PoolError::PoolClosed);
            };

            // Free slots go to queued callers before this one.
            while state.opening < limits.max_cap {
                let conn = create().map_err(|err| {
                    warn!(error = %err, opening = state.opening, "failed to create connection");
                    PoolError::connection(err)
                })?;
                state.opening += 1;
                debug_assert!(state.opening <= limits.max_cap);
                MetricsTracker::incr(&self.shared.metrics.created);

                match state.waiters.hand_off(IdleConnection::new(conn)) {
                    Ok(handoff) => {
                        MetricsTracker::incr(&self.shared.metrics.handoffs);
                        debug!(
                            waited = ?handoff.waited,
                            opening = state.opening,
                            "handed new connection to earlier waiter"
                        );
                    }
                    Err(conn) => {
                        MetricsTracker::incr(&self.shared.metrics.retrieved);
                        debug!(opening = state.opening, max_cap = limits.max_cap, "created connection");
                        return Ok(Attempt::Ready(conn.into_inner()));
                    }
                }
            }

            // A put may have refilled the buffer after our pop came up empty.
            if !idle.is_empty() {
                continue;
            }

            let waiter = enqueue(&mut state.waiters);
            MetricsTracker::incr(&self.shared.metrics.waits);
            debug!(
                opening = state.opening,
                waiting = state.waiters.len(),
                "connection ceiling reached, waiting for a returned connection"
            );
            return Ok(Attempt::Queued(waiter));
        }
    }

    /// Vet a connection delivered straight from `put`.
    ///
    /// An expired one is destroyed and a replacement is dialed in the same
    /// slot, so the caller is served without going back to the queue tail.
    fn accept_delivered(&self, delivered: IdleConnection<C>) -> PoolResult<C> {
        if !delivered.is_expired(self.shared.limits.idle_timeout) {
            MetricsTracker::incr(&self.shared.metrics.retrieved);
            return Ok(delivered.into_inner());
        }

        debug!("replacing expired connection handed to waiter");
        MetricsTracker::incr(&self.shared.metrics.evicted);
        if let Err(err) = self.destroy(delivered.into_inner()) {
            warn!(error = %err, "failed to destroy expired connection handed to waiter");
        }

        let create = self.shared.state.lock().create.clone();
        let replacement = match create {
            Some(create) => create().map_err(|err| {
                warn!(error = %err, "failed to replace expired connection for waiter");
                PoolError::connection(err)
            }),
            None => Err(PoolError::PoolClosed),
        };
        match replacement {
            Ok(conn) => {
                MetricsTracker::incr(&self.shared.metrics.created);
                MetricsTracker::incr(&self.shared.metrics.retrieved);
                Ok(conn)
            }
            Err(err) => {
                self.free_slot();
                Err(err)
            }
        }
    }

    /// Account for a destroyed connection.
    ///
    /// Runs after the destroy call so the number of live handles never
    /// exceeds `max_cap`, even briefly.
    fn free_slot(&self) {
        let mut state = self.shared.state.lock();
        state.opening = state.opening.saturating_sub(1);
        self.refill_for_waiter(&mut state);
    }

    /// A destroyed connection frees a slot under the ceiling. If callers are
    /// queued, dial a replacement for the oldest one; otherwise nobody would
    /// wake them until an unrelated `put`.
    fn refill_for_waiter(&self, state: &mut State<C>) {
        if state.waiters.len() == 0 || state.opening >= self.shared.limits.max_cap {
            return;
        }
        let Some(create) = state.create.clone() else {
            return;
        };

        let conn = match create() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, waiting = state.waiters.len(), "failed to create replacement connection for waiter");
                return;
            }
        };
        state.opening += 1;
        MetricsTracker::incr(&self.shared.metrics.created);

        match state.waiters.hand_off(IdleConnection::new(conn)) {
            Ok(_) => {
                MetricsTracker::incr(&self.shared.metrics.handoffs);
                debug!(opening = state.opening, "handed replacement connection to waiter");
            }
            Err(unclaimed) => {
                let unclaimed = match &state.idle {
                    Some(idle) => idle.push(unclaimed).err(),
                    None => Some(unclaimed),
                };
                if let Some(unclaimed) = unclaimed {
                    if let Err(err) = self.destroy(unclaimed.into_inner()) {
                        warn!(error = %err, "failed to destroy unclaimed replacement connection");
                    }
                    state.opening -= 1;
                }
            }
        }
    }

    fn evict(&self, conn: C) {
        MetricsTracker::incr(&self.shared.metrics.evicted);
        if let Err(err) = self.close(conn) {
            warn!(error = %err, "failed to destroy evicted connection");
        }
    }

    fn destroy(&self, conn: C) -> PoolResult<()> {
        MetricsTracker::incr(&self.shared.metrics.destroyed);
        (self.shared.destroy)(conn).map_err(PoolError::connection)
    }

    /// Take a blocking waiter out of the queue after its deadline passed.
    ///
    /// If `put` already served it, the delivered connection is in the slot.
    fn abandon_blocking(
        &self,
        id: u64,
        rx: &crossbeam::channel::Receiver<IdleConnection<C>>,
    ) -> PoolResult<IdleConnection<C>> {
        if self.shared.state.lock().waiters.remove(id) {
            MetricsTracker::incr(&self.shared.metrics.cancelled);
            debug!("gave up waiting for a connection");
            return Err(PoolError::Cancelled);
        }
        rx.try_recv().map_err(|_| PoolError::MaxActiveReached)
    }

    fn get_until(&self, deadline: Option<Instant>) -> PoolResult<C> {
        let (id, rx) = match self.try_acquire(|waiters| waiters.push_blocking())? {
            Attempt::Ready(conn) => return Ok(conn),
            Attempt::Queued(waiter) => waiter,
        };

        let delivered = match deadline {
            None => rx.recv().map_err(|_| PoolError::MaxActiveReached)?,
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(delivered) => delivered,
                Err(RecvTimeoutError::Disconnected) => return Err(PoolError::MaxActiveReached),
                Err(RecvTimeoutError::Timeout) => self.abandon_blocking(id, &rx)?,
            },
        };
        self.accept_delivered(delivered)
    }
}

/// A task parked in the waiter queue
///
/// Dropping it before delivery (the future was cancelled) removes the waiter;
/// if a connection had already landed in the slot it goes back to the pool.
struct PendingWait<'a, C: Send + 'static> {
    pool: &'a ChannelPool<C>,
    id: u64,
    rx: oneshot::Receiver<IdleConnection<C>>,
    done: bool,
}

impl<C: Send + 'static> PendingWait<'_, C> {
    async fn wait(mut self) -> PoolResult<IdleConnection<C>> {
        let delivered = (&mut self.rx).await;
        self.done = true;
        delivered.map_err(|_| PoolError::MaxActiveReached)
    }
}

impl<C: Send + 'static> Drop for PendingWait<'_, C> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if self.pool.shared.state.lock().waiters.remove(self.id) {
            MetricsTracker::incr(&self.pool.shared.metrics.cancelled);
            debug!("waiter cancelled before a connection arrived");
            return;
        }
        if let Ok(delivered) = self.rx.try_recv() {
            debug!("waiter cancelled after delivery, returning connection");
            if let Err(err) = self.pool.put(delivered.into_inner()) {
                debug!(error = %err, "could not return connection from cancelled waiter");
            }
        }
    }
}

#[async_trait]
impl<C: Send + 'static> Pool for ChannelPool<C> {
    type Connection = C;

    fn get(&self) -> PoolResult<C> {
        self.get_until(None)
    }

    fn get_timeout(&self, timeout: Duration) -> PoolResult<C> {
        self.get_until(Instant::now().checked_add(timeout))
    }

    async fn get_async(&self) -> PoolResult<C> {
        let (id, rx) = match self.try_acquire(|waiters| waiters.push_async())? {
            Attempt::Ready(conn) => return Ok(conn),
            Attempt::Queued(waiter) => waiter,
        };

        let pending = PendingWait {
            pool: self,
            id,
            rx,
            done: false,
        };
        let delivered = pending.wait().await?;
        self.accept_delivered(delivered)
    }

    async fn get_timeout_async(&self, timeout: Duration) -> PoolResult<C> {
        tokio::time::timeout(timeout, self.get_async())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    fn put(&self, conn: impl Into<Option<C>>) -> PoolResult<()> {
        let conn = conn.into().ok_or(PoolError::NilConnection)?;

        let mut state = self.shared.state.lock();
        let Some(idle) = state.idle.clone() else {
            drop(state);
            debug!("pool is released, destroying returned connection");
            if let Err(err) = self.close(conn) {
                warn!(error = %err, "failed to destroy connection returned after release");
            }
            return Err(PoolError::PoolClosed);
        };
        MetricsTracker::incr(&self.shared.metrics.returned);

        let returned = match state.waiters.hand_off(IdleConnection::new(conn)) {
            Ok(handoff) => {
                MetricsTracker::incr(&self.shared.metrics.handoffs);
                debug!(
                    waited = ?handoff.waited,
                    abandoned = handoff.abandoned,
                    waiting = state.waiters.len(),
                    "handed connection to waiter"
                );
                return Ok(());
            }
            Err(returned) => returned,
        };

        match idle.push(returned) {
            Ok(()) => Ok(()),
            Err(surplus) => {
                drop(state);
                debug!(max_idle = self.shared.limits.max_idle, "idle buffer full, destroying surplus connection");
                let result = self.destroy(surplus.into_inner());
                self.free_slot();
                result
            }
        }
    }

    fn close(&self, conn: impl Into<Option<C>>) -> PoolResult<()> {
        let conn = conn.into().ok_or(PoolError::NilConnection)?;
        let result = self.destroy(conn);
        self.free_slot();
        result
    }

    fn ping<'a>(&self, conn: impl Into<Option<&'a C>>) -> PoolResult<()> {
        let conn = conn.into().ok_or(PoolError::NilConnection)?;
        let probe = {
            let state = self.shared.state.lock();
            if state.idle.is_none() {
                return Err(PoolError::PoolClosed);
            }
            state.probe.clone()
        };
        match probe {
            Some(probe) => probe(conn).map_err(PoolError::connection),
            None => Ok(()),
        }
    }

    fn release(&self) -> PoolResult<()> {
        let (idle, closed_waiters) = {
            let mut state = self.shared.state.lock();
            let Some(idle) = state.idle.take() else {
                return Ok(());
            };
            state.create = None;
            state.probe = None;
            (idle, state.waiters.close_all())
        };

        info!(idle = idle.len(), waiters = closed_waiters, "releasing connection pool");

        let mut first_err = None;
        while let Some(conn) = idle.pop() {
            if let Err(err) = self.close(conn.into_inner()) {
                warn!(error = %err, "failed to destroy idle connection during release");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn len(&self) -> usize {
        self.shared
            .state
            .lock()
            .idle
            .as_ref()
            .map_or(0, |idle| idle.len())
    }
}

/// A pooled connection that goes back to the pool when dropped
pub struct PooledConnection<C: Send + 'static> {
    conn: Option<C>,
    pool: ChannelPool<C>,
}

impl<C: Send + 'static> PooledConnection<C> {
    fn new(conn: C, pool: ChannelPool<C>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Take the connection out of the guard without returning it
    ///
    /// The pool still counts it as open; hand it back with `put` or `close`.
    pub fn detach(mut self) -> C {
        self.conn.take().expect("connection already taken")
    }

    /// Destroy the connection instead of returning it, e.g. after a transport error
    pub fn discard(mut self) -> PoolResult<()> {
        match self.conn.take() {
            Some(conn) => self.pool.close(conn),
            None => Ok(()),
        }
    }
}

impl<C: Send + 'static> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already taken")
    }
}

impl<C: Send + 'static> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already taken")
    }
}

impl<C: Send + 'static> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err(err) = self.pool.put(conn)
        {
            debug!(error = %err, "pooled connection was not returned");
        }
    }
}

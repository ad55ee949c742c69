//! Concurrency tests against the public pool API

use grpc_connpool::{BoxError, ChannelPool, ConnectionFactory, Pool, PoolConfiguration, PoolError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Tracks every handle it hands out so tests can check ownership and counts
#[derive(Default)]
struct Tracker {
    next: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    destroyed: Mutex<Vec<usize>>,
    in_use: Mutex<HashSet<usize>>,
    fail_probe: AtomicBool,
}

#[derive(Clone, Default)]
struct TrackingFactory(Arc<Tracker>);

impl ConnectionFactory for TrackingFactory {
    type Connection = usize;

    fn create(&self) -> Result<usize, BoxError> {
        let live = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(live, Ordering::SeqCst);
        Ok(self.0.next.fetch_add(1, Ordering::SeqCst))
    }

    fn destroy(&self, conn: usize) -> Result<(), BoxError> {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
        self.0.destroyed.lock().unwrap().push(conn);
        Ok(())
    }

    fn supports_probe(&self) -> bool {
        true
    }

    fn probe(&self, _conn: &usize) -> Result<(), BoxError> {
        if self.0.fail_probe.load(Ordering::SeqCst) {
            Err("connection reset by peer".into())
        } else {
            Ok(())
        }
    }
}

fn pool(factory: &TrackingFactory, initial_cap: usize, max_idle: usize, max_cap: usize) -> ChannelPool<usize> {
    ChannelPool::new(
        PoolConfiguration::new()
            .with_initial_cap(initial_cap)
            .with_max_idle(max_idle)
            .with_max_cap(max_cap)
            .with_connection_factory(factory.clone()),
    )
    .unwrap()
}

fn wait_for_waiters(pool: &ChannelPool<usize>, count: usize) {
    while pool.waiting() < count {
        thread::yield_now();
    }
}

#[test]
fn test_len_matches_initial_cap() {
    for (initial_cap, max_idle, max_cap) in [(0, 0, 0), (0, 3, 3), (2, 5, 5), (4, 4, 10)] {
        let factory = TrackingFactory::default();
        let pool = pool(&factory, initial_cap, max_idle, max_cap);
        assert_eq!(pool.len(), initial_cap);
        assert_eq!(pool.opening(), initial_cap);
    }
}

#[test]
fn test_live_connections_never_exceed_max_cap() {
    const MAX_CAP: usize = 4;
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 1, 2, MAX_CAP);
    let tracker = Arc::clone(&factory.0);

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                for round in 0..50 {
                    let conn = pool.get().unwrap();
                    assert!(
                        tracker.in_use.lock().unwrap().insert(conn),
                        "connection {conn} handed to two callers"
                    );
                    assert!(pool.opening() <= MAX_CAP);
                    thread::yield_now();
                    tracker.in_use.lock().unwrap().remove(&conn);

                    if round % 7 == 0 {
                        pool.close(conn).unwrap();
                    } else {
                        pool.put(conn).unwrap();
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert!(tracker.peak.load(Ordering::SeqCst) <= MAX_CAP);
    assert!(pool.len() <= 2);
    assert_eq!(pool.waiting(), 0);
    assert_eq!(pool.opening(), tracker.live.load(Ordering::SeqCst));
}

#[test]
fn test_single_connection_handoff_is_fifo() {
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 0, 1, 1);
    let held = pool.get().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for caller in 0..3 {
        let waiter_pool = pool.clone();
        let order = Arc::clone(&order);
        waiters.push(thread::spawn(move || {
            let conn = waiter_pool.get().unwrap();
            order.lock().unwrap().push(caller);
            waiter_pool.put(conn).unwrap();
        }));
        wait_for_waiters(&pool, caller + 1);
    }

    pool.put(held).unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(factory.0.next.load(Ordering::SeqCst), 1);
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_release_destroys_each_idle_connection_once() {
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 3, 5, 5);
    let out = pool.get().unwrap();

    pool.release().unwrap();
    pool.release().unwrap();

    let mut destroyed = factory.0.destroyed.lock().unwrap().clone();
    destroyed.sort_unstable();
    assert_eq!(destroyed, vec![1, 2]);
    assert_eq!(pool.len(), 0);
    assert!(matches!(pool.get(), Err(PoolError::PoolClosed)));
    assert!(matches!(pool.put(out), Err(PoolError::PoolClosed)));
    assert_eq!(factory.0.live.load(Ordering::SeqCst), 0);
}

#[test]
fn test_release_unblocks_every_waiter() {
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 0, 2, 2);
    let _a = pool.get().unwrap();
    let _b = pool.get().unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || pool.get())
        })
        .collect();
    wait_for_waiters(&pool, 3);

    pool.release().unwrap();
    for waiter in waiters {
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::MaxActiveReached)));
    }
}

#[test]
fn test_probe_failure_falls_through_to_create() {
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 2, 2, 3);
    factory.0.fail_probe.store(true, Ordering::SeqCst);

    let conn = pool.get().unwrap();
    assert_eq!(conn, 2);

    let mut destroyed = factory.0.destroyed.lock().unwrap().clone();
    destroyed.sort_unstable();
    assert_eq!(destroyed, vec![0, 1]);
    assert_eq!(pool.get_metrics().total_evicted, 2);
}

#[test]
fn test_expired_connection_never_returned() {
    let factory = TrackingFactory::default();
    let pool = ChannelPool::new(
        PoolConfiguration::new()
            .with_max_idle(2)
            .with_max_cap(2)
            .with_idle_timeout(Duration::from_millis(25))
            .with_connection_factory(factory.clone()),
    )
    .unwrap();

    let conn = pool.get().unwrap();
    pool.put(conn).unwrap();
    thread::sleep(Duration::from_millis(50));

    let fresh = pool.get().unwrap();
    assert_ne!(fresh, conn);
    assert_eq!(*factory.0.destroyed.lock().unwrap(), vec![conn]);
}

#[test]
fn test_timed_out_waiter_does_not_swallow_connection() {
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 0, 1, 1);
    let held = pool.get().unwrap();

    let impatient = {
        let pool = pool.clone();
        thread::spawn(move || pool.get_timeout(Duration::from_millis(20)))
    };
    wait_for_waiters(&pool, 1);
    assert!(matches!(impatient.join().unwrap(), Err(PoolError::Cancelled)));

    pool.put(held).unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.get().unwrap(), held);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_callers_share_ceiling() {
    const MAX_CAP: usize = 3;
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 0, MAX_CAP, MAX_CAP);

    let tasks: Vec<_> = (0..24)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let conn = pool.get_guarded_async().await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
                drop(conn);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert!(factory.0.peak.load(Ordering::SeqCst) <= MAX_CAP);
    assert_eq!(pool.len(), pool.opening());
    assert_eq!(pool.waiting(), 0);
}

#[tokio::test]
async fn test_cancelled_async_waiter_passes_connection_on() {
    let factory = TrackingFactory::default();
    let pool = pool(&factory, 0, 1, 1);
    let held = pool.get_async().await.unwrap();

    let cancelled = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_async().await })
    };
    let patient = {
        let pool = pool.clone();
        tokio::spawn(async move {
            // Queue behind the task that will be aborted.
            while pool.waiting() < 1 {
                tokio::task::yield_now().await;
            }
            pool.get_async().await
        })
    };
    while pool.waiting() < 2 {
        tokio::task::yield_now().await;
    }

    cancelled.abort();
    assert!(cancelled.await.unwrap_err().is_cancelled());
    assert_eq!(pool.waiting(), 1);

    pool.put(held).unwrap();
    assert_eq!(patient.await.unwrap().unwrap(), held);
    assert_eq!(pool.get_metrics().total_cancelled, 1);
}

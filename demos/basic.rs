//! Basic usage examples for ChannelPool

use grpc_connpool::{BoxError, ChannelPool, ConnectionFactory, Pool, PoolConfiguration, PoolError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Stand-in for an RPC client connection
#[derive(Debug)]
struct RpcConn {
    id: usize,
    endpoint: String,
}

struct Dialer {
    endpoint: String,
    next_id: AtomicUsize,
}

impl ConnectionFactory for Dialer {
    type Connection = RpcConn;

    fn create(&self) -> Result<RpcConn, BoxError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        println!("   Dialing {} (#{})", self.endpoint, id);
        Ok(RpcConn {
            id,
            endpoint: self.endpoint.clone(),
        })
    }

    fn destroy(&self, conn: RpcConn) -> Result<(), BoxError> {
        println!("   Closing #{} to {}", conn.id, conn.endpoint);
        Ok(())
    }

    fn supports_probe(&self) -> bool {
        true
    }

    fn probe(&self, _conn: &RpcConn) -> Result<(), BoxError> {
        Ok(())
    }
}

fn dialer() -> Dialer {
    Dialer {
        endpoint: "127.0.0.1:50051".to_string(),
        next_id: AtomicUsize::new(0),
    }
}

fn main() {
    println!("=== grpc_connpool - Basic Examples ===\n");

    // Example 1: Get and put
    get_and_put();

    // Example 2: Guarded connections
    guarded();

    // Example 3: Waiting at the ceiling
    waiting_at_ceiling();

    // Example 4: Metrics and health
    metrics_and_health();
}

fn get_and_put() {
    println!("1. Get and Put:");
    let pool = ChannelPool::new(
        PoolConfiguration::new()
            .with_initial_cap(2)
            .with_max_idle(5)
            .with_max_cap(5)
            .with_connection_factory(dialer()),
    )
    .unwrap();

    let conn = pool.get().unwrap();
    println!("   Got connection #{}", conn.id);
    println!("   Idle while checked out: {}", pool.len());
    pool.put(conn).unwrap();
    println!("   Idle after return: {}", pool.len());

    pool.release().unwrap();
    match pool.get() {
        Err(PoolError::PoolClosed) => println!("   Get after release: pool is closed\n"),
        other => println!("   Unexpected: {:?}\n", other.map(|c| c.id)),
    }
}

fn guarded() {
    println!("2. Guarded Connections:");
    let pool = ChannelPool::new(PoolConfiguration::new().with_connection_factory(dialer())).unwrap();

    {
        let conn = pool.get_guarded().unwrap();
        println!("   Using #{} to {}", conn.id, conn.endpoint);
        // Returned when dropped
    }
    println!("   Idle after guard dropped: {}\n", pool.len());
}

fn waiting_at_ceiling() {
    println!("3. Waiting at the Ceiling:");
    let pool = ChannelPool::new(
        PoolConfiguration::new()
            .with_max_idle(1)
            .with_max_cap(1)
            .with_connection_factory(dialer()),
    )
    .unwrap();

    let held = pool.get().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.get().map(|conn| conn.id))
    };
    thread::sleep(Duration::from_millis(50));
    println!("   Waiting callers: {}", pool.waiting());

    let timed_out = pool.get_timeout(Duration::from_millis(20));
    println!("   Deadline get: {}", timed_out.map(|c| c.id.to_string()).unwrap_or_else(|e| e.to_string()));

    pool.put(held).unwrap();
    println!("   Waiter received #{}\n", waiter.join().unwrap().unwrap());
}

fn metrics_and_health() {
    println!("4. Metrics and Health:");
    let pool = ChannelPool::new(
        PoolConfiguration::new()
            .with_initial_cap(1)
            .with_max_idle(2)
            .with_max_cap(2)
            .with_connection_factory(dialer()),
    )
    .unwrap();

    {
        let _a = pool.get_guarded().unwrap();
        let _b = pool.get_guarded().unwrap();

        let health = pool.get_health_status();
        println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
        println!("   Utilization: {:.1}%", health.utilization * 100.0);
        println!("   Open: {}, Idle: {}", health.open_connections, health.idle_connections);
    }

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }

    println!("\n   Prometheus:");
    print!("{}", pool.export_metrics_prometheus("user_rpc", None).unwrap());
}

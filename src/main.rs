// grpc_connpool demo binary
//
// The library lives in lib.rs. Run the demos with:
//   cargo run --example basic
//   cargo run --example async_usage
// Set RUST_LOG=grpc_connpool=debug to watch the pool's decisions.

use grpc_connpool::{ChannelPool, Pool, PoolConfiguration, PoolResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> PoolResult<()> {
    init_logging();

    println!("=== grpc_connpool ===");
    println!("See demos/ for usage examples");
    println!();

    let dialed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dialed);
    let pool = ChannelPool::new(
        PoolConfiguration::new()
            .with_initial_cap(2)
            .with_max_idle(5)
            .with_max_cap(5)
            .with_create(move || Ok(format!("conn-{}", counter.fetch_add(1, Ordering::SeqCst))))
            .with_destroy(|conn| {
                println!("  destroyed {conn}");
                Ok(())
            }),
    )?;

    println!("Quick Demo:");
    println!("  Idle after construction: {}", pool.len());

    let first = pool.get()?;
    let second = pool.get()?;
    let third = pool.get()?;
    println!("  Checked out: {first}, {second}, {third}");
    println!("  Open connections: {}", pool.opening());

    pool.put(first)?;
    println!("  Idle after one return: {}", pool.len());

    pool.put(second)?;
    pool.put(third)?;
    pool.release()?;
    println!("  Dialed in total: {}", dialed.load(Ordering::SeqCst));

    Ok(())
}

//! Async usage examples

use grpc_connpool::{ChannelPool, Pool, PoolConfiguration};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    println!("=== grpc_connpool - Async Examples ===\n");

    // Example 1: Async get
    async_get().await;

    // Example 2: Async with timeout
    async_with_timeout().await;

    // Example 3: Concurrent access
    concurrent_access().await;
}

fn pool(max_cap: usize) -> ChannelPool<usize> {
    let next = Arc::new(AtomicUsize::new(0));
    ChannelPool::new(
        PoolConfiguration::new()
            .with_max_idle(max_cap)
            .with_max_cap(max_cap)
            .with_create(move || Ok(next.fetch_add(1, Ordering::SeqCst)))
            .with_destroy(|_| Ok(())),
    )
    .unwrap()
}

async fn async_get() {
    println!("1. Async Get:");
    let pool = pool(3);

    {
        let conn = pool.get_guarded_async().await.unwrap();
        println!("   Got connection asynchronously: #{}", *conn);
    }

    println!();
}

async fn async_with_timeout() {
    println!("2. Async with Timeout:");
    let pool = pool(1);

    // Take the only connection
    let _held = pool.get_async().await.unwrap();

    // Try to get another (should time out)
    match pool.get_timeout_async(Duration::from_millis(100)).await {
        Ok(conn) => println!("   Got connection #{}", conn),
        Err(e) => println!("   Error: {}", e),
    }
    println!("   Waiting callers after timeout: {}", pool.waiting());

    println!();
}

async fn concurrent_access() {
    println!("3. Concurrent Access:");
    let pool = pool(3);

    let mut handles = vec![];

    for i in 0..10 {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            let conn = pool.get_guarded_async().await.unwrap();
            println!("   Task {} got connection #{}", i, *conn);
            sleep(Duration::from_millis(50)).await;
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    println!("   Connections dialed: {}", pool.get_metrics().total_created);
    println!("   Final idle: {}", pool.len());
}

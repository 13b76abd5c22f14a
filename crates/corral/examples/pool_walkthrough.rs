//! Pool lifecycle walkthrough.
//!
//! Exercises the pool against the in-memory backend from `corral-testing`:
//! initialization, reuse, blocking under exhaustion, discard of dead
//! connections, and the status/metrics surface.
//!
//! # Running
//!
//! ```bash
//! cargo run --example pool_walkthrough
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use corral::{ContextId, Pool, PoolConfig};
use corral_testing::MemoryBackend;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = PoolConfig::new()
        .endpoint("mem://walkthrough")
        .initial_size(2)
        .max_active(4)
        .max_idle(2)
        .wait_timeout(Duration::from_secs(2));

    println!("=== Connection Pool Walkthrough ===\n");
    println!("Pool configuration:");
    println!("  Initial size: {}", config.initial_size);
    println!("  Max active:   {}", config.max_active);
    println!("  Max idle:     {}", config.max_idle);
    println!("  Wait timeout: {:?}\n", config.wait_timeout);

    let backend = MemoryBackend::new();
    let pool = Arc::new(Pool::new(config, backend.clone())?);

    // 1. Eager initialization.
    let established = pool.initialize().await;
    println!("1. Initialized with {} connections", established);
    print_status(&pool);

    // 2. Acquire, use, release; the next acquire reuses the same connection.
    println!("\n2. Reuse:");
    {
        let lease = pool.acquire().await?;
        println!("  leased connection {}", lease.id());
        // Returned to the idle set on drop.
    }
    let lease = pool.acquire().await?;
    println!(
        "  re-leased connection {} (checkout #{})",
        lease.id(),
        lease.checkout_count()
    );
    drop(lease);

    // 3. Context-local cache: nested code can look up the caller's lease.
    println!("\n3. Context cache:");
    let ctx = ContextId::next();
    let lease = pool.acquire_for(ctx).await?;
    if let Some(current) = pool.current(ctx) {
        println!("  {} holds connection {}", ctx, current.id());
    }
    drop(lease);
    println!("  after release, cached entry: {:?}", pool.current(ctx));

    // 4. Exhaustion: hold every connection, let concurrent acquires wait.
    println!("\n4. Blocking under exhaustion (4 held, 8 waiters):");
    let held: Vec<_> = {
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire().await?);
        }
        held
    };
    let mut waiters = Vec::new();
    for i in 0..8 {
        let pool = Arc::clone(&pool);
        waiters.push(tokio::spawn(async move {
            let lease = pool.acquire().await?;
            println!("  waiter {} got connection {}", i, lease.id());
            Ok::<_, corral::PoolError>(())
        }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(held); // frees capacity, waiters drain one release at a time
    for waiter in waiters {
        waiter.await?.expect("waiter should succeed after releases");
    }

    // 5. A dead connection is discarded and transparently replaced.
    println!("\n5. Validation:");
    backend.sever_existing();
    let lease = pool.acquire().await?;
    println!("  replacement connection {}", lease.id());
    drop(lease);

    print_status(&pool);
    print_metrics(&pool);
    Ok(())
}

fn print_status(pool: &Pool<MemoryBackend>) {
    let status = pool.status();
    println!(
        "  status: idle={} leased={} total={} max_active={} ({:.0}% utilized)",
        status.idle,
        status.leased,
        status.total,
        status.max_active,
        status.utilization()
    );
}

fn print_metrics(pool: &Pool<MemoryBackend>) {
    let metrics = pool.metrics();
    println!("\nLifetime metrics:");
    println!("  created:             {}", metrics.connections_created);
    println!("  closed:              {}", metrics.connections_closed);
    println!("  checkouts:           {}", metrics.checkouts);
    println!("  reuses:              {}", metrics.reuses);
    println!("  timeouts:            {}", metrics.timeouts);
    println!("  validation failures: {}", metrics.validation_failures);
    println!("  reuse rate:          {:.1}%", metrics.reuse_rate() * 100.0);
}

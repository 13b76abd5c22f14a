//! # corral
//!
//! Bounded pooling of reusable backend connections for concurrent callers.
//!
//! Opening a fresh backend connection per request is slow and, under load,
//! exhausts server-side resources. A pool keeps a bounded set of open
//! connections, leasing them out and taking them back. corral is agnostic to
//! what a connection actually is: implementors of [`ConnectionFactory`]
//! supply the backend-specific open logic, and the pooled type implements
//! [`PoolableConnection`] for liveness probing and close.
//!
//! ## Guarantees
//!
//! - Never more than `max_active` connections outstanding (idle + leased).
//! - Every connection handed out passed its liveness probe at acquire time.
//! - Acquire blocks when the pool is exhausted and wakes on release, bounded
//!   by `wait_timeout`; sustained backend failure surfaces a typed error
//!   instead of retrying forever.
//! - No fairness ordering among blocked waiters; one waiter is woken per
//!   release.
//!
//! ## Example
//!
//! ```rust,ignore
//! use corral::{ConnectionFactory, Pool, PoolConfig};
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .endpoint("backend.internal:7000")
//!     .initial_size(2)
//!     .max_active(10)
//!     .max_idle(4)
//!     .wait_timeout(Duration::from_secs(5));
//!
//! let pool = Pool::new(config, MyFactory::new())?;
//! pool.initialize().await;
//!
//! let lease = pool.acquire().await?;
//! lease.connection().await.do_work();
//! // Lease returns the connection to the pool on drop.
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// `corral-testing` depends back on this crate, so its `MemoryBackend`
// implements the lib-build `ConnectionFactory` — a distinct trait from the
// one in this `#[cfg(test)]` build. Compile the backend's source directly
// into the test build instead; the self-alias lets its `corral::` paths
// resolve here.
#[cfg(test)]
extern crate self as corral;

#[cfg(test)]
#[path = "../../corral-testing/src/memory.rs"]
mod test_memory;

pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod pool;

pub use config::{Credentials, PoolConfig};
pub use context::{ContextId, CurrentConnection};
pub use error::PoolError;
pub use factory::{CloseError, ConnectionFactory, PoolableConnection};
pub use metrics::MetricsSnapshot;
pub use pool::{Lease, Pool, PoolStatus};

//! # corral-testing
//!
//! Test infrastructure for corral pool development.
//!
//! Provides an in-memory [`ConnectionFactory`](corral::ConnectionFactory)
//! with scriptable failure injection, so pool behavior (reuse, blocking,
//! validation, discard) can be exercised without a network or a live
//! backend.
//!
//! ## Example
//!
//! ```rust,ignore
//! use corral::{Pool, PoolConfig};
//! use corral_testing::MemoryBackend;
//!
//! #[tokio::test]
//! async fn test_with_memory_backend() {
//!     let backend = MemoryBackend::new();
//!     backend.refuse_next(1); // first open fails
//!
//!     let pool = Pool::new(PoolConfig::new().max_active(2), backend.clone()).unwrap();
//!     pool.initialize().await;
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod memory;

pub use memory::{MemoryBackend, MemoryBackendError, MemoryConnection};

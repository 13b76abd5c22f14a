//! Pool error types.

use thiserror::Error;

/// Errors that can occur during pool operations.
///
/// Transient trouble (a dead connection, a momentary factory failure) is
/// absorbed and retried inside the pool; only exhaustion, timeout, and
/// failures that persist through the retry bound reach the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a connection within the wait timeout.
    #[error("connection acquisition timed out after {0:?}")]
    AcquisitionTimeout(std::time::Duration),

    /// The factory could not open a connection, persistently.
    #[error("failed to open backend connection: {0}")]
    ConnectionCreation(String),

    /// Every candidate connection failed its liveness probe within the
    /// per-call retry bound.
    #[error("no usable connection after {attempts} attempts")]
    RetriesExhausted {
        /// Number of candidates tried before giving up.
        attempts: u32,
    },

    /// The pool has not been initialized.
    #[error("pool is not initialized")]
    Inactive,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

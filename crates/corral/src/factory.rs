//! The factory seam: how connections are opened and what the pool requires
//! of them.
//!
//! The pool is agnostic to the backend's wire protocol. Callers implement
//! [`ConnectionFactory`] for the open path and [`PoolableConnection`] for the
//! capability set the pool itself needs: a liveness probe and a best-effort
//! close.

use crate::config::Credentials;

/// Error type for best-effort close failures; only ever logged.
pub type CloseError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Capabilities the pool requires of a pooled connection.
pub trait PoolableConnection: Send + 'static {
    /// Report whether the underlying resource is still usable.
    ///
    /// Called before a connection is handed to a caller and before one is
    /// accepted back into the idle set. Should cover "not already closed"
    /// plus whatever deeper health check the backend supports, and must be
    /// cheap relative to opening a fresh connection.
    fn probe_alive(&self) -> bool;

    /// Close the underlying resource.
    ///
    /// Best-effort: a returned error is logged and never blocks the pool's
    /// forward progress.
    fn close(&mut self) -> Result<(), CloseError>;
}

/// Opens physical connections on behalf of the pool.
///
/// The pool never holds its internal lock across `open`; capacity is
/// reserved beforehand, so a slow open delays only the caller that triggered
/// it.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type this factory produces.
    type Connection: PoolableConnection;

    /// Error produced when an open fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new physical connection to `endpoint`.
    async fn open(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Self::Connection, Self::Error>;
}

//! In-memory backend with failure injection.
//!
//! [`MemoryBackend`] is a cloneable [`ConnectionFactory`]; clones share the
//! same scripted state, so a test can keep one handle while the pool owns
//! another. Connections carry a shared liveness link per "cohort":
//! [`MemoryBackend::sever_existing`] flips the link for everything opened so
//! far while later opens start a healthy cohort, which is how tests simulate
//! a backend dropping established connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use corral::{CloseError, ConnectionFactory, Credentials, PoolableConnection};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors produced by the in-memory backend.
#[derive(Debug, Error)]
pub enum MemoryBackendError {
    /// A scripted refusal consumed this open attempt.
    #[error("backend refused connection to {0}")]
    Refused(String),
}

/// Cloneable in-memory connection factory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<BackendInner>,
}

struct BackendInner {
    opened: AtomicU64,
    refusals: AtomicU32,
    /// Liveness link shared by the current cohort of connections.
    link: Mutex<Arc<AtomicBool>>,
}

impl Default for BackendInner {
    fn default() -> Self {
        Self {
            opened: AtomicU64::new(0),
            refusals: AtomicU32::new(0),
            link: Mutex::new(Arc::new(AtomicBool::new(true))),
        }
    }
}

impl MemoryBackend {
    /// Create a backend that opens healthy connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `count` open attempts to fail.
    pub fn refuse_next(&self, count: u32) {
        self.inner.refusals.store(count, Ordering::Relaxed);
    }

    /// Kill every connection opened so far; later opens are healthy again.
    pub fn sever_existing(&self) {
        let fresh = Arc::new(AtomicBool::new(true));
        let old = std::mem::replace(&mut *self.inner.link.lock(), fresh);
        old.store(false, Ordering::Release);
    }

    /// Number of successful opens so far.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for MemoryBackend {
    type Connection = MemoryConnection;
    type Error = MemoryBackendError;

    async fn open(
        &self,
        endpoint: &str,
        _credentials: &Credentials,
    ) -> Result<Self::Connection, Self::Error> {
        let refused = self
            .inner
            .refusals
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MemoryBackendError::Refused(endpoint.to_string()));
        }

        let serial = self.inner.opened.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(MemoryConnection {
            serial,
            healthy: true,
            closed: false,
            poisoned_close: false,
            link: Arc::clone(&self.inner.link.lock()),
        })
    }
}

/// An in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    serial: u64,
    healthy: bool,
    closed: bool,
    poisoned_close: bool,
    link: Arc<AtomicBool>,
}

impl MemoryConnection {
    /// Backend-assigned serial, counting successful opens from 1.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Make this connection fail its next liveness probe.
    pub fn kill(&mut self) {
        self.healthy = false;
    }

    /// Make `close` report an error.
    pub fn poison_close(&mut self) {
        self.poisoned_close = true;
    }
}

impl PoolableConnection for MemoryConnection {
    fn probe_alive(&self) -> bool {
        !self.closed && self.healthy && self.link.load(Ordering::Acquire)
    }

    fn close(&mut self) -> Result<(), CloseError> {
        self.closed = true;
        if self.poisoned_close {
            return Err(format!("close failed for connection {}", self.serial).into());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::default()
    }

    #[tokio::test]
    async fn test_open_assigns_increasing_serials() {
        let backend = MemoryBackend::new();
        let a = backend.open("mem", &creds()).await.unwrap();
        let b = backend.open("mem", &creds()).await.unwrap();
        assert_eq!(a.serial(), 1);
        assert_eq!(b.serial(), 2);
        assert_eq!(backend.opened(), 2);
    }

    #[tokio::test]
    async fn test_refuse_next_fails_that_many_opens() {
        let backend = MemoryBackend::new();
        backend.refuse_next(2);
        assert!(backend.open("mem", &creds()).await.is_err());
        assert!(backend.open("mem", &creds()).await.is_err());
        assert!(backend.open("mem", &creds()).await.is_ok());
        assert_eq!(backend.opened(), 1);
    }

    #[tokio::test]
    async fn test_sever_existing_kills_only_old_cohort() {
        let backend = MemoryBackend::new();
        let old = backend.open("mem", &creds()).await.unwrap();
        assert!(old.probe_alive());

        backend.sever_existing();
        assert!(!old.probe_alive());

        let fresh = backend.open("mem", &creds()).await.unwrap();
        assert!(fresh.probe_alive());
    }

    #[tokio::test]
    async fn test_kill_and_close() {
        let backend = MemoryBackend::new();
        let mut conn = backend.open("mem", &creds()).await.unwrap();
        conn.kill();
        assert!(!conn.probe_alive());

        let mut other = backend.open("mem", &creds()).await.unwrap();
        other.poison_close();
        assert!(other.close().is_err());
        assert!(!other.probe_alive());
    }
}

//! Context-local connection cache.
//!
//! The pool can remember which connection a logical execution context (a
//! worker task, a request handler chain) currently holds, so nested code in
//! the same context can look it up without re-acquiring. Contexts are
//! identified explicitly by [`ContextId`]: tasks do not map to any implicit
//! storage key, so the caller chooses and threads the identity.
//!
//! [`Pool::current`](crate::Pool::current) is purely a lookup. The returned
//! [`CurrentConnection`] shares the pool's leased entry; it locks the
//! connection for each use and goes stale the moment the lease it mirrors is
//! released. Holding a lease's connection guard while locking the same
//! connection through a `CurrentConnection` deadlocks, as any re-entrant
//! lock would; nested code should take one or the other.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::MutexGuard;

use crate::factory::PoolableConnection;
use crate::pool::Slot;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical execution context.
///
/// An opaque key into the pool's context cache. Callers may derive it from
/// whatever is stable in their world (worker index, request id) or mint a
/// fresh one with [`ContextId::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Create a context identity from a caller-chosen key.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Mint a process-unique context identity.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw key.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for ContextId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A view of the connection currently leased to a context.
///
/// Obtained from [`Pool::current`](crate::Pool::current). Ownership stays
/// with the pool's leased entry; this handle only borrows the connection,
/// one locked access at a time, and refuses access once the lease has been
/// released.
pub struct CurrentConnection<C: PoolableConnection> {
    slot: Arc<Slot<C>>,
    generation: u64,
}

impl<C: PoolableConnection> CurrentConnection<C> {
    pub(crate) fn new(slot: Arc<Slot<C>>, generation: u64) -> Self {
        Self { slot, generation }
    }

    /// The pool-assigned id of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    /// Whether the lease this handle mirrors has already been released.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.slot.generation.load(Ordering::Acquire) != self.generation
    }

    /// Lock the connection for use.
    ///
    /// Returns `None` if the lease has been released, including a release
    /// that happened while this call was waiting for the lock.
    pub async fn connection(&self) -> Option<MutexGuard<'_, C>> {
        if self.is_stale() {
            return None;
        }
        let guard = self.slot.conn.lock().await;
        // Re-check: the lease may have been released while we waited.
        if self.is_stale() {
            return None;
        }
        Some(guard)
    }
}

impl<C: PoolableConnection> fmt::Debug for CurrentConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentConnection")
            .field("id", &self.id())
            .field("stale", &self.is_stale())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_next_is_unique() {
        let a = ContextId::next();
        let b = ContextId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_context_id_from_raw() {
        let id = ContextId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(ContextId::from(42), id);
    }
}

use crate::events::CloseReason;
use crate::pool::{Shared, Slot};
use crate::ConnectionManager;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

/// A checked-out connection.
///
/// Dereferences to the manager's connection type. Dropping it (or passing
/// it to [`ConnectionPool::release`](crate::ConnectionPool::release))
/// returns the connection to the pool.
pub struct PooledConnection<M: ConnectionManager> {
    shared: Arc<Shared<M>>,
    slot: Option<Slot<M::Connection>>,
    acquired_at: Instant,
    // Released after the connection is back in the idle list.
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> PooledConnection<M> {
    pub(crate) fn new(
        shared: Arc<Shared<M>>,
        slot: Slot<M::Connection>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            shared,
            slot: Some(slot),
            acquired_at: Instant::now(),
            _permit: permit,
        }
    }

    /// How long this connection has been checked out.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Closes the connection instead of returning it, for connections the
    /// caller knows are broken.
    pub async fn discard(mut self) {
        if let Some(slot) = self.slot.take() {
            self.shared.state.lock().release_active();
            self.shared.close(slot.conn, CloseReason::Discarded).await;
        }
    }

    pub(crate) fn mark_validated(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.validated_now();
        }
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.slot {
            Some(slot) => &slot.conn,
            None => unreachable!("connection accessed after release"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.slot {
            Some(slot) => &mut slot.conn,
            None => unreachable!("connection accessed after release"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let rejected = self.shared.state.lock().check_in(slot);
        if let Some(conn) = rejected {
            // The pool closed while this connection was out.
            drop(conn);
            self.shared.note_closed(CloseReason::PoolClosed);
        }
        self.shared.publish_gauges();
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("held_for", &self.held_for())
            .finish()
    }
}

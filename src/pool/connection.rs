//! Leased connection handle.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::pool::manager::PoolInner;
use crate::pool::{ConnectionId, Connector};

/// A connection checked out of a [`ConnectionPool`](crate::pool::ConnectionPool).
///
/// Hand it back with `release_connection`. Dropping it without releasing
/// returns it the same way; an unhealthy connection is then closed on a
/// spawned task.
pub struct PooledConnection<C: Connector> {
    pool: Arc<PoolInner<C>>,
    id: ConnectionId,
    target: String,
    conn: Arc<C::Connection>,
    healthy: bool,
    returned: bool,
}

impl<C: Connector> PooledConnection<C> {
    pub(crate) fn new(pool: Arc<PoolInner<C>>, id: ConnectionId, target: String, conn: Arc<C::Connection>) -> Self {
        Self {
            pool,
            id,
            target,
            conn,
            healthy: true,
            returned: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Flag the connection as broken so release destroys it.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// Hand ownership of the return to the pool; returns the connection to
    /// close, if the pool decided to destroy it.
    pub(crate) fn check_in(mut self) -> Option<(Arc<PoolInner<C>>, ConnectionId, Arc<C::Connection>)> {
        self.returned = true;
        let pool = Arc::clone(&self.pool);
        pool.check_in(self.id, self.healthy)
            .map(|conn| (pool, self.id, conn))
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("healthy", &self.healthy)
            .finish()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        tracing::trace!(connection_id = %self.id, "Connection dropped without release");
        if let Some(conn) = self.pool.check_in(self.id, self.healthy) {
            let pool = Arc::clone(&self.pool);
            let id = self.id;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { pool.close_connection(id, &conn).await });
                }
                Err(_) => tracing::warn!(connection_id = %id, "No runtime to close dropped connection"),
            }
        }
    }
}

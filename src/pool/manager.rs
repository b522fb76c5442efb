//! Connection pool lifecycle.
//!
//! # Responsibilities
//! - Warm up, lease and take back connections within the configured bounds
//! - Probe every tracked connection on a fixed interval
//! - Evict unhealthy, expired and surplus idle connections
//! - Close everything deterministically on shutdown

use futures_util::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::PoolConfig;
use crate::context::Context;
use crate::error::{ResilienceError, Result, TransportError};
use crate::lifecycle::BackgroundTask;
use crate::observability::{metrics, ResilienceEvent};
use crate::pool::{
    ConnectionId, ConnectionInfo, Connector, PoolPolicy, PoolStats, PooledConnection, RemovalReason,
};

struct Tracked<T> {
    conn: Arc<T>,
    info: ConnectionInfo,
}

struct PoolState<T> {
    connections: HashMap<ConnectionId, Tracked<T>>,
    /// Idle connection ids, least recently returned first.
    available: VecDeque<ConnectionId>,
    /// Connects in flight; they count against max_connections.
    pending: usize,
    initialized: bool,
    closed: bool,
}

impl<T> PoolState<T> {
    fn size(&self) -> usize {
        self.connections.len() + self.pending
    }

    /// Index into `available` of the connection to hand out next.
    fn pick(&self, policy: PoolPolicy, target: Option<&str>) -> Option<usize> {
        let mut candidates = self.available.iter().enumerate().filter_map(|(index, id)| {
            let tracked = self.connections.get(id)?;
            let usable = tracked.info.is_healthy && target.map_or(true, |t| tracked.info.target == t);
            usable.then_some((index, tracked.info.request_count))
        });
        match policy {
            PoolPolicy::RoundRobin => candidates.next().map(|(index, _)| index),
            PoolPolicy::LeastRequests => candidates.min_by_key(|(_, count)| *count).map(|(index, _)| index),
        }
    }

    fn track(&mut self, target: &str, conn: T, idle: bool) -> ConnectionId {
        let id = ConnectionId::new();
        let now = Instant::now();
        self.connections.insert(
            id,
            Tracked {
                conn: Arc::new(conn),
                info: ConnectionInfo {
                    id,
                    target: target.to_string(),
                    is_healthy: true,
                    is_idle: idle,
                    created_at: now,
                    last_used_at: now,
                    request_count: if idle { 0 } else { 1 },
                },
            },
        );
        if idle {
            self.available.push_back(id);
        }
        id
    }
}

/// Slots counted in `pending` until the connects they stand for settle.
struct Reservation<'a, C: Connector> {
    pool: &'a PoolInner<C>,
    slots: usize,
}

impl<C: Connector> Reservation<'_, C> {
    fn settle(&mut self, state: &mut PoolState<C::Connection>) {
        state.pending -= self.slots;
        self.slots = 0;
    }
}

impl<C: Connector> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.slots > 0 {
            let mut state = self.pool.lock();
            state.pending -= self.slots;
            drop(state);
            self.pool.notify.notify_waiters();
        }
    }
}

pub(crate) struct PoolInner<C: Connector> {
    config: PoolConfig,
    default_target: String,
    connector: C,
    state: Mutex<PoolState<C::Connection>>,
    /// Signalled whenever a connection or a slot frees up.
    notify: Notify,
    tasks: Mutex<Vec<BackgroundTask>>,
    ctx: Context,
}

impl<C: Connector> PoolInner<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lease(self: &Arc<Self>, state: &mut PoolState<C::Connection>, index: usize) -> Option<PooledConnection<C>> {
        let id = state.available.remove(index)?;
        let tracked = state.connections.get_mut(&id)?;
        tracked.info.is_idle = false;
        tracked.info.last_used_at = Instant::now();
        tracked.info.request_count += 1;
        Some(PooledConnection::new(
            Arc::clone(self),
            id,
            tracked.info.target.clone(),
            Arc::clone(&tracked.conn),
        ))
    }

    /// Take a leased connection back. Returns it if it must be closed.
    pub(crate) fn check_in(&self, id: ConnectionId, healthy: bool) -> Option<Arc<C::Connection>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let tracked = state.connections.get_mut(&id)?;
        if healthy && tracked.info.is_healthy {
            tracked.info.is_idle = true;
            tracked.info.last_used_at = Instant::now();
            state.available.push_back(id);
            drop(state);
            tracing::trace!(connection_id = %id, "Connection released");
            self.notify.notify_waiters();
            return None;
        }

        let tracked = state.connections.remove(&id)?;
        let remaining = state.connections.len();
        drop(state);
        tracing::debug!(connection_id = %id, addr = %tracked.info.target, "Unhealthy connection destroyed on release");
        metrics::record_pool_connections(remaining);
        self.ctx.emit(ResilienceEvent::ConnectionRemoved {
            id,
            target: tracked.info.target,
            reason: RemovalReason::Unhealthy,
        });
        self.notify.notify_waiters();
        Some(tracked.conn)
    }

    pub(crate) async fn close_connection(&self, id: ConnectionId, conn: &C::Connection) {
        if let Err(e) = self.connector.close(conn).await {
            tracing::warn!(connection_id = %id, error = %e, "Failed to close connection");
        }
    }

    async fn connect(&self, target: &str, deadline: Instant) -> Result<C::Connection> {
        let started = Instant::now();
        match timeout_at(deadline, self.connector.connect(target)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout {
                target: target.to_string(),
                timeout_ms: deadline.saturating_duration_since(started).as_millis() as u64,
            }
            .into()),
        }
    }

    /// Create idle connections toward the default target, in parallel.
    ///
    /// `wanted` is evaluated under the lock and clamped so the pool stays
    /// within max_connections.
    async fn fill(&self, wanted: impl FnOnce(&PoolState<C::Connection>) -> usize, limit: Duration) -> usize {
        let mut reservation = {
            let mut state = self.lock();
            if state.closed {
                return 0;
            }
            let slots = wanted(&state).min(self.config.max_connections.saturating_sub(state.size()));
            state.pending += slots;
            Reservation { pool: self, slots }
        };
        if reservation.slots == 0 {
            return 0;
        }

        let target = self.default_target.as_str();
        let deadline = Instant::now() + limit;
        let results = join_all((0..reservation.slots).map(|_| self.connect(target, deadline))).await;

        let (created, discarded, total) = {
            let mut created = Vec::new();
            let mut discarded = Vec::new();
            let mut state = self.lock();
            reservation.settle(&mut state);
            for result in results {
                match result {
                    Ok(conn) if !state.closed => created.push(state.track(target, conn, true)),
                    Ok(conn) => discarded.push(conn),
                    Err(e) => tracing::warn!(addr = %target, error = %e, "Failed to create pooled connection"),
                }
            }
            (created, discarded, state.connections.len())
        };

        for conn in &discarded {
            self.close_connection(ConnectionId::new(), conn).await;
        }
        for id in &created {
            tracing::debug!(connection_id = %id, addr = %target, "Connection created");
            self.ctx.emit(ResilienceEvent::ConnectionCreated {
                id: *id,
                target: target.to_string(),
            });
        }
        metrics::record_pool_connections(total);
        self.notify.notify_waiters();
        created.len()
    }

    async fn check_connections(&self) {
        let tracked: Vec<(ConnectionId, String, Arc<C::Connection>)> = self
            .lock()
            .connections
            .iter()
            .map(|(id, t)| (*id, t.info.target.clone(), Arc::clone(&t.conn)))
            .collect();
        if tracked.is_empty() {
            return;
        }

        let limit = self.config.health_check_timeout();
        let outcomes = join_all(tracked.into_iter().map(|(id, target, conn)| async move {
            let outcome = match timeout(limit, self.connector.ping(&conn)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("health check timed out after {}ms", limit.as_millis())),
            };
            (id, target, outcome)
        }))
        .await;

        let mut flipped = Vec::new();
        {
            let mut state = self.lock();
            for (id, target, outcome) in outcomes {
                let Some(tracked) = state.connections.get_mut(&id) else {
                    continue;
                };
                match outcome {
                    Ok(()) => tracked.info.is_healthy = true,
                    Err(error) => {
                        if tracked.info.is_healthy {
                            flipped.push((id, target, error));
                        }
                        tracked.info.is_healthy = false;
                    }
                }
            }
        }

        for (id, target, error) in flipped {
            tracing::warn!(connection_id = %id, addr = %target, error = %error, "Pooled connection unhealthy");
            self.ctx.emit(ResilienceEvent::ConnectionUnhealthy { id, target, error });
        }
    }

    async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let max_age = self.config.max_connection_age();
        let max_idle = self.config.max_connection_idle();
        let min = self.config.min_connections;

        let (evicted, remaining) = {
            let mut state = self.lock();
            if state.closed {
                return 0;
            }
            let mut size = state.connections.len();
            let mut doomed = Vec::new();
            for id in &state.available {
                let Some(tracked) = state.connections.get(id) else {
                    continue;
                };
                let info = &tracked.info;
                let reason = if !info.is_healthy {
                    Some(RemovalReason::Unhealthy)
                } else if now.duration_since(info.created_at) >= max_age {
                    Some(RemovalReason::Expired)
                } else if size > min && now.duration_since(info.last_used_at) >= max_idle {
                    Some(RemovalReason::Idle)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    size -= 1;
                    doomed.push((*id, reason));
                }
            }

            state.available.retain(|id| !doomed.iter().any(|(d, _)| d == id));
            let evicted: Vec<(RemovalReason, Tracked<C::Connection>)> = doomed
                .into_iter()
                .filter_map(|(id, reason)| state.connections.remove(&id).map(|t| (reason, t)))
                .collect();
            (evicted, state.connections.len())
        };

        if !evicted.is_empty() {
            join_all(evicted.iter().map(|(_, t)| self.close_connection(t.info.id, &t.conn))).await;
            for (reason, tracked) in &evicted {
                tracing::debug!(connection_id = %tracked.info.id, addr = %tracked.info.target, ?reason, "Connection evicted");
                self.ctx.emit(ResilienceEvent::ConnectionRemoved {
                    id: tracked.info.id,
                    target: tracked.info.target.clone(),
                    reason: *reason,
                });
            }
            tracing::info!(removed = evicted.len(), remaining, "Pool cleanup finished");
            self.ctx.emit(ResilienceEvent::ConnectionsCleaned {
                removed: evicted.len(),
                remaining,
            });
            metrics::record_pool_connections(remaining);
            self.notify.notify_waiters();
        }

        let replenished = self
            .fill(|state| min.saturating_sub(state.size()), self.config.connection_timeout())
            .await;
        if replenished > 0 {
            tracing::debug!(replenished, "Pool topped up to minimum");
        }
        evicted.len()
    }

    fn start_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() || self.lock().closed {
            return;
        }

        let weak = Arc::downgrade(self);
        tasks.push(BackgroundTask::spawn(
            "pool-health",
            self.config.health_check_interval(),
            false,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(pool) => {
                            pool.check_connections().await;
                            true
                        }
                        None => false,
                    }
                }
            },
        ));

        let weak = Arc::downgrade(self);
        tasks.push(BackgroundTask::spawn(
            "pool-cleanup",
            self.config.cleanup_interval(),
            false,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(pool) => {
                            pool.cleanup().await;
                            true
                        }
                        None => false,
                    }
                }
            },
        ));
    }
}

/// Bounded pool of reusable connections produced by a [`Connector`].
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Pool whose warmup and untargeted connections go to `default_target`.
    pub fn new(config: PoolConfig, default_target: impl Into<String>, connector: C, ctx: Context) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                default_target: default_target.into(),
                connector,
                state: Mutex::new(PoolState {
                    connections: HashMap::new(),
                    available: VecDeque::new(),
                    pending: 0,
                    initialized: false,
                    closed: false,
                }),
                notify: Notify::new(),
                tasks: Mutex::new(Vec::new()),
                ctx,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Warm up and start the background loops. Returns how many warmup
    /// connections were created; later calls create none.
    pub async fn initialize(&self) -> Result<usize> {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(ResilienceError::PoolClosed);
            }
            if state.initialized {
                return Ok(0);
            }
            state.initialized = true;
        }

        let warmup = self.inner.config.warmup_connections;
        let created = self
            .inner
            .fill(|_| warmup, self.inner.config.warmup_timeout())
            .await;
        if created < warmup {
            tracing::warn!(created, requested = warmup, "Pool warmup incomplete");
        }
        tracing::info!(
            connections = created,
            min = self.inner.config.min_connections,
            max = self.inner.config.max_connections,
            addr = %self.inner.default_target,
            "Connection pool initialized"
        );
        self.inner.ctx.emit(ResilienceEvent::PoolInitialized { connections: created });
        self.inner.start_tasks();
        Ok(created)
    }

    /// Lease a connection, preferably to `target`.
    ///
    /// An idle connection to `target` is taken first, otherwise whichever
    /// idle connection the policy picks. With nothing idle a new connection
    /// to `target` (or the default target) is opened if the pool has room.
    /// Waiting for room and connecting share one `connection_timeout`.
    pub async fn get_connection(&self, target: Option<&str>) -> Result<PooledConnection<C>> {
        let inner = &self.inner;
        let limit = inner.config.connection_timeout();
        let deadline = Instant::now() + limit;

        let (mut reservation, connect_to) = loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = inner.lock();
                if state.closed {
                    return Err(ResilienceError::PoolClosed);
                }
                let policy = inner.config.balancing_policy;
                let picked = state
                    .pick(policy, target)
                    .or_else(|| target.and_then(|_| state.pick(policy, None)));
                if let Some(index) = picked {
                    if let Some(lease) = inner.lease(&mut state, index) {
                        return Ok(lease);
                    }
                }
                if state.size() < inner.config.max_connections {
                    state.pending += 1;
                    let connect_to = target.unwrap_or(&inner.default_target).to_string();
                    break (Reservation { pool: &**inner, slots: 1 }, connect_to);
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(waited_ms = limit.as_millis() as u64, "Connection pool exhausted");
                return Err(ResilienceError::PoolExhausted { waited: limit });
            }
        };

        let conn = inner.connect(&connect_to, deadline).await?;
        let tracked = {
            let mut state = inner.lock();
            reservation.settle(&mut state);
            if state.closed {
                Err(conn)
            } else {
                let id = state.track(&connect_to, conn, false);
                let total = state.connections.len();
                Ok((id, total, state.connections.get(&id).map(|t| Arc::clone(&t.conn))))
            }
        };

        let (id, total, conn) = match tracked {
            Ok((id, total, Some(conn))) => (id, total, conn),
            Ok(_) => return Err(ResilienceError::PoolClosed),
            Err(conn) => {
                inner.close_connection(ConnectionId::new(), &conn).await;
                return Err(ResilienceError::PoolClosed);
            }
        };
        tracing::debug!(connection_id = %id, addr = %connect_to, "Connection created");
        metrics::record_pool_connections(total);
        inner.ctx.emit(ResilienceEvent::ConnectionCreated {
            id,
            target: connect_to.clone(),
        });
        Ok(PooledConnection::new(Arc::clone(inner), id, connect_to, conn))
    }

    /// Return a lease; unhealthy connections are closed instead of recycled.
    pub async fn release_connection(&self, conn: PooledConnection<C>) {
        if let Some((pool, id, conn)) = conn.check_in() {
            pool.close_connection(id, &conn).await;
        }
    }

    /// The idle connection the configured policy would hand out next.
    pub fn select_connection_by_policy(&self) -> Option<ConnectionInfo> {
        let state = self.inner.lock();
        let index = state.pick(self.inner.config.balancing_policy, None)?;
        let id = state.available.get(index)?;
        state.connections.get(id).map(|t| t.info.clone())
    }

    /// Probe every tracked connection once.
    pub async fn run_health_checks(&self) {
        self.inner.check_connections().await;
    }

    /// Run one eviction pass; returns how many connections were removed.
    pub async fn cleanup(&self) -> usize {
        self.inner.cleanup().await
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner.lock().connections.values().map(|t| t.info.clone()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        let unhealthy = state.connections.values().filter(|t| !t.info.is_healthy).count();
        PoolStats {
            total: state.connections.len(),
            available: state.available.len(),
            leased: state.connections.len() - state.available.len(),
            pending: state.pending,
            unhealthy,
            closed: state.closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stop the loops, close every tracked connection and refuse new leases.
    pub async fn close(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.stop().await;
        }

        let drained: Vec<Tracked<C::Connection>> = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.available.clear();
            state.connections.drain().map(|(_, t)| t).collect()
        };
        self.inner.notify.notify_waiters();

        join_all(drained.iter().map(|t| self.inner.close_connection(t.info.id, &t.conn))).await;
        for tracked in &drained {
            self.inner.ctx.emit(ResilienceEvent::ConnectionRemoved {
                id: tracked.info.id,
                target: tracked.info.target.clone(),
                reason: RemovalReason::Closed,
            });
        }
        metrics::record_pool_connections(0);
        tracing::info!(closed = drained.len(), "Connection pool closed");
        self.inner.ctx.emit(ResilienceEvent::PoolClosed);
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("default_target", &self.inner.default_target)
            .field("stats", &self.stats())
            .finish()
    }
}

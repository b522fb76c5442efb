//! Active health checking.
//!
//! # Responsibilities
//! - Keep a registry of targets and their latest reported result
//! - Periodically (or on demand) probe every target concurrently
//! - Damp raw results and publish status flips

use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;
use tokio::time::{self, Instant};

use crate::config::HealthCheckConfig;
use crate::context::Context;
use crate::error::{ProbeError, ResilienceError, Result};
use crate::health::{
    Damping, DampingState, HealthCheckResult, HealthCheckTarget, HealthListener, HealthProbe,
    HealthStatus,
};
use crate::lifecycle::BackgroundTask;
use crate::observability::{metrics, ResilienceEvent};

struct TargetEntry {
    target: HealthCheckTarget,
    result: HealthCheckResult,
    counters: DampingState,
}

/// Probes registered targets and maintains a damped health signal for each.
pub struct HealthChecker {
    config: HealthCheckConfig,
    probe: Arc<dyn HealthProbe>,
    damping: Option<Damping>,
    targets: DashMap<String, TargetEntry>,
    listeners: RwLock<Vec<Arc<dyn HealthListener>>>,
    task: Mutex<Option<BackgroundTask>>,
    ctx: Context,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, probe: Arc<dyn HealthProbe>, ctx: Context) -> Self {
        let damping = Damping::from_config(&config);
        Self {
            config,
            probe,
            damping,
            targets: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            task: Mutex::new(None),
            ctx,
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Register an observer for reported status flips.
    pub fn add_listener(&self, listener: Arc<dyn HealthListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Register (or re-register) a target, seeded as unknown.
    pub fn add_target(&self, target: HealthCheckTarget) {
        let id = target.id.clone();
        tracing::debug!(id = %id, endpoint = %target.endpoint(), "Health check target added");
        self.targets.insert(
            id.clone(),
            TargetEntry {
                target,
                result: HealthCheckResult::unknown(),
                counters: DampingState::default(),
            },
        );
        self.ctx.emit(ResilienceEvent::TargetAdded { id });
    }

    pub fn remove_target(&self, id: &str) -> bool {
        let removed = self.targets.remove(id).is_some();
        if removed {
            tracing::debug!(id = %id, "Health check target removed");
            self.ctx.emit(ResilienceEvent::TargetRemoved { id: id.to_string() });
        }
        removed
    }

    pub fn targets(&self) -> Vec<HealthCheckTarget> {
        self.targets.iter().map(|e| e.target.clone()).collect()
    }

    pub fn status(&self, id: &str) -> Option<HealthStatus> {
        self.targets.get(id).map(|e| e.result.status)
    }

    pub fn result(&self, id: &str) -> Option<HealthCheckResult> {
        self.targets.get(id).map(|e| e.result.clone())
    }

    pub fn results(&self) -> Vec<(String, HealthCheckResult)> {
        self.targets
            .iter()
            .map(|e| (e.key().clone(), e.result.clone()))
            .collect()
    }

    pub fn healthy_targets(&self) -> Vec<HealthCheckTarget> {
        self.targets
            .iter()
            .filter(|e| e.result.status.is_healthy())
            .map(|e| e.target.clone())
            .collect()
    }

    /// Start the self-rescheduling check loop. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            damping = self.damping.is_some(),
            "Health checker starting"
        );

        let weak = Arc::downgrade(self);
        *task = Some(BackgroundTask::spawn(
            "health-checker",
            self.config.interval(),
            true,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(checker) => {
                            checker.check_all_targets().await;
                            true
                        }
                        None => false,
                    }
                }
            },
        ));
    }

    /// Stop the check loop; no cycle runs after this returns.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.stop().await;
            tracing::info!("Health checker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Probe one target right now.
    pub async fn check_target(&self, id: &str) -> Result<HealthCheckResult> {
        let target = self
            .targets
            .get(id)
            .map(|e| e.target.clone())
            .ok_or_else(|| ResilienceError::TargetNotFound(id.to_string()))?;
        Ok(self.perform_health_check(&target).await)
    }

    /// Probe every target concurrently and wait for all of them.
    pub async fn check_all_targets(&self) -> Vec<HealthCheckResult> {
        let targets = self.targets();
        let started = Instant::now();
        let results = join_all(targets.iter().map(|t| self.perform_health_check(t))).await;
        tracing::debug!(
            targets = results.len(),
            healthy = results.iter().filter(|r| r.status.is_healthy()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Health check cycle completed"
        );
        results
    }

    /// Run one probe, damp it, store it and publish the outcome.
    pub async fn perform_health_check(&self, target: &HealthCheckTarget) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = time::timeout(
            self.config.timeout(),
            AssertUnwindSafe(self.probe.probe(target)).catch_unwind(),
        )
        .await;
        let response_time = started.elapsed();

        let raw: std::result::Result<(), ProbeError> = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProbeError::Failed("health probe panicked".to_string())),
            Err(_) => Err(ProbeError::Timeout(self.config.timeout_ms)),
        };
        let raw_status = if raw.is_ok() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        let (previous, result) = {
            let Some(mut entry) = self.targets.get_mut(&target.id) else {
                // Removed while the probe was in flight; nothing to update.
                return Self::build_result(raw_status, response_time, raw.err(), DampingState::default(), raw_status);
            };
            entry.counters.observe(raw.is_ok());
            let previous = entry.result.status;
            let status = match &self.damping {
                Some(damping) => damping.filter(previous, raw_status, &entry.counters),
                None => raw_status,
            };
            let result = Self::build_result(status, response_time, raw.err(), entry.counters, raw_status);
            entry.result = result.clone();
            (previous, result)
        };

        if let Some(error) = &result.error {
            tracing::debug!(id = %target.id, endpoint = %target.endpoint(), error = %error, "Health probe failed");
        }

        if previous != result.status {
            self.publish_change(&target.id, previous, result.status);
        }
        self.ctx.emit(ResilienceEvent::CheckCompleted {
            id: target.id.clone(),
            result: result.clone(),
        });
        result
    }

    fn build_result(
        status: HealthStatus,
        response_time: std::time::Duration,
        error: Option<ProbeError>,
        counters: DampingState,
        raw_status: HealthStatus,
    ) -> HealthCheckResult {
        let mut metadata = Map::new();
        metadata.insert("consecutive_failures".into(), Value::from(counters.consecutive_failures));
        metadata.insert("consecutive_successes".into(), Value::from(counters.consecutive_successes));
        metadata.insert("raw_status".into(), Value::from(raw_status.as_str()));
        HealthCheckResult {
            status,
            response_time,
            error: error.map(|e| e.to_string()),
            timestamp: SystemTime::now(),
            metadata,
        }
    }

    fn publish_change(&self, id: &str, previous: HealthStatus, current: HealthStatus) {
        match current {
            HealthStatus::Unhealthy => {
                tracing::warn!(id = %id, previous = %previous, "Target marked unhealthy")
            }
            _ => tracing::info!(id = %id, previous = %previous, current = %current, "Target health changed"),
        }
        metrics::record_instance_health(id, current.is_healthy());

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_health_changed(id, previous, current);
        }

        self.ctx.emit(ResilienceEvent::HealthChanged {
            id: id.to_string(),
            previous,
            current,
        });
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.config)
            .field("damping", &self.damping)
            .field("targets", &self.targets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FnProbe;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Probe whose outcome per target id is flipped from the test body.
    #[derive(Clone, Default)]
    struct Switchboard {
        down: Arc<Mutex<HashMap<String, bool>>>,
    }

    impl Switchboard {
        fn set_down(&self, id: &str, down: bool) {
            self.down.lock().unwrap().insert(id.to_string(), down);
        }

        fn probe(&self) -> Arc<dyn HealthProbe> {
            let down = self.down.clone();
            Arc::new(FnProbe::new(move |t: &HealthCheckTarget| {
                let is_down = down.lock().unwrap().get(&t.id).copied().unwrap_or(false);
                async move {
                    if is_down {
                        Err(ProbeError::Failed("connection refused".into()))
                    } else {
                        Ok(())
                    }
                }
            }))
        }
    }

    fn config(unhealthy: u32, healthy: u32) -> HealthCheckConfig {
        HealthCheckConfig {
            interval_ms: 100,
            timeout_ms: 50,
            unhealthy_threshold: unhealthy,
            healthy_threshold: healthy,
            damping: true,
        }
    }

    #[tokio::test]
    async fn added_target_is_unknown() {
        let ctx = Context::new();
        let mut rx = ctx.subscribe();
        let checker = HealthChecker::new(config(3, 2), Switchboard::default().probe(), ctx);

        checker.add_target(HealthCheckTarget::new("a", "127.0.0.1", 1));
        assert_eq!(checker.status("a"), Some(HealthStatus::Unknown));
        assert!(matches!(rx.recv().await.unwrap(), ResilienceEvent::TargetAdded { id } if id == "a"));
    }

    #[tokio::test]
    async fn check_unknown_target_fails() {
        let checker = HealthChecker::new(config(3, 2), Switchboard::default().probe(), Context::new());
        let err = checker.check_target("missing").await.unwrap_err();
        assert!(matches!(err, ResilienceError::TargetNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn damping_requires_consecutive_failures() {
        let board = Switchboard::default();
        let checker = HealthChecker::new(config(3, 2), board.probe(), Context::new());
        checker.add_target(HealthCheckTarget::new("a", "127.0.0.1", 1));

        let r = checker.check_target("a").await.unwrap();
        assert_eq!(r.status, HealthStatus::Healthy);

        board.set_down("a", true);
        for expected_failures in 1..=2u64 {
            let r = checker.check_target("a").await.unwrap();
            assert_eq!(r.status, HealthStatus::Healthy);
            assert_eq!(r.consecutive_failures(), Some(expected_failures));
            assert!(r.error.is_some());
        }
        let r = checker.check_target("a").await.unwrap();
        assert_eq!(r.status, HealthStatus::Unhealthy);

        board.set_down("a", false);
        let r = checker.check_target("a").await.unwrap();
        assert_eq!(r.status, HealthStatus::Unhealthy, "one success must not flip back");
        assert_eq!(r.consecutive_successes(), Some(1));

        let r = checker.check_target("a").await.unwrap();
        assert_eq!(r.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn change_event_only_on_flip() {
        let ctx = Context::new();
        let board = Switchboard::default();
        let checker = HealthChecker::new(
            HealthCheckConfig {
                damping: false,
                ..config(1, 1)
            },
            board.probe(),
            ctx.clone(),
        );
        checker.add_target(HealthCheckTarget::new("a", "127.0.0.1", 1));
        let mut rx = ctx.subscribe();

        checker.check_target("a").await.unwrap();
        checker.check_target("a").await.unwrap();

        let mut changes = 0;
        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                ResilienceEvent::HealthChanged { previous, current, .. } => {
                    assert_eq!(previous, HealthStatus::Unknown);
                    assert_eq!(current, HealthStatus::Healthy);
                    changes += 1;
                }
                ResilienceEvent::CheckCompleted { .. } => completed += 1,
                _ => {}
            }
        }
        assert_eq!(changes, 1);
        assert_eq!(completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out_without_blocking_others() {
        let probe = Arc::new(FnProbe::new(|t: &HealthCheckTarget| {
            let slow = t.id == "slow";
            async move {
                if slow {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(())
            }
        }));
        let checker = HealthChecker::new(config(1, 1), probe, Context::new());
        checker.add_target(HealthCheckTarget::new("slow", "127.0.0.1", 1));
        checker.add_target(HealthCheckTarget::new("fast", "127.0.0.1", 2));

        let results = checker.check_all_targets().await;
        assert_eq!(results.len(), 2);
        assert_eq!(checker.status("fast"), Some(HealthStatus::Healthy));
        assert_eq!(checker.status("slow"), Some(HealthStatus::Unhealthy));
        let slow = checker.result("slow").unwrap();
        assert_eq!(slow.error.as_deref(), Some("health check timed out after 50ms"));
    }

    #[tokio::test]
    async fn panicking_probe_is_isolated() {
        let probe = Arc::new(FnProbe::new(|t: &HealthCheckTarget| {
            let boom = t.id == "boom";
            async move {
                if boom {
                    panic!("probe bug");
                }
                Ok(())
            }
        }));
        let checker = HealthChecker::new(config(1, 1), probe, Context::new());
        checker.add_target(HealthCheckTarget::new("boom", "127.0.0.1", 1));
        checker.add_target(HealthCheckTarget::new("ok", "127.0.0.1", 2));

        checker.check_all_targets().await;
        assert_eq!(checker.status("ok"), Some(HealthStatus::Healthy));
        assert_eq!(checker.status("boom"), Some(HealthStatus::Unhealthy));
    }

    #[tokio::test]
    async fn listeners_see_flips() {
        struct Flag(AtomicBool);
        impl HealthListener for Flag {
            fn on_health_changed(&self, _id: &str, _prev: HealthStatus, current: HealthStatus) {
                self.0.store(current.is_healthy(), Ordering::SeqCst);
            }
        }

        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let checker = HealthChecker::new(config(1, 1), Switchboard::default().probe(), Context::new());
        checker.add_listener(flag.clone());
        checker.add_target(HealthCheckTarget::new("a", "127.0.0.1", 1));
        checker.check_target("a").await.unwrap();
        assert!(flag.0.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_until_stopped() {
        let ctx = Context::new();
        let checker = Arc::new(HealthChecker::new(config(1, 1), Switchboard::default().probe(), ctx.clone()));
        checker.add_target(HealthCheckTarget::new("a", "127.0.0.1", 1));
        let mut rx = ctx.subscribe();

        checker.start();
        checker.start();
        assert!(checker.is_running());
        tokio::time::sleep(Duration::from_millis(250)).await;
        checker.stop().await;
        assert!(!checker.is_running());

        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ResilienceEvent::CheckCompleted { .. }) {
                completed += 1;
            }
        }
        // Cycles at 0, 100 and 200ms.
        assert_eq!(completed, 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err(), "no events after stop");
    }

    #[tokio::test]
    async fn removed_target_is_forgotten() {
        let checker = HealthChecker::new(config(1, 1), Switchboard::default().probe(), Context::new());
        checker.add_target(HealthCheckTarget::new("a", "127.0.0.1", 1));
        assert!(checker.remove_target("a"));
        assert!(!checker.remove_target("a"));
        assert!(checker.status("a").is_none());
        assert!(checker.check_all_targets().await.is_empty());
    }
}

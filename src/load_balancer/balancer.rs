//! Instance registry and selection.
//!
//! # Responsibilities
//! - Keep the set of registered instances and their circuit breakers
//! - Apply the active strategy to pick a target
//! - Feed request outcomes back to the strategy and breakers
//! - Mirror health checker verdicts onto the instances

use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{InstanceConfig, LoadBalancerConfig};
use crate::context::Context;
use crate::discovery::ServiceDiscovery;
use crate::error::{ResilienceError, Result};
use crate::health::{HealthCheckTarget, HealthChecker, HealthListener, HealthProbe, HealthStatus};
use crate::load_balancer::{InstanceSnapshot, Policy, ServiceInstance, Strategy};
use crate::observability::{metrics, ResilienceEvent};
use crate::resilience::CircuitBreaker;

#[derive(Debug)]
struct Registered {
    instance: Arc<ServiceInstance>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl Registered {
    fn permits_execution(&self) -> bool {
        self.breaker.as_ref().map_or(true, |b| b.permits_execution())
    }

    fn acquire(&self) -> bool {
        self.breaker.as_ref().map_or(true, |b| b.can_execute())
    }

    fn matches(&self, key: &str) -> bool {
        self.instance.id == key || self.instance.target() == key
    }
}

/// Copy-on-write instance list shared with the health checker.
#[derive(Debug)]
struct Registry {
    entries: ArcSwap<Vec<Arc<Registered>>>,
}

impl Registry {
    fn find(&self, key: &str) -> Option<Arc<Registered>> {
        self.entries.load().iter().find(|e| e.matches(key)).cloned()
    }
}

impl HealthListener for Registry {
    fn on_health_changed(&self, id: &str, _previous: HealthStatus, current: HealthStatus) {
        if let Some(entry) = self.entries.load().iter().find(|e| e.instance.id == id) {
            entry.instance.set_health(current);
            metrics::record_instance_health(entry.instance.target(), current.is_healthy());
        }
    }
}

/// Picks a target among registered instances.
#[derive(Debug)]
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    strategy: ArcSwap<Box<dyn Strategy>>,
    registry: Arc<Registry>,
    health_checker: Option<Arc<HealthChecker>>,
    ctx: Context,
}

impl LoadBalancer {
    /// Balancer without a health checker; instances start healthy.
    pub fn new(config: LoadBalancerConfig, ctx: Context) -> Self {
        tracing::debug!(policy = %config.policy, "Creating load balancer");
        Self {
            strategy: ArcSwap::from_pointee(config.policy.strategy()),
            registry: Arc::new(Registry {
                entries: ArcSwap::from_pointee(Vec::new()),
            }),
            health_checker: None,
            config,
            ctx,
        }
    }

    /// Balancer whose instance health follows `checker`; instances start unknown.
    pub fn with_health_checker(config: LoadBalancerConfig, checker: Arc<HealthChecker>, ctx: Context) -> Self {
        let mut balancer = Self::new(config, ctx);
        checker.add_listener(balancer.registry.clone());
        balancer.health_checker = Some(checker);
        balancer
    }

    /// Build a health checker from `config.health_check` when present.
    pub fn from_config(config: LoadBalancerConfig, probe: Arc<dyn HealthProbe>, ctx: Context) -> Self {
        match config.health_check.clone() {
            Some(health) => {
                let checker = Arc::new(HealthChecker::new(health, probe, ctx.clone()));
                Self::with_health_checker(config, checker, ctx)
            }
            None => Self::new(config, ctx),
        }
    }

    pub fn policy(&self) -> Policy {
        self.strategy.load().policy()
    }

    pub fn health_checker(&self) -> Option<&Arc<HealthChecker>> {
        self.health_checker.as_ref()
    }

    /// Start health checking, if a checker is attached.
    pub fn start(&self) {
        if let Some(checker) = &self.health_checker {
            checker.start();
        }
    }

    pub async fn stop(&self) {
        if let Some(checker) = &self.health_checker {
            checker.stop().await;
        }
    }

    /// Register an instance, replacing any previous one with the same id.
    pub fn add_instance(&self, instance: ServiceInstance) -> Arc<ServiceInstance> {
        instance.set_health(if self.health_checker.is_some() {
            HealthStatus::Unknown
        } else {
            HealthStatus::Healthy
        });

        let breaker = self
            .config
            .circuit_breaker
            .as_ref()
            .filter(|c| c.enabled)
            .map(|c| Arc::new(CircuitBreaker::new(instance.target(), c.clone(), self.ctx.clone())));
        let entry = Arc::new(Registered {
            instance: Arc::new(instance),
            breaker,
        });
        let instance = entry.instance.clone();

        self.registry.entries.rcu(|current| {
            let mut next: Vec<Arc<Registered>> = current
                .iter()
                .filter(|e| e.instance.id != instance.id)
                .cloned()
                .collect();
            next.push(entry.clone());
            next
        });

        if let Some(checker) = &self.health_checker {
            checker.add_target(HealthCheckTarget::new(
                instance.id.clone(),
                instance.address.clone(),
                instance.port,
            ));
        }
        metrics::record_instance_health(instance.target(), instance.is_healthy());

        tracing::info!(id = %instance.id, addr = %instance.target(), weight = ?instance.weight, "Instance added");
        self.ctx.emit(ResilienceEvent::InstanceAdded {
            id: instance.id.clone(),
            target: instance.target().to_string(),
        });
        instance
    }

    pub fn remove_instance(&self, id: &str) -> bool {
        let mut removed = None;
        self.registry.entries.rcu(|current| {
            removed = current.iter().find(|e| e.instance.id == id).cloned();
            current
                .iter()
                .filter(|e| e.instance.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });

        let Some(entry) = removed else {
            return false;
        };
        if let Some(checker) = &self.health_checker {
            checker.remove_target(id);
        }
        tracing::info!(id = %id, addr = %entry.instance.target(), "Instance removed");
        self.ctx.emit(ResilienceEvent::InstanceRemoved {
            id: id.to_string(),
            target: entry.instance.target().to_string(),
        });
        true
    }

    /// Reconcile the registry with a discovered instance list.
    ///
    /// Unknown ids are added, missing ids removed, and ids whose endpoint or
    /// weight moved are re-registered. Unchanged instances keep their
    /// statistics and breaker state.
    pub fn sync_instances(&self, discovered: &[InstanceConfig]) {
        let wanted: HashSet<String> = discovered.iter().map(InstanceConfig::resolved_id).collect();
        let present: HashMap<String, (String, Option<u32>)> = self
            .registry
            .entries
            .load()
            .iter()
            .map(|e| (e.instance.id.clone(), (e.instance.target().to_string(), e.instance.weight)))
            .collect();

        for stale in present.keys().filter(|id| !wanted.contains(*id)) {
            self.remove_instance(stale);
        }
        for config in discovered {
            let changed = match present.get(&config.resolved_id()) {
                None => true,
                Some((target, weight)) => *target != config.target() || *weight != config.weight,
            };
            if changed {
                self.add_instance(ServiceInstance::from(config));
            }
        }
    }

    /// Pull `service` from discovery and reconcile; returns the instance count.
    pub async fn refresh(&self, discovery: &dyn ServiceDiscovery, service: &str) -> Result<usize> {
        let discovered = discovery.discover(service).await?;
        self.sync_instances(&discovered);
        tracing::debug!(service, count = discovered.len(), "Instances refreshed from discovery");
        Ok(discovered.len())
    }

    pub fn instances(&self) -> Vec<Arc<ServiceInstance>> {
        self.registry.entries.load().iter().map(|e| e.instance.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        self.registry.entries.load().iter().map(|e| e.instance.snapshot()).collect()
    }

    /// Look up by id or `address:port`.
    pub fn instance(&self, key: &str) -> Option<Arc<ServiceInstance>> {
        self.registry.find(key).map(|e| e.instance.clone())
    }

    /// Breaker guarding the instance with this id or `address:port`.
    pub fn circuit_breaker(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.registry.find(key).and_then(|e| e.breaker.clone())
    }

    /// Override an instance's health, bypassing the checker.
    pub fn set_instance_health(&self, id: &str, status: HealthStatus) -> Result<()> {
        let entry = self
            .registry
            .find(id)
            .ok_or_else(|| ResilienceError::InstanceNotFound(id.to_string()))?;
        let previous = entry.instance.set_health(status);
        if previous != status {
            tracing::info!(id = %entry.instance.id, %previous, current = %status, "Instance health set");
            metrics::record_instance_health(entry.instance.target(), status.is_healthy());
        }
        Ok(())
    }

    /// Swap the selection strategy; in-flight selections finish on the old one.
    pub fn change_strategy(&self, policy: Policy) {
        let previous = self.strategy.load().policy();
        self.strategy.store(Arc::new(policy.strategy()));
        tracing::info!(%previous, current = %policy, "Load balancing strategy changed");
    }

    /// Pick a target (`address:port`) among healthy, non-tripped instances,
    /// optionally limited to an allow-list of targets.
    pub fn select_instance(&self, available_targets: Option<&[String]>) -> Option<String> {
        self.select(available_targets).map(|i| i.target().to_string())
    }

    pub fn select(&self, available_targets: Option<&[String]>) -> Option<Arc<ServiceInstance>> {
        let entries = self.registry.entries.load();
        let mut candidates: Vec<&Arc<Registered>> = entries
            .iter()
            .filter(|e| available_targets.map_or(true, |allowed| allowed.iter().any(|t| t == e.instance.target())))
            .filter(|e| e.permits_execution())
            .collect();
        let strategy = self.strategy.load();
        let policy = strategy.policy();

        loop {
            let instances: Vec<Arc<ServiceInstance>> = candidates.iter().map(|e| e.instance.clone()).collect();
            let Some(chosen) = strategy.select_instance(&instances) else {
                tracing::debug!(candidates = entries.len(), %policy, "No instance available");
                metrics::record_selection(policy.as_str(), false);
                self.ctx.emit(ResilienceEvent::NoneAvailable {
                    candidates: entries.len(),
                });
                return None;
            };

            let Some(position) = candidates.iter().position(|e| Arc::ptr_eq(&e.instance, &chosen)) else {
                return None;
            };
            if candidates[position].acquire() {
                tracing::trace!(id = %chosen.id, addr = %chosen.target(), %policy, "Instance selected");
                metrics::record_selection(policy.as_str(), true);
                self.ctx.emit(ResilienceEvent::InstanceSelected {
                    id: chosen.id.clone(),
                    target: chosen.target().to_string(),
                    policy,
                });
                return Some(chosen);
            }
            // Lost the half-open trial to a concurrent caller.
            candidates.remove(position);
        }
    }

    /// Report the outcome of a request sent to `target` (id or `address:port`).
    pub fn record_request_result(&self, target: &str, response_time: Duration, is_error: bool) -> Result<()> {
        let entry = self
            .registry
            .find(target)
            .ok_or_else(|| ResilienceError::InstanceNotFound(target.to_string()))?;

        self.strategy.load().update_stats(&entry.instance, response_time, is_error);
        if let Some(breaker) = &entry.breaker {
            breaker.record_result(!is_error);
        }
        metrics::record_request_result(entry.instance.target(), is_error);
        tracing::trace!(
            addr = %entry.instance.target(),
            response_time_ms = response_time.as_millis() as u64,
            is_error,
            "Request result recorded"
        );
        Ok(())
    }
}

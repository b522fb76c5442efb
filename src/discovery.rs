//! Service discovery.
//!
//! A [`ServiceDiscovery`] maps a logical service name to its current
//! instances; [`LoadBalancer::refresh`](crate::load_balancer::LoadBalancer::refresh)
//! reconciles a balancer against it.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::config::{InstanceConfig, ServiceConfig};
use crate::error::{ResilienceError, Result};

pub trait ServiceDiscovery: Send + Sync {
    fn discover<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<Vec<InstanceConfig>>>;
}

/// In-memory discovery, seeded from configuration and editable at runtime.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: RwLock<HashMap<String, Vec<InstanceConfig>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let discovery = Self::new();
        for service in services {
            discovery.set_instances(&service.name, service.instances.clone());
        }
        discovery
    }

    /// Replace the instance list of `service`.
    pub fn set_instances(&self, service: &str, instances: Vec<InstanceConfig>) {
        tracing::debug!(service, count = instances.len(), "Static instances set");
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.to_string(), instances);
    }

    pub fn remove_service(&self, service: &str) -> bool {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service)
            .is_some()
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn discover<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<Vec<InstanceConfig>>> {
        let found = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .cloned()
            .ok_or_else(|| ResilienceError::ServiceNotFound(service.to_string()));
        async move { found }.boxed()
    }
}

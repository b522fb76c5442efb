//! Shared utilities for integration tests.
#![allow(dead_code)]

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use rpc_resilience::config::{CircuitBreakerConfig, HealthCheckConfig, LoadBalancerConfig, PoolConfig};
use rpc_resilience::health::{HealthCheckTarget, HealthProbe};
use rpc_resilience::transport::Transport;
use rpc_resilience::{Connector, Policy, ProbeError, TransportError};

/// Start a TCP backend that accepts and immediately drops connections.
pub async fn start_tcp_backend() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    (addr, handle)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn breaker(failure_threshold: u32, recovery_timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        enabled: true,
        failure_threshold,
        recovery_timeout_ms,
        monitoring_period_ms: 60_000,
    }
}

pub fn balancer_config(policy: Policy, breaker: Option<CircuitBreakerConfig>) -> LoadBalancerConfig {
    LoadBalancerConfig {
        policy,
        health_check: None,
        circuit_breaker: breaker,
    }
}

pub fn health_config(interval_ms: u64) -> HealthCheckConfig {
    HealthCheckConfig {
        interval_ms,
        timeout_ms: 100,
        ..HealthCheckConfig::default()
    }
}

pub fn pool_config(min: usize, max: usize, warmup: usize) -> PoolConfig {
    PoolConfig {
        min_connections: min,
        max_connections: max,
        warmup_connections: warmup,
        connection_timeout_ms: 500,
        ..PoolConfig::default()
    }
}

/// Probe whose verdict per target id can be flipped at runtime.
#[derive(Default)]
pub struct ScriptedProbe {
    down: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, id: &str) {
        self.down.lock().unwrap().insert(id.to_string());
    }

    pub fn recover(&self, id: &str) {
        self.down.lock().unwrap().remove(id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthProbe for ScriptedProbe {
    fn probe<'a>(&'a self, target: &'a HealthCheckTarget) -> BoxFuture<'a, Result<(), ProbeError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.down.lock().unwrap().contains(&target.id);
        async move {
            if failing {
                Err(ProbeError::Failed(format!("{} scripted down", target.id)))
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

/// Connector handing out numbered fake connections.
#[derive(Debug, Default)]
pub struct MockConnector {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub live: AtomicUsize,
    pub peak_live: AtomicUsize,
    pub ping_fails: AtomicBool,
    pub close_fails: AtomicBool,
    pub connect_delay: Option<Duration>,
}

#[derive(Debug)]
pub struct MockConnection {
    pub serial: usize,
    pub target: String,
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<MockConnection, TransportError>> {
        async move {
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            let serial = self.opened.fetch_add(1, Ordering::SeqCst);
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_live.fetch_max(live, Ordering::SeqCst);
            Ok(MockConnection {
                serial,
                target: target.to_string(),
            })
        }
        .boxed()
    }

    fn ping<'a>(&'a self, conn: &'a MockConnection) -> BoxFuture<'a, Result<(), TransportError>> {
        let fails = self.ping_fails.load(Ordering::SeqCst);
        async move {
            if fails {
                Err(TransportError::Call {
                    target: conn.target.clone(),
                    reason: "ping failed".into(),
                })
            } else {
                Ok(())
            }
        }
        .boxed()
    }

    fn close<'a>(&'a self, conn: &'a MockConnection) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            self.closed.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_sub(1, Ordering::SeqCst);
            if self.close_fails.load(Ordering::SeqCst) {
                return Err(TransportError::Call {
                    target: conn.target.clone(),
                    reason: "close failed".into(),
                });
            }
            Ok(())
        }
        .boxed()
    }
}

/// Transport that fails calls to targets marked down and records every call.
#[derive(Default)]
pub struct MockTransport {
    down: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn fail(&self, target: &str) {
        self.down.lock().unwrap().insert(target.to_string());
    }

    pub fn recover(&self, target: &str) {
        self.down.lock().unwrap().remove(target);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn execute<'a>(
        &'a self,
        target: &'a str,
        payload: &'a Value,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Value, TransportError>> {
        self.calls.lock().unwrap().push(target.to_string());
        let failing = self.down.lock().unwrap().contains(target);
        async move {
            if failing {
                Err(TransportError::Call {
                    target: target.to_string(),
                    reason: "injected failure".into(),
                })
            } else {
                Ok(json!({ "target": target, "echo": payload }))
            }
        }
        .boxed()
    }
}

//! Pluggable health probes.
//!
//! A probe only answers "did this one attempt succeed". Timing, timeouts,
//! damping and notifications belong to the checker.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::ProbeError;
use crate::health::HealthCheckTarget;

/// A single health-probe implementation.
pub trait HealthProbe: Send + Sync + 'static {
    fn probe<'a>(&'a self, target: &'a HealthCheckTarget) -> BoxFuture<'a, Result<(), ProbeError>>;
}

/// Healthy when a TCP connection can be established.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectProbe;

impl HealthProbe for TcpConnectProbe {
    fn probe<'a>(&'a self, target: &'a HealthCheckTarget) -> BoxFuture<'a, Result<(), ProbeError>> {
        Box::pin(async move {
            TcpStream::connect((target.address.as_str(), target.port))
                .await
                .map(drop)
                .map_err(|e| ProbeError::Failed(format!("connect failed: {}", e)))
        })
    }
}

/// Healthy when `GET http://address:port{path}` answers 2xx.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("rpc-resilience-health-check")
            .build()
            .map_err(|e| ProbeError::Failed(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            path: path.into(),
        })
    }

    fn url(&self, target: &HealthCheckTarget) -> String {
        if self.path.starts_with('/') {
            format!("http://{}:{}{}", target.address, target.port, self.path)
        } else {
            format!("http://{}:{}/{}", target.address, target.port, self.path)
        }
    }
}

impl HealthProbe for HttpProbe {
    fn probe<'a>(&'a self, target: &'a HealthCheckTarget) -> BoxFuture<'a, Result<(), ProbeError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url(target))
                .send()
                .await
                .map_err(|e| ProbeError::Failed(format!("request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(ProbeError::Failed(format!("non-success status {}", status)))
            }
        })
    }
}

/// Probe backed by a closure, for protocol-specific checks.
pub struct FnProbe<F> {
    f: F,
}

impl<F> FnProbe<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn(&HealthCheckTarget) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    fn probe<'a>(&'a self, target: &'a HealthCheckTarget) -> BoxFuture<'a, Result<(), ProbeError>> {
        Box::pin((self.f)(target))
    }
}

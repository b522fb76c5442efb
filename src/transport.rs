//! Transport collaborator.
//!
//! The resilience layer never speaks a wire protocol itself; it hands a
//! selected `address:port` and a payload to a [`Transport`].

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use std::time::Duration;

use crate::error::TransportError;

/// Issues one call to a concrete target.
pub trait Transport: Send + Sync {
    fn execute<'a>(
        &'a self,
        target: &'a str,
        payload: &'a Value,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Value, TransportError>>;
}

/// JSON-over-HTTP transport: POSTs the payload to `http://{target}{path}`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    path: String,
}

impl HttpTransport {
    pub fn new(path: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rpc-resilience/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connect {
                target: "-".into(),
                reason: e.to_string(),
            })?;
        let path = path.into();
        let path = if path.starts_with('/') { path } else { format!("/{}", path) };
        Ok(Self { client, path })
    }

    pub fn url(&self, target: &str) -> String {
        format!("http://{}{}", target, self.path)
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(
        &'a self,
        target: &'a str,
        payload: &'a Value,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Value, TransportError>> {
        async move {
            let call_error = |e: reqwest::Error| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        target: target.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else if e.is_connect() {
                    TransportError::Connect {
                        target: target.to_string(),
                        reason: e.to_string(),
                    }
                } else {
                    TransportError::Call {
                        target: target.to_string(),
                        reason: e.to_string(),
                    }
                }
            };

            let response = self
                .client
                .post(self.url(target))
                .json(payload)
                .timeout(timeout)
                .send()
                .await
                .map_err(call_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Call {
                    target: target.to_string(),
                    reason: format!("status {}", status),
                });
            }
            response.json::<Value>().await.map_err(call_error)
        }
        .boxed()
    }
}

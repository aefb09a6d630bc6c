//! Message delivery between agents.
//!
//! [`Transport`] performs a single delivery and reports any failure as `None`.
//! [`Messenger`] layers the resilience policy on top: retries with backoff,
//! per-endpoint circuit breakers and fire-and-forget broadcasts.

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::configuration::Configuration;
use crate::protocol::{jsonrpc, Message};

pub mod circuit_breaker;
pub mod retry;
pub mod stdio;

use circuit_breaker::BreakerRegistry;
use retry::RetryPolicy;

/// `send_with_retry` refused to call an endpoint whose breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker open for {endpoint}")]
pub struct CircuitOpenError {
    /// Endpoint that was not called.
    pub endpoint: String,
}

/// Single-attempt delivery of a message.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers `message` to `endpoint` and returns the decoded answer.
    ///
    /// Timeouts, connection failures, non-2xx statuses and undecodable answers
    /// all yield `None`.
    async fn send(&self, endpoint: &str, message: &Message) -> Option<Value>;
}

/// HTTP POST transport.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    jsonrpc: bool,
    next_id: AtomicI64,
}

impl HttpTransport {
    /// Create a transport whose calls time out after `timeout`.
    pub fn new(timeout: Duration, jsonrpc: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            jsonrpc,
            next_id: AtomicI64::new(1),
        })
    }

    fn encode(&self, message: &Message) -> Option<Value> {
        let body = match serde_json::to_value(message) {
            Ok(body) => body,
            Err(e) => {
                warn!(%e, "failed to encode message");
                return None;
            }
        };
        if !self.jsonrpc {
            return Some(body);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        serde_json::to_value(jsonrpc::wrap_request(body, id)).ok()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self, message), fields(message_type = message.message_type()))]
    async fn send(&self, endpoint: &str, message: &Message) -> Option<Value> {
        let body = self.encode(message)?;
        let response = match self.client.post(endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(%e, "request failed");
                return None;
            }
        };
        let status = response.status();
        if !status.is_success() {
            debug!(%status, "request rejected");
            return None;
        }
        match response.json::<Value>().await {
            Ok(answer) => jsonrpc::unwrap_response(answer),
            Err(e) => {
                debug!(%e, "undecodable answer");
                None
            }
        }
    }
}

/// Resilient sender shared by the tasks of one agent process.
#[derive(Clone)]
pub struct Messenger {
    transport: Arc<dyn Transport>,
    breakers: Arc<BreakerRegistry>,
}

impl Messenger {
    /// Create a messenger over `transport`.
    pub fn new(transport: Arc<dyn Transport>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            transport,
            breakers,
        }
    }

    /// HTTP messenger configured from `config`.
    pub fn from_config(config: &Configuration) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(config.http_timeout, config.jsonrpc)?;
        let breakers = BreakerRegistry::new(config.breaker_threshold, config.breaker_reset_timeout);
        Ok(Self::new(Arc::new(transport), Arc::new(breakers)))
    }

    /// Breakers guarding the endpoints this messenger talks to.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Single delivery attempt, no breaker involved.
    pub async fn send(&self, endpoint: &str, message: &Message) -> Option<Value> {
        self.transport.send(endpoint, message).await
    }

    /// Delivers `message` following `policy`.
    ///
    /// With `use_circuit_breaker`, an open breaker fails fast with
    /// [`CircuitOpenError`] before anything is sent; a breaker that opens
    /// between attempts ends the retries with `Ok(None)`. Every attempt's
    /// outcome is recorded on the breaker.
    #[instrument(skip(self, message, policy), fields(message_type = message.message_type()))]
    pub async fn send_with_retry(
        &self,
        endpoint: &str,
        message: &Message,
        policy: RetryPolicy,
        use_circuit_breaker: bool,
    ) -> Result<Option<Value>, CircuitOpenError> {
        let breaker = use_circuit_breaker.then(|| self.breakers.get(endpoint));
        for attempt in 0..policy.max_attempts {
            if let Some(breaker) = &breaker {
                if !breaker.can_execute() {
                    if attempt == 0 {
                        return Err(CircuitOpenError {
                            endpoint: endpoint.to_owned(),
                        });
                    }
                    warn!(attempt, "circuit opened while retrying");
                    return Ok(None);
                }
            }

            if let Some(answer) = self.transport.send(endpoint, message).await {
                if let Some(breaker) = &breaker {
                    breaker.record_success();
                }
                return Ok(Some(answer));
            }
            if let Some(breaker) = &breaker {
                breaker.record_failure();
            }

            if attempt + 1 < policy.max_attempts {
                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "delivery failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
        warn!(attempts = policy.max_attempts, "delivery failed, giving up");
        Ok(None)
    }

    /// Sends `message` to every endpoint on detached tasks.
    ///
    /// Failures are logged and swallowed per endpoint. The handles resolve to
    /// whether each delivery got an answer; dropping them is fine.
    pub fn broadcast(
        &self,
        endpoints: impl IntoIterator<Item = String>,
        message: &Message,
    ) -> Vec<JoinHandle<bool>> {
        endpoints
            .into_iter()
            .map(|endpoint| {
                let messenger = self.clone();
                let message = message.clone();
                tokio::spawn(async move {
                    let delivered = messenger.send(&endpoint, &message).await.is_some();
                    if !delivered {
                        warn!(
                            endpoint,
                            message_type = message.message_type(),
                            "broadcast delivery failed"
                        );
                    }
                    delivered
                })
            })
            .collect()
    }
}

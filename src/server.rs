//! HTTP surface shared by every agent.
//!
//! Each agent exposes `POST /mcp`, taking one message (bare or JSON-RPC
//! wrapped) and answering with a [`Reply`], plus `GET /health`. Inbound
//! documents are validated before the [`AgentService`] sees them; protocol
//! failures are answered with `{status: "error"}` and HTTP 200.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::protocol::{
    jsonrpc::{self, Envelope, RpcResponse},
    validate_value, Message, ProtocolError, Reply,
};

/// Message handling logic of an agent.
#[async_trait]
pub trait AgentService: Send + Sync + 'static {
    /// Handles one validated inbound message.
    async fn handle(&self, message: Message) -> Reply;
}

/// Process wide stop signal.
///
/// Triggering is idempotent and observed by every clone, including those
/// that start waiting afterwards.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Untriggered signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Asks everything waiting on this signal to stop.
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            info!("shutdown requested");
        }
    }

    /// Whether [`Shutdown::trigger`] was called.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Routes of an agent backed by `service`.
pub fn router(service: Arc<dyn AgentService>) -> Router {
    Router::new()
        .route("/mcp", post(mcp))
        .route("/health", get(health))
        .with_state(service)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn mcp(State(service): State<Arc<dyn AgentService>>, body: Bytes) -> Json<Value> {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(%e, "undecodable request body");
            return Json(to_json(&Reply::error(format!("invalid JSON: {e}"))));
        }
    };
    let answer = match jsonrpc::unwrap_request(value) {
        Ok(Envelope::Bare(message)) => to_json(&dispatch(service.as_ref(), message).await),
        Ok(Envelope::JsonRpc { id, params }) => {
            let reply = dispatch(service.as_ref(), params).await;
            to_json(&RpcResponse::success(id, to_json(&reply)))
        }
        Err(response) => to_json(&response),
    };
    Json(answer)
}

/// Validates `value` and hands the decoded message to `service`.
pub async fn dispatch(service: &dyn AgentService, value: Value) -> Reply {
    match validate_value(value) {
        Ok(message) => {
            debug!(
                message_type = message.message_type(),
                sender = %message.sender,
                "message received"
            );
            service.handle(message).await
        }
        Err(ProtocolError::SchemaNotFound(message_type)) => {
            warn!(message_type, "unknown message type");
            Reply::unknown_message_type()
        }
        Err(e) => {
            warn!(%e, "rejected inbound message");
            Reply::error(e.to_string())
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Serves `service` on `listener` until `shutdown` triggers.
pub async fn serve(
    listener: TcpListener,
    service: Arc<dyn AgentService>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("listener has no address")?;
    info!(%addr, "agent listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("HTTP server failed")?;
    info!(%addr, "agent stopped");
    Ok(())
}

/// Binds `addr` and serves `service` on a background task.
///
/// Returns the bound address, useful when `addr` asked for port 0.
pub async fn spawn(
    addr: &str,
    service: Arc<dyn AgentService>,
    shutdown: Shutdown,
) -> anyhow::Result<(SocketAddr, JoinHandle<anyhow::Result<()>>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local = listener.local_addr().context("listener has no address")?;
    Ok((local, tokio::spawn(serve(listener, service, shutdown))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::StartLeague;

    struct Echo;

    #[async_trait]
    impl AgentService for Echo {
        async fn handle(&self, message: Message) -> Reply {
            Reply::ok(message.message_type())
        }
    }

    async fn post(addr: SocketAddr, body: Value) -> Value {
        reqwest::Client::new()
            .post(format!("http://{addr}/mcp"))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    fn start_league() -> Value {
        serde_json::to_value(Message::new("league_manager", StartLeague { league_id: "L".into() }))
            .unwrap()
    }

    #[tokio::test]
    async fn validated_messages_reach_the_service() {
        let shutdown = Shutdown::new();
        let (addr, task) = spawn("127.0.0.1:0", Arc::new(Echo), shutdown.clone()).await.unwrap();

        let answer = post(addr, start_league()).await;
        assert_eq!(answer, json!({"status": "ok", "message": "START_LEAGUE"}));

        let health: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        shutdown.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn protocol_errors_are_answered_with_status_error() {
        let shutdown = Shutdown::new();
        let (addr, _task) = spawn("127.0.0.1:0", Arc::new(Echo), shutdown.clone()).await.unwrap();

        let mut unknown = start_league();
        unknown["message_type"] = json!("TELEPORT");
        let answer = post(addr, unknown).await;
        assert_eq!(answer, json!({"status": "error", "message": "Unknown message type"}));

        let mut broken = start_league();
        broken.as_object_mut().unwrap().remove("league_id");
        let answer = post(addr, broken).await;
        assert_eq!(answer["status"], "error");
        assert!(answer["message"].as_str().unwrap().contains("league_id"));

        shutdown.trigger();
    }

    #[tokio::test]
    async fn jsonrpc_requests_are_answered_in_kind() {
        let shutdown = Shutdown::new();
        let (addr, _task) = spawn("127.0.0.1:0", Arc::new(Echo), shutdown.clone()).await.unwrap();

        let request = serde_json::to_value(jsonrpc::wrap_request(start_league(), 7)).unwrap();
        let answer = post(addr, request).await;
        assert_eq!(answer["jsonrpc"], "2.0");
        assert_eq!(answer["id"], 7);
        assert_eq!(answer["result"]["message"], "START_LEAGUE");

        let bad_version = json!({"jsonrpc": "1.0", "method": "x", "id": 1});
        let answer = post(addr, bad_version).await;
        assert_eq!(answer["error"]["code"], jsonrpc::INVALID_REQUEST);

        shutdown.trigger();
    }

    #[tokio::test]
    async fn shutdown_wakes_late_waiters() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        shutdown.trigger();
        shutdown.clone().wait().await;
        assert!(shutdown.is_triggered());
    }
}

//! An established (or being-probed) daemon connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use hempconnect_config::ConnectionConfig;

use crate::status::Reporter;

use super::transport::RpcTransport;
use super::types::{RpcError, RpcRequest};

/// A transport plus the config it was built from.
///
/// Clones share the same transport and shutdown flag. Once [`shutdown`]
/// has been called on any clone, every pending and future call completes
/// as a no-op.
///
/// [`shutdown`]: Connection::shutdown
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn RpcTransport>,
    config: Arc<ConnectionConfig>,
    shutdown: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(transport: Arc<dyn RpcTransport>, config: Arc<ConnectionConfig>) -> Self {
        Self {
            transport,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Send one request and wait for the reply.
    ///
    /// `None` means the connection was shut down, either before sending or
    /// while the request was in flight. The reply is discarded in that case.
    pub async fn call(&self, request: &RpcRequest) -> Option<Result<Value, RpcError>> {
        if self.is_shut_down() {
            debug!(method = %request.method, "Connection shut down, not sending");
            return None;
        }
        let result = self.transport.post(request).await;
        if self.is_shut_down() {
            debug!(method = %request.method, "Connection shut down, dropping reply");
            return None;
        }
        Some(result)
    }

    /// Fire a request in the background and deliver the outcome to exactly
    /// one of the callbacks, or to neither if the connection shuts down.
    pub fn call_with<F, E>(&self, request: RpcRequest, on_ok: F, on_err: E) -> JoinHandle<()>
    where
        F: FnOnce(Value) + Send + 'static,
        E: FnOnce(RpcError) + Send + 'static,
    {
        let conn = self.clone();
        tokio::spawn(async move {
            match conn.call(&request).await {
                Some(Ok(value)) => on_ok(value),
                Some(Err(err)) => on_err(err),
                None => {}
            }
        })
    }

    /// Like [`call_with`](Self::call_with), surfacing failures through the
    /// reporter's error latch.
    pub fn call_reporting_errors<F>(
        &self,
        request: RpcRequest,
        on_ok: F,
        reporter: Arc<Reporter>,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.call_with(request, on_ok, move |err| {
            reporter.error("Connection Error", &err.user_message());
        })
    }

    /// Like [`call_with`](Self::call_with), dropping failures.
    pub fn call_ignoring_errors<F>(&self, request: RpcRequest, on_ok: F) -> JoinHandle<()>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.call_with(request, on_ok, |err| {
            debug!(error = %err, "Ignoring RPC error");
        })
    }

    /// Stop delivering results. Irreversible.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            info!(host = %self.config.host, port = self.config.port, "Connection shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

//! HTTP transport for daemon RPC.

use std::error::Error as StdError;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use hempconnect_config::ConnectionConfig;

use crate::{BoxFuture, build_info};

use super::types::{RpcError, RpcRequest, classify_response};

/// Sends one RPC request and classifies the reply.
///
/// Object-safe so the orchestrator can be driven by a scripted transport.
pub trait RpcTransport: Send + Sync {
    fn post(&self, request: &RpcRequest) -> BoxFuture<'_, Result<Value, RpcError>>;
}

/// Daemon RPC over HTTP with basic auth.
///
/// The URL and `Authorization` header are computed once from the
/// [`ConnectionConfig`] and reused for every request.
pub struct HttpTransport {
    client: Client,
    url: String,
    authorization: String,
}

impl HttpTransport {
    pub fn new(config: &ConnectionConfig, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(build_info::user_agent())
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.endpoint_url(),
            authorization: basic_auth(&config.rpc_user, config.rpc_password.expose()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// `Basic base64(user:password)`.
pub fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

/// Whether a socket-level connection refusal appears anywhere in the chain.
fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::ConnectionRefused
        {
            return true;
        }
        current = e.source();
    }
    false
}

fn send_error(err: reqwest::Error) -> RpcError {
    if is_connection_refused(&err) {
        RpcError::ConnectionRefused(err.to_string())
    } else {
        RpcError::Transport(err.to_string())
    }
}

impl RpcTransport for HttpTransport {
    fn post(&self, request: &RpcRequest) -> BoxFuture<'_, Result<Value, RpcError>> {
        let body = serde_json::to_vec(request);
        let method = request.method.clone();
        Box::pin(async move {
            let body = body.map_err(|e| RpcError::Transport(e.to_string()))?;
            debug!(url = %self.url, method = %method, "RPC request");

            let resp = self
                .client
                .post(&self.url)
                .header(CONTENT_TYPE, "text/plain")
                .header(AUTHORIZATION, &self.authorization)
                .body(body)
                .send()
                .await
                .map_err(send_error)?;

            let status = resp.status().as_u16();
            let text = resp
                .text()
                .await
                .map_err(|e| RpcError::Transport(format!("failed to read response body: {e}")))?;

            debug!(method = %method, status, "RPC response");
            classify_response(status, &text)
        })
    }
}

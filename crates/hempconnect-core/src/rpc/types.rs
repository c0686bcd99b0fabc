//! JSON-RPC 1.0 request/response types and response classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 1.0 request as the daemon expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "1.0".to_string(),
            id: id.into(),
            method: method.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// Errors from a single RPC round-trip.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("authentication failed (check rpcuser/rpcpassword)")]
    AuthenticationRequired,

    #[error("daemon error {code} (HTTP {status}): {message}")]
    Daemon {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// Text suitable for showing to a user: the daemon's own message when it
    /// sent one, otherwise the error description.
    pub fn user_message(&self) -> String {
        match self {
            RpcError::Daemon { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// An HTTP 500 carrying a JSON error: how the daemon answers while it is
    /// still loading.
    pub fn is_warming_up(&self) -> bool {
        matches!(self, RpcError::Daemon { status: 500, .. })
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn daemon_error(status: u16, error: Value) -> RpcError {
    match error {
        Value::String(message) => RpcError::Daemon {
            status,
            code: 0,
            message,
        },
        other => {
            let object: RpcErrorObject = serde_json::from_value(other).unwrap_or_default();
            RpcError::Daemon {
                status,
                code: object.code,
                message: object.message,
            }
        }
    }
}

/// Map an HTTP status and body to the RPC outcome.
///
/// | status / body                   | outcome                  |
/// |---------------------------------|--------------------------|
/// | 401, 403                        | `AuthenticationRequired` |
/// | body not JSON                   | `MalformedResponse`      |
/// | 2xx                             | `Ok(result)`             |
/// | non-null `error`                | `Daemon` with the status |
/// | anything else                   | `Transport`              |
pub fn classify_response(status: u16, body: &str) -> Result<Value, RpcError> {
    if status == 401 || status == 403 {
        return Err(RpcError::AuthenticationRequired);
    }

    let response: RpcResponse = serde_json::from_str(body).map_err(|e| {
        RpcError::MalformedResponse(format!("HTTP {status}, unparseable body: {e}"))
    })?;

    if (200..300).contains(&status) {
        return Ok(response.result);
    }
    if !response.error.is_null() {
        return Err(daemon_error(status, response.error));
    }
    Err(RpcError::Transport(format!("unexpected HTTP status {status}")))
}

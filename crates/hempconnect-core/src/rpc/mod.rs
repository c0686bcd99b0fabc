//! JSON-RPC client for the daemon.
//!
//! [`RpcTransport`] is the seam: [`HttpTransport`] talks to a real daemon,
//! tests substitute a scripted one. [`Connection`] layers the shutdown flag
//! and the callback-style error policies on top.

pub mod connection;
pub mod transport;
pub mod types;

pub use connection::Connection;
pub use transport::{HttpTransport, RpcTransport};
pub use types::{RpcError, RpcRequest, classify_response};

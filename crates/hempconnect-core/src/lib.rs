#![deny(unsafe_code)]

//! hempconnect core: everything between "the wallet started" and "we have a
//! working RPC connection to the daemon".
//!
//! The pieces are the RPC transport and [`Connection`], the parameter
//! fetcher, the embedded daemon supervisor, status reporting, and the
//! [`Bootstrap`] state machine that ties them together.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, the return type for async trait
/// methods that must stay object-safe (`&dyn Trait`, `Arc<dyn Trait>`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Params check, config resolution, probing, and embedded launch.
pub mod bootstrap;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Cryptographic parameter files.
pub mod params;
/// JSON-RPC transport and connection handle.
pub mod rpc;
/// Status lines and latched error reports.
pub mod status;
/// Embedded daemon process supervision.
pub mod supervisor;

pub use bootstrap::{Bootstrap, BootstrapError, BootstrapTimings, Established, HttpConnector};
pub use params::ParamFetcher;
pub use rpc::{Connection, RpcError, RpcRequest};
pub use status::{Reporter, StatusSink};
pub use supervisor::{DaemonProcess, ProcessSupervisor};

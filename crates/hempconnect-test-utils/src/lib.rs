#![deny(unsafe_code)]

//! Shared test utilities for the hempconnect workspace.
//!
//! Config builders, scripted fakes for every bootstrap collaborator, and
//! tracing setup, so crate tests can drive the bootstrap without a daemon,
//! a network, or a filesystem.
//!
//! ```toml
//! [dev-dependencies]
//! hempconnect-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fakes;
pub mod tracing_setup;

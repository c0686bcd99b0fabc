//! Tracing initialisation helpers for tests.
//!
//! The subscriber is initialised at most once per process, so calling
//! [`init_test_tracing`] from every test is fine.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: our crates at debug, the HTTP
/// stack quiet.
const DEFAULT_FILTER: &str = "hempconnect_core=debug,hempconnect_config=debug,warn";

/// Initialise a subscriber writing to the test-harness writer.
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     hempconnect_test_utils::tracing_setup::init_test_tracing();
///     tracing::debug!("visible in captured test output");
/// }
/// ```
pub fn init_test_tracing() {
    init_test_tracing_with(DEFAULT_FILTER);
}

/// Like [`init_test_tracing`] with an explicit fallback filter.
pub fn init_test_tracing_with(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_test_writer()
        .try_init();
}

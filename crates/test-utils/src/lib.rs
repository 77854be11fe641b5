//! Shared helpers for the avocado integration tests.
//!
//! - [`EngineConfigBuilder`] for configurations with short scheduler timings.
//! - [`fake`] runnables and the [`ScriptedSpawner`] that plays them in-process.
//! - [`init_tracing`] and [`with_timeout`] guards used by every async test.

pub mod builders;
pub mod scripted_spawner;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{EngineConfigBuilder, fake};
pub use scripted_spawner::ScriptedSpawner;

/// Upper bound for any single engine run in the tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// Install a test-captured tracing subscriber, once per test binary.
///
/// Output is only shown for failing tests (or with `--nocapture`); the
/// level comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking when it takes longer than [`TEST_TIMEOUT`].
///
/// A scheduler that never drains its queues shows up as this panic rather
/// than a hung test run.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("engine run did not finish within {TEST_TIMEOUT:?}"),
    }
}

//! Test utilities for orcflow.
//!
//! - Tracing-based logging initialization shared by every unit test
//! - A lock for tests that mutate `ORCFLOW_*` environment variables
//! - Small graph and site helpers
//! - Phase/section macros for readable test output

use std::sync::{Arc, Mutex, MutexGuard, Once};

use tracing_subscriber::fmt::format::FmtSpan;

use crate::graph::Graph;
use crate::runtime::{Engine, EngineConfig, Execution};
use crate::site::{from_fn, FnSite};
use crate::types::{Binding, Value};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Immediate site publishing its single argument.
pub(crate) fn echo() -> FnSite {
    from_fn("echo", |args| {
        args.expect_arity(1)?;
        args.value(0).map(Some)
    })
}

/// Engine with tracing on and a short idle timeout, so a broken test fails
/// instead of hanging.
pub(crate) fn test_engine() -> Engine {
    Engine::new(EngineConfig::new().idle_timeout(std::time::Duration::from_secs(5)))
}

/// Starts `graph` with `initial` values as the free variables.
pub(crate) fn start(engine: &Engine, graph: Graph, initial: Vec<Value>) -> Execution {
    engine
        .start(
            Arc::new(graph),
            initial.into_iter().map(Binding::Value).collect(),
        )
        .expect("initial environment matches")
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

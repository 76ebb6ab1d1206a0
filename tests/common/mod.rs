#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use orcflow::graph::Graph;
use orcflow::runtime::{Engine, EngineConfig, Execution};
use orcflow::site::{from_fn, FnSite};
use orcflow::trace::{TraceData, TraceEvent, TraceEventKind};
use orcflow::types::{Binding, RegionId, Value};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED5EED;

const PROPTEST_SEED_ENV: &str = "ORCFLOW_PROPTEST_SEED";
const PROPTEST_MAX_SHRINK_ITERS_ENV: &str = "ORCFLOW_PROPTEST_MAX_SHRINK_ITERS";

/// Configuration for property tests with optional deterministic seed support.
#[derive(Debug, Clone)]
pub struct PropertyTestConfig {
    /// Fixed seed for reproducibility (overrides CI default when set).
    pub seed: Option<u64>,
    /// Number of successful cases required.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl PropertyTestConfig {
    /// Build a config with defaults for property tests.
    #[must_use]
    pub fn new(cases: u32) -> Self {
        Self {
            seed: read_proptest_seed(),
            cases,
            max_shrink_iters: read_max_shrink_iters()
                .unwrap_or(ProptestConfig::default().max_shrink_iters),
        }
    }

    /// Convert into a ProptestConfig, applying deterministic seed rules.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        let mut config = ProptestConfig::with_cases(self.cases);

        // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
        if matches!(config.rng_seed, RngSeed::Random) {
            if let Some(seed) = self.seed {
                config.rng_seed = RngSeed::Fixed(seed);
            }
        }

        config.max_shrink_iters = self.max_shrink_iters;
        config
    }
}

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    PropertyTestConfig::new(cases).to_proptest_config()
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }

    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }

    None
}

fn read_max_shrink_iters() -> Option<u32> {
    std::env::var(PROPTEST_MAX_SHRINK_ITERS_ENV)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
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

/// Engine with a short idle timeout so a stuck test fails instead of hanging.
#[must_use]
pub fn test_engine() -> Engine {
    test_engine_with(EngineConfig::new())
}

/// Like [`test_engine`], starting from `config`.
#[must_use]
pub fn test_engine_with(config: EngineConfig) -> Engine {
    Engine::new(config.idle_timeout(Duration::from_secs(5)))
}

/// Starts `graph` with `initial` as its free variables, last value at depth 0.
pub fn start(engine: &Engine, graph: Graph, initial: Vec<Value>) -> Execution {
    engine
        .start(
            Arc::new(graph),
            initial.into_iter().map(Binding::Value).collect(),
        )
        .expect("initial environment matches")
}

/// Immediate site publishing its single argument.
#[must_use]
pub fn echo() -> FnSite {
    from_fn("echo", |args| {
        args.expect_arity(1)?;
        args.value(0).map(Some)
    })
}

/// Immediate site adding its two integer arguments.
#[must_use]
pub fn add() -> FnSite {
    from_fn("add", |args| {
        args.expect_arity(2)?;
        Ok(Some(Value::Int(args.int(0)? + args.int(1)?)))
    })
}

/// Publications as sorted integers, for order-insensitive comparisons.
#[must_use]
pub fn sorted_ints(values: &[Value]) -> Vec<i64> {
    let mut out: Vec<i64> = values
        .iter()
        .map(|v| match v {
            Value::Int(n) => *n,
            other => panic!("expected an integer publication, got {other}"),
        })
        .collect();
    out.sort_unstable();
    out
}

/// Asserts every region in the trace opened once and closed once, and that
/// no region closed before one of its children.
pub fn assert_regions_balanced(events: &[TraceEvent]) {
    let mut parents: HashMap<RegionId, Option<RegionId>> = HashMap::new();
    let mut closed: HashMap<RegionId, usize> = HashMap::new();
    for (pos, event) in events.iter().enumerate() {
        let TraceData::Region { region, parent, .. } = &event.data else {
            continue;
        };
        match event.kind {
            TraceEventKind::RegionOpen => {
                assert!(
                    parents.insert(*region, *parent).is_none(),
                    "{region} opened twice"
                );
            }
            TraceEventKind::RegionClose => {
                assert!(parents.contains_key(region), "{region} closed before opening");
                assert!(
                    closed.insert(*region, pos).is_none(),
                    "{region} closed twice"
                );
            }
            _ => {}
        }
    }
    for (region, parent) in &parents {
        let Some(at) = closed.get(region) else {
            panic!("{region} never closed");
        };
        if let Some(parent) = parent {
            let parent_at = closed[parent];
            assert!(at < &parent_at, "{parent} closed before its child {region}");
        }
    }
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

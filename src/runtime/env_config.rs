//! Environment variable overrides for [`EngineConfig`].
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: builder setters applied after `from_env`
//! 2. **Environment variables**: values from `ORCFLOW_*` env vars
//! 3. **Defaults**: [`EngineConfig::new()`]
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `ORCFLOW_MAX_PUBLICATIONS` | `u64` | `max_publications` |
//! | `ORCFLOW_MAX_TOKENS` | `usize` | `max_tokens` |
//! | `ORCFLOW_MAX_STACK_DEPTH` | `usize` | `max_stack_depth` |
//! | `ORCFLOW_MAX_STEPS` | `u64` | `max_steps` |
//! | `ORCFLOW_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |
//! | `ORCFLOW_TRACE_CAPACITY` | `usize` | `trace_capacity` |
//! | `ORCFLOW_BLOCKING_MIN_THREADS` | `usize` | `blocking.min_threads` |
//! | `ORCFLOW_BLOCKING_MAX_THREADS` | `usize` | `blocking.max_threads` |
//! | `ORCFLOW_THREAD_NAME_PREFIX` | `String` | `blocking.thread_name_prefix` |

use std::time::Duration;

use crate::runtime::config::EngineConfig;

/// Environment variable name for the publication limit.
pub const ENV_MAX_PUBLICATIONS: &str = "ORCFLOW_MAX_PUBLICATIONS";
/// Environment variable name for the live-token limit.
pub const ENV_MAX_TOKENS: &str = "ORCFLOW_MAX_TOKENS";
/// Environment variable name for the closure nesting limit.
pub const ENV_MAX_STACK_DEPTH: &str = "ORCFLOW_MAX_STACK_DEPTH";
/// Environment variable name for the step limit.
pub const ENV_MAX_STEPS: &str = "ORCFLOW_MAX_STEPS";
/// Environment variable name for the idle timeout, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "ORCFLOW_IDLE_TIMEOUT_MS";
/// Environment variable name for the trace ring size.
pub const ENV_TRACE_CAPACITY: &str = "ORCFLOW_TRACE_CAPACITY";
/// Environment variable name for blocking pool minimum threads.
pub const ENV_BLOCKING_MIN_THREADS: &str = "ORCFLOW_BLOCKING_MIN_THREADS";
/// Environment variable name for blocking pool maximum threads.
pub const ENV_BLOCKING_MAX_THREADS: &str = "ORCFLOW_BLOCKING_MAX_THREADS";
/// Environment variable name for the blocking thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "ORCFLOW_THREAD_NAME_PREFIX";

/// A configuration value that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but does not parse.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// What was expected.
        expected: &'static str,
        /// What was found.
        value: String,
    },
}

/// Apply environment variable overrides to an [`EngineConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_MAX_PUBLICATIONS) {
        config.max_publications = Some(parse_u64(ENV_MAX_PUBLICATIONS, &val)?);
    }
    if let Some(val) = read_env(ENV_MAX_TOKENS) {
        config.max_tokens = Some(parse_usize(ENV_MAX_TOKENS, &val)?);
    }
    if let Some(val) = read_env(ENV_MAX_STACK_DEPTH) {
        config.max_stack_depth = parse_usize(ENV_MAX_STACK_DEPTH, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_STEPS) {
        config.max_steps = Some(parse_u64(ENV_MAX_STEPS, &val)?);
    }
    if let Some(val) = read_env(ENV_IDLE_TIMEOUT_MS) {
        config.idle_timeout = Some(Duration::from_millis(parse_u64(ENV_IDLE_TIMEOUT_MS, &val)?));
    }
    if let Some(val) = read_env(ENV_TRACE_CAPACITY) {
        config.trace_capacity = parse_usize(ENV_TRACE_CAPACITY, &val)?;
    }
    if let Some(val) = read_env(ENV_BLOCKING_MIN_THREADS) {
        config.blocking.min_threads = parse_usize(ENV_BLOCKING_MIN_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_BLOCKING_MAX_THREADS) {
        config.blocking.max_threads = parse_usize(ENV_BLOCKING_MAX_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.blocking.thread_name_prefix = val;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        var,
        expected: "u64",
        value: val.to_string(),
    })
}

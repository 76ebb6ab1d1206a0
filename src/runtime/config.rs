//! Engine configuration types.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `max_publications` | `None` (unbounded) |
//! | `max_tokens` | `None` (unbounded) |
//! | `max_stack_depth` | 10 000 |
//! | `max_steps` | `None` (unbounded) |
//! | `idle_timeout` | `None` (wait forever) |
//! | `trace_capacity` | 4096 (0 disables tracing) |
//! | `blocking.min_threads` | 0 |
//! | `blocking.max_threads` | 8 |
//! | `blocking.idle_timeout` | 10 s |
//! | `blocking.thread_name_prefix` | `"orcflow-blocking"` |

use std::time::Duration;

use crate::runtime::env_config::{apply_env_overrides, ConfigError};

/// Configuration for the blocking pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingPoolConfig {
    /// Workers started eagerly and never retired.
    pub min_threads: usize,
    /// Upper bound on concurrent workers.
    pub max_threads: usize,
    /// How long a surplus worker may sit idle before retiring.
    pub idle_timeout: Duration,
    /// Thread name prefix; workers are suffixed with a counter.
    pub thread_name_prefix: String,
}

impl BlockingPoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.max_threads == 0 {
            self.max_threads = 1;
        }
        if self.max_threads < self.min_threads {
            self.max_threads = self.min_threads;
        }
    }
}

impl Default for BlockingPoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 0,
            max_threads: 8,
            idle_timeout: Duration::from_secs(10),
            thread_name_prefix: "orcflow-blocking".to_string(),
        }
    }
}

/// Limits and resources for an [`Engine`](crate::runtime::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Stop the execution after this many top-level publications.
    pub max_publications: Option<u64>,
    /// Forks that would exceed this many live tokens fail at the call site.
    pub max_tokens: Option<usize>,
    /// Nested closure calls beyond this depth fail at the call site.
    pub max_stack_depth: usize,
    /// Abort `run` after this many scheduler steps.
    pub max_steps: Option<u64>,
    /// Abort `run` when waiting this long for a site with nothing else to do.
    pub idle_timeout: Option<Duration>,
    /// Trace ring size. `0` disables trace recording.
    pub trace_capacity: usize,
    /// Blocking pool settings.
    pub blocking: BlockingPoolConfig,
}

impl EngineConfig {
    /// Default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_publications: None,
            max_tokens: None,
            max_stack_depth: 10_000,
            max_steps: None,
            idle_timeout: None,
            trace_capacity: 4096,
            blocking: BlockingPoolConfig::default(),
        }
    }

    /// Defaults overridden by `ORCFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Sets the publication limit.
    #[must_use]
    pub const fn max_publications(mut self, limit: u64) -> Self {
        self.max_publications = Some(limit);
        self
    }

    /// Sets the live-token limit.
    #[must_use]
    pub const fn max_tokens(mut self, limit: usize) -> Self {
        self.max_tokens = Some(limit);
        self
    }

    /// Sets the closure nesting limit.
    #[must_use]
    pub const fn max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    /// Sets the step limit.
    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Disables the step limit.
    #[must_use]
    pub const fn no_step_limit(mut self) -> Self {
        self.max_steps = None;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the trace ring size.
    #[must_use]
    pub const fn trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Sets the blocking pool thread bounds.
    #[must_use]
    pub const fn blocking_threads(mut self, min: usize, max: usize) -> Self {
        self.blocking.min_threads = min;
        self.blocking.max_threads = max;
        self
    }

    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.max_stack_depth == 0 {
            self.max_stack_depth = 1;
        }
        self.blocking.normalize();
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

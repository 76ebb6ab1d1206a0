//! Error types and error handling strategy for orcflow.
//!
//! Failures come in three layers:
//!
//! - **Silent**: a token ends without publishing (a halted call, a false
//!   guard, a pruned branch). Not an error at all.
//! - **Call-site**: [`CallError`](crate::runtime::CallError), reported to the
//!   embedder and fatal only to the token that made the call.
//! - **Execution**: [`Error`] with an [`ErrorKind`], returned by the engine API
//!   when an execution cannot start or cannot finish.
//!
//! Broken internal invariants (a double resolve, a negative region count) are
//! bugs and panic after an `error!` log.

use core::fmt;
use std::sync::Arc;

use crate::graph::GraphError;
use crate::runtime::env_config::ConfigError;
use crate::types::{RegionId, TokenId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Setup ===
    /// The graph failed validation.
    InvalidGraph,
    /// The initial environment does not match the graph's free variables.
    EnvironmentMismatch,
    /// A configuration value could not be used.
    Config,

    // === Running ===
    /// Nothing is runnable, no call is outstanding, and the root region is
    /// still open.
    Stalled,
    /// The configured step limit was reached.
    StepLimit,
    /// Waited longer than the idle timeout for a site to answer.
    IdleTimeout,

    // === Internal ===
    /// Engine bug.
    Internal,
}

impl ErrorKind {
    /// True for kinds raised before any token ran.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::InvalidGraph | Self::EnvironmentMismatch | Self::Config
        )
    }

    /// True for kinds that mean a configured limit stopped the run.
    #[must_use]
    pub const fn is_limit(&self) -> bool {
        matches!(self, Self::StepLimit | Self::IdleTimeout)
    }
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Region involved, if any.
    pub region_id: Option<RegionId>,
    /// Token involved, if any.
    pub token_id: Option<TokenId>,
}

/// The main error type for engine operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                region_id: None,
                token_id: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub const fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Creates an environment mismatch error.
    #[must_use]
    pub fn environment_mismatch(expected: usize, actual: usize) -> Self {
        Self::new(ErrorKind::EnvironmentMismatch).with_message(format!(
            "graph has {expected} free variable(s), initial environment has {actual}"
        ))
    }

    /// Creates a stall error for a still-open root.
    #[must_use]
    pub fn stalled(root: RegionId, live_tokens: usize) -> Self {
        Self::new(ErrorKind::Stalled)
            .with_message(format!(
                "no runnable token and no outstanding call; {live_tokens} token(s) still waiting"
            ))
            .with_context(ErrorContext {
                region_id: Some(root),
                token_id: None,
            })
    }

    /// Creates an internal error (engine bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<GraphError> for Error {
    fn from(e: GraphError) -> Self {
        Self::new(ErrorKind::InvalidGraph)
            .with_message(e.to_string())
            .with_source(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(e.to_string())
            .with_source(e)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for engine operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use std::error::Error as _;

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::environment_mismatch(2, 0);
        assert_eq!(
            err.to_string(),
            "EnvironmentMismatch: graph has 2 free variable(s), initial environment has 0"
        );
    }

    #[test]
    fn graph_errors_keep_their_source() {
        let err: Error = GraphError::MissingRoot(NodeId(3)).into();
        assert_eq!(err.kind(), ErrorKind::InvalidGraph);
        assert!(err.kind().is_setup());
        assert!(err.source().is_some());
    }

    #[test]
    fn result_ext_replaces_message() {
        let res: core::result::Result<(), GraphError> = Err(GraphError::TooLarge);
        let err = res.context("compiling main").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::InvalidGraph);
        assert_eq!(err.to_string(), "InvalidGraph: compiling main");
    }

    #[test]
    fn stalled_carries_root() {
        let root = RegionId::new_for_test(0, 0);
        let err = Error::stalled(root, 3);
        assert_eq!(err.kind(), ErrorKind::Stalled);
        assert_eq!(err.context().region_id, Some(root));
        assert!(!err.kind().is_limit());
        assert!(ErrorKind::IdleTimeout.is_limit());
    }
}

//! orcflow: a token/region execution engine for a concurrent
//! site-orchestration calculus.
//!
//! # Overview
//!
//! A compiled program is an immutable [`Graph`](graph::Graph) of nodes. Running
//! it means moving lightweight *tokens* through that graph. Each token carries
//! a persistent environment, a continuation stack and a place in a tree of
//! reference-counted *regions*. Regions give the combinators their meaning:
//! a sequential region releases its right side once its left side is
//! exhausted, a pruning region resolves a future with the first publication of
//! its dependency and kills the rest, a clock region scopes a logical clock.
//!
//! External effects happen at *sites*. A site is called with a
//! [`CallerHandle`](site::CallerHandle) and may answer at once, later from
//! another thread, or from the blocking pool. Answers that arrive later go
//! through one queue, and each one starts a new scheduler round.
//!
//! # Core Guarantees
//!
//! - **Close once**: every region closes exactly once, children before parents
//! - **No leaks**: a killed region discards every token in its subtree
//! - **Fair stepping**: runnable tokens take turns in FIFO order
//! - **Quiescent time**: a logical clock only moves when nothing under it can
//! - **Resolve once**: a future cell is written at most once
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, values, closures and future cells
//! - [`env`]: persistent de Bruijn environments
//! - [`graph`]: nodes and the graph builder
//! - [`record`]: region, token and logical clock records
//! - [`site`]: the site protocol and built-in sites
//! - [`runtime`]: engine, scheduler and configuration
//! - [`trace`]: execution trace events
//! - [`error`]: error types
//! - [`util`]: arena and sequence counter

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod env;
pub mod error;
pub mod graph;
pub mod record;
pub mod runtime;
pub mod site;
pub mod trace;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use env::{Env, EnvError};
pub use error::{Error, ErrorContext, ErrorKind, Result, ResultExt};
pub use graph::{Arg, Def, Graph, GraphBuilder, GraphError, Node, SourceLocation};
pub use runtime::{
    CallError, Engine, EngineConfig, Execution, ExecutionObserver, ExecutionReport, HaltReason,
    Step, TokenError,
};
pub use site::{Args, CallerHandle, Discipline, Site, SiteError};
pub use trace::{DeathCause, TraceEvent, TraceEventKind};
pub use types::{Binding, Future, NodeId, RegionId, TokenId, Value};

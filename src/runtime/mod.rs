//! Execution runtime.
//!
//! - [`config`]: engine limits and blocking pool settings
//! - [`env_config`]: `ORCFLOW_*` environment overrides
//! - [`returns`]: the queued-returns lane sites answer through
//! - [`blocking_pool`]: threads for `Blocking` sites
//! - [`timer`]: wall-clock timer thread behind `resume_after`
//!
//! The engine itself is split by concern: `state` holds the records and the
//! region protocol, `interpret` the node transitions, `scheduler` the step
//! loop and `engine` the public handles.
//!
//! # Quick Start
//!
//! ```ignore
//! use orcflow::runtime::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::new().max_publications(10));
//! let mut execution = engine.start(graph, initial)?;
//! let report = execution.run()?;
//! ```

pub mod blocking_pool;
pub mod config;
mod engine;
pub mod env_config;
mod interpret;
pub mod returns;
mod scheduler;
pub(crate) mod state;
pub mod timer;

pub use blocking_pool::{BlockingPool, BlockingPoolHandle};
pub use config::{BlockingPoolConfig, EngineConfig};
pub use engine::{Engine, Execution, ExecutionObserver, ExecutionReport, HaltReason};
pub use env_config::ConfigError;
pub use interpret::{CallError, TokenError};
pub use returns::{CallResponse, Response, ReturnQueue};
pub use scheduler::Step;
pub use timer::{TimerHandle, TimerService};

//! Engine and execution handles.
//!
//! An [`Engine`] owns the resources shared by its executions: the blocking
//! pool and the wall-clock timer thread. [`Engine::start`] turns a graph and an
//! initial environment into an [`Execution`], which the caller drives with
//! [`Execution::step`] or [`Execution::run`].
//!
//! ```rust,ignore
//! let engine = Engine::new(EngineConfig::new().max_publications(1));
//! let report = engine.run(graph, vec![Value::site(Let).into()])?;
//! assert_eq!(report.publications.len(), 1);
//! ```

use core::fmt;
use std::sync::Arc;

use crate::env::Env;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::runtime::blocking_pool::{BlockingPool, BlockingPoolHandle};
use crate::runtime::config::EngineConfig;
use crate::runtime::interpret::TokenError;
use crate::runtime::returns::ReturnQueue;
use crate::runtime::state::EngineState;
use crate::runtime::timer::{TimerHandle, TimerService};
use crate::trace::{DeathCause, TraceBuffer, TraceEvent};
use crate::tracing_compat::{debug, info};
use crate::types::{Binding, Value};

/// Why an execution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaltReason {
    /// The root region closed: every token finished.
    Completed,
    /// The configured publication limit was reached.
    PublicationLimit,
    /// [`Execution::terminate`] was called.
    Terminated,
}

/// Callbacks invoked synchronously from the scheduler thread.
///
/// Every method has an empty default, so an observer implements only what it
/// needs.
pub trait ExecutionObserver: Send {
    /// A value left the program.
    fn on_publish(&mut self, _value: &Value) {}

    /// A token failed at a call site.
    fn on_error(&mut self, _error: &TokenError) {}

    /// A trace event was recorded.
    fn on_event(&mut self, _event: &TraceEvent) {}
}

/// What an execution produced.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Top-level publications, in order.
    pub publications: Vec<Value>,
    /// Call-site errors, in order.
    pub errors: Vec<TokenError>,
    /// Queued responses applied.
    pub rounds: u64,
    /// Scheduler steps taken.
    pub steps: u64,
    /// Final time of the root logical clock.
    pub logical_time: u64,
    /// `None` while the execution is still running.
    pub halted_by: Option<HaltReason>,
    /// Recorded trace, oldest first. Empty when tracing is disabled.
    pub trace: Vec<TraceEvent>,
}

/// Shared resources for running graphs.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    pool: BlockingPool,
    timers: TimerService,
}

impl Engine {
    /// Starts the blocking pool and the timer thread.
    #[must_use]
    pub fn new(mut config: EngineConfig) -> Self {
        config.normalize();
        let pool = BlockingPool::new(&config.blocking);
        debug!(
            min_threads = config.blocking.min_threads,
            max_threads = config.blocking.max_threads,
            "engine started"
        );
        Self {
            config,
            pool,
            timers: TimerService::new(),
        }
    }

    /// Engine configured from `ORCFLOW_*` environment variables.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    /// The effective configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prepares an execution of `graph`.
    ///
    /// `initial` supplies the graph's free variables in push order: the last
    /// binding ends up at depth 0.
    #[allow(clippy::result_large_err)]
    pub fn start(&self, graph: Arc<Graph>, initial: Vec<Binding>) -> Result<Execution> {
        self.start_inner(graph, initial, None)
    }

    /// Like [`start`](Self::start), reporting to `observer` as the execution
    /// runs.
    #[allow(clippy::result_large_err)]
    pub fn start_with_observer(
        &self,
        graph: Arc<Graph>,
        initial: Vec<Binding>,
        observer: impl ExecutionObserver + 'static,
    ) -> Result<Execution> {
        self.start_inner(graph, initial, Some(Box::new(observer)))
    }

    /// Starts and runs `graph` to completion.
    #[allow(clippy::result_large_err)]
    pub fn run(&self, graph: Arc<Graph>, initial: Vec<Binding>) -> Result<ExecutionReport> {
        self.start(graph, initial)?.run()
    }

    #[allow(clippy::result_large_err)]
    fn start_inner(
        &self,
        graph: Arc<Graph>,
        initial: Vec<Binding>,
        observer: Option<Box<dyn ExecutionObserver>>,
    ) -> Result<Execution> {
        if initial.len() != graph.free_vars() {
            return Err(Error::environment_mismatch(graph.free_vars(), initial.len()));
        }
        let mut state = EngineState::new(self.config.trace_capacity, observer);
        let root = state.spawn_root(graph.root(), Env::from_bindings(initial));
        info!(
            nodes = graph.len(),
            free_vars = graph.free_vars(),
            root_token = %root,
            "execution started"
        );
        Ok(Execution {
            graph,
            state,
            config: self.config.clone(),
            returns: Arc::new(ReturnQueue::new()),
            blocking: self.pool.handle(),
            timers: self.timers.handle(),
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// One run of a graph.
pub struct Execution {
    pub(crate) graph: Arc<Graph>,
    pub(crate) state: EngineState,
    pub(crate) config: EngineConfig,
    pub(crate) returns: Arc<ReturnQueue>,
    pub(crate) blocking: BlockingPoolHandle,
    pub(crate) timers: TimerHandle,
}

impl Execution {
    /// True once the execution stopped.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        !self.state.is_running()
    }

    /// Why the execution stopped, if it has.
    #[must_use]
    pub const fn halt_reason(&self) -> Option<HaltReason> {
        self.state.halted
    }

    /// Time of the root logical clock.
    #[must_use]
    pub fn logical_time(&self) -> u64 {
        self.state.logical_time()
    }

    /// Publications so far.
    #[must_use]
    pub fn publications(&self) -> &[Value] {
        &self.state.publications
    }

    /// Call-site errors so far.
    #[must_use]
    pub fn errors(&self) -> &[TokenError] {
        &self.state.errors
    }

    /// Live tokens.
    #[must_use]
    pub fn live_tokens(&self) -> usize {
        self.state.live_tokens()
    }

    /// Tokens waiting in the active queue, stale entries included.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.active.len()
    }

    /// Site calls that have not finished.
    #[must_use]
    pub fn outstanding_calls(&self) -> usize {
        self.returns.outstanding()
    }

    /// Rounds so far.
    #[must_use]
    pub const fn round(&self) -> u64 {
        self.state.round
    }

    /// Scheduler steps so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.state.steps
    }

    /// The trace ring, unless tracing is disabled.
    #[must_use]
    pub const fn trace(&self) -> Option<&TraceBuffer> {
        self.state.trace_buffer()
    }

    /// Recorded trace events, oldest first.
    #[must_use]
    pub fn trace_events(&self) -> Vec<TraceEvent> {
        self.state.trace_snapshot()
    }

    /// Replaces the observer.
    pub fn set_observer(&mut self, observer: impl ExecutionObserver + 'static) {
        self.state.set_observer(Box::new(observer));
    }

    /// Stops the execution, discarding every live token. Outstanding site
    /// calls are not interrupted; their answers are dropped.
    pub fn terminate(&mut self) {
        if !self.state.is_running() {
            return;
        }
        let live = self.state.live_tokens();
        info!(live_tokens = live, "execution terminated");
        self.state.halted = Some(HaltReason::Terminated);
        let root = self.state.root;
        self.state.kill_region(root, DeathCause::Terminated);
    }

    /// Snapshot of what the execution produced so far.
    #[must_use]
    pub fn report(&self) -> ExecutionReport {
        ExecutionReport {
            publications: self.state.publications.clone(),
            errors: self.state.errors.clone(),
            rounds: self.state.round,
            steps: self.state.steps,
            logical_time: self.state.logical_time(),
            halted_by: self.state.halted,
            trace: self.state.trace_snapshot(),
        }
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("graph_nodes", &self.graph.len())
            .field("live_tokens", &self.state.live_tokens())
            .field("round", &self.state.round)
            .field("steps", &self.state.steps)
            .field("halted", &self.state.halted)
            .finish_non_exhaustive()
    }
}

//! Node transitions.
//!
//! Each scheduler step hands one runnable token to [`Execution::run_token`],
//! which performs exactly one transition for the node the token sits on. A
//! token that keeps going is put back at the end of the active queue, so every
//! runnable token gets a turn before any of them gets a second one.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::env::{Env, EnvError};
use crate::graph::{Arg, Node, SourceLocation};
use crate::record::{Frame, RegionKind, TokenState};
use crate::runtime::engine::{Execution, HaltReason};
use crate::runtime::returns::CallResponse;
use crate::runtime::state::invariant_violation;
use crate::site::{Args, CallerHandle, Discipline, Lane, SiteError, SiteRef};
use crate::trace::{DeathCause, TraceData, TraceEventKind};
use crate::tracing_compat::{debug, trace};
use crate::types::{Binding, Closure, Forced, Future, NodeId, RegionId, TokenId, Value};

/// Why one token failed at its call site.
///
/// Only the token is lost; the rest of the execution keeps running.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The callee is neither a site nor a closure.
    #[error("{0} is not callable")]
    Uncallable(String),
    /// A closure called with the wrong number of arguments.
    #[error("{name} takes {expected} argument(s), got {actual}")]
    ArityMismatch {
        /// Definition name.
        name: String,
        /// Formal parameters.
        expected: usize,
        /// Arguments passed.
        actual: usize,
    },
    /// The site reported a failure.
    #[error(transparent)]
    Site(#[from] SiteError),
    /// An operand referred past the end of the environment.
    #[error(transparent)]
    Unbound(#[from] EnvError),
    /// Too many nested closure calls.
    #[error("closure calls nested deeper than {limit}")]
    StackLimit {
        /// Configured limit.
        limit: usize,
    },
    /// A fork would exceed the live-token limit.
    #[error("live token limit of {limit} reached")]
    TokenLimit {
        /// Configured limit.
        limit: usize,
    },
}

/// A call-site error together with the token and the source position.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenError {
    /// The token that failed.
    pub token: TokenId,
    /// Position of the call it was making, if the graph recorded one.
    pub location: Option<SourceLocation>,
    /// What went wrong.
    pub error: CallError,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}: {}", self.token, self.error),
            None => write!(f, "{}: {}", self.token, self.error),
        }
    }
}

impl std::error::Error for TokenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// `captured` followed by one closure per definition of the group at `defs`.
fn group_env(defs: NodeId, count: usize, captured: &Env) -> Env {
    let mut env = captured.clone();
    for index in 0..count {
        env.push(Binding::Value(Value::Closure(Closure::new(
            defs,
            index,
            captured.clone(),
        ))));
    }
    env
}

impl Execution {
    /// Runs one transition for `id`.
    pub(crate) fn run_token(&mut self, id: TokenId) {
        let graph = Arc::clone(&self.graph);
        let Some(node_id) = self.state.token(id).map(|t| t.node) else {
            return;
        };
        let node = graph.node(node_id);
        trace!(token = %id, node = %node_id, kind = node.kind_name(), "step");
        match node {
            Node::Call {
                callee,
                args,
                next,
                location,
            } => self.call(id, callee, args, *next, location.as_ref()),
            Node::Fork { left, right } => self.fork(id, *left, *right),
            Node::Push { left, right } => {
                let token = self.state.live_token_mut(id);
                let frame = Frame::Push {
                    right: *right,
                    env: token.env.clone(),
                };
                self.enter(id, frame, *left);
            }
            Node::Pull { left, right } => {
                let token = self.state.live_token_mut(id);
                let frame = Frame::Pull {
                    right: *right,
                    env: token.env.clone(),
                };
                self.enter(id, frame, *left);
            }
            Node::Semi { left, right } => self.sequence(id, *left, *right, false),
            Node::Otherwise { left, right } => self.sequence(id, *left, *right, true),
            Node::Pruning {
                body,
                dependency,
                name,
            } => self.prune(id, *body, *dependency, name.clone()),
            Node::Defs { defs, body } => {
                let token = self.state.live_token_mut(id);
                token.env = group_env(node_id, defs.len(), &token.env);
                self.continue_at(id, *body);
            }
            Node::Unwind { width, next } => {
                match self.state.live_token_mut(id).env.unwind(*width) {
                    Ok(()) => self.continue_at(id, *next),
                    Err(err) => self.fail(id, CallError::Unbound(err)),
                }
            }
            Node::WithClock { body } => self.with_clock(id, *body),
            Node::Publish => self.publish(id),
            Node::Silent => self.state.discard(id, DeathCause::Silent),
        }
    }

    fn continue_at(&mut self, id: TokenId, node: NodeId) {
        self.state.live_token_mut(id).node = node;
        self.state.active.push_back(id);
    }

    fn enter(&mut self, id: TokenId, frame: Frame, node: NodeId) {
        let token = self.state.live_token_mut(id);
        token.frames = token.frames.push(frame);
        self.continue_at(id, node);
    }

    /// Reports `error` for `id` and ends the token.
    pub(crate) fn fail(&mut self, id: TokenId, error: CallError) {
        let location = self.state.token(id).and_then(|t| t.location.clone());
        debug!(token = %id, error = %error, "call-site error");
        self.state.report(TokenError {
            token: id,
            location,
            error,
        });
        self.state.discard(id, DeathCause::Error);
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    fn binding(&self, id: TokenId, arg: &Arg) -> Result<Binding, CallError> {
        match arg {
            Arg::Const(value) => Ok(Binding::Value(value.clone())),
            Arg::Var(depth) => match self.state.token(id) {
                Some(token) => Ok(token.env.lookup(*depth)?.clone()),
                None => invariant_violation(format_args!("token {id} is not live")),
            },
        }
    }

    /// Reads `binding` for `id`. `None` means the token is now waiting on a
    /// future or has been discarded.
    fn force(&mut self, id: TokenId, binding: &Binding) -> Option<Value> {
        match binding.force_for(id) {
            Forced::Ready(value) => Some(value),
            Forced::Suspended => {
                if let Binding::Future(future) = binding {
                    trace!(token = %id, future = %future.id(), "waiting on future");
                    self.state.live_token_mut(id).state = TokenState::Waiting(future.id());
                }
                self.state.set_quiescent(id, true);
                None
            }
            Forced::Dead => {
                self.state.discard(id, DeathCause::DeadFuture);
                None
            }
        }
    }

    fn call(
        &mut self,
        id: TokenId,
        callee: &Arg,
        args: &[Arg],
        next: NodeId,
        location: Option<&SourceLocation>,
    ) {
        if let Some(location) = location {
            self.state.live_token_mut(id).location = Some(location.clone());
        }
        let target = match self.binding(id, callee) {
            Ok(binding) => binding,
            Err(err) => return self.fail(id, err),
        };
        let Some(target) = self.force(id, &target) else {
            return;
        };
        let bindings = match args
            .iter()
            .map(|arg| self.binding(id, arg))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(bindings) => bindings,
            Err(err) => return self.fail(id, err),
        };
        match target {
            Value::Site(site) => self.call_site(id, site, bindings, next),
            Value::Closure(closure) => self.call_closure(id, &closure, bindings, next),
            other => self.fail(id, CallError::Uncallable(other.to_string())),
        }
    }

    fn call_site(&mut self, id: TokenId, site: SiteRef, bindings: Vec<Binding>, next: NodeId) {
        if site.is_strict() {
            for binding in &bindings {
                if !binding.is_ready() && self.force(id, binding).is_none() {
                    return;
                }
            }
        }

        let call = self.state.next_call_id();
        let discipline = site.discipline();
        let name = site.name().to_string();
        let root_clock = self.state.root_clock;
        let token = self.state.live_token_mut(id);
        token.node = next;
        token.state = TokenState::Calling(call);
        let clock = token.current_clock().unwrap_or(root_clock);
        let logical_now = self.state.clock(clock).map_or(0, |c| c.now());

        trace!(token = %id, call = %call, site = %name, discipline = ?discipline, "site call");
        self.state.record(TraceEventKind::SiteSend, || TraceData::Send {
            token: id,
            call,
            site: name.clone(),
            discipline,
        });

        let lane = Arc::new(Mutex::new(match discipline {
            Discipline::Blocking => Lane::Queued,
            Discipline::Immediate | Discipline::Deferred => Lane::Inline(Vec::new()),
        }));
        let caller = CallerHandle::new(
            call,
            id,
            Arc::clone(&lane),
            Arc::clone(&self.returns),
            self.timers.clone(),
            logical_now,
        );
        let args = Args::new(name, bindings);

        if discipline == Discipline::Blocking {
            self.blocking.spawn(move || site.call(args, caller));
            return;
        }

        site.call(args, caller);
        let buffered = match std::mem::replace(&mut *lane.lock(), Lane::Queued) {
            Lane::Inline(buffered) => buffered,
            Lane::Queued => Vec::new(),
        };
        for response in buffered {
            self.apply_response(CallResponse {
                call,
                token: id,
                response,
            });
        }
    }

    fn call_closure(
        &mut self,
        id: TokenId,
        closure: &Closure,
        bindings: Vec<Binding>,
        next: NodeId,
    ) {
        let graph = Arc::clone(&self.graph);
        let Node::Defs { defs, .. } = graph.node(closure.defs) else {
            invariant_violation(format_args!(
                "closure refers to {} which is not a definition group",
                closure.defs
            ));
        };
        let Some(def) = defs.get(closure.index) else {
            invariant_violation(format_args!(
                "closure index {} out of range for group {}",
                closure.index, closure.defs
            ));
        };
        if bindings.len() != def.arity {
            return self.fail(
                id,
                CallError::ArityMismatch {
                    name: def.name.to_string(),
                    expected: def.arity,
                    actual: bindings.len(),
                },
            );
        }

        // A call whose continuation is `Publish` needs no return frame.
        let tail = matches!(graph.node(next), Node::Publish);
        let limit = self.config.max_stack_depth;
        if !tail && self.state.live_token_mut(id).frames.depth() >= limit {
            return self.fail(id, CallError::StackLimit { limit });
        }

        let mut env = group_env(closure.defs, defs.len(), &closure.env);
        for binding in bindings {
            env.push(binding);
        }
        let token = self.state.live_token_mut(id);
        if !tail {
            let frame = Frame::Return {
                env: token.env.clone(),
                next,
            };
            token.frames = token.frames.push(frame);
        }
        token.env = env;
        trace!(token = %id, def = %def.name, tail, "closure call");
        self.continue_at(id, def.body);
    }

    // ---------------------------------------------------------------------
    // Combinators
    // ---------------------------------------------------------------------

    fn fork(&mut self, id: TokenId, left: NodeId, right: NodeId) {
        if let Some(limit) = self.config.max_tokens {
            if self.state.live_tokens() >= limit {
                return self.fail(id, CallError::TokenLimit { limit });
            }
        }
        self.continue_at(id, left);
        let child = self.state.fork(id);
        self.state.live_token_mut(child).node = right;
    }

    /// `Semi` and `Otherwise`: park a copy at `right`, run `left` in a new
    /// region that releases or cancels the copy.
    fn sequence(&mut self, id: TokenId, left: NodeId, right: NodeId, fallback_only: bool) {
        let mut parked = self.state.copy_of(id);
        let region = parked.region;
        parked.node = right;
        parked.state = TokenState::Parked;
        parked.quiescent = true;
        let pending = self.state.spawn_child(id, parked);

        let semi = self.state.create_region(
            region,
            RegionKind::Semi {
                pending: Some(pending),
                fallback_only,
            },
        );
        self.state.set_region(id, semi);
        self.enter(id, Frame::LeaveSemi { region: semi }, left);
    }

    fn prune(&mut self, id: TokenId, body: NodeId, dependency: NodeId, name: Option<Arc<str>>) {
        let cell = Future::new(self.state.next_future_id(), name);
        let mut dep = self.state.copy_of(id);
        let pruning = self
            .state
            .create_region(dep.region, RegionKind::Pruning { cell: cell.clone() });
        dep.node = dependency;
        dep.region = pruning;
        dep.frames = dep.frames.push(Frame::Prune { cell: cell.clone() });
        self.state.spawn_child(id, dep);

        self.state.live_token_mut(id).env.push(Binding::Future(cell));
        self.continue_at(id, body);
    }

    fn with_clock(&mut self, id: TokenId, body: NodeId) {
        let token = self.state.live_token_mut(id);
        let (region, outer) = (token.region, token.current_clock());
        let (scope, clock) = self.state.open_clock_scope(region, outer);
        trace!(token = %id, clock = %clock, region = %scope, "clock opened");
        self.state.live_token_mut(id).clocks.push(clock);
        self.state.set_region(id, scope);
        self.enter(id, Frame::LeaveClock { region: scope }, body);
    }

    // ---------------------------------------------------------------------
    // Publication
    // ---------------------------------------------------------------------

    fn publish(&mut self, id: TokenId) {
        let token = self.state.live_token_mut(id);
        let value = token.result.clone().unwrap_or(Value::Signal);
        let Some((frame, rest)) = token.frames.pop() else {
            trace!(token = %id, value = %value, "top-level publication");
            self.state.publish(id, value);
            self.state.discard(id, DeathCause::Published);
            self.check_publication_limit();
            return;
        };
        token.frames = rest;
        match frame {
            Frame::Push { right, env } | Frame::Pull { right, env } => {
                token.env = env.extend(Binding::Value(value));
                self.continue_at(id, right);
            }
            Frame::Return { env, next: right } => {
                token.env = env;
                self.continue_at(id, right);
            }
            Frame::LeaveSemi { region } => {
                let parent = self.leaving(id, region);
                if let Some(pending) = self.state.take_fallback(region) {
                    self.state.discard(pending, DeathCause::Cancelled);
                }
                self.state.set_region(id, parent);
                self.state.active.push_back(id);
            }
            Frame::LeaveClock { region } => {
                let parent = self.leaving(id, region);
                self.state.live_token_mut(id).clocks.pop();
                self.state.set_region(id, parent);
                self.state.active.push_back(id);
            }
            Frame::Prune { cell } => self.resolve(id, &cell, value),
        }
    }

    /// Parent of `region`, checking that `id` is actually in it.
    fn leaving(&self, id: TokenId, region: RegionId) -> RegionId {
        let current = self.state.token(id).map(|t| t.region);
        if current != Some(region) {
            invariant_violation(format_args!(
                "token {id} leaves {region} from {current:?}"
            ));
        }
        match self.state.region(region).and_then(|r| r.parent) {
            Some(parent) => parent,
            None => invariant_violation(format_args!("region {region} has no parent")),
        }
    }

    fn resolve(&mut self, id: TokenId, cell: &Future, value: Value) {
        let region = match self.state.token(id) {
            Some(token) => token.region,
            None => invariant_violation(format_args!("token {id} is not live")),
        };
        if !self
            .state
            .region(region)
            .is_some_and(|r| matches!(r.kind, RegionKind::Pruning { .. }))
        {
            invariant_violation(format_args!(
                "token {id} resolves {} outside its pruning region",
                cell.id()
            ));
        }
        match cell.resolve(value.clone()) {
            Ok(waiters) => {
                debug!(future = %cell.id(), waiters = waiters.len(), "future resolved");
                self.state.record(TraceEventKind::Resolve, || TraceData::Resolve {
                    future: cell.id(),
                    value: value.to_string(),
                    waiters: waiters.len(),
                });
                self.state.wake_waiters(cell.id(), waiters);
            }
            Err(err) => invariant_violation(err),
        }
        self.state.discard(id, DeathCause::Published);
        self.state.kill_region(region, DeathCause::Killed);
    }

    fn check_publication_limit(&mut self) {
        let Some(limit) = self.config.max_publications else {
            return;
        };
        if self.state.publications.len() as u64 >= limit && self.state.is_running() {
            debug!(limit, "publication limit reached");
            self.state.halted = Some(HaltReason::PublicationLimit);
            let root = self.state.root;
            self.state.kill_region(root, DeathCause::Terminated);
        }
    }
}

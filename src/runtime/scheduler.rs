//! The scheduler loop.
//!
//! One [`Execution::step`] does the first of these that applies:
//!
//! 1. run one transition for the token at the front of the active queue;
//! 2. apply one queued site response, which starts a new round;
//! 3. advance every logical clock whose region is quiescent, innermost first;
//! 4. report [`Step::Idle`].
//!
//! [`Execution::run`] loops over `step`, blocking on the returns queue while
//! idle with calls outstanding.

use crate::error::{Error, ErrorKind, Result};
use crate::record::{RegionRecord, Released, TokenState};
use crate::runtime::engine::{Execution, ExecutionReport};
use crate::runtime::interpret::CallError;
use crate::runtime::returns::{CallResponse, Response};
use crate::runtime::state::invariant_violation;
use crate::trace::{DeathCause, TraceData, TraceEventKind};
use crate::tracing_compat::{debug, info, trace, warn};
use crate::types::{CallId, ClockId, TokenId, Value};

/// What one scheduler step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Ran one transition for this token.
    Ran(TokenId),
    /// Applied a queued response for this call.
    Returned(CallId),
    /// Advanced this many logical clocks.
    Advanced(usize),
    /// Nothing runnable, nothing queued, no clock can move.
    Idle,
    /// The execution is over.
    Halted,
}

impl Execution {
    /// Performs one scheduling decision.
    pub fn step(&mut self) -> Step {
        if !self.state.is_running() {
            return Step::Halted;
        }

        while let Some(id) = self.state.active.pop_front() {
            let runnable = self
                .state
                .token(id)
                .is_some_and(|t| t.state == TokenState::Ready);
            if runnable {
                self.state.steps += 1;
                self.run_token(id);
                return Step::Ran(id);
            }
        }

        if let Some(response) = self.returns.pop() {
            self.state.steps += 1;
            self.state.round += 1;
            let round = self.state.round;
            trace!(round, call = %response.call, "round");
            self.state
                .record(TraceEventKind::Round, || TraceData::Round { round });
            let call = response.call;
            self.apply_response(response);
            return Step::Returned(call);
        }

        let advanced = self.advance_clocks();
        if advanced > 0 {
            self.state.steps += 1;
            return Step::Advanced(advanced);
        }
        Step::Idle
    }

    /// Steps until the execution halts.
    ///
    /// While idle with site calls outstanding, blocks on the returns queue.
    /// Fails with [`ErrorKind::Stalled`] when idle with nothing outstanding,
    /// [`ErrorKind::IdleTimeout`] when a site takes longer than the configured
    /// idle timeout, and [`ErrorKind::StepLimit`] past the step limit.
    #[allow(clippy::result_large_err)]
    pub fn run(&mut self) -> Result<ExecutionReport> {
        loop {
            if let Some(limit) = self.config.max_steps {
                if self.state.steps >= limit {
                    return Err(Error::new(ErrorKind::StepLimit)
                        .with_message(format!("stopped after {limit} steps")));
                }
            }
            match self.step() {
                Step::Halted => {
                    let report = self.report();
                    info!(
                        publications = report.publications.len(),
                        errors = report.errors.len(),
                        rounds = report.rounds,
                        steps = report.steps,
                        halted = ?report.halted_by,
                        "execution halted"
                    );
                    return Ok(report);
                }
                Step::Idle => self.wait_for_returns()?,
                Step::Ran(_) | Step::Returned(_) | Step::Advanced(_) => {}
            }
        }
    }

    /// Steps until the execution halts or goes idle, without blocking.
    ///
    /// Returns the number of steps taken.
    pub fn run_until_idle(&mut self) -> u64 {
        let start = self.state.steps;
        while !matches!(self.step(), Step::Idle | Step::Halted) {}
        self.state.steps - start
    }

    #[allow(clippy::result_large_err)]
    fn wait_for_returns(&self) -> Result<()> {
        if self.returns.outstanding() == 0 && self.returns.is_empty() {
            let live = self.state.live_tokens();
            warn!(live_tokens = live, "execution stalled");
            return Err(Error::stalled(self.state.root, live));
        }
        trace!(outstanding = self.returns.outstanding(), "idle, waiting for sites");
        if self.returns.wait(self.config.idle_timeout) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::IdleTimeout).with_message(format!(
                "{} site call(s) still outstanding",
                self.returns.outstanding()
            )))
        }
    }

    /// Applies one site response to the token parked in the call.
    ///
    /// Responses for tokens that are gone, or that have moved past the call,
    /// are dropped.
    pub(crate) fn apply_response(&mut self, response: CallResponse) {
        let CallResponse {
            call,
            token,
            response,
        } = response;
        let Some(record) = self.state.token(token) else {
            trace!(token = %token, call = %call, "response for a discarded token dropped");
            return;
        };
        if record.state != TokenState::Calling(call) {
            warn!(token = %token, call = %call, state = ?record.state, "response for a finished call dropped");
            return;
        }
        let clock = record.current_clock().unwrap_or(self.state.root_clock);
        self.state
            .record(TraceEventKind::SiteReceive, || TraceData::Receive {
                token,
                call,
                response: response.to_string(),
            });

        match response {
            Response::Publish(value) => {
                let mut copy = self.state.copy_of(token);
                copy.result = Some(value);
                self.state.spawn_child(token, copy);
            }
            Response::Halt => self.state.discard(token, DeathCause::Halted),
            Response::Error(err) => self.fail(token, CallError::Site(err)),
            Response::Delay(ticks) => {
                let Some(target) = self.state.clock_mut(clock) else {
                    invariant_violation(format_args!("token {token} delays on dead clock {clock}"));
                };
                let due = target.schedule(ticks, token, call);
                trace!(token = %token, clock = %clock, due, "delayed");
                self.state.live_token_mut(token).state = TokenState::Delayed { clock, call };
                self.state.set_quiescent(token, true);
            }
            Response::Quiescent(flag) => {
                trace!(token = %token, call = %call, quiescent = flag, "caller quiescence set by site");
                self.state.set_quiescent(token, flag);
            }
        }
    }

    /// Advances every clock whose region is quiescent and has pending events,
    /// innermost first. Returns how many moved.
    fn advance_clocks(&mut self) -> usize {
        let order: Vec<ClockId> = self.state.clock_order.iter().rev().copied().collect();
        let mut advanced = 0;
        for id in order {
            let ready = self.state.clock(id).is_some_and(|clock| {
                clock.pending() > 0
                    && self
                        .state
                        .region(clock.region)
                        .is_some_and(|r| r.is_open() && RegionRecord::is_quiescent(r))
            });
            if !ready {
                continue;
            }
            let Some(clock) = self.state.clock_mut(id) else {
                continue;
            };
            let old = clock.now();
            let Some((now, released)) = clock.advance() else {
                continue;
            };
            debug!(clock = %id, from = old, to = now, released = released.len(), "clock advanced");
            let count = released.len();
            self.state
                .record(TraceEventKind::TimeAdvance, || TraceData::Time {
                    clock: id,
                    old,
                    new: now,
                    released: count,
                });
            for Released { token, call } in released {
                let due = self
                    .state
                    .token(token)
                    .is_some_and(|t| t.state == TokenState::Delayed { clock: id, call });
                if due {
                    self.state.live_token_mut(token).result = Some(Value::Signal);
                    self.state.wake(token);
                }
            }
            advanced += 1;
        }
        advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::graph::{Arg, Def, GraphBuilder, SourceLocation};
    use crate::record::TokenRecord;
    use crate::runtime::{Engine, EngineConfig, HaltReason};
    use crate::site::builtin::{Ltimer, Rtimer};
    use crate::site::{from_fn, SiteError};
    use crate::test_utils::{echo, init_test_logging, start, test_engine};
    use crate::types::NodeId;
    use crate::{assert_with_log, test_complete, test_phase};
    use smallvec::SmallVec;

    fn int(n: i64) -> Arg {
        Arg::Const(Value::Int(n))
    }

    fn ints(values: &[Value]) -> Vec<i64> {
        let mut out: Vec<i64> = values.iter().filter_map(Value::as_int).collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn fork_publishes_both_sides() {
        init_test_logging();
        test_phase!("fork_publishes_both_sides");
        let mut b = GraphBuilder::new(1);
        let left = b.call_publish(Arg::Var(0), vec![int(1)]);
        let right = b.call_publish(Arg::Var(0), vec![int(2)]);
        let root = b.fork(left, right);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let mut exec = start(&engine, graph, vec![Value::site(echo())]);
        let report = exec.run().expect("completes");
        assert_with_log!(
            ints(&report.publications) == vec![1, 2],
            "publications",
            vec![1, 2],
            ints(&report.publications)
        );
        assert_eq!(report.halted_by, Some(HaltReason::Completed));
        assert_eq!(report.rounds, 0);
        assert_eq!(exec.live_tokens(), 0);
        test_complete!("fork_publishes_both_sides");
    }

    #[test]
    fn fork_step_splits_token_within_region() {
        init_test_logging();
        test_phase!("fork_step_splits_token_within_region");
        let mut b = GraphBuilder::new(1);
        let left = b.call_publish(Arg::Var(0), vec![int(1)]);
        let right = b.call_publish(Arg::Var(0), vec![int(2)]);
        let root = b.fork(left, right);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let mut exec = start(&engine, graph, vec![Value::site(echo())]);
        let region = exec.state.root;
        let before = exec.state.region(region).expect("root region").inhabitants();
        assert_eq!(exec.live_tokens(), 1);

        assert!(matches!(exec.step(), Step::Ran(_)));
        let tokens: Vec<&TokenRecord> = exec.state.tokens.iter().map(|(_, t)| t).collect();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|t| t.region == region));
        let mut nodes: Vec<NodeId> = tokens.iter().map(|t| t.node).collect();
        nodes.sort_unstable();
        let mut expected = vec![left, right];
        expected.sort_unstable();
        assert_eq!(nodes, expected);
        let after = exec.state.region(region).expect("root region").inhabitants();
        assert_with_log!(after == before + 1, "inhabitants", before + 1, after);
        test_complete!("fork_step_splits_token_within_region");
    }

    #[test]
    fn push_binds_each_publication() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let left = b.call_publish(Arg::Var(0), vec![int(4)]);
        let right = b.call_publish(Arg::Var(1), vec![Arg::Var(0)]);
        let root = b.push(left, right);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let report = start(&engine, graph, vec![Value::site(echo())])
            .run()
            .expect("completes");
        assert_eq!(report.publications, vec![Value::Int(4)]);
    }

    #[test]
    fn pull_binds_each_publication() {
        init_test_logging();
        // echo(4) >x> echo(x), written as a pull
        let mut b = GraphBuilder::new(1);
        let left = b.call_publish(Arg::Var(0), vec![int(4)]);
        let right = b.call_publish(Arg::Var(1), vec![Arg::Var(0)]);
        let root = b.pull(left, right);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let report = start(&engine, graph, vec![Value::site(echo())])
            .run()
            .expect("completes");
        assert_eq!(report.publications, vec![Value::Int(4)]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn pull_binding_and_unwind_drops_it() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let left = b.call_publish(Arg::Var(0), vec![int(1)]);
        let tail = b.call_publish(Arg::Var(1), vec![Arg::Var(0)]);
        let pulled = b.pull(left, tail);
        let left2 = b.call_publish(Arg::Var(0), vec![int(2)]);
        let after = b.call_publish(Arg::Var(0), vec![int(3)]);
        let unwound = b.unwind(1, after);
        let pushed = b.push(left2, unwound);
        let root = b.fork(pulled, pushed);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let report = start(&engine, graph, vec![Value::site(echo())])
            .run()
            .expect("completes");
        assert_eq!(ints(&report.publications), vec![1, 3]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn pruning_keeps_first_publication() {
        init_test_logging();
        test_phase!("pruning_keeps_first_publication");
        // body: echo(x)  <x<  (echo(1) | echo(2))
        let mut b = GraphBuilder::new(1);
        let one = b.call_publish(Arg::Var(0), vec![int(1)]);
        let two = b.call_publish(Arg::Var(0), vec![int(2)]);
        let dependency = b.fork(one, two);
        let body = b.call_publish(Arg::Var(1), vec![Arg::Var(0)]);
        let root = b.pruning(body, dependency, Some("x"));
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let mut exec = start(&engine, graph, vec![Value::site(echo())]);
        let report = exec.run().expect("completes");
        assert_eq!(report.publications, vec![Value::Int(1)]);
        let resolves = exec
            .trace_events()
            .iter()
            .filter(|ev| ev.kind == TraceEventKind::Resolve)
            .count();
        assert_eq!(resolves, 1);
        test_complete!("pruning_keeps_first_publication");
    }

    #[test]
    fn silent_dependency_kills_the_future() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let dependency = b.silent();
        let body = b.call_publish(Arg::Var(1), vec![Arg::Var(0)]);
        let root = b.pruning(body, dependency, Some("x"));
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let mut exec = start(&engine, graph, vec![Value::site(echo())]);
        let report = exec.run().expect("terminates");
        assert!(report.publications.is_empty());
        assert_eq!(report.halted_by, Some(HaltReason::Completed));
        let dead = exec.trace_events().iter().any(|ev| {
            matches!(
                ev.data,
                TraceData::Die {
                    cause: DeathCause::DeadFuture,
                    ..
                }
            )
        });
        assert!(dead, "body token should die on the killed future");
    }

    #[test]
    fn semi_waits_for_logical_timer() {
        init_test_logging();
        test_phase!("semi_waits_for_logical_timer");
        // Ltimer(10) ; echo(2)
        let mut b = GraphBuilder::new(2);
        let left = b.call_publish(Arg::Var(0), vec![int(10)]);
        let right = b.call_publish(Arg::Var(1), vec![int(2)]);
        let root = b.semi(left, right);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let mut exec = start(&engine, graph, vec![Value::site(echo()), Value::site(Ltimer)]);
        let report = exec.run().expect("completes");
        assert_eq!(report.publications, vec![Value::Signal, Value::Int(2)]);
        assert_eq!(report.logical_time, 10);

        let events = exec.trace_events();
        let advance = events
            .iter()
            .position(|ev| ev.kind == TraceEventKind::TimeAdvance)
            .expect("clock advanced");
        let echo_send = events
            .iter()
            .position(|ev| {
                matches!(&ev.data, TraceData::Send { site, .. } if site == "echo")
            })
            .expect("echo called");
        assert!(advance < echo_send, "right side ran before the clock moved");
        test_complete!("semi_waits_for_logical_timer");
    }

    #[test]
    fn otherwise_runs_right_only_without_publication() {
        init_test_logging();
        let engine = test_engine();

        let mut b = GraphBuilder::new(1);
        let left = b.silent();
        let right = b.call_publish(Arg::Var(0), vec![int(2)]);
        let root = b.otherwise(left, right);
        let report = start(&engine, b.build(root).expect("valid"), vec![Value::site(echo())])
            .run()
            .expect("completes");
        assert_eq!(report.publications, vec![Value::Int(2)]);

        let mut b = GraphBuilder::new(1);
        let left = b.call_publish(Arg::Var(0), vec![int(1)]);
        let right = b.call_publish(Arg::Var(0), vec![int(2)]);
        let root = b.otherwise(left, right);
        let mut exec = start(&engine, b.build(root).expect("valid"), vec![Value::site(echo())]);
        let report = exec.run().expect("completes");
        assert_eq!(report.publications, vec![Value::Int(1)]);
        let cancelled = exec.trace_events().iter().any(|ev| {
            matches!(
                ev.data,
                TraceData::Die {
                    cause: DeathCause::Cancelled,
                    ..
                }
            )
        });
        assert!(cancelled);
    }

    #[test]
    fn equal_delays_release_in_call_order() {
        init_test_logging();
        // Ltimer(5) >> echo(1) | Ltimer(5) >> echo(2) | Ltimer(3) >> echo(3)
        fn branch(b: &mut GraphBuilder, delay: i64, tag: i64) -> NodeId {
            let then = b.call_publish(Arg::Var(1), vec![int(tag)]);
            b.call(Arg::Var(0), vec![int(delay)], then)
        }
        let mut b = GraphBuilder::new(2);
        let a = branch(&mut b, 5, 1);
        let bb = branch(&mut b, 5, 2);
        let c = branch(&mut b, 3, 3);
        let inner = b.fork(bb, c);
        let root = b.fork(a, inner);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let report = start(&engine, graph, vec![Value::site(echo()), Value::site(Ltimer)])
            .run()
            .expect("completes");
        assert_eq!(
            report.publications,
            vec![Value::Int(3), Value::Int(1), Value::Int(2)]
        );
        assert_eq!(report.logical_time, 5);
    }

    #[test]
    fn nested_clock_moves_independently() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let timed = b.call_publish(Arg::Var(0), vec![int(3)]);
        let root = b.with_clock(timed);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let mut exec = start(&engine, graph, vec![Value::site(Ltimer)]);
        let report = exec.run().expect("completes");
        assert_eq!(report.publications, vec![Value::Signal]);
        assert_eq!(report.logical_time, 0, "root clock never moved");
        assert!(exec.state.clock_order.is_empty());
        assert_eq!(exec.state.clocks.len(), 1, "only the root clock record is kept");
    }

    #[test]
    fn recursive_closures_tail_call() {
        init_test_logging();
        // def f(n) = echo(n) | (dec(n) >x> f(x));  f(3)
        let dec = from_fn("dec", |args| {
            let n = args.int(0)?;
            Ok((n > 0).then(|| Value::Int(n - 1)))
        });
        let mut b = GraphBuilder::new(2);
        let out = b.call_publish(Arg::Var(3), vec![Arg::Var(0)]);
        let step = b.call_publish(Arg::Var(2), vec![Arg::Var(0)]);
        let again = b.call_publish(Arg::Var(2), vec![Arg::Var(0)]);
        let recurse = b.push(step, again);
        let body = b.fork(out, recurse);
        let main = b.call_publish(Arg::Var(0), vec![int(3)]);
        let def = Def {
            name: "f".into(),
            arity: 1,
            body,
        };
        let root = b.defs(vec![def], main);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let report = start(&engine, graph, vec![Value::site(echo()), Value::site(dec)])
            .run()
            .expect("completes");
        assert_eq!(ints(&report.publications), vec![0, 1, 2, 3]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn deep_non_tail_recursion_hits_stack_limit() {
        init_test_logging();
        // def g() = g() >> stop;  g() >> stop
        let mut b = GraphBuilder::new(0);
        let stop = b.silent();
        let body = b.call(Arg::Var(0), vec![], stop);
        let main = b.call(Arg::Var(0), vec![], stop);
        let def = Def {
            name: "g".into(),
            arity: 0,
            body,
        };
        let root = b.defs(vec![def], main);
        let graph = b.build(root).expect("valid graph");

        let engine = Engine::new(EngineConfig::new().max_stack_depth(8));
        let report = start(&engine, graph, vec![]).run().expect("completes");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error, CallError::StackLimit { limit: 8 });
    }

    #[test]
    fn fork_beyond_token_limit_fails() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let p = b.call_publish(Arg::Var(0), vec![int(1)]);
        let inner = b.fork(p, p);
        let root = b.fork(inner, p);
        let graph = b.build(root).expect("valid graph");

        let engine = Engine::new(EngineConfig::new().max_tokens(2));
        let report = start(&engine, graph, vec![Value::site(echo())])
            .run()
            .expect("completes");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error, CallError::TokenLimit { limit: 2 });
        assert_eq!(report.publications, vec![Value::Int(1)]);
    }

    #[test]
    fn call_errors_carry_location() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let publish = b.publish();
        let location = SourceLocation::new("main.orc", 4, 9);
        let bad = b.call_at(Arg::Var(0), vec![], publish, location.clone());
        let uncallable = b.call_publish(int(5), vec![]);
        let unbound = b.call_publish(Arg::Var(6), vec![]);
        let rest = b.fork(uncallable, unbound);
        let root = b.fork(bad, rest);
        let graph = b.build(root).expect("valid graph");

        let engine = test_engine();
        let report = start(&engine, graph, vec![Value::site(echo())])
            .run()
            .expect("errors are not fatal");
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0].location, Some(location));
        assert!(matches!(
            report.errors[0].error,
            CallError::Site(SiteError::Arity { expected: 1, actual: 0, .. })
        ));
        assert_eq!(report.errors[1].error, CallError::Uncallable("5".to_string()));
        assert!(matches!(report.errors[2].error, CallError::Unbound(_)));
        assert_eq!(report.halted_by, Some(HaltReason::Completed));
    }

    #[test]
    fn closure_arity_is_checked() {
        init_test_logging();
        let mut b = GraphBuilder::new(0);
        let body = b.silent();
        let main = b.call_publish(Arg::Var(0), vec![int(1), int(2)]);
        let def = Def {
            name: "h".into(),
            arity: 1,
            body,
        };
        let root = b.defs(vec![def], main);
        let engine = test_engine();
        let report = start(&engine, b.build(root).expect("valid"), vec![])
            .run()
            .expect("completes");
        assert_eq!(
            report.errors[0].error,
            CallError::ArityMismatch {
                name: "h".to_string(),
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn publication_limit_halts_execution() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let p1 = b.call_publish(Arg::Var(0), vec![int(1)]);
        let p2 = b.call_publish(Arg::Var(0), vec![int(2)]);
        let p3 = b.call_publish(Arg::Var(0), vec![int(3)]);
        let inner = b.fork(p2, p3);
        let root = b.fork(p1, inner);
        let engine = Engine::new(EngineConfig::new().max_publications(2));
        let mut exec = start(&engine, b.build(root).expect("valid"), vec![Value::site(echo())]);
        let report = exec.run().expect("halts");
        assert_eq!(report.publications.len(), 2);
        assert_eq!(report.halted_by, Some(HaltReason::PublicationLimit));
        assert_eq!(exec.live_tokens(), 0);
    }

    #[test]
    fn step_limit_stops_run() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let p = b.call_publish(Arg::Var(0), vec![int(1)]);
        let root = b.fork(p, p);
        let engine = Engine::new(EngineConfig::new().max_steps(2));
        let err = start(&engine, b.build(root).expect("valid"), vec![Value::site(echo())])
            .run()
            .expect_err("limited");
        assert_eq!(err.kind(), ErrorKind::StepLimit);
    }

    #[test]
    fn orphaned_parked_token_is_a_stall() {
        init_test_logging();
        let mut b = GraphBuilder::new(0);
        let root = b.silent();
        let engine = test_engine();
        let mut exec = start(&engine, b.build(root).expect("valid"), vec![]);
        let mut record = TokenRecord::new(
            TokenId::detached(),
            NodeId(0),
            Env::new(),
            exec.state.root,
            SmallVec::new(),
        );
        record.state = TokenState::Parked;
        record.quiescent = true;
        exec.state.spawn(record);

        let err = exec.run().expect_err("nothing can move");
        assert_eq!(err.kind(), ErrorKind::Stalled);
        assert_eq!(err.context().region_id, Some(exec.state.root));
    }

    #[test]
    fn deferred_site_answers_through_queue() {
        init_test_logging();
        let mut b = GraphBuilder::new(1);
        let root = b.call_publish(Arg::Var(0), vec![int(50)]);
        let engine = test_engine();
        let mut exec = start(&engine, b.build(root).expect("valid"), vec![Value::site(Rtimer)]);
        assert!(matches!(exec.step(), Step::Ran(_)));
        assert_eq!(exec.outstanding_calls(), 1);
        assert_eq!(exec.step(), Step::Idle);

        let report = exec.run().expect("completes");
        assert_eq!(report.publications, vec![Value::Signal]);
        assert_eq!(report.rounds, 2, "publish and halt are separate rounds");
    }

    #[test]
    fn response_for_finished_call_is_dropped() {
        init_test_logging();
        let mut b = GraphBuilder::new(0);
        let root = b.silent();
        let engine = test_engine();
        let mut exec = start(&engine, b.build(root).expect("valid"), vec![]);
        let token = *exec.state.active.front().expect("root token queued");
        exec.apply_response(CallResponse {
            call: CallId(99),
            token,
            response: Response::Publish(Value::Int(1)),
        });
        assert_eq!(exec.live_tokens(), 1);
        assert_eq!(exec.run_until_idle(), 1);
        assert!(exec.is_halted());
        assert!(exec.publications().is_empty());
    }
}

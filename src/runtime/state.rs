//! Engine state and the region protocol.
//!
//! [`EngineState`] owns every record of one execution: the region tree, the
//! live tokens, the logical clocks and the active queue. It implements the
//! cross-record rules:
//!
//! - a token belongs to exactly one open region and is counted there;
//! - a region closes once, when its count returns to zero, then runs its
//!   close effect and releases its parent (iteratively, never recursively);
//! - killing a region discards the whole subtree without running any
//!   continuation, then releases the parent once;
//! - activity (non-quiescent members) is tracked per region and propagated
//!   upward on 0 ↔ 1 transitions, which is what gates the logical clocks.
//!
//! Breaking one of these rules is an engine bug: the state logs it at
//! `error!` and panics.

use std::collections::VecDeque;
use std::fmt::Display;

use smallvec::SmallVec;

use crate::env::Env;
use crate::record::{LogicalClock, RegionKind, RegionRecord, TokenRecord, TokenState};
use crate::runtime::engine::{ExecutionObserver, HaltReason};
use crate::runtime::interpret::TokenError;
use crate::trace::{DeathCause, TraceBuffer, TraceData, TraceEvent, TraceEventKind};
use crate::tracing_compat::{debug, error, trace};
use crate::types::{CallId, ClockId, FutureId, NodeId, RegionId, TokenId, Value};
use crate::util::{Arena, SeqGen};

/// Logs and panics on a broken engine invariant.
#[cold]
#[track_caller]
pub(crate) fn invariant_violation(what: impl Display) -> ! {
    error!(violation = %what, "engine invariant violated");
    panic!("engine invariant violated: {what}");
}

/// Every record of one execution.
pub(crate) struct EngineState {
    pub(crate) regions: Arena<RegionRecord>,
    pub(crate) tokens: Arena<TokenRecord>,
    pub(crate) clocks: Arena<LogicalClock>,
    /// Registered clocks, outermost first.
    pub(crate) clock_order: Vec<ClockId>,
    pub(crate) active: VecDeque<TokenId>,
    pub(crate) root: RegionId,
    pub(crate) root_clock: ClockId,
    pub(crate) round: u64,
    pub(crate) steps: u64,
    pub(crate) halted: Option<HaltReason>,
    pub(crate) publications: Vec<Value>,
    pub(crate) errors: Vec<TokenError>,
    ids: SeqGen,
    trace_seq: SeqGen,
    trace: Option<TraceBuffer>,
    observer: Option<Box<dyn ExecutionObserver>>,
    doomed: VecDeque<(TokenId, DeathCause)>,
    settling: bool,
}

impl EngineState {
    /// Creates the execution region and the root clock.
    pub(crate) fn new(trace_capacity: usize, observer: Option<Box<dyn ExecutionObserver>>) -> Self {
        let mut regions = Arena::new();
        let root_idx = regions.insert_with(|idx| {
            RegionRecord::new(RegionId::from_arena(idx), None, RegionKind::Execution)
        });
        let root = RegionId::from_arena(root_idx);
        let mut clocks = Arena::new();
        let clock_idx =
            clocks.insert_with(|idx| LogicalClock::new(ClockId::from_arena(idx), root, None));
        let root_clock = ClockId::from_arena(clock_idx);
        let mut state = Self {
            regions,
            tokens: Arena::new(),
            clocks,
            clock_order: vec![root_clock],
            active: VecDeque::new(),
            root,
            root_clock,
            round: 0,
            steps: 0,
            halted: None,
            publications: Vec::new(),
            errors: Vec::new(),
            ids: SeqGen::new(),
            trace_seq: SeqGen::new(),
            trace: (trace_capacity > 0).then(|| TraceBuffer::new(trace_capacity)),
            observer,
            doomed: VecDeque::new(),
            settling: false,
        };
        state.record(TraceEventKind::RegionOpen, || TraceData::Region {
            region: root,
            parent: None,
            kind: RegionKind::Execution.label(),
            natural: true,
        });
        state
    }

    // ---------------------------------------------------------------------
    // Ids, trace and reporting
    // ---------------------------------------------------------------------

    pub(crate) fn next_future_id(&mut self) -> FutureId {
        FutureId(self.ids.next_seq())
    }

    pub(crate) fn next_call_id(&mut self) -> CallId {
        CallId(self.ids.next_seq())
    }

    /// Emits an event if anyone is listening. `data` is only built then.
    pub(crate) fn record(&mut self, kind: TraceEventKind, data: impl FnOnce() -> TraceData) {
        if self.trace.is_none() && self.observer.is_none() {
            return;
        }
        let event = TraceEvent::new(self.trace_seq.next_seq(), self.round, kind, data());
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
        if let Some(buffer) = self.trace.as_mut() {
            buffer.push(event);
        }
    }

    pub(crate) fn trace_snapshot(&self) -> Vec<TraceEvent> {
        self.trace.as_ref().map_or_else(Vec::new, TraceBuffer::snapshot)
    }

    pub(crate) const fn trace_buffer(&self) -> Option<&TraceBuffer> {
        self.trace.as_ref()
    }

    pub(crate) fn set_observer(&mut self, observer: Box<dyn ExecutionObserver>) {
        self.observer = Some(observer);
    }

    /// Records a top-level publication.
    pub(crate) fn publish(&mut self, token: TokenId, value: Value) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_publish(&value);
        }
        self.record(TraceEventKind::Publish, || TraceData::Publish {
            token,
            value: value.to_string(),
        });
        self.publications.push(value);
    }

    /// Records a call-site error.
    pub(crate) fn report(&mut self, err: TokenError) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_error(&err);
        }
        self.record(TraceEventKind::Error, || TraceData::Error {
            token: err.token,
            location: err.location.as_ref().map(ToString::to_string),
            message: err.error.to_string(),
        });
        self.errors.push(err);
    }

    // ---------------------------------------------------------------------
    // Record access
    // ---------------------------------------------------------------------

    pub(crate) fn token(&self, id: TokenId) -> Option<&TokenRecord> {
        self.tokens.get(id.arena_index())
    }

    pub(crate) fn token_mut(&mut self, id: TokenId) -> Option<&mut TokenRecord> {
        self.tokens.get_mut(id.arena_index())
    }

    pub(crate) fn region(&self, id: RegionId) -> Option<&RegionRecord> {
        self.regions.get(id.arena_index())
    }

    #[track_caller]
    fn region_mut(&mut self, id: RegionId) -> &mut RegionRecord {
        match self.regions.get_mut(id.arena_index()) {
            Some(region) => region,
            None => invariant_violation(format_args!("region {id} is not live")),
        }
    }

    #[track_caller]
    pub(crate) fn live_token_mut(&mut self, id: TokenId) -> &mut TokenRecord {
        match self.tokens.get_mut(id.arena_index()) {
            Some(token) => token,
            None => invariant_violation(format_args!("token {id} is not live")),
        }
    }

    pub(crate) fn clock(&self, id: ClockId) -> Option<&LogicalClock> {
        self.clocks.get(id.arena_index())
    }

    pub(crate) fn clock_mut(&mut self, id: ClockId) -> Option<&mut LogicalClock> {
        self.clocks.get_mut(id.arena_index())
    }

    /// Live tokens.
    pub(crate) fn live_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// True while the execution region is open.
    pub(crate) fn is_running(&self) -> bool {
        self.halted.is_none() && self.region(self.root).is_some_and(RegionRecord::is_open)
    }

    // ---------------------------------------------------------------------
    // Regions
    // ---------------------------------------------------------------------

    /// Opens a child region of `parent`.
    pub(crate) fn create_region(&mut self, parent: RegionId, kind: RegionKind) -> RegionId {
        let label = kind.label();
        let idx = self
            .regions
            .insert_with(|idx| RegionRecord::new(RegionId::from_arena(idx), Some(parent), kind));
        let id = RegionId::from_arena(idx);
        self.region_mut(parent).add_child(id);
        self.record(TraceEventKind::RegionOpen, || TraceData::Region {
            region: id,
            parent: Some(parent),
            kind: label,
            natural: true,
        });
        trace!(region = %id, parent = %parent, kind = label, "region opened");
        id
    }

    /// Counts one more active member in `region` and its ancestors as needed.
    fn activate_region(&mut self, region: RegionId) {
        let mut current = Some(region);
        while let Some(id) = current.take() {
            let record = self.region_mut(id);
            if record.activate() {
                current = record.parent;
            }
        }
    }

    /// Counts one fewer active member in `region` and its ancestors as needed.
    fn deactivate_region(&mut self, region: RegionId) {
        let mut current = Some(region);
        while let Some(id) = current.take() {
            let record = self.region_mut(id);
            match record.deactivate() {
                Ok(true) => current = record.parent,
                Ok(false) => {}
                Err(err) => invariant_violation(err),
            }
        }
    }

    /// Flips a token's quiescence flag, keeping region activity in step.
    pub(crate) fn set_quiescent(&mut self, token: TokenId, quiescent: bool) {
        let record = self.live_token_mut(token);
        if record.quiescent == quiescent {
            return;
        }
        record.quiescent = quiescent;
        let region = record.region;
        if quiescent {
            self.deactivate_region(region);
        } else {
            self.activate_region(region);
        }
    }

    /// Natural close of `start`, then of every ancestor it empties.
    fn close_cascade(&mut self, start: RegionId) {
        let mut current = Some(start);
        while let Some(id) = current.take() {
            let record = self.region_mut(id);
            if let Err(err) = record.close() {
                invariant_violation(err);
            }
            let parent = record.parent;
            let kind = record.kind.clone();
            debug!(region = %id, kind = kind.label(), "region closed");
            self.record(TraceEventKind::RegionClose, || TraceData::Region {
                region: id,
                parent,
                kind: kind.label(),
                natural: true,
            });
            self.on_closed(id, kind);
            if let Some(parent) = parent {
                if self.region(parent).is_some_and(RegionRecord::is_open) {
                    match self.region_mut(parent).remove_child(id) {
                        Ok(true) => current = Some(parent),
                        Ok(false) => {}
                        Err(err) => invariant_violation(err),
                    }
                }
            }
            self.regions.remove(id.arena_index());
        }
        self.settle();
    }

    fn on_closed(&mut self, id: RegionId, kind: RegionKind) {
        match kind {
            RegionKind::Execution => {
                self.drop_clocks_of(id);
                if self.halted.is_none() {
                    self.halted = Some(HaltReason::Completed);
                }
            }
            RegionKind::Pruning { cell } => {
                for waiter in cell.kill() {
                    self.doomed.push_back((waiter, DeathCause::DeadFuture));
                }
            }
            RegionKind::Semi {
                pending: Some(pending),
                ..
            } => self.unpark(pending),
            RegionKind::Semi { pending: None, .. } => {}
            RegionKind::Clock { .. } => self.drop_clocks_of(id),
        }
    }

    /// Forced close of `top` and its whole subtree, descendants first.
    /// Member tokens die with `cause`.
    pub(crate) fn kill_region(&mut self, top: RegionId, cause: DeathCause) {
        let (parent, was_active) = match self.region(top) {
            Some(record) if record.is_open() => (record.parent, !record.is_quiescent()),
            _ => return,
        };
        let mut subtree = Vec::new();
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            if let Some(record) = self.region(id) {
                stack.extend(record.children());
                subtree.push(id);
            }
        }
        for id in subtree.into_iter().rev() {
            let record = self.region_mut(id);
            let kind = record.kind.clone();
            let Some((tokens, _)) = record.kill() else {
                continue;
            };
            let region_parent = record.parent;
            debug!(region = %id, kind = kind.label(), tokens = tokens.len(), "region killed");
            self.record(TraceEventKind::RegionClose, || TraceData::Region {
                region: id,
                parent: region_parent,
                kind: kind.label(),
                natural: false,
            });
            for token in tokens {
                if let Some(record) = self.tokens.remove(token.arena_index()) {
                    self.cancel_delay(&record);
                    self.record(TraceEventKind::Die, || TraceData::Die { token, cause });
                }
            }
            match kind {
                RegionKind::Pruning { cell } => {
                    for waiter in cell.kill() {
                        self.doomed.push_back((waiter, DeathCause::DeadFuture));
                    }
                }
                RegionKind::Semi {
                    pending: Some(pending),
                    ..
                } => self.doomed.push_back((pending, DeathCause::Cancelled)),
                RegionKind::Execution | RegionKind::Clock { .. } => self.drop_clocks_of(id),
                RegionKind::Semi { pending: None, .. } => {}
            }
            self.regions.remove(id.arena_index());
        }
        if let Some(parent) = parent {
            if self.region(parent).is_some_and(RegionRecord::is_open) {
                if was_active {
                    self.deactivate_region(parent);
                }
                match self.region_mut(parent).remove_child(top) {
                    Ok(true) => self.close_cascade(parent),
                    Ok(false) => {}
                    Err(err) => invariant_violation(err),
                }
            }
        }
        self.settle();
    }

    /// Discards every token queued by close and kill effects.
    fn settle(&mut self) {
        if self.settling {
            return;
        }
        self.settling = true;
        while let Some((token, cause)) = self.doomed.pop_front() {
            self.discard(token, cause);
        }
        self.settling = false;
    }

    // ---------------------------------------------------------------------
    // Tokens
    // ---------------------------------------------------------------------

    /// Stores `record` (its id is overwritten) in `region` and returns the id.
    ///
    /// Runnable tokens are pushed on the active queue.
    pub(crate) fn spawn(&mut self, mut record: TokenRecord) -> TokenId {
        let region = record.region;
        let quiescent = record.quiescent;
        let runnable = record.state == TokenState::Ready;
        let idx = self.tokens.insert_with(|idx| {
            record.id = TokenId::from_arena(idx);
            record
        });
        let id = TokenId::from_arena(idx);
        let target = self.region_mut(region);
        if !target.is_open() {
            invariant_violation(format_args!("token {id} spawned into closed region {region}"));
        }
        target.add_token(id);
        if !quiescent {
            self.activate_region(region);
        }
        if runnable {
            self.active.push_back(id);
        }
        id
    }

    /// Creates the first token of the execution.
    pub(crate) fn spawn_root(&mut self, node: NodeId, env: Env) -> TokenId {
        let mut clocks = SmallVec::new();
        clocks.push(self.root_clock);
        let record = TokenRecord::new(TokenId::detached(), node, env, self.root, clocks);
        self.spawn(record)
    }

    /// Copy of `parent`'s record, ready to be adjusted and spawned.
    pub(crate) fn copy_of(&self, parent: TokenId) -> TokenRecord {
        match self.token(parent) {
            Some(record) => record.fork(TokenId::detached()),
            None => invariant_violation(format_args!("fork of dead token {parent}")),
        }
    }

    /// Spawns `record` as a child of `parent` and traces the fork.
    pub(crate) fn spawn_child(&mut self, parent: TokenId, record: TokenRecord) -> TokenId {
        let region = record.region;
        let child = self.spawn(record);
        self.record(TraceEventKind::TokenFork, || TraceData::Fork {
            parent,
            child,
            region,
        });
        child
    }

    /// Forks `parent`: the copy shares node, environment, frames and region.
    pub(crate) fn fork(&mut self, parent: TokenId) -> TokenId {
        let copy = self.copy_of(parent);
        self.spawn_child(parent, copy)
    }

    /// Moves `token` into `to`. The new region counts it before the old one
    /// lets go, so an ancestor shared by both never sees a transient zero.
    pub(crate) fn set_region(&mut self, token: TokenId, to: RegionId) {
        let record = self.live_token_mut(token);
        let from = record.region;
        let quiescent = record.quiescent;
        record.region = to;
        self.region_mut(to).add_token(token);
        if !quiescent {
            self.activate_region(to);
            self.deactivate_region(from);
        }
        match self.region_mut(from).remove_token(token) {
            Ok(true) => self.close_cascade(from),
            Ok(false) => {}
            Err(err) => invariant_violation(err),
        }
    }

    /// Ends `token`, releasing its region. A token that is already gone is
    /// left alone.
    pub(crate) fn discard(&mut self, token: TokenId, cause: DeathCause) {
        let Some(record) = self.tokens.remove(token.arena_index()) else {
            return;
        };
        trace!(token = %token, cause = ?cause, "token died");
        self.cancel_delay(&record);
        self.record(TraceEventKind::Die, || TraceData::Die { token, cause });
        let region = record.region;
        if !self.region(region).is_some_and(RegionRecord::is_open) {
            return;
        }
        if !record.quiescent {
            self.deactivate_region(region);
        }
        match self.region_mut(region).remove_token(token) {
            Ok(true) => self.close_cascade(region),
            Ok(false) => {}
            Err(err) => invariant_violation(err),
        }
        self.settle();
    }

    /// Removes the clock event of a token that died while delayed.
    fn cancel_delay(&mut self, record: &TokenRecord) {
        let TokenState::Delayed { clock, call } = record.state else {
            return;
        };
        if self
            .clock_mut(clock)
            .is_some_and(|target| target.cancel(record.id, call))
        {
            trace!(token = %record.id, clock = %clock, "delay cancelled");
        }
    }

    /// Makes a waiting token runnable again.
    pub(crate) fn wake(&mut self, token: TokenId) {
        let record = self.live_token_mut(token);
        record.state = TokenState::Ready;
        self.set_quiescent(token, false);
        self.active.push_back(token);
    }

    /// Releases a parked right-hand token.
    fn unpark(&mut self, token: TokenId) {
        if self
            .token(token)
            .is_some_and(|record| record.state == TokenState::Parked)
        {
            trace!(token = %token, "unparked");
            self.wake(token);
        }
    }

    /// Releases the waiters of a future cell that just resolved.
    pub(crate) fn wake_waiters(&mut self, future: FutureId, waiters: Vec<TokenId>) {
        for waiter in waiters {
            let waiting = self
                .token(waiter)
                .is_some_and(|record| record.state == TokenState::Waiting(future));
            if waiting {
                self.wake(waiter);
            }
        }
    }

    /// Detaches the parked token of a fallback region, if it is still there.
    pub(crate) fn take_fallback(&mut self, region: RegionId) -> Option<TokenId> {
        match &mut self.region_mut(region).kind {
            RegionKind::Semi {
                pending,
                fallback_only: true,
            } => pending.take(),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Clocks
    // ---------------------------------------------------------------------

    /// Opens a clock region under `parent` with a fresh clock nested in
    /// `outer`.
    pub(crate) fn open_clock_scope(
        &mut self,
        parent: RegionId,
        outer: Option<ClockId>,
    ) -> (RegionId, ClockId) {
        let region = self.create_region(
            parent,
            RegionKind::Clock {
                clock: ClockId::detached(),
            },
        );
        let clock = self.register_clock(region, outer);
        self.region_mut(region).kind = RegionKind::Clock { clock };
        (region, clock)
    }

    /// Registers a nested clock scoped to `region`.
    pub(crate) fn register_clock(&mut self, region: RegionId, parent: Option<ClockId>) -> ClockId {
        let idx = self
            .clocks
            .insert_with(|idx| LogicalClock::new(ClockId::from_arena(idx), region, parent));
        let id = ClockId::from_arena(idx);
        self.clock_order.push(id);
        id
    }

    /// Unregisters every clock scoped to `region`. The root clock record is
    /// kept so its final time stays readable.
    fn drop_clocks_of(&mut self, region: RegionId) {
        let mut dropped = Vec::new();
        let clocks = &self.clocks;
        self.clock_order.retain(|id| {
            let scoped = clocks.get(id.arena_index()).is_some_and(|c| c.region == region);
            if scoped {
                dropped.push(*id);
            }
            !scoped
        });
        for id in dropped {
            if id == self.root_clock {
                if let Some(clock) = self.clock_mut(id) {
                    clock.clear();
                }
            } else {
                self.clocks.remove(id.arena_index());
            }
            trace!(clock = %id, "clock unregistered");
        }
    }

    /// Time of the root clock.
    pub(crate) fn logical_time(&self) -> u64 {
        self.clock(self.root_clock).map_or(0, LogicalClock::now)
    }
}

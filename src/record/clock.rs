//! Logical clocks.
//!
//! A logical clock keeps a virtual time and a min-heap of delayed tokens. It
//! only moves when the region it belongs to is quiescent; each advance jumps
//! straight to the earliest pending time and releases every token due then,
//! in the order their delays were requested.
//!
//! ```text
//! schedule(5, A); schedule(5, B); schedule(3, C)
//! advance() -> at 3: [C]
//! advance() -> at 5: [A, B]
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::{CallId, ClockId, RegionId, TokenId};

#[derive(Debug)]
struct ClockEvent {
    due: u64,
    seq: u64,
    token: TokenId,
    call: CallId,
}

impl PartialEq for ClockEvent {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ClockEvent {}

impl Ord for ClockEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest due time, then earliest request.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ClockEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A token released by an advance, with the call that delayed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    /// The delayed token.
    pub token: TokenId,
    /// The call whose continuation it resumes.
    pub call: CallId,
}

/// Engine-side record of one logical clock.
#[derive(Debug)]
pub struct LogicalClock {
    /// This clock's handle.
    pub id: ClockId,
    /// Region whose quiescence gates this clock.
    pub region: RegionId,
    /// Enclosing clock, if nested.
    pub parent: Option<ClockId>,
    now: u64,
    next_seq: u64,
    pending: BinaryHeap<ClockEvent>,
}

impl LogicalClock {
    /// A clock at time zero.
    #[must_use]
    pub const fn new(id: ClockId, region: RegionId, parent: Option<ClockId>) -> Self {
        Self {
            id,
            region,
            parent,
            now: 0,
            next_seq: 0,
            pending: BinaryHeap::new(),
        }
    }

    /// Current logical time.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Number of delayed tokens.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Earliest pending due time.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.pending.peek().map(|event| event.due)
    }

    /// Delays `token` by `delay` ticks from now. Returns the due time.
    pub fn schedule(&mut self, delay: u64, token: TokenId, call: CallId) -> u64 {
        let due = self.now.saturating_add(delay);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(ClockEvent {
            due,
            seq,
            token,
            call,
        });
        due
    }

    /// Moves to the earliest due time and releases everything due then.
    ///
    /// Returns `None` with nothing pending.
    pub fn advance(&mut self) -> Option<(u64, Vec<Released>)> {
        let due = self.next_due()?;
        self.now = self.now.max(due);
        let mut released = Vec::new();
        while self.pending.peek().is_some_and(|event| event.due == due) {
            if let Some(event) = self.pending.pop() {
                released.push(Released {
                    token: event.token,
                    call: event.call,
                });
            }
        }
        Some((self.now, released))
    }

    /// Drops the event delaying `token` in `call`. Returns true if one was pending.
    pub fn cancel(&mut self, token: TokenId, call: CallId) -> bool {
        let before = self.pending.len();
        self.pending
            .retain(|event| event.token != token || event.call != call);
        self.pending.len() != before
    }

    /// Drops every pending event.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

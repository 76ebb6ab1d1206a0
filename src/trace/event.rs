//! Trace events.
//!
//! Events are a side channel: the scheduler emits them and never reads them
//! back. Sequence numbers come from the execution's own counter and increase
//! strictly within one execution.

use core::fmt;

use serde::Serialize;

use crate::site::Discipline;
use crate::types::{CallId, ClockId, FutureId, RegionId, TokenId};

/// Kind of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TraceEventKind {
    /// A token was split in two.
    TokenFork,
    /// A site call was dispatched.
    SiteSend,
    /// A site answered.
    SiteReceive,
    /// A value left the program.
    Publish,
    /// A token ended.
    Die,
    /// A region was created.
    RegionOpen,
    /// A region closed or was killed.
    RegionClose,
    /// A future cell got its value.
    Resolve,
    /// A logical clock moved.
    TimeAdvance,
    /// A queued return started a new round.
    Round,
    /// A call-site error was reported.
    Error,
}

/// Why a token ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeathCause {
    /// Reached `Silent`.
    Silent,
    /// Its site call halted.
    Halted,
    /// Published at top level or into a pruning cell.
    Published,
    /// Its region was killed.
    Killed,
    /// It forced a killed future cell.
    DeadFuture,
    /// It was parked behind a fallback whose left side published.
    Cancelled,
    /// A call-site error.
    Error,
    /// The execution stopped with the token still live.
    Terminated,
}

/// Payload of a trace event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TraceData {
    /// Nothing beyond the kind.
    None,
    /// A fork.
    Fork {
        /// Original token.
        parent: TokenId,
        /// The copy.
        child: TokenId,
        /// Region both belong to.
        region: RegionId,
    },
    /// A dispatched call.
    Send {
        /// Calling token.
        token: TokenId,
        /// The invocation.
        call: CallId,
        /// Site name.
        site: String,
        /// How it was invoked.
        discipline: Discipline,
    },
    /// A site answer.
    Receive {
        /// Calling token.
        token: TokenId,
        /// The invocation.
        call: CallId,
        /// Rendered response.
        response: String,
    },
    /// A top-level publication.
    Publish {
        /// Publishing token.
        token: TokenId,
        /// Rendered value.
        value: String,
    },
    /// A token's end.
    Die {
        /// The token.
        token: TokenId,
        /// Why.
        cause: DeathCause,
    },
    /// A region transition.
    Region {
        /// The region.
        region: RegionId,
        /// Its parent.
        parent: Option<RegionId>,
        /// Kind label.
        kind: &'static str,
        /// False when the region was killed rather than emptied.
        natural: bool,
    },
    /// A future resolution.
    Resolve {
        /// The cell.
        future: FutureId,
        /// Rendered value.
        value: String,
        /// Tokens released.
        waiters: usize,
    },
    /// A clock advance.
    Time {
        /// The clock.
        clock: ClockId,
        /// Time before.
        old: u64,
        /// Time after.
        new: u64,
        /// Tokens released.
        released: usize,
    },
    /// A new round.
    Round {
        /// Round number after the increment.
        round: u64,
    },
    /// A reported call-site error.
    Error {
        /// Failing token.
        token: TokenId,
        /// Rendered source location, if known.
        location: Option<String>,
        /// Rendered error.
        message: String,
    },
}

/// One entry of the trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    /// Position in the execution's event stream.
    pub seq: u64,
    /// Round in which the event happened.
    pub round: u64,
    /// Kind.
    pub kind: TraceEventKind,
    /// Payload.
    pub data: TraceData,
}

impl TraceEvent {
    /// Builds an event.
    #[must_use]
    pub const fn new(seq: u64, round: u64, kind: TraceEventKind, data: TraceData) -> Self {
        Self {
            seq,
            round,
            kind,
            data,
        }
    }

    /// Token fork.
    #[must_use]
    pub const fn fork(seq: u64, round: u64, parent: TokenId, child: TokenId, region: RegionId) -> Self {
        Self::new(
            seq,
            round,
            TraceEventKind::TokenFork,
            TraceData::Fork {
                parent,
                child,
                region,
            },
        )
    }

    /// Token death.
    #[must_use]
    pub const fn die(seq: u64, round: u64, token: TokenId, cause: DeathCause) -> Self {
        Self::new(
            seq,
            round,
            TraceEventKind::Die,
            TraceData::Die { token, cause },
        )
    }

    /// Top-level publication.
    #[must_use]
    pub fn publish(seq: u64, round: u64, token: TokenId, value: String) -> Self {
        Self::new(
            seq,
            round,
            TraceEventKind::Publish,
            TraceData::Publish { token, value },
        )
    }

    /// Renders the event as one line of JSON.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:06}] r{} {:?}", self.seq, self.round, self.kind)?;
        match &self.data {
            TraceData::None => Ok(()),
            TraceData::Fork {
                parent,
                child,
                region,
            } => write!(f, " {parent} -> {child} in {region}"),
            TraceData::Send {
                token, call, site, ..
            } => write!(f, " {token} {call} {site}"),
            TraceData::Receive {
                token,
                call,
                response,
            } => write!(f, " {token} {call} {response}"),
            TraceData::Publish { token, value } => write!(f, " {token} {value}"),
            TraceData::Die { token, cause } => write!(f, " {token} {cause:?}"),
            TraceData::Region {
                region,
                kind,
                natural,
                ..
            } => {
                let how = if *natural { "" } else { " (killed)" };
                write!(f, " {region} {kind}{how}")
            }
            TraceData::Resolve {
                future,
                value,
                waiters,
            } => write!(f, " {future} = {value} ({waiters} waiting)"),
            TraceData::Time {
                clock, old, new, ..
            } => write!(f, " {clock} {old} -> {new}"),
            TraceData::Round { round } => write!(f, " round {round}"),
            TraceData::Error {
                token,
                location,
                message,
            } => match location {
                Some(at) => write!(f, " {token} at {at}: {message}"),
                None => write!(f, " {token}: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        let ev = TraceEvent::die(3, 1, TokenId::new_for_test(4, 0), DeathCause::Halted);
        assert_eq!(ev.to_string(), "[000003] r1 Die T4 Halted");
    }

    #[test]
    fn json_line_carries_kind_and_payload() {
        let ev = TraceEvent::publish(0, 0, TokenId::new_for_test(1, 0), "5".into());
        let line = ev.to_json_line().expect("serializable");
        let parsed: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(parsed["kind"], "Publish");
        assert_eq!(parsed["data"]["Publish"]["value"], "5");
        assert!(!line.contains('\n'));
    }
}

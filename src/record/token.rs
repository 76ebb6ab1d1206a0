//! Token record and its continuation stack.
//!
//! A token is one in-flight path through the graph: a node to run next, the
//! environment to run it in, the region that counts it, and a persistent stack
//! of [`Frame`]s telling `Publish` where a value goes. Forking a token copies
//! all of that by bumping reference counts.

use core::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::env::Env;
use crate::graph::SourceLocation;
use crate::types::{CallId, ClockId, Future, FutureId, NodeId, RegionId, TokenId, Value};

/// Where a publication goes once the current expression produces it.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Continue at `right` with the value pushed on `env`.
    Push {
        /// Consumer node.
        right: NodeId,
        /// Environment captured when the combinator was entered.
        env: Env,
    },
    /// Same binding as `Push`; kept apart so traces show the source form.
    Pull {
        /// Consumer node.
        right: NodeId,
        /// Environment captured when the combinator was entered.
        env: Env,
    },
    /// Leave a semi region for its parent, then keep publishing.
    LeaveSemi {
        /// The region being left.
        region: RegionId,
    },
    /// Resolve a pruning cell with the value; the publishing branch ends.
    Prune {
        /// The cell bound in the body.
        cell: Future,
    },
    /// Return from a closure body to the caller.
    Return {
        /// Caller environment.
        env: Env,
        /// Caller's continuation node.
        next: NodeId,
    },
    /// Leave a nested clock region and pop the clock.
    LeaveClock {
        /// The region being left.
        region: RegionId,
    },
}

struct ContLink {
    frame: Frame,
    rest: Option<Arc<ContLink>>,
}

/// Persistent frame stack. Cloning is O(1); an empty stack means a publication
/// is a top-level result.
#[derive(Clone, Default)]
pub struct Continuation {
    head: Option<Arc<ContLink>>,
    depth: usize,
}

impl Continuation {
    /// Empty stack.
    #[must_use]
    pub const fn toplevel() -> Self {
        Self {
            head: None,
            depth: 0,
        }
    }

    /// Number of frames.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// True with no frames left.
    #[must_use]
    pub const fn is_toplevel(&self) -> bool {
        self.head.is_none()
    }

    /// A new stack with `frame` on top.
    #[must_use]
    pub fn push(&self, frame: Frame) -> Self {
        Self {
            head: Some(Arc::new(ContLink {
                frame,
                rest: self.head.clone(),
            })),
            depth: self.depth + 1,
        }
    }

    /// Top frame and the stack below it.
    #[must_use]
    pub fn pop(&self) -> Option<(Frame, Self)> {
        let link = self.head.as_ref()?;
        Some((
            link.frame.clone(),
            Self {
                head: link.rest.clone(),
                depth: self.depth - 1,
            },
        ))
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(link) = next {
            match Arc::try_unwrap(link) {
                Ok(mut owned) => next = owned.rest.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Continuation(depth {})", self.depth)
    }
}

/// What a token is doing between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Runnable; sitting in the active queue or being stepped.
    Ready,
    /// On a future's wait-list. Quiescent.
    Waiting(FutureId),
    /// Parked in a site call until the site answers. Active.
    Calling(CallId),
    /// Waiting for a logical clock to reach its event. Quiescent.
    Delayed {
        /// Clock holding the event.
        clock: ClockId,
        /// Call that asked for the delay.
        call: CallId,
    },
    /// Right side of a sequential combinator, parked until release. Quiescent.
    Parked,
}

/// Engine-side record of one token.
#[derive(Debug)]
pub struct TokenRecord {
    /// This token's handle.
    pub id: TokenId,
    /// Node to run on the next step.
    pub node: NodeId,
    /// Bindings in scope.
    pub env: Env,
    /// Region counting this token.
    pub region: RegionId,
    /// Where publications go.
    pub frames: Continuation,
    /// Last value produced by a call, consumed by `Publish`.
    pub result: Option<Value>,
    /// Logical clocks, innermost last.
    pub clocks: SmallVec<[ClockId; 2]>,
    /// Current activity.
    pub state: TokenState,
    /// Excluded from its region's active count while set.
    pub quiescent: bool,
    /// Location of the most recent call node, for error reports.
    pub location: Option<SourceLocation>,
}

impl TokenRecord {
    /// A runnable token at `node`.
    #[must_use]
    pub fn new(
        id: TokenId,
        node: NodeId,
        env: Env,
        region: RegionId,
        clocks: SmallVec<[ClockId; 2]>,
    ) -> Self {
        Self {
            id,
            node,
            env,
            region,
            frames: Continuation::toplevel(),
            result: None,
            clocks,
            state: TokenState::Ready,
            quiescent: false,
            location: None,
        }
    }

    /// A runnable copy of this token under a new id.
    #[must_use]
    pub fn fork(&self, id: TokenId) -> Self {
        Self {
            id,
            node: self.node,
            env: self.env.clone(),
            region: self.region,
            frames: self.frames.clone(),
            result: self.result.clone(),
            clocks: self.clocks.clone(),
            state: TokenState::Ready,
            quiescent: false,
            location: self.location.clone(),
        }
    }

    /// Innermost logical clock.
    #[must_use]
    pub fn current_clock(&self) -> Option<ClockId> {
        self.clocks.last().copied()
    }
}

//! Region record.
//!
//! A region counts its inhabitants (member tokens plus open child regions) and
//! closes exactly once, when that count returns to zero. What closing means
//! depends on the [`RegionKind`]; the propagation itself lives in
//! [`EngineState`](crate::runtime::state::EngineState).
//!
//! Regions also count their *active* members: tokens that are not quiescent
//! and child regions that have an active member. Logical clocks only advance
//! when the region they belong to has no active members.

use std::collections::BTreeSet;

use crate::types::{ClockId, Future, RegionId, TokenId};

/// Lifecycle of a region.
///
/// ```text
/// Open ──count hits zero──▶ Closed
///   │
///   └────forced close─────▶ Killed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Accepting and tracking members.
    Open,
    /// Emptied naturally; the close effect ran.
    Closed,
    /// Force-closed; members were discarded without running continuations.
    Killed,
}

impl RegionState {
    /// True for `Closed` and `Killed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Killed)
    }
}

/// What a region governs, and so what its close does.
#[derive(Debug, Clone)]
pub enum RegionKind {
    /// The root. Closing it halts the execution.
    Execution,
    /// Owns the dependency side of a pruning combinator. Closing it without a
    /// publication kills the cell.
    Pruning {
        /// The cell bound in the body.
        cell: Future,
    },
    /// Governs the left side of a sequential combinator.
    Semi {
        /// Parked right-hand token, living in the parent region.
        pending: Option<TokenId>,
        /// When set, the first publication leaving the region discards
        /// `pending` instead of waiting for exhaustion.
        fallback_only: bool,
    },
    /// Scope of a nested logical clock.
    Clock {
        /// The clock to unregister on close.
        clock: ClockId,
    },
}

impl RegionKind {
    /// Short label for traces.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Pruning { .. } => "pruning",
            Self::Semi {
                fallback_only: false,
                ..
            } => "semi",
            Self::Semi {
                fallback_only: true,
                ..
            } => "otherwise",
            Self::Clock { .. } => "clock",
        }
    }
}

/// Bookkeeping violations. The engine treats every one of these as fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    /// A removal would take a count below zero.
    #[error("region {region}: {counter} count would go negative")]
    Underflow {
        /// Offending region.
        region: RegionId,
        /// Which counter.
        counter: &'static str,
    },
    /// Removal of a token that is not a member.
    #[error("region {region}: token {token} is not a member")]
    NotMember {
        /// Offending region.
        region: RegionId,
        /// Token that was not found.
        token: TokenId,
    },
    /// Removal of a child that is not registered.
    #[error("region {region}: {child} is not a child")]
    NotChild {
        /// Offending region.
        region: RegionId,
        /// Child that was not found.
        child: RegionId,
    },
    /// A second close.
    #[error("region {0} closed twice")]
    AlreadyClosed(RegionId),
}

/// Engine-side record of one region.
#[derive(Debug)]
pub struct RegionRecord {
    /// This region's handle.
    pub id: RegionId,
    /// Enclosing region; `None` only for the execution root.
    pub parent: Option<RegionId>,
    /// Close behavior.
    pub kind: RegionKind,
    state: RegionState,
    inhabitants: usize,
    active: usize,
    tokens: BTreeSet<TokenId>,
    children: BTreeSet<RegionId>,
}

impl RegionRecord {
    /// A new open region with no members.
    #[must_use]
    pub const fn new(id: RegionId, parent: Option<RegionId>, kind: RegionKind) -> Self {
        Self {
            id,
            parent,
            kind,
            state: RegionState::Open,
            inhabitants: 0,
            active: 0,
            tokens: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RegionState {
        self.state
    }

    /// True while the region tracks members.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, RegionState::Open)
    }

    /// Tokens plus open children.
    #[must_use]
    pub const fn inhabitants(&self) -> usize {
        self.inhabitants
    }

    /// Non-quiescent tokens plus active children.
    #[must_use]
    pub const fn active(&self) -> usize {
        self.active
    }

    /// True when no member can make progress on its own.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        self.active == 0
    }

    /// Member tokens in id order.
    pub fn tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.tokens.iter().copied()
    }

    /// Open children in id order.
    pub fn children(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.children.iter().copied()
    }

    /// Registers a token.
    pub fn add_token(&mut self, token: TokenId) {
        if self.tokens.insert(token) {
            self.inhabitants += 1;
        }
    }

    /// Unregisters a token. Returns true when this emptied the region.
    pub fn remove_token(&mut self, token: TokenId) -> Result<bool, RegionError> {
        if !self.tokens.remove(&token) {
            return Err(RegionError::NotMember {
                region: self.id,
                token,
            });
        }
        self.dec_inhabitants()
    }

    /// Registers a child region.
    pub fn add_child(&mut self, child: RegionId) {
        if self.children.insert(child) {
            self.inhabitants += 1;
        }
    }

    /// Unregisters a closed child. Returns true when this emptied the region.
    pub fn remove_child(&mut self, child: RegionId) -> Result<bool, RegionError> {
        if !self.children.remove(&child) {
            return Err(RegionError::NotChild {
                region: self.id,
                child,
            });
        }
        self.dec_inhabitants()
    }

    fn dec_inhabitants(&mut self) -> Result<bool, RegionError> {
        self.inhabitants = self
            .inhabitants
            .checked_sub(1)
            .ok_or(RegionError::Underflow {
                region: self.id,
                counter: "inhabitant",
            })?;
        Ok(self.inhabitants == 0)
    }

    /// Counts one more active member. Returns true on the 0 → 1 transition.
    pub fn activate(&mut self) -> bool {
        self.active += 1;
        self.active == 1
    }

    /// Counts one fewer active member. Returns true on the 1 → 0 transition.
    pub fn deactivate(&mut self) -> Result<bool, RegionError> {
        self.active = self.active.checked_sub(1).ok_or(RegionError::Underflow {
            region: self.id,
            counter: "active",
        })?;
        Ok(self.active == 0)
    }

    /// Open → Closed.
    pub fn close(&mut self) -> Result<(), RegionError> {
        if self.state.is_terminal() {
            return Err(RegionError::AlreadyClosed(self.id));
        }
        self.state = RegionState::Closed;
        Ok(())
    }

    /// Open → Killed, draining and returning the member sets so the caller can
    /// discard them. `None` if the region was already terminal.
    pub fn kill(&mut self) -> Option<(Vec<TokenId>, Vec<RegionId>)> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = RegionState::Killed;
        self.inhabitants = 0;
        let tokens = std::mem::take(&mut self.tokens).into_iter().collect();
        let children = std::mem::take(&mut self.children).into_iter().collect();
        Some((tokens, children))
    }
}

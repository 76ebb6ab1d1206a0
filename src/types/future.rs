//! Future cells and environment bindings.
//!
//! A pruning combinator binds its variable to a [`Future`] before the value
//! exists. Tokens that need the value register on the cell's wait-list and go
//! quiescent; resolution hands the whole list back to the scheduler in
//! registration order. A cell resolves at most once.
//!
//! If the pruning region that owns the cell closes without a publication the
//! cell is killed: every current and future forcer is discarded silently.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{FutureId, TokenId, Value};

/// Failure to move a cell out of the unresolved state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FutureError {
    /// The cell already holds a value.
    #[error("future {0} resolved twice")]
    AlreadyResolved(FutureId),
    /// The cell was killed before this resolution arrived.
    #[error("future {0} resolved after it was killed")]
    Killed(FutureId),
}

#[derive(Debug)]
enum FutureState {
    Unresolved(Vec<TokenId>),
    Resolved(Value),
    Killed,
}

#[derive(Debug)]
struct FutureCell {
    id: FutureId,
    name: Option<Arc<str>>,
    state: Mutex<FutureState>,
}

/// Shared handle to a future cell. Clones refer to the same cell.
#[derive(Clone)]
pub struct Future {
    cell: Arc<FutureCell>,
}

/// What forcing a binding produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Forced {
    /// The value is available.
    Ready(Value),
    /// The token was put on the cell's wait-list.
    Suspended,
    /// The cell was killed; the forcing token must be discarded.
    Dead,
}

impl Future {
    pub(crate) fn new(id: FutureId, name: Option<Arc<str>>) -> Self {
        Self {
            cell: Arc::new(FutureCell {
                id,
                name,
                state: Mutex::new(FutureState::Unresolved(Vec::new())),
            }),
        }
    }

    /// Cell number.
    #[must_use]
    pub fn id(&self) -> FutureId {
        self.cell.id
    }

    /// Variable name the cell was created for, if the graph recorded one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.cell.name.as_deref()
    }

    /// The value, if resolved.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match &*self.cell.state.lock() {
            FutureState::Resolved(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// True once a value has been stored.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.cell.state.lock(), FutureState::Resolved(_))
    }

    /// True once the owning region closed without a value.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        matches!(&*self.cell.state.lock(), FutureState::Killed)
    }

    /// Number of tokens currently waiting.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        match &*self.cell.state.lock() {
            FutureState::Unresolved(waiters) => waiters.len(),
            _ => 0,
        }
    }

    /// Reads the cell, registering `token` as a waiter if it is unresolved.
    pub(crate) fn force_for(&self, token: TokenId) -> Forced {
        let mut state = self.cell.state.lock();
        match &mut *state {
            FutureState::Resolved(v) => Forced::Ready(v.clone()),
            FutureState::Killed => Forced::Dead,
            FutureState::Unresolved(waiters) => {
                waiters.push(token);
                Forced::Suspended
            }
        }
    }

    /// Stores `value` and returns the waiters in registration order.
    pub(crate) fn resolve(&self, value: Value) -> Result<Vec<TokenId>, FutureError> {
        let mut state = self.cell.state.lock();
        match &mut *state {
            FutureState::Resolved(_) => Err(FutureError::AlreadyResolved(self.cell.id)),
            FutureState::Killed => Err(FutureError::Killed(self.cell.id)),
            FutureState::Unresolved(waiters) => {
                let waiters = std::mem::take(waiters);
                *state = FutureState::Resolved(value);
                Ok(waiters)
            }
        }
    }

    /// Marks an unresolved cell dead and returns its waiters.
    ///
    /// Resolved and already-killed cells are left alone.
    pub(crate) fn kill(&self) -> Vec<TokenId> {
        let mut state = self.cell.state.lock();
        match &mut *state {
            FutureState::Unresolved(waiters) => {
                let waiters = std::mem::take(waiters);
                *state = FutureState::Killed;
                waiters
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.cell.state.lock() {
            FutureState::Unresolved(w) => format!("unresolved, {} waiting", w.len()),
            FutureState::Resolved(v) => format!("resolved {v}"),
            FutureState::Killed => "killed".to_string(),
        };
        write!(f, "Future({}, {status})", self.cell.id)
    }
}

/// One slot of an environment.
#[derive(Clone, Debug)]
pub enum Binding {
    /// A value known when the slot was pushed.
    Value(Value),
    /// A cell that may still be waiting for its value.
    Future(Future),
}

impl Binding {
    /// The value if it is available now, without registering anything.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Future(f) => f.value(),
        }
    }

    /// True if reading this binding would not suspend.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Value(_) => true,
            Self::Future(f) => f.is_resolved(),
        }
    }

    /// Forces the binding on behalf of `token`.
    pub(crate) fn force_for(&self, token: TokenId) -> Forced {
        match self {
            Self::Value(v) => Forced::Ready(v.clone()),
            Self::Future(f) => f.force_for(token),
        }
    }
}

impl From<Value> for Binding {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

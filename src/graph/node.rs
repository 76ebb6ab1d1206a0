//! Node variants of the compiled graph.

use core::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::types::{NodeId, Value};

/// Source position attached to call nodes so errors can point at the program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    /// File or module name.
    pub file: Arc<str>,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl SourceLocation {
    /// Builds a location.
    #[must_use]
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Operand of a call: an environment slot or an inline constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// De Bruijn depth into the token's environment.
    Var(usize),
    /// Literal value.
    Const(Value),
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Self::Const(v)
    }
}

/// One definition inside a `Defs` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Def {
    /// Name used in traces and error messages.
    pub name: Arc<str>,
    /// Number of formal parameters.
    pub arity: usize,
    /// Body entry point.
    ///
    /// The body sees the defining environment, then the group's closures in
    /// definition order (the last one at the lowest depth), then the arguments
    /// in order (the last one at depth 0).
    pub body: NodeId,
}

/// A node of the continuation graph.
///
/// Every node names its successors by id; there is no implicit fall-through.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Invoke `callee` with `args`; each publication continues at `next` with
    /// the published value in the token's result register.
    Call {
        /// Callee operand.
        callee: Arg,
        /// Argument operands, looked up left to right.
        args: Vec<Arg>,
        /// Continuation for each publication.
        next: NodeId,
        /// Where the call appears in the source program.
        location: Option<SourceLocation>,
    },
    /// Run both sides in parallel.
    Fork {
        /// First branch.
        left: NodeId,
        /// Second branch.
        right: NodeId,
    },
    /// Sequential composition binding each publication of `left` at depth 0
    /// for `right`.
    Push {
        /// Producer.
        left: NodeId,
        /// Consumer, run once per publication.
        right: NodeId,
    },
    /// Sequential composition binding each publication of `left` at depth 0.
    Pull {
        /// Producer.
        left: NodeId,
        /// Consumer, run once per publication.
        right: NodeId,
    },
    /// Run `right` once after `left` has finished, whether or not it published.
    Semi {
        /// Expression whose exhaustion releases `right`.
        left: NodeId,
        /// Deferred branch.
        right: NodeId,
    },
    /// Run `right` only if `left` finished without publishing.
    Otherwise {
        /// Preferred branch.
        left: NodeId,
        /// Fallback branch.
        right: NodeId,
    },
    /// Bind the first publication of `dependency` to a future at depth 0 of
    /// `body`, then discard the rest of `dependency`.
    Pruning {
        /// Expression that uses the future.
        body: NodeId,
        /// Expression whose first publication resolves the future.
        dependency: NodeId,
        /// Variable name for traces.
        name: Option<Arc<str>>,
    },
    /// Bind a group of mutually recursive definitions, then continue at `body`.
    Defs {
        /// The group.
        defs: Vec<Def>,
        /// Scope of the group.
        body: NodeId,
    },
    /// Drop `width` bindings and continue at `next`.
    Unwind {
        /// Number of bindings dropped.
        width: usize,
        /// Continuation.
        next: NodeId,
    },
    /// Run `body` under a fresh logical clock nested in the current one.
    WithClock {
        /// Scope of the clock.
        body: NodeId,
    },
    /// Hand the result register to the innermost enclosing continuation.
    Publish,
    /// Halt without publishing.
    Silent,
}

impl Node {
    /// Node ids this node refers to, including definition bodies.
    #[must_use]
    pub fn successors(&self) -> Vec<NodeId> {
        match self {
            Self::Call { next, .. } | Self::Unwind { next, .. } => vec![*next],
            Self::Fork { left, right }
            | Self::Push { left, right }
            | Self::Pull { left, right }
            | Self::Semi { left, right }
            | Self::Otherwise { left, right } => vec![*left, *right],
            Self::Pruning {
                body, dependency, ..
            } => vec![*body, *dependency],
            Self::Defs { defs, body } => defs
                .iter()
                .map(|d| d.body)
                .chain(std::iter::once(*body))
                .collect(),
            Self::WithClock { body } => vec![*body],
            Self::Publish | Self::Silent => Vec::new(),
        }
    }

    /// Variant name for traces.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Fork { .. } => "fork",
            Self::Push { .. } => "push",
            Self::Pull { .. } => "pull",
            Self::Semi { .. } => "semi",
            Self::Otherwise { .. } => "otherwise",
            Self::Pruning { .. } => "pruning",
            Self::Defs { .. } => "defs",
            Self::Unwind { .. } => "unwind",
            Self::WithClock { .. } => "with-clock",
            Self::Publish => "publish",
            Self::Silent => "silent",
        }
    }
}

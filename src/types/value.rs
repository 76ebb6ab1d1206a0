//! Runtime values.
//!
//! A [`Value`] is always fully resolved. Unresolved slots are represented by
//! [`Future`](crate::types::Future) inside a [`Binding`](crate::types::Binding),
//! never inside a value.

use core::fmt;
use std::sync::Arc;

use crate::env::Env;
use crate::site::{Site, SiteRef};
use crate::types::NodeId;

/// A resolved value flowing through the node graph.
#[derive(Clone, Debug)]
pub enum Value {
    /// The unit publication, used by guards, timers and bare completions.
    Signal,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Immutable string.
    Str(Arc<str>),
    /// Fixed-size tuple.
    Tuple(Arc<[Value]>),
    /// External callable.
    Site(SiteRef),
    /// Language-level definition closed over its environment.
    Closure(Closure),
}

impl Value {
    /// Builds a string value.
    #[must_use]
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Builds a tuple value.
    #[must_use]
    pub fn tuple(items: impl IntoIterator<Item = Self>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    /// Wraps a site implementation.
    #[must_use]
    pub fn site(site: impl Site + 'static) -> Self {
        Self::Site(Arc::new(site))
    }

    /// Short name of the variant, used in type errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::Tuple(_) => "tuple",
            Self::Site(_) => "site",
            Self::Closure(_) => "closure",
        }
    }

    /// Boolean payload, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// True for sites and closures.
    #[must_use]
    pub const fn is_callable(&self) -> bool {
        matches!(self, Self::Site(_) | Self::Closure(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Signal, Self::Signal) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Site(a), Self::Site(b)) => Arc::ptr_eq(a, b),
            (Self::Closure(a), Self::Closure(b)) => {
                a.defs == b.defs && a.index == b.index && a.env.ptr_eq(&b.env)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => f.write_str("signal"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::Site(site) => write!(f, "<site {}>", site.name()),
            Self::Closure(closure) => write!(f, "<closure {}#{}>", closure.defs, closure.index),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

/// One member of a `Defs` group, closed over the environment the group was
/// entered with.
///
/// The closure does not hold its siblings. Calling it rebuilds the whole group
/// from `defs` and `env`, which is what makes mutual recursion work without
/// any mutable capture cell.
#[derive(Clone)]
pub struct Closure {
    pub(crate) defs: NodeId,
    pub(crate) index: usize,
    pub(crate) env: Env,
}

impl Closure {
    pub(crate) const fn new(defs: NodeId, index: usize, env: Env) -> Self {
        Self { defs, index, env }
    }

    /// The `Defs` node this closure belongs to.
    #[must_use]
    pub const fn defs_node(&self) -> NodeId {
        self.defs
    }

    /// Position within the group.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("defs", &self.defs)
            .field("index", &self.index)
            .field("env_len", &self.env.len())
            .finish()
    }
}

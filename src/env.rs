//! Persistent, de Bruijn-indexed environments.
//!
//! An environment is a singly linked chain of bindings behind `Arc`s. Pushing
//! allocates one link and shares the rest, so forking a token or capturing a
//! closure is a pointer copy. Depth 0 is the most recently pushed binding that
//! is still in scope.

use core::fmt;
use std::sync::Arc;

use crate::types::Binding;

/// Lookup or unwind past the end of an environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
    /// `lookup(depth)` with fewer than `depth + 1` bindings in scope.
    #[error("variable at depth {depth} is out of scope (environment holds {len})")]
    OutOfScope {
        /// Requested depth.
        depth: usize,
        /// Bindings in scope.
        len: usize,
    },
    /// `unwind(width)` wider than the environment.
    #[error("cannot unwind {width} bindings from an environment of {len}")]
    Underflow {
        /// Requested width.
        width: usize,
        /// Bindings in scope.
        len: usize,
    },
}

struct Link {
    binding: Binding,
    next: Option<Arc<Link>>,
}

/// Immutable binding chain; cloning is O(1).
#[derive(Clone, Default)]
pub struct Env {
    head: Option<Arc<Link>>,
    len: usize,
}

impl Env {
    /// Empty environment.
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Builds an environment by pushing `bindings` in order; the last one ends
    /// up at depth 0.
    #[must_use]
    pub fn from_bindings(bindings: impl IntoIterator<Item = Binding>) -> Self {
        let mut env = Self::new();
        for binding in bindings {
            env.push(binding);
        }
        env
    }

    /// Number of bindings in scope.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is in scope.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pushes `binding` at depth 0.
    pub fn push(&mut self, binding: Binding) {
        let next = self.head.take();
        self.head = Some(Arc::new(Link { binding, next }));
        self.len += 1;
    }

    /// Returns a new environment with `binding` at depth 0. `self` is unchanged.
    #[must_use]
    pub fn extend(&self, binding: Binding) -> Self {
        let mut env = self.clone();
        env.push(binding);
        env
    }

    /// The binding at `depth`.
    pub fn lookup(&self, depth: usize) -> Result<&Binding, EnvError> {
        let mut link = self.head.as_deref();
        for _ in 0..depth {
            link = link.and_then(|l| l.next.as_deref());
        }
        link.map(|l| &l.binding).ok_or(EnvError::OutOfScope {
            depth,
            len: self.len,
        })
    }

    /// Drops the `width` innermost bindings.
    pub fn unwind(&mut self, width: usize) -> Result<(), EnvError> {
        if width > self.len {
            return Err(EnvError::Underflow {
                width,
                len: self.len,
            });
        }
        for _ in 0..width {
            self.head = self.head.as_ref().and_then(|l| l.next.clone());
        }
        self.len -= width;
        Ok(())
    }

    /// Bindings from depth 0 outward.
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        let mut link = self.head.as_deref();
        std::iter::from_fn(move || {
            let current = link?;
            link = current.next.as_deref();
            Some(&current.binding)
        })
    }

    /// True when both environments share the same head link.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Drop for Env {
    // Long chains would otherwise drop recursively, one stack frame per link.
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(link) = next {
            match Arc::try_unwrap(link) {
                Ok(mut owned) => next = owned.next.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

//! The site-call protocol.
//!
//! A site is anything the graph can call that is not a closure: a service
//! client, a timer, a guard. The engine hands each call an [`Args`] bundle and
//! a [`CallerHandle`]; the site answers through the handle, now or later, from
//! any thread.
//!
//! How a site is invoked depends on its [`Discipline`]:
//!
//! - `Immediate`: `call` runs on the scheduler thread and normally answers
//!   before returning. Those answers are applied before the scheduler moves on.
//! - `Deferred`: `call` runs on the scheduler thread but keeps the handle and
//!   answers later, through the queued-returns lane.
//! - `Blocking`: `call` runs on the blocking pool.
//!
//! A site may publish any number of times. It ends the call with exactly one
//! of `halt` (silent decline), `report_error` (failure), `resume` (publish then
//! halt) or `delay_logical`. Dropping the handle without ending the call
//! counts as `halt`.

pub mod builtin;
mod handle;

pub use handle::CallerHandle;
pub(crate) use handle::Lane;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::types::{Binding, Value};

/// Shared reference to a site implementation.
pub type SiteRef = Arc<dyn Site>;

/// Where and how a site's `call` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Discipline {
    /// Synchronous, on the scheduler thread.
    Immediate,
    /// Returns at once and answers later from elsewhere.
    Deferred,
    /// Runs on the blocking pool.
    Blocking,
}

/// An external callable.
pub trait Site: Send + Sync + fmt::Debug {
    /// Name used in traces and error messages.
    fn name(&self) -> &str;

    /// How the engine should invoke this site.
    fn discipline(&self) -> Discipline {
        Discipline::Immediate
    }

    /// Whether every argument must be resolved before `call` runs.
    ///
    /// Non-strict sites receive unresolved futures as-is.
    fn is_strict(&self) -> bool {
        true
    }

    /// Performs the call. Answers go through `caller`.
    fn call(&self, args: Args, caller: CallerHandle);
}

/// A call-site failure reported by a site.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SiteError {
    /// Wrong number of arguments.
    #[error("{site}: expected {expected} argument(s), got {actual}")]
    Arity {
        /// Site name.
        site: String,
        /// Arguments accepted.
        expected: usize,
        /// Arguments given.
        actual: usize,
    },
    /// An argument of the wrong kind.
    #[error("{site}: argument {index} should be {expected}, got {actual}")]
    ArgumentType {
        /// Site name.
        site: String,
        /// Zero-based position.
        index: usize,
        /// Kind accepted.
        expected: &'static str,
        /// Kind given.
        actual: &'static str,
    },
    /// A non-strict site read an argument that is still a pending future.
    #[error("{site}: argument {index} is not resolved yet")]
    Unresolved {
        /// Site name.
        site: String,
        /// Zero-based position.
        index: usize,
    },
    /// Any other failure.
    #[error("{site}: {message}")]
    Failed {
        /// Site name.
        site: String,
        /// Description.
        message: String,
    },
}

impl SiteError {
    /// Builds a [`SiteError::Failed`].
    #[must_use]
    pub fn failed(site: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            site: site.into(),
            message: message.into(),
        }
    }
}

/// Arguments of one call, in source order.
#[derive(Debug, Clone)]
pub struct Args {
    site: String,
    items: Vec<Binding>,
}

impl Args {
    /// Bundles `items` for a call to `site`.
    #[must_use]
    pub fn new(site: impl Into<String>, items: Vec<Binding>) -> Self {
        Self {
            site: site.into(),
            items,
        }
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True for a nullary call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Raw binding at `index`; may be an unresolved future for non-strict sites.
    #[must_use]
    pub fn binding(&self, index: usize) -> Option<&Binding> {
        self.items.get(index)
    }

    /// Fails unless exactly `expected` arguments were passed.
    pub fn expect_arity(&self, expected: usize) -> Result<(), SiteError> {
        if self.items.len() == expected {
            Ok(())
        } else {
            Err(SiteError::Arity {
                site: self.site.clone(),
                expected,
                actual: self.items.len(),
            })
        }
    }

    /// Resolved value at `index`.
    pub fn value(&self, index: usize) -> Result<Value, SiteError> {
        let binding = self.items.get(index).ok_or_else(|| SiteError::Arity {
            site: self.site.clone(),
            expected: index + 1,
            actual: self.items.len(),
        })?;
        binding.value().ok_or_else(|| SiteError::Unresolved {
            site: self.site.clone(),
            index,
        })
    }

    /// Every argument, resolved.
    pub fn values(&self) -> Result<Vec<Value>, SiteError> {
        (0..self.items.len()).map(|i| self.value(i)).collect()
    }

    /// Integer at `index`.
    pub fn int(&self, index: usize) -> Result<i64, SiteError> {
        let value = self.value(index)?;
        value.as_int().ok_or_else(|| self.type_error(index, "integer", &value))
    }

    /// Boolean at `index`.
    pub fn bool(&self, index: usize) -> Result<bool, SiteError> {
        let value = self.value(index)?;
        value.as_bool().ok_or_else(|| self.type_error(index, "boolean", &value))
    }

    /// String at `index`.
    pub fn string(&self, index: usize) -> Result<Arc<str>, SiteError> {
        match self.value(index)? {
            Value::Str(s) => Ok(s),
            other => Err(self.type_error(index, "string", &other)),
        }
    }

    fn type_error(&self, index: usize, expected: &'static str, actual: &Value) -> SiteError {
        SiteError::ArgumentType {
            site: self.site.clone(),
            index,
            expected,
            actual: actual.type_name(),
        }
    }
}

type SiteFn = dyn Fn(&Args) -> Result<Option<Value>, SiteError> + Send + Sync;

/// A site backed by a closure that answers at most once.
///
/// `Ok(Some(v))` publishes `v` and ends the call, `Ok(None)` halts silently
/// and `Err(e)` reports `e`.
pub struct FnSite {
    name: String,
    discipline: Discipline,
    f: Box<SiteFn>,
}

impl fmt::Debug for FnSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSite")
            .field("name", &self.name)
            .field("discipline", &self.discipline)
            .finish()
    }
}

impl Site for FnSite {
    fn name(&self) -> &str {
        &self.name
    }

    fn discipline(&self) -> Discipline {
        self.discipline
    }

    fn call(&self, args: Args, caller: CallerHandle) {
        match (self.f)(&args) {
            Ok(Some(value)) => caller.resume(value),
            Ok(None) => caller.halt(),
            Err(err) => caller.report_error(err),
        }
    }
}

/// Immediate site from a closure.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnSite
where
    F: Fn(&Args) -> Result<Option<Value>, SiteError> + Send + Sync + 'static,
{
    FnSite {
        name: name.into(),
        discipline: Discipline::Immediate,
        f: Box::new(f),
    }
}

/// Blocking site from a closure; it runs on the blocking pool.
pub fn blocking_fn<F>(name: impl Into<String>, f: F) -> FnSite
where
    F: Fn(&Args) -> Result<Option<Value>, SiteError> + Send + Sync + 'static,
{
    FnSite {
        name: name.into(),
        discipline: Discipline::Blocking,
        f: Box::new(f),
    }
}

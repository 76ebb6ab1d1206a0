//! Sites the engine semantics lean on: value passing, guards and timers.

use std::time::Duration;

use super::{Args, CallerHandle, Discipline, Site, SiteError};
use crate::types::Value;

/// Publishes its argument, a tuple of its arguments, or `signal` when called
/// with none.
#[derive(Debug, Clone, Copy, Default)]
pub struct Let;

impl Site for Let {
    fn name(&self) -> &str {
        "Let"
    }

    fn call(&self, args: Args, caller: CallerHandle) {
        match args.values() {
            Ok(mut values) => {
                let value = match values.len() {
                    0 => Value::Signal,
                    1 => values.remove(0),
                    _ => Value::tuple(values),
                };
                caller.resume(value);
            }
            Err(err) => caller.report_error(err),
        }
    }
}

/// Publishes `signal` when its argument is true and halts silently otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct If;

impl Site for If {
    fn name(&self) -> &str {
        "If"
    }

    fn call(&self, args: Args, caller: CallerHandle) {
        let guard = args.expect_arity(1).and_then(|()| args.bool(0));
        match guard {
            Ok(true) => caller.resume(Value::Signal),
            Ok(false) => caller.halt(),
            Err(err) => caller.report_error(err),
        }
    }
}

/// Publishes `signal` after the given number of logical ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ltimer;

impl Site for Ltimer {
    fn name(&self) -> &str {
        "Ltimer"
    }

    fn call(&self, args: Args, caller: CallerHandle) {
        match delay_arg(self.name(), &args) {
            Ok(ticks) => caller.delay_logical(ticks),
            Err(err) => caller.report_error(err),
        }
    }
}

/// Publishes `signal` after the given number of wall-clock milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rtimer;

impl Site for Rtimer {
    fn name(&self) -> &str {
        "Rtimer"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Deferred
    }

    fn call(&self, args: Args, caller: CallerHandle) {
        match delay_arg(self.name(), &args) {
            Ok(ms) => caller.resume_after(Duration::from_millis(ms), Value::Signal),
            Err(err) => caller.report_error(err),
        }
    }
}

fn delay_arg(site: &str, args: &Args) -> Result<u64, SiteError> {
    args.expect_arity(1)?;
    let n = args.int(0)?;
    u64::try_from(n).map_err(|_| SiteError::failed(site, format!("negative delay {n}")))
}

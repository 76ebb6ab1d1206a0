//! The queued-returns lane.
//!
//! Responses from sites that answer after their `call` returned (deferred
//! sites, blocking workers, timer callbacks) are pushed here from any thread.
//! The scheduler is the only consumer. It also counts outstanding calls, which
//! lets an idle scheduler tell "waiting for a site" from "stalled".

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::site::SiteError;
use crate::types::{CallId, TokenId, Value};

/// One message from a site to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A publication; the call stays open.
    Publish(Value),
    /// The call is finished.
    Halt,
    /// The call failed.
    Error(SiteError),
    /// Finish by publishing `signal` after this many logical ticks.
    Delay(u64),
    /// The caller is (or is no longer) idle while the call stays open.
    Quiescent(bool),
}

impl Response {
    /// True for the responses that end a call.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Halt | Self::Error(_) | Self::Delay(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish(value) => write!(f, "publish {value}"),
            Self::Halt => f.write_str("halt"),
            Self::Error(err) => write!(f, "error: {err}"),
            Self::Delay(ticks) => write!(f, "delay {ticks}"),
            Self::Quiescent(flag) => write!(f, "quiescent {flag}"),
        }
    }
}

/// A response addressed to the token parked in a call.
#[derive(Debug, Clone)]
pub struct CallResponse {
    /// The invocation.
    pub call: CallId,
    /// The token parked in it.
    pub token: TokenId,
    /// What the site said.
    pub response: Response,
}

/// Thread-safe FIFO of responses plus the outstanding-call count.
#[derive(Debug, Default)]
pub struct ReturnQueue {
    queue: SegQueue<CallResponse>,
    outstanding: AtomicUsize,
    lock: Mutex<()>,
    ready: Condvar,
}

impl ReturnQueue {
    /// Empty queue with nothing outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a response and wakes the scheduler.
    pub fn post(&self, response: CallResponse) {
        self.queue.push(response);
        self.notify();
    }

    /// Takes the oldest response.
    pub fn pop(&self) -> Option<CallResponse> {
        self.queue.pop()
    }

    /// Responses waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True with nothing waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Calls whose handle has not yet sent a terminal response.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn call_opened(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn call_closed(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "outstanding call count underflow");
        self.notify();
    }

    fn notify(&self) {
        let _guard = self.lock.lock();
        self.ready.notify_all();
    }

    /// Blocks until a response is queued or no call is outstanding.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock();
        while self.queue.is_empty() && self.outstanding() > 0 {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut guard, deadline).timed_out() {
                        return !self.queue.is_empty() || self.outstanding() == 0;
                    }
                }
                None => self.ready.wait(&mut guard),
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn response(n: u64) -> CallResponse {
        CallResponse {
            call: CallId(n),
            token: TokenId::new_for_test(0, 0),
            response: Response::Halt,
        }
    }

    #[test]
    fn fifo_order() {
        let q = ReturnQueue::new();
        q.post(response(1));
        q.post(response(2));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().map(|r| r.call), Some(CallId(1)));
        assert_eq!(q.pop().map(|r| r.call), Some(CallId(2)));
        assert!(q.is_empty());
    }

    #[test]
    fn wait_returns_immediately_with_nothing_outstanding() {
        let q = ReturnQueue::new();
        assert!(q.wait(Some(Duration::from_secs(5))));
    }

    #[test]
    fn wait_times_out_while_call_outstanding() {
        let q = ReturnQueue::new();
        q.call_opened();
        assert!(!q.wait(Some(Duration::from_millis(20))));
        q.call_closed();
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn wait_wakes_on_post_from_other_thread() {
        let q = Arc::new(ReturnQueue::new());
        q.call_opened();
        let poster = Arc::clone(&q);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            poster.post(response(9));
            poster.call_closed();
        });
        assert!(q.wait(Some(Duration::from_secs(5))));
        t.join().expect("poster thread");
        assert_eq!(q.pop().map(|r| r.call), Some(CallId(9)));
    }

    #[test]
    fn terminal_responses() {
        assert!(!Response::Publish(Value::Signal).is_terminal());
        assert!(Response::Halt.is_terminal());
        assert!(Response::Delay(3).is_terminal());
        assert!(!Response::Quiescent(true).is_terminal());
        assert_eq!(Response::Quiescent(false).to_string(), "quiescent false");
    }
}

//! The caller handle given to every site call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::runtime::returns::{CallResponse, Response, ReturnQueue};
use crate::runtime::timer::TimerHandle;
use crate::site::SiteError;
use crate::types::{CallId, TokenId, Value};

/// Where responses for one call are delivered.
///
/// A call starts `Inline` while the engine is inside the site's `call` on the
/// scheduler thread; answers given then are buffered and applied as soon as
/// `call` returns. The engine then switches the lane to `Queued`, and later
/// answers go through the returns queue. The switch and the buffering happen
/// under the same lock, so an answer from another thread is never lost in
/// between.
#[derive(Debug)]
pub(crate) enum Lane {
    Inline(Vec<Response>),
    Queued,
}

/// Answers one site call. Not `Clone`: the call ends exactly once.
pub struct CallerHandle {
    call: CallId,
    token: TokenId,
    lane: Arc<Mutex<Lane>>,
    returns: Arc<ReturnQueue>,
    timers: TimerHandle,
    logical_now: u64,
    finished: bool,
}

impl CallerHandle {
    pub(crate) fn new(
        call: CallId,
        token: TokenId,
        lane: Arc<Mutex<Lane>>,
        returns: Arc<ReturnQueue>,
        timers: TimerHandle,
        logical_now: u64,
    ) -> Self {
        returns.call_opened();
        Self {
            call,
            token,
            lane,
            returns,
            timers,
            logical_now,
            finished: false,
        }
    }

    /// The invocation this handle answers.
    #[must_use]
    pub const fn call_id(&self) -> CallId {
        self.call
    }

    /// Logical time of the caller's innermost clock when the call was made.
    #[must_use]
    pub const fn logical_time(&self) -> u64 {
        self.logical_now
    }

    /// Publishes `value`. May be called any number of times before the call
    /// ends; each publication continues the caller separately.
    pub fn publish(&self, value: Value) {
        self.send(Response::Publish(value));
    }

    /// Marks the caller idle (or busy again) without ending the call.
    ///
    /// A quiescent caller lets its logical clocks advance. Sites that wait on
    /// another part of the same program, like a channel read, set this while
    /// they wait.
    pub fn set_quiescent(&self, quiescent: bool) {
        self.send(Response::Quiescent(quiescent));
    }

    /// Publishes `value`, then ends the call.
    pub fn resume(mut self, value: Value) {
        self.send(Response::Publish(value));
        self.finish(Response::Halt);
    }

    /// Ends the call without (further) publications. This is a silent
    /// decline, not an error.
    pub fn halt(mut self) {
        self.finish(Response::Halt);
    }

    /// Ends the call with a failure, reported to the embedder.
    pub fn report_error(mut self, error: SiteError) {
        self.finish(Response::Error(error));
    }

    /// Ends the call by publishing `signal` once the caller's logical clock has
    /// moved `ticks` past its current time.
    pub fn delay_logical(mut self, ticks: u64) {
        self.finish(Response::Delay(ticks));
    }

    /// Publishes `value` and ends the call after `after` of wall-clock time.
    pub fn resume_after(self, after: Duration, value: Value) {
        let timers = self.timers.clone();
        timers.schedule(after, move || self.resume(value));
    }

    fn send(&self, response: Response) {
        let mut lane = self.lane.lock();
        match &mut *lane {
            Lane::Inline(buffer) => buffer.push(response),
            Lane::Queued => {
                drop(lane);
                self.returns.post(CallResponse {
                    call: self.call,
                    token: self.token,
                    response,
                });
            }
        }
    }

    fn finish(&mut self, response: Response) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.send(response);
        self.returns.call_closed();
    }
}

impl Drop for CallerHandle {
    fn drop(&mut self) {
        self.finish(Response::Halt);
    }
}

impl fmt::Debug for CallerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerHandle")
            .field("call", &self.call)
            .field("token", &self.token)
            .field("logical_now", &self.logical_now)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::timer::TimerService;

    struct Fixture {
        lane: Arc<Mutex<Lane>>,
        returns: Arc<ReturnQueue>,
        timers: TimerService,
    }

    impl Fixture {
        fn new(lane: Lane) -> Self {
            Self {
                lane: Arc::new(Mutex::new(lane)),
                returns: Arc::new(ReturnQueue::new()),
                timers: TimerService::new(),
            }
        }

        fn handle(&self) -> CallerHandle {
            CallerHandle::new(
                CallId(1),
                TokenId::new_for_test(0, 0),
                Arc::clone(&self.lane),
                Arc::clone(&self.returns),
                self.timers.handle(),
                7,
            )
        }

        fn buffered(&self) -> Vec<Response> {
            match &*self.lane.lock() {
                Lane::Inline(buffer) => buffer.clone(),
                Lane::Queued => Vec::new(),
            }
        }
    }

    #[test]
    fn inline_answers_are_buffered() {
        let fx = Fixture::new(Lane::Inline(Vec::new()));
        let handle = fx.handle();
        assert_eq!(fx.returns.outstanding(), 1);
        handle.publish(Value::Int(1));
        handle.resume(Value::Int(2));
        assert_eq!(
            fx.buffered(),
            vec![
                Response::Publish(Value::Int(1)),
                Response::Publish(Value::Int(2)),
                Response::Halt
            ]
        );
        assert!(fx.returns.is_empty());
        assert_eq!(fx.returns.outstanding(), 0);
    }

    #[test]
    fn queued_answers_go_to_returns() {
        let fx = Fixture::new(Lane::Queued);
        let handle = fx.handle();
        assert_eq!(handle.logical_time(), 7);
        handle.report_error(SiteError::failed("s", "boom"));
        let posted = fx.returns.pop().expect("posted");
        assert_eq!(posted.call, CallId(1));
        assert_eq!(
            posted.response,
            Response::Error(SiteError::failed("s", "boom"))
        );
    }

    #[test]
    fn quiescence_does_not_end_the_call() {
        let fx = Fixture::new(Lane::Queued);
        let handle = fx.handle();
        handle.set_quiescent(true);
        assert_eq!(fx.returns.outstanding(), 1);
        assert_eq!(
            fx.returns.pop().map(|r| r.response),
            Some(Response::Quiescent(true))
        );
        handle.halt();
        assert_eq!(fx.returns.outstanding(), 0);
    }

    #[test]
    fn drop_counts_as_halt() {
        let fx = Fixture::new(Lane::Queued);
        drop(fx.handle());
        assert_eq!(fx.returns.pop().map(|r| r.response), Some(Response::Halt));
        assert_eq!(fx.returns.outstanding(), 0);
    }

    #[test]
    fn resume_after_answers_from_timer_thread() {
        let fx = Fixture::new(Lane::Queued);
        fx.handle()
            .resume_after(Duration::from_millis(5), Value::Signal);
        assert!(fx.returns.wait(Some(Duration::from_secs(5))));
        // Publication and halt arrive together; halt is posted last.
        while fx.returns.outstanding() > 0 {
            fx.returns.wait(Some(Duration::from_millis(10)));
        }
        let responses: Vec<Response> =
            std::iter::from_fn(|| fx.returns.pop().map(|r| r.response)).collect();
        assert_eq!(responses, vec![Response::Publish(Value::Signal), Response::Halt]);
    }
}

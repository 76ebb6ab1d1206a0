//! Wall-clock timer service for real-time site delays.
//!
//! Deadlines sit in a min-heap ordered by deadline, then submission order. A
//! single background thread, started on first use, sleeps until the earliest
//! deadline and runs the callback. Callbacks only post to the returns queue,
//! so they never touch engine records.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::tracing_compat::{error, trace};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    callback: Callback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    shutdown: bool,
    started: bool,
}

#[derive(Default)]
struct TimerInner {
    state: Mutex<TimerState>,
    wake: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the timer thread. Dropping it stops the thread; callbacks still
/// pending are dropped without running.
#[derive(Default)]
pub struct TimerService {
    inner: Arc<TimerInner>,
}

/// Cloneable scheduling handle.
#[derive(Clone)]
pub struct TimerHandle {
    inner: Arc<TimerInner>,
}

impl TimerService {
    /// A service with no thread yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduling handle sharing this service.
    #[must_use]
    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Callbacks not yet fired.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().heap.len()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.heap)
        };
        self.inner.wake.notify_all();
        if let Some(thread) = self.inner.thread.lock().take() {
            let _ = thread.join();
        }
        // Dropped outside the lock: callbacks may post on drop.
        drop(dropped);
    }
}

impl TimerHandle {
    /// Runs `callback` on the timer thread once `after` has elapsed.
    ///
    /// After the owning service is dropped the callback is dropped unrun.
    pub fn schedule(&self, after: Duration, callback: impl FnOnce() + Send + 'static) {
        let deadline = Instant::now() + after;
        let mut state = self.inner.state.lock();
        if state.shutdown {
            drop(state);
            trace!("timer service stopped, dropping callback");
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(TimerEntry {
            deadline,
            seq,
            callback: Box::new(callback),
        });
        let start = !state.started;
        state.started = true;
        drop(state);
        if start {
            self.start_thread();
        }
        self.inner.wake.notify_one();
    }

    fn start_thread(&self) {
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("orcflow-timer".to_string())
            .spawn(move || timer_loop(&inner));
        match spawned {
            Ok(handle) => *self.inner.thread.lock() = Some(handle),
            Err(err) => {
                error!(error = %err, "failed to spawn timer thread");
                self.inner.state.lock().started = false;
            }
        }
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("pending", &self.pending())
            .finish()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimerHandle")
    }
}

fn timer_loop(inner: &TimerInner) {
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        match state.heap.peek().map(|entry| entry.deadline) {
            None => inner.wake.wait(&mut state),
            Some(deadline) if deadline <= now => {
                let due = state.heap.pop();
                if let Some(entry) = due {
                    drop(state);
                    (entry.callback)();
                    state = inner.state.lock();
                }
            }
            Some(deadline) => {
                let _ = inner.wake.wait_until(&mut state, deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_in_deadline_order() {
        let service = TimerService::new();
        let handle = service.handle();
        let (tx, rx) = mpsc::channel();
        for (label, ms) in [("late", 40_u64), ("early", 5), ("middle", 20)] {
            let tx = tx.clone();
            handle.schedule(Duration::from_millis(ms), move || {
                tx.send(label).expect("receiver alive");
            });
        }
        let order: Vec<&str> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("fired"))
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn drop_discards_pending_callbacks() {
        let service = TimerService::new();
        let (tx, rx) = mpsc::channel::<()>();
        service.handle().schedule(Duration::from_secs(60), move || {
            let _ = tx.send(());
        });
        assert_eq!(service.pending(), 1);
        drop(service);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn schedule_after_drop_is_ignored() {
        let service = TimerService::new();
        let handle = service.handle();
        drop(service);
        handle.schedule(Duration::ZERO, || unreachable!("service is gone"));
    }
}

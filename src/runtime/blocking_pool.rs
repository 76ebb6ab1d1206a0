//! Bounded thread pool for blocking site calls.
//!
//! A blocking site must not stall the scheduler thread, so its `call` runs
//! here instead. Workers are spawned lazily up to `max_threads`; workers above
//! `min_threads` retire after sitting idle for `idle_timeout`. Jobs run in
//! submission order.
//!
//! Jobs cannot be interrupted. If the token that issued the call is discarded
//! meanwhile, the job still runs to completion and its response is ignored by
//! the scheduler.
//!
//! Jobs submitted after shutdown are dropped unrun. A site job owns its
//! `CallerHandle`, so dropping it answers the call with a halt.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::runtime::config::BlockingPoolConfig;
use crate::tracing_compat::{debug, error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
    thread_name_prefix: String,
    active_threads: AtomicUsize,
    busy_threads: AtomicUsize,
    spawned: AtomicUsize,
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Owner of the worker threads. Dropping it drains the queue and joins.
pub struct BlockingPool {
    inner: Arc<PoolInner>,
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct BlockingPoolHandle {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for BlockingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("pending", &self.pending())
            .finish()
    }
}

impl fmt::Debug for BlockingPoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingPoolHandle")
            .field("pending", &self.inner.queue.len())
            .finish()
    }
}

impl BlockingPool {
    /// Starts a pool with `config.min_threads` eager workers.
    #[must_use]
    pub fn new(config: &BlockingPoolConfig) -> Self {
        let max_threads = config.max_threads.max(1).max(config.min_threads);
        let inner = Arc::new(PoolInner {
            min_threads: config.min_threads,
            max_threads,
            idle_timeout: config.idle_timeout,
            thread_name_prefix: config.thread_name_prefix.clone(),
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            lock: Mutex::new(()),
            wake: Condvar::new(),
            threads: Mutex::new(Vec::new()),
        });
        for _ in 0..config.min_threads {
            spawn_worker(&inner);
        }
        Self { inner }
    }

    /// Submission handle sharing this pool.
    #[must_use]
    pub fn handle(&self) -> BlockingPoolHandle {
        BlockingPoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Queues `job`.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        submit(&self.inner, Box::new(job));
    }

    /// Jobs waiting for a worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Acquire)
    }

    /// Stops accepting work, lets workers drain the queue, and joins them.
    ///
    /// Returns false if workers were still running at `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.inner.shutdown.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            notify_all(&self.inner);
            thread::sleep(Duration::from_millis(5));
        }
        for handle in self.inner.threads.lock().drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for BlockingPool {
    fn drop(&mut self) {
        if !self.shutdown_and_wait(Duration::from_secs(5)) {
            debug!("blocking pool dropped with workers still running");
        }
    }
}

impl BlockingPoolHandle {
    /// Queues `job`.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        submit(&self.inner, Box::new(job));
    }
}

fn submit(inner: &Arc<PoolInner>, job: Job) {
    if inner.shutdown.load(Ordering::Acquire) {
        debug!("blocking pool shut down, job dropped");
        drop(job);
        return;
    }
    inner.queue.push(job);
    let active = inner.active_threads.load(Ordering::Acquire);
    let busy = inner.busy_threads.load(Ordering::Acquire);
    if active < inner.max_threads && busy >= active {
        spawn_worker(inner);
    }
    let _guard = inner.lock.lock();
    inner.wake.notify_one();
}

fn notify_all(inner: &PoolInner) {
    let _guard = inner.lock.lock();
    inner.wake.notify_all();
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let n = inner.spawned.fetch_add(1, Ordering::Relaxed);
    inner.active_threads.fetch_add(1, Ordering::AcqRel);
    let worker = Arc::clone(inner);
    let spawned = thread::Builder::new()
        .name(format!("{}-{n}", inner.thread_name_prefix))
        .spawn(move || {
            worker_loop(&worker);
            worker.active_threads.fetch_sub(1, Ordering::AcqRel);
        });
    match spawned {
        Ok(handle) => {
            let mut threads = inner.threads.lock();
            threads.retain(|t| !t.is_finished());
            threads.push(handle);
        }
        Err(err) => {
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            error!(error = %err, "failed to spawn blocking worker");
            if inner.active_threads.load(Ordering::Acquire) == 0 {
                // No worker will ever pick the queue up.
                let mut dropped = 0usize;
                while let Some(job) = inner.queue.pop() {
                    drop(job);
                    dropped += 1;
                }
                error!(dropped, "blocking jobs dropped without a worker");
            }
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.busy_threads.fetch_add(1, Ordering::AcqRel);
            job();
            inner.busy_threads.fetch_sub(1, Ordering::AcqRel);
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        let mut guard = inner.lock.lock();
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        let timed_out = inner
            .wake
            .wait_for(&mut guard, inner.idle_timeout)
            .timed_out();
        drop(guard);
        if timed_out
            && inner.queue.is_empty()
            && inner.active_threads.load(Ordering::Acquire) > inner.min_threads
        {
            trace!("retiring idle blocking worker");
            break;
        }
    }
}

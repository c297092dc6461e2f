//! Microtask queue for worklet runtimes
//!
//! Each runtime owns one Boa context on one thread. Promise reactions
//! enqueued while JavaScript runs are kept here and drained after every
//! scheduled job and every frame, giving the usual "run to completion, then
//! microtasks" semantics without an async executor.

use std::cell::RefCell;
use std::collections::VecDeque;

use boa_engine::job::{FutureJob, JobQueue, NativeJob};
use boa_engine::Context;

/// Single-threaded FIFO of promise jobs.
#[derive(Default)]
pub struct MicrotaskQueue {
    jobs: RefCell<VecDeque<NativeJob>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.jobs.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.borrow().len()
    }
}

impl JobQueue for MicrotaskQueue {
    fn enqueue_promise_job(&self, job: NativeJob, _context: &mut Context) {
        self.jobs.borrow_mut().push_back(job);
    }

    /// Runs jobs until the queue is empty, including jobs enqueued by the
    /// jobs being run.
    fn run_jobs(&self, context: &mut Context) {
        loop {
            // Released before the call so the job can enqueue follow-ups.
            let next = self.jobs.borrow_mut().pop_front();
            let Some(job) = next else {
                break;
            };
            if let Err(err) = job.call(context) {
                tracing::error!("Uncaught error in promise job: {err}");
            }
        }
    }

    fn enqueue_future_job(&self, _future: FutureJob, _context: &mut Context) {
        tracing::warn!("Future jobs are not supported by worklet runtimes, ignoring");
    }
}

//! Cross-thread job submission
//!
//! Two logical threads exist: the main thread, which runs application
//! JavaScript, and the UI thread, which runs worklets and the render loop.
//! The [`Scheduler`] is the only bridge between them. A job is a boxed
//! closure that receives the target thread's state (in practice the
//! runtime living on that thread) when it is finally run.
//!
//! # Ordering
//!
//! Jobs submitted from the same thread to the same queue run in FIFO order.
//! Nothing is promised about interleaving with jobs submitted from other
//! threads. No scheduling call blocks waiting for a job to complete.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::sync::lock;

/// Identifies one of the two execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    /// The context running application code (the "JS thread").
    Main,
    /// The context running worklets and mappers.
    Ui,
}

impl RuntimeKind {
    pub fn other(self) -> Self {
        match self {
            RuntimeKind::Main => RuntimeKind::Ui,
            RuntimeKind::Ui => RuntimeKind::Main,
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Main => f.write_str("main"),
            RuntimeKind::Ui => f.write_str("ui"),
        }
    }
}

/// A unit of work to run on a specific thread.
pub type Job<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

/// Contract for submitting work to the UI or main thread.
pub trait Scheduler<T>: Send + Sync {
    /// Enqueues `job` to run on the UI thread.
    fn schedule_on_ui(&self, job: Job<T>);

    /// Enqueues `job` to run on the main (JS) thread.
    fn schedule_on_js(&self, job: Job<T>);

    fn schedule_on(&self, kind: RuntimeKind, job: Job<T>) {
        match kind {
            RuntimeKind::Main => self.schedule_on_js(job),
            RuntimeKind::Ui => self.schedule_on_ui(job),
        }
    }
}

type Waker = Box<dyn Fn() + Send + Sync>;

/// Scheduler backed by two in-memory FIFO queues.
///
/// The embedding host calls [`QueueScheduler::trigger_ui`] and
/// [`QueueScheduler::trigger_js`] from the corresponding thread to pump the
/// queues. Optional wake hooks are invoked after every enqueue so the host
/// can wake a sleeping loop.
pub struct QueueScheduler<T> {
    ui_jobs: Mutex<VecDeque<Job<T>>>,
    js_jobs: Mutex<VecDeque<Job<T>>>,
    wake_ui: Option<Waker>,
    wake_js: Option<Waker>,
}

impl<T> QueueScheduler<T> {
    /// Creates a scheduler with no wake hooks. Queues are only pumped when
    /// the host polls them.
    pub fn new() -> Self {
        Self {
            ui_jobs: Mutex::new(VecDeque::new()),
            js_jobs: Mutex::new(VecDeque::new()),
            wake_ui: None,
            wake_js: None,
        }
    }

    /// Creates a scheduler that calls `wake_ui` / `wake_js` whenever a job is
    /// enqueued for the respective thread.
    pub fn with_wakers(
        wake_ui: impl Fn() + Send + Sync + 'static,
        wake_js: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            wake_ui: Some(Box::new(wake_ui)),
            wake_js: Some(Box::new(wake_js)),
            ..Self::new()
        }
    }

    pub fn pending_ui(&self) -> usize {
        lock(&self.ui_jobs).len()
    }

    pub fn pending_js(&self) -> usize {
        lock(&self.js_jobs).len()
    }

    /// Runs every queued UI job against `target`, including jobs enqueued by
    /// the jobs themselves. Returns the number of jobs run.
    pub fn trigger_ui(&self, target: &mut T) -> usize {
        Self::drain(&self.ui_jobs, target)
    }

    /// Runs every queued main-thread job against `target`. Returns the number
    /// of jobs run.
    pub fn trigger_js(&self, target: &mut T) -> usize {
        Self::drain(&self.js_jobs, target)
    }

    fn drain(queue: &Mutex<VecDeque<Job<T>>>, target: &mut T) -> usize {
        let mut ran = 0;
        loop {
            // The lock is released before the job runs so jobs can schedule more work.
            let next = lock(queue).pop_front();
            let Some(job) = next else {
                return ran;
            };
            job(target);
            ran += 1;
        }
    }
}

impl<T> Default for QueueScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> for QueueScheduler<T> {
    fn schedule_on_ui(&self, job: Job<T>) {
        lock(&self.ui_jobs).push_back(job);
        tracing::trace!("Job scheduled on UI thread");
        if let Some(wake) = &self.wake_ui {
            wake();
        }
    }

    fn schedule_on_js(&self, job: Job<T>) {
        lock(&self.js_jobs).push_back(job);
        tracing::trace!("Job scheduled on JS thread");
        if let Some(wake) = &self.wake_js {
            wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_fifo_order() {
        let scheduler = QueueScheduler::<Vec<u32>>::new();
        for i in 0..5 {
            scheduler.schedule_on_ui(Box::new(move |log: &mut Vec<u32>| log.push(i)));
        }

        let mut log = Vec::new();
        assert_eq!(scheduler.trigger_ui(&mut log), 5);
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queues_are_independent() {
        let scheduler = QueueScheduler::<Vec<&'static str>>::new();
        scheduler.schedule_on_ui(Box::new(|log: &mut Vec<&'static str>| log.push("ui")));
        scheduler.schedule_on_js(Box::new(|log: &mut Vec<&'static str>| log.push("js")));

        assert_eq!(scheduler.pending_ui(), 1);
        assert_eq!(scheduler.pending_js(), 1);

        let mut log = Vec::new();
        scheduler.trigger_js(&mut log);
        assert_eq!(log, vec!["js"]);
        assert_eq!(scheduler.pending_ui(), 1);
    }

    #[test]
    fn test_schedule_on_routes_by_kind() {
        let scheduler = QueueScheduler::<u32>::new();
        scheduler.schedule_on(RuntimeKind::Main, Box::new(|n: &mut u32| *n += 1));
        scheduler.schedule_on(RuntimeKind::Ui, Box::new(|n: &mut u32| *n += 10));

        let mut n = 0;
        scheduler.trigger_js(&mut n);
        assert_eq!(n, 1);
        scheduler.trigger_ui(&mut n);
        assert_eq!(n, 11);
    }

    #[test]
    fn test_trigger_on_empty_queue() {
        let scheduler = QueueScheduler::<()>::default();
        assert_eq!(scheduler.trigger_ui(&mut ()), 0);
        assert_eq!(scheduler.trigger_js(&mut ()), 0);
    }

    #[test]
    fn test_wakers_fire_on_enqueue() {
        let ui_wakes = Arc::new(AtomicUsize::new(0));
        let js_wakes = Arc::new(AtomicUsize::new(0));
        let (ui, js) = (ui_wakes.clone(), js_wakes.clone());
        let scheduler = QueueScheduler::<()>::with_wakers(
            move || {
                ui.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                js.fetch_add(1, Ordering::SeqCst);
            },
        );

        scheduler.schedule_on_ui(Box::new(|_| {}));
        scheduler.schedule_on_ui(Box::new(|_| {}));
        scheduler.schedule_on_js(Box::new(|_| {}));

        assert_eq!(ui_wakes.load(Ordering::SeqCst), 2);
        assert_eq!(js_wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jobs_scheduled_while_draining_run_in_same_pass() {
        let scheduler = Arc::new(QueueScheduler::<Vec<u32>>::new());
        let inner = scheduler.clone();
        scheduler.schedule_on_ui(Box::new(move |log: &mut Vec<u32>| {
            log.push(1);
            inner.schedule_on_ui(Box::new(|log: &mut Vec<u32>| log.push(2)));
        }));

        let mut log = Vec::new();
        assert_eq!(scheduler.trigger_ui(&mut log), 2);
        assert_eq!(log, vec![1, 2]);
    }

    #[test]
    fn test_cross_thread_submission() {
        let scheduler = Arc::new(QueueScheduler::<u64>::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        scheduler.schedule_on_ui(Box::new(|n: &mut u64| *n += 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut total = 0;
        scheduler.trigger_ui(&mut total);
        assert_eq!(total, 100);
    }

    #[test]
    fn test_runtime_kind_other() {
        assert_eq!(RuntimeKind::Main.other(), RuntimeKind::Ui);
        assert_eq!(RuntimeKind::Ui.other(), RuntimeKind::Main);
        assert_eq!(RuntimeKind::Ui.to_string(), "ui");
    }
}

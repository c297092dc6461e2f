//! Host collaborator interfaces
//!
//! The embedding host owns the render loop and the view tree. These traits
//! are the seams through which the worklet runtimes talk to it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::{Map, Value as JsonValue};

use crate::sync::lock;

/// A plain key/value property bag, fully materialized.
pub type Props = Map<String, JsonValue>;

/// Asks the host's render loop for another animation frame.
pub trait FrameRequester: Send + Sync {
    fn request_frame(&self);
}

/// Applies property updates to views in the host UI tree.
pub trait PropsCommitter: Send + Sync {
    fn commit(&self, view_tag: i64, props: Props);
}

/// Frame requester that records requests in a flag the render loop polls.
#[derive(Debug, Default)]
pub struct FrameSignal {
    requested: AtomicBool,
    requests: AtomicUsize,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the flag, returning whether a frame had been requested.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Total number of requests observed since creation.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl FrameRequester for FrameSignal {
    fn request_frame(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.requested.store(true, Ordering::Release);
    }
}

/// Props committer that collects commits in memory.
#[derive(Debug, Default)]
pub struct PropsBuffer {
    commits: Mutex<Vec<(i64, Props)>>,
}

impl PropsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every commit received so far, oldest first.
    pub fn drain(&self) -> Vec<(i64, Props)> {
        std::mem::take(&mut *lock(&self.commits))
    }

    pub fn len(&self) -> usize {
        lock(&self.commits).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PropsCommitter for PropsBuffer {
    fn commit(&self, view_tag: i64, props: Props) {
        lock(&self.commits).push((view_tag, props));
    }
}

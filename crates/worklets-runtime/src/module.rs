//! The worklet module
//!
//! One [`WorkletModule`] exists per process and is shared by both runtimes.
//! It owns the collaborators that outlive any single runtime: the scheduler,
//! the error handler, the frame requester and the props committer. All
//! cross-thread traffic the runtimes generate is funnelled through it.
//!
//! # Dispatch
//!
//! Cross-thread calls are one-way: [`WorkletModule::run_on_ui`] enqueues the
//! call and returns immediately. Callers that need the result use
//! [`WorkletModule::run_on_ui_with_result`], which layers a [`Completion`]
//! over the same one-way dispatch.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use worklets_common::{
    ErrorHandler, FrameRequester, Props, PropsCommitter, Result, RuntimeKind, Scheduler, WorkletError,
};

use crate::events::EventHandlerId;
use crate::mapper::MapperId;
use crate::mutable::RenderRequest;
use crate::runtime::Runtime;
use crate::shareable::{HostFunction, ShareableValue};

/// Process-wide state shared by the main and UI runtimes.
pub struct WorkletModule {
    scheduler: Arc<dyn Scheduler<Runtime>>,
    error_handler: ErrorHandler<Runtime>,
    frames: Arc<dyn FrameRequester>,
    props: Arc<dyn PropsCommitter>,
    render_requested: AtomicBool,
    next_mapper_id: AtomicU64,
    next_event_handler_id: AtomicU64,
}

impl WorkletModule {
    pub fn new(
        scheduler: Arc<dyn Scheduler<Runtime>>,
        frames: Arc<dyn FrameRequester>,
        props: Arc<dyn PropsCommitter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            error_handler: ErrorHandler::new(scheduler.clone()),
            scheduler,
            frames,
            props,
            render_requested: AtomicBool::new(false),
            next_mapper_id: AtomicU64::new(1),
            next_event_handler_id: AtomicU64::new(1),
        })
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler<Runtime>> {
        &self.scheduler
    }

    pub fn error_handler(&self) -> &ErrorHandler<Runtime> {
        &self.error_handler
    }

    /// Asks the host for a frame unless a request is already outstanding.
    pub fn maybe_request_render(&self) {
        if !self.render_requested.swap(true, Ordering::AcqRel) {
            self.frames.request_frame();
        }
    }

    /// Clears the outstanding-request latch at the start of a frame.
    pub fn frame_started(&self) {
        self.render_requested.store(false, Ordering::Release);
    }

    pub fn is_render_requested(&self) -> bool {
        self.render_requested.load(Ordering::Acquire)
    }

    /// Render hook for mutable values and mapper subscriptions. Holds the
    /// module weakly.
    pub fn render_request(self: &Arc<Self>) -> RenderRequest {
        let module = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(module) = module.upgrade() {
                module.maybe_request_render();
            }
        })
    }

    pub fn schedule(&self, kind: RuntimeKind, job: impl FnOnce(&mut Runtime) + Send + 'static) {
        self.scheduler.schedule_on(kind, Box::new(job));
    }

    /// Runs `worklet` with `args` on the UI runtime and forgets about it.
    /// Failures are reported through the error handler.
    pub fn run_on_ui(&self, worklet: ShareableValue, args: Vec<ShareableValue>) {
        tracing::debug!("Dispatching worklet {} to the UI runtime", worklet.id());
        self.schedule(RuntimeKind::Ui, move |runtime| {
            if let Err(err) = runtime.call_worklet(&worklet, &args) {
                runtime.raise(&err);
            }
        });
    }

    /// Runs `worklet` on the UI runtime and resolves with its adapted result.
    pub fn run_on_ui_with_result(&self, worklet: ShareableValue, args: Vec<ShareableValue>) -> Completion {
        let (sender, receiver) = oneshot::channel();
        self.schedule(RuntimeKind::Ui, move |runtime| {
            let result = runtime.call_worklet(&worklet, &args);
            if sender.send(result).is_err() {
                tracing::debug!("Worklet result dropped, nobody is waiting for it");
            }
        });
        Completion { receiver }
    }

    /// Invokes a host function on the runtime it came from.
    pub fn call_host_function(&self, function: Arc<HostFunction>, args: Vec<ShareableValue>) {
        tracing::debug!("Dispatching host function {} to the {} runtime", function.name(), function.origin());
        self.schedule(function.origin(), move |runtime| {
            if let Err(err) = runtime.call_host_function(&function, &args) {
                tracing::warn!("Host function {} failed: {}", function.name(), err);
            }
        });
    }

    /// Forwards a platform event to the UI runtime.
    pub fn dispatch_event(&self, event_name: impl Into<String>, payload: JsonValue) {
        let event_name = event_name.into();
        self.schedule(RuntimeKind::Ui, move |runtime| {
            if let Err(err) = runtime.on_event(&event_name, &payload) {
                tracing::warn!("Event {} failed: {}", event_name, err);
            }
        });
    }

    pub fn commit_props(&self, view_tag: i64, props: Props) {
        self.props.commit(view_tag, props);
    }

    pub(crate) fn next_mapper_id(&self) -> MapperId {
        MapperId(self.next_mapper_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_event_handler_id(&self) -> EventHandlerId {
        EventHandlerId(self.next_event_handler_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Pending result of [`WorkletModule::run_on_ui_with_result`].
#[must_use = "a completion does nothing unless polled"]
pub struct Completion {
    receiver: oneshot::Receiver<Result<ShareableValue>>,
}

impl Completion {
    /// Takes the result if the worklet has already run.
    pub fn try_take(&mut self) -> Option<Result<ShareableValue>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WorkletError::CompletionDropped)),
        }
    }
}

impl Future for Completion {
    type Output = Result<ShareableValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(WorkletError::CompletionDropped)))
    }
}

//! Error delivery from worker threads to the main thread
//!
//! Errors raised while running worklets or mappers on the UI thread must not
//! crash the process. The [`ErrorHandler`] records the message and schedules
//! a single delivery job on the main thread, where an [`ErrorTarget`]
//! surfaces it to application code.
//!
//! Raises that arrive while a report is still waiting for delivery collapse
//! into that report; the first message wins.

use std::sync::{Arc, Mutex};

use crate::scheduler::Scheduler;
use crate::sync::lock;

/// Receives delivered error messages on the main thread.
pub trait ErrorTarget {
    fn report_error(&mut self, message: &str);
}

/// Something that can be told about an error raised during execution.
pub trait RaiseError {
    /// Records `message` for delivery.
    ///
    /// Returns `true` when the error was accepted and will be delivered, in
    /// which case the caller may treat it as recovered. Returns `false` when
    /// it collapsed into a report that is already pending; the caller should
    /// propagate it instead.
    fn raise(&self, message: String) -> bool;
}

#[derive(Debug, Default)]
struct ErrorWrapper {
    message: String,
    pending: bool,
    handled: bool,
}

/// Captures errors on any thread and delivers them on the main thread.
pub struct ErrorHandler<T> {
    scheduler: Arc<dyn Scheduler<T>>,
    error: Arc<Mutex<ErrorWrapper>>,
}

impl<T: ErrorTarget + 'static> ErrorHandler<T> {
    pub fn new(scheduler: Arc<dyn Scheduler<T>>) -> Self {
        Self {
            scheduler,
            error: Arc::new(Mutex::new(ErrorWrapper {
                handled: true,
                ..ErrorWrapper::default()
            })),
        }
    }

    /// The message waiting for delivery, if any.
    pub fn pending_message(&self) -> Option<String> {
        let error = lock(&self.error);
        error.pending.then(|| error.message.clone())
    }

    fn deliver(error: &Mutex<ErrorWrapper>, target: &mut T) {
        let message = {
            let mut error = lock(error);
            if error.handled {
                return;
            }
            error.handled = true;
            error.pending = false;
            std::mem::take(&mut error.message)
        };

        tracing::error!("{}", message);
        target.report_error(&message);
    }
}

impl<T: ErrorTarget + 'static> RaiseError for ErrorHandler<T> {
    fn raise(&self, message: String) -> bool {
        {
            let mut error = lock(&self.error);
            if error.pending {
                tracing::warn!("Error raised while another report is pending, dropping: {}", message);
                return false;
            }
            error.message = message;
            error.pending = true;
            error.handled = false;
        }

        let error = self.error.clone();
        self.scheduler
            .schedule_on_js(Box::new(move |target: &mut T| Self::deliver(&error, target)));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::QueueScheduler;

    #[derive(Default)]
    struct Collector {
        messages: Vec<String>,
    }

    impl ErrorTarget for Collector {
        fn report_error(&mut self, message: &str) {
            self.messages.push(message.to_string());
        }
    }

    fn handler() -> (Arc<QueueScheduler<Collector>>, ErrorHandler<Collector>) {
        let scheduler: Arc<QueueScheduler<Collector>> = Arc::new(QueueScheduler::new());
        let handler = ErrorHandler::new(scheduler.clone() as Arc<dyn Scheduler<Collector>>);
        (scheduler, handler)
    }

    #[test]
    fn test_raise_delivers_once_on_main_thread() {
        let (scheduler, handler) = handler();
        assert!(handler.raise("boom".to_string()));
        assert_eq!(scheduler.pending_js(), 1);
        assert_eq!(scheduler.pending_ui(), 0);

        let mut collector = Collector::default();
        scheduler.trigger_js(&mut collector);
        assert_eq!(collector.messages, vec!["boom".to_string()]);

        scheduler.trigger_js(&mut collector);
        assert_eq!(collector.messages.len(), 1);
    }

    #[test]
    fn test_concurrent_raises_collapse_to_first() {
        let (scheduler, handler) = handler();
        assert!(handler.raise("first".to_string()));
        assert!(!handler.raise("second".to_string()));
        assert_eq!(handler.pending_message().as_deref(), Some("first"));
        assert_eq!(scheduler.pending_js(), 1);

        let mut collector = Collector::default();
        scheduler.trigger_js(&mut collector);
        assert_eq!(collector.messages, vec!["first".to_string()]);
        assert!(handler.pending_message().is_none());
    }

    #[test]
    fn test_raise_after_delivery_is_accepted() {
        let (scheduler, handler) = handler();
        let mut collector = Collector::default();

        assert!(handler.raise("one".to_string()));
        scheduler.trigger_js(&mut collector);
        assert!(handler.raise("two".to_string()));
        scheduler.trigger_js(&mut collector);

        assert_eq!(collector.messages, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_no_pending_message_initially() {
        let (_scheduler, handler) = handler();
        assert!(handler.pending_message().is_none());
    }

    #[test]
    fn test_raise_from_other_thread() {
        let (scheduler, handler) = handler();
        let handler = Arc::new(handler);
        let remote = handler.clone();
        std::thread::spawn(move || remote.raise("from ui".to_string()))
            .join()
            .unwrap();

        let mut collector = Collector::default();
        scheduler.trigger_js(&mut collector);
        assert_eq!(collector.messages, vec!["from ui".to_string()]);
    }
}

//! Worklets Common
//!
//! Engine-agnostic building blocks shared by the worklet runtimes and their
//! hosts:
//!
//! - [`scheduler`] - the cross-thread job submission contract and a
//!   queue-backed implementation
//! - [`error_handler`] - exactly-once delivery of worker-thread errors to the
//!   main thread
//! - [`host`] - collaborator traits for frame requests and props commits
//! - [`error`] - the error taxonomy used across the workspace

pub mod error;
pub mod error_handler;
pub mod host;
pub mod scheduler;
pub mod sync;

pub use error::{Result, WorkletError};
pub use error_handler::{ErrorHandler, ErrorTarget, RaiseError};
pub use host::{FrameRequester, FrameSignal, Props, PropsBuffer, PropsCommitter};
pub use scheduler::{Job, QueueScheduler, RuntimeKind, Scheduler};

//! Worklets Runtime
//!
//! The engine-facing half of the worklet system. Two Boa-backed
//! [`Runtime`]s, one per thread, share values through [`ShareableValue`]
//! snapshots and coordinate through a process-wide [`WorkletModule`]:
//!
//! - [`shareable`] - the value-conversion engine (`adapt` / `materialize`)
//! - [`worklet_cache`] - compiled worklet functions, one per id per runtime
//! - [`mutable`] - listenable cells used as reactive state
//! - [`mapper`] - the per-frame reactive computation graph
//! - [`events`] - platform event handlers on the UI runtime
//! - [`module`] - the scheduler, error handler and host collaborators
//! - [`runtime`] - the per-thread context and its JavaScript bindings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use worklets_common::{FrameSignal, PropsBuffer, QueueScheduler, RuntimeKind};
//! use worklets_runtime::{Runtime, RuntimeConfig, WorkletModule};
//!
//! let scheduler: Arc<QueueScheduler<Runtime>> = Arc::new(QueueScheduler::new());
//! let module = WorkletModule::new(scheduler.clone(), Arc::new(FrameSignal::new()), Arc::new(PropsBuffer::new()));
//! let mut main = Runtime::new(RuntimeKind::Main, module.clone(), RuntimeConfig::default()).unwrap();
//! let mut ui = Runtime::new(RuntimeKind::Ui, module, RuntimeConfig::default()).unwrap();
//!
//! main.eval("worklets.runOnUI(worklets.makeWorklet('function () { _log(1); }'))()").unwrap();
//! scheduler.trigger_ui(&mut ui);
//! ```

pub mod config;
pub mod events;
pub mod mapper;
pub mod module;
pub mod mutable;
pub mod runtime;
pub mod shareable;
pub mod worklet_cache;

pub use config::{ResourceLimits, RuntimeConfig};
pub use events::{EventHandlerId, EventHandlerRegistry};
pub use mapper::{Mapper, MapperId, MapperRegistry};
pub use module::{Completion, WorkletModule};
pub use mutable::{ListenerHandle, MutableValue};
pub use runtime::Runtime;
pub use shareable::{
    HostFunction, Hint, RemoteObject, ShareableValue, ValueKind, ValueType, WorkletDescriptor, WorkletId,
};
pub use worklet_cache::WorkletCache;

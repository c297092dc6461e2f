//! Native data attached to objects that stand for shared Rust state.

use std::sync::{Arc, Weak};

use boa_engine::{Finalize, JsData, Trace};

use crate::mutable::MutableValue;
use crate::shareable::RemoteObject;

/// Backs the `{ value }` object a mutable value materializes to.
#[derive(Trace, Finalize, JsData)]
pub(crate) struct MutableHandle {
    #[unsafe_ignore_trace]
    pub(crate) value: Arc<MutableValue>,
}

/// Backs the opaque handle a remote object materializes to off the UI
/// runtime. Keeps the remote object alive.
#[derive(Trace, Finalize, JsData)]
pub(crate) struct RemoteHandle {
    #[unsafe_ignore_trace]
    pub(crate) object: Arc<RemoteObject>,
}

/// Backs the live instance of a remote object on the UI runtime. The
/// runtime's remote table owns the instance, so this only points back.
#[derive(Trace, Finalize, JsData)]
pub(crate) struct RemoteInstance {
    #[unsafe_ignore_trace]
    pub(crate) object: Weak<RemoteObject>,
}

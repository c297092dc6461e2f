//! Worklet receivers
//!
//! A worklet never reads its captured closure from global state. Each
//! materialized worklet owns a frozen receiver object that the compiled
//! wrapper receives as its first argument:
//!
//! ```text
//! { _closure, __location, __workletHash }
//! ```
//!
//! On the Rust side a [`ReceiverStack`] records which worklets are currently
//! executing on this runtime, so errors raised by native code called from a
//! worklet can be annotated with that worklet's location.

use std::cell::RefCell;
use std::sync::Arc;

use boa_engine::{js_string, Context, JsObject, JsResult, JsValue};

use crate::runtime::js::freeze;
use crate::shareable::WorkletDescriptor;

#[derive(Default)]
pub(crate) struct ReceiverStack {
    frames: RefCell<Vec<Arc<WorkletDescriptor>>>,
}

impl ReceiverStack {
    /// Pushes `descriptor` for the lifetime of the returned guard.
    pub(crate) fn enter(&self, descriptor: Arc<WorkletDescriptor>) -> ReceiverGuard<'_> {
        self.frames.borrow_mut().push(descriptor);
        ReceiverGuard { stack: self }
    }

    /// Location of the innermost executing worklet, if it recorded one.
    pub(crate) fn current_location(&self) -> Option<String> {
        self.frames
            .borrow()
            .last()
            .and_then(|descriptor| descriptor.location.clone())
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.borrow().len()
    }
}

/// Pops its frame on drop, whatever way the call exits.
pub(crate) struct ReceiverGuard<'a> {
    stack: &'a ReceiverStack,
}

impl Drop for ReceiverGuard<'_> {
    fn drop(&mut self) {
        self.stack.frames.borrow_mut().pop();
    }
}

/// Builds the frozen receiver object handed to a compiled worklet.
pub(crate) fn build_receiver(
    closure: JsValue,
    descriptor: &WorkletDescriptor,
    context: &mut Context,
) -> JsResult<JsObject> {
    let receiver = JsObject::with_object_proto(context.intrinsics());
    receiver.create_data_property_or_throw(js_string!("_closure"), closure, context)?;
    let location = match &descriptor.location {
        Some(location) => JsValue::new(js_string!(location.as_str())),
        None => JsValue::undefined(),
    };
    receiver.create_data_property_or_throw(js_string!("__location"), location, context)?;
    receiver.create_data_property_or_throw(js_string!("__workletHash"), descriptor.id.0 as f64, context)?;
    freeze(&receiver, context)?;
    Ok(receiver)
}

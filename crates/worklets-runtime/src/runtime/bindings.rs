//! JavaScript bindings for the worklet runtimes
//!
//! This module is the single place where native functions are exposed to the
//! JavaScript running in either runtime.
//!
//! # Main runtime
//!
//! A global `worklets` object offers:
//!
//! - `worklets.makeShareable(value)` - adapt and materialize a frozen snapshot
//! - `worklets.makeMutable(value)` - create a UI-owned mutable value
//! - `worklets.makeRemote(object)` - create a remote object handle
//! - `worklets.makeWorklet(source, closure?, location?)` - build a worklet
//! - `worklets.runOnUI(worklet)` - one-way dispatcher to the UI runtime
//! - `worklets.startMapper(worklet, inputs, outputs)` / `worklets.stopMapper(id)`
//! - `worklets.registerEventHandler(eventName, worklet)` /
//!   `worklets.unregisterEventHandler(id)`
//! - `worklets.onError(listener)` - receive errors raised on the UI runtime
//!
//! # UI runtime
//!
//! - `runOnJS(fn)` - one-way dispatcher of a main-runtime function
//! - `_updateProps(viewTag, props)` - buffer a props commit
//! - `_frameTimestamp` - timestamp of the frame being rendered
//!
//! Both runtimes get `_log(...args)`, which forwards to `tracing`.
//!
//! Native functions capture their runtime weakly, never the `Context`.

use std::rc::{Rc, Weak};
use std::sync::Arc;

use boa_engine::object::builtins::JsFunction;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, Finalize, JsArgs, JsNativeError, JsObject, JsResult, JsValue, NativeFunction, Trace,
};
use worklets_common::{Result, RuntimeKind, WorkletError};

use crate::events::EventHandlerId;
use crate::mapper::MapperId;
use crate::mutable::MutableValue;
use crate::runtime::context::{live, RuntimeShared};
use crate::runtime::js::{js_failure, throw};
use crate::runtime::json::js_object_to_map;
use crate::shareable::adapt::adapt;
use crate::shareable::materialize::{local_worklet, materialize, ui_dispatch_proxy};
use crate::shareable::{Hint, ShareableValue, ValueKind, WorkletDescriptor};

#[derive(Trace, Finalize, Clone)]
struct Binding {
    #[unsafe_ignore_trace]
    runtime: Weak<RuntimeShared>,
}

type BindingFn = fn(&JsValue, &[JsValue], &Binding, &mut Context) -> JsResult<JsValue>;

fn function(context: &mut Context, binding: &Binding, name: &str, length: usize, body: BindingFn) -> JsFunction {
    FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(body, binding.clone()),
    )
    .name(js_string!(name))
    .length(length)
    .build()
}

/// Installs the bindings for `runtime`'s kind into `context`.
pub(crate) fn install(runtime: &Rc<RuntimeShared>, context: &mut Context) -> Result<()> {
    let binding = Binding {
        runtime: Rc::downgrade(runtime),
    };

    let log_fn = function(context, &binding, "_log", 0, log);
    context
        .register_global_property(js_string!("_log"), log_fn, Attribute::all())
        .map_err(js_failure)?;

    match runtime.kind {
        RuntimeKind::Main => install_main(&binding, context),
        RuntimeKind::Ui => install_ui(&binding, context),
    }
}

fn install_main(binding: &Binding, context: &mut Context) -> Result<()> {
    let worklets = JsObject::with_object_proto(context.intrinsics());
    let methods: [(&str, usize, BindingFn); 10] = [
        ("makeShareable", 1, make_shareable),
        ("makeMutable", 1, make_mutable),
        ("makeRemote", 1, make_remote),
        ("makeWorklet", 3, make_worklet),
        ("runOnUI", 1, run_on_ui),
        ("startMapper", 3, start_mapper),
        ("stopMapper", 1, stop_mapper),
        ("registerEventHandler", 2, register_event_handler),
        ("unregisterEventHandler", 1, unregister_event_handler),
        ("onError", 1, on_error),
    ];
    for (name, length, body) in methods {
        let method = function(context, binding, name, length, body);
        worklets
            .set(js_string!(name), method, false, context)
            .map_err(js_failure)?;
    }

    context
        .register_global_property(
            js_string!("worklets"),
            worklets,
            Attribute::READONLY | Attribute::NON_ENUMERABLE | Attribute::PERMANENT,
        )
        .map_err(js_failure)?;
    Ok(())
}

fn install_ui(binding: &Binding, context: &mut Context) -> Result<()> {
    let run_on_js_fn = function(context, binding, "runOnJS", 1, run_on_js);
    context
        .register_global_property(js_string!("runOnJS"), run_on_js_fn, Attribute::all())
        .map_err(js_failure)?;

    let update_props_fn = function(context, binding, "_updateProps", 2, update_props);
    context
        .register_global_property(js_string!("_updateProps"), update_props_fn, Attribute::all())
        .map_err(js_failure)?;

    context
        .register_global_property(js_string!("_frameTimestamp"), 0, Attribute::all())
        .map_err(js_failure)?;
    Ok(())
}

fn log(_this: &JsValue, args: &[JsValue], binding: &Binding, _context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let line = args
        .iter()
        .map(|arg| match arg.as_string() {
            Some(s) => s.to_std_string_escaped(),
            None => arg.display().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(target: "worklets::js", runtime = %runtime.kind, "{}", line);
    Ok(JsValue::undefined())
}

fn make_shareable(_this: &JsValue, args: &[JsValue], binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let value = adapt(&runtime, context, args.get_or_undefined(0), Hint::None).map_err(throw)?;
    materialize(&runtime, context, &value).map_err(throw)
}

fn make_mutable(_this: &JsValue, args: &[JsValue], binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let value = adapt(&runtime, context, args.get_or_undefined(0), Hint::Mutable).map_err(throw)?;
    materialize(&runtime, context, &value).map_err(throw)
}

fn make_remote(_this: &JsValue, args: &[JsValue], binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let value = adapt(&runtime, context, args.get_or_undefined(0), Hint::Remote).map_err(throw)?;
    materialize(&runtime, context, &value).map_err(throw)
}

fn make_worklet(_this: &JsValue, args: &[JsValue], binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let source = args
        .get_or_undefined(0)
        .as_string()
        .map(|source| source.to_std_string_escaped())
        .ok_or_else(|| JsNativeError::typ().with_message("makeWorklet expects the worklet source as a string"))?;

    let closure = args.get_or_undefined(1);
    let closure = if closure.is_null_or_undefined() {
        ShareableValue::object(Vec::new())
    } else {
        adapt(&runtime, context, closure, Hint::None).map_err(throw)?
    };
    if !matches!(closure.kind(), ValueKind::Object(_)) {
        return Err(JsNativeError::typ()
            .with_message("makeWorklet expects the closure to be a plain object")
            .into());
    }
    let location = args
        .get_or_undefined(2)
        .as_string()
        .map(|location| location.to_std_string_escaped());

    let descriptor = Arc::new(WorkletDescriptor::new(source, closure, location));
    let value = ShareableValue::new(ValueKind::WorkletFunction(descriptor.clone()));
    let worklet = local_worklet(&runtime, context, &value, &descriptor).map_err(throw)?;
    Ok(worklet.into())
}

/// Adapts `value` and checks that it is a worklet.
fn worklet_arg(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &JsValue,
    caller: &str,
) -> JsResult<(ShareableValue, Arc<WorkletDescriptor>)> {
    let worklet = adapt(runtime, context, value, Hint::None).map_err(throw)?;
    let descriptor = match worklet.kind() {
        ValueKind::WorkletFunction(descriptor) => descriptor.clone(),
        _ => {
            return Err(throw(WorkletError::InvalidArgument(format!(
                "{} expects a worklet, got {:?}",
                caller,
                worklet.value_type()
            ))))
        }
    };
    Ok((worklet, descriptor))
}

fn run_on_ui(_this: &JsValue, args: &[JsValue], binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let (worklet, descriptor) = worklet_arg(&runtime, context, args.get_or_undefined(0), "runOnUI")?;
    let proxy = ui_dispatch_proxy(&runtime, context, &worklet, &descriptor).map_err(throw)?;
    Ok(proxy.into())
}

/// Every mutable value reachable from `value`, each once, in discovery order.
fn collect_mutables(value: &ShareableValue, found: &mut Vec<Arc<MutableValue>>) {
    match value.kind() {
        ValueKind::MutableValueRef(mutable) => {
            if !found.iter().any(|other| other.id() == mutable.id()) {
                found.push(mutable.clone());
            }
        }
        ValueKind::Array(items) => items.iter().for_each(|item| collect_mutables(item, found)),
        ValueKind::Object(entries) => entries.iter().for_each(|(_, entry)| collect_mutables(entry, found)),
        _ => {}
    }
}

fn mutables_arg(runtime: &Rc<RuntimeShared>, context: &mut Context, value: &JsValue) -> JsResult<Vec<Arc<MutableValue>>> {
    let value = adapt(runtime, context, value, Hint::None).map_err(throw)?;
    let mut found = Vec::new();
    collect_mutables(&value, &mut found);
    Ok(found)
}

fn id_arg(value: &JsValue, caller: &str) -> JsResult<u64> {
    value
        .as_number()
        .filter(|id| id.is_finite() && *id >= 0.0)
        .map(|id| id as u64)
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("{} expects a numeric id", caller))
                .into()
        })
}

fn start_mapper(_this: &JsValue, args: &[JsValue], binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let (worklet, _) = worklet_arg(&runtime, context, args.get_or_undefined(0), "startMapper")?;
    let inputs = mutables_arg(&runtime, context, args.get_or_undefined(1))?;
    let outputs = mutables_arg(&runtime, context, args.get_or_undefined(2))?;

    let id = runtime.module.next_mapper_id();
    runtime.module.schedule(RuntimeKind::Ui, move |ui| {
        if let Err(err) = ui.start_mapper(id, &worklet, inputs, outputs) {
            ui.raise(&err);
        }
    });
    Ok(JsValue::new(id.0 as f64))
}

fn stop_mapper(_this: &JsValue, args: &[JsValue], binding: &Binding, _context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let id = MapperId(id_arg(args.get_or_undefined(0), "stopMapper")?);
    runtime.module.schedule(RuntimeKind::Ui, move |ui| ui.stop_mapper(id));
    Ok(JsValue::undefined())
}

fn register_event_handler(
    _this: &JsValue,
    args: &[JsValue],
    binding: &Binding,
    context: &mut Context,
) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let event_name = args
        .get_or_undefined(0)
        .as_string()
        .map(|name| name.to_std_string_escaped())
        .ok_or_else(|| JsNativeError::typ().with_message("registerEventHandler expects an event name"))?;
    let (worklet, _) = worklet_arg(&runtime, context, args.get_or_undefined(1), "registerEventHandler")?;

    let id = runtime.module.next_event_handler_id();
    runtime.module.schedule(RuntimeKind::Ui, move |ui| {
        if let Err(err) = ui.register_event_handler(id, &event_name, &worklet) {
            ui.raise(&err);
        }
    });
    Ok(JsValue::new(id.0 as f64))
}

fn unregister_event_handler(
    _this: &JsValue,
    args: &[JsValue],
    binding: &Binding,
    _context: &mut Context,
) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let id = EventHandlerId(id_arg(args.get_or_undefined(0), "unregisterEventHandler")?);
    runtime.module.schedule(RuntimeKind::Ui, move |ui| {
        ui.unregister_event_handler(id);
    });
    Ok(JsValue::undefined())
}

fn on_error(_this: &JsValue, args: &[JsValue], binding: &Binding, _context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let listener = args
        .get_or_undefined(0)
        .as_callable()
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("onError expects a function"))?;
    runtime.error_listeners.borrow_mut().push(listener);
    Ok(JsValue::undefined())
}

fn run_on_js(_this: &JsValue, args: &[JsValue], _binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let function = args
        .get_or_undefined(0)
        .as_callable()
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("runOnJS expects a function"))?;
    if function.has_own_property(js_string!("__callAsync"), context)? {
        let call_async = function.get(js_string!("__callAsync"), context)?;
        if call_async.is_callable() {
            return Ok(call_async);
        }
    }
    Err(throw(WorkletError::InvalidArgument(
        "runOnJS expects a function captured from the main runtime".to_string(),
    )))
}

fn update_props(_this: &JsValue, args: &[JsValue], binding: &Binding, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&binding.runtime)?;
    let view_tag = args
        .get_or_undefined(0)
        .as_number()
        .ok_or_else(|| JsNativeError::typ().with_message("_updateProps expects a numeric view tag"))?;
    let props = js_object_to_map(args.get_or_undefined(1), context).map_err(throw)?;
    runtime.pending_props.borrow_mut().push((view_tag as i64, props));
    Ok(JsValue::undefined())
}

//! [`ShareableValue`] -> native value.
//!
//! Primitives are rebuilt on every call. Composites are built once per
//! runtime and memoized for as long as the shareable value lives; each
//! materialized composite is also registered for identity, so adapting it
//! again yields the value it came from.

use std::rc::{Rc, Weak};
use std::sync::Arc;

use boa_engine::object::builtins::JsArray;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::PropertyDescriptor;
use boa_engine::{
    js_string, Context, Finalize, JsArgs, JsObject, JsResult, JsValue, NativeFunction, Trace,
};
use worklets_common::{Result, RuntimeKind, WorkletError};

use crate::mutable::MutableValue;
use crate::runtime::context::{live, RuntimeShared};
use crate::runtime::js::{define_hidden, freeze, js_failure, object_keys, throw};
use crate::runtime::receiver::build_receiver;
use crate::shareable::adapt::{adapt, adapt_args};
use crate::shareable::handles::{MutableHandle, RemoteHandle, RemoteInstance};
use crate::shareable::{
    HostFunction, Hint, RemoteObject, Shared, ShareableValue, ValueKind, WorkletDescriptor,
};

pub(crate) fn materialize(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
) -> Result<JsValue> {
    match value.kind() {
        ValueKind::Undefined => Ok(JsValue::undefined()),
        ValueKind::Null => Ok(JsValue::null()),
        ValueKind::Boolean(b) => Ok(JsValue::new(*b)),
        ValueKind::Number(n) => Ok(JsValue::new(*n)),
        ValueKind::String(s) => Ok(JsValue::new(js_string!(s.as_str()))),
        ValueKind::Array(items) => memoized(runtime, value, || array(runtime, context, value, items)),
        ValueKind::Object(entries) => memoized(runtime, value, || object(runtime, context, value, entries)),
        ValueKind::HostFunction(function) => {
            memoized(runtime, value, || host_function(runtime, context, value, function))
        }
        ValueKind::WorkletFunction(descriptor) => memoized(runtime, value, || {
            let function = match runtime.kind {
                RuntimeKind::Ui => local_worklet(runtime, context, value, descriptor)?,
                RuntimeKind::Main => {
                    let proxy = ui_dispatch_proxy(runtime, context, value, descriptor)?;
                    runtime.remember(&proxy, value, context).map_err(js_failure)?;
                    proxy
                }
            };
            Ok(function.into())
        }),
        ValueKind::MutableValueRef(mutable) => {
            memoized(runtime, value, || mutable_handle(runtime, context, value, mutable))
        }
        ValueKind::RemoteObjectRef(remote) => {
            memoized(runtime, value, || remote_object(runtime, context, value, remote))
        }
    }
}

fn memoized(
    runtime: &RuntimeShared,
    value: &ShareableValue,
    build: impl FnOnce() -> Result<JsValue>,
) -> Result<JsValue> {
    match runtime.memo_get(value) {
        Some(native) => Ok(native),
        None => build(),
    }
}

fn array(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
    items: &[ShareableValue],
) -> Result<JsValue> {
    let array = JsArray::new(context);
    for item in items {
        let item = materialize(runtime, context, item)?;
        array.push(item, context).map_err(js_failure)?;
    }
    let array: JsObject = array.into();
    freeze(&array, context).map_err(js_failure)?;
    runtime.remember(&array, value, context).map_err(js_failure)?;
    Ok(array.into())
}

fn object(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
    entries: &[(String, ShareableValue)],
) -> Result<JsValue> {
    let object = JsObject::with_object_proto(context.intrinsics());
    for (key, entry) in entries {
        let entry = materialize(runtime, context, entry)?;
        object
            .create_data_property_or_throw(js_string!(key.as_str()), entry, context)
            .map_err(js_failure)?;
    }
    freeze(&object, context).map_err(js_failure)?;
    runtime.remember(&object, value, context).map_err(js_failure)?;
    Ok(object.into())
}

#[derive(Trace, Finalize)]
struct HostCall {
    #[unsafe_ignore_trace]
    function: Arc<HostFunction>,
    #[unsafe_ignore_trace]
    runtime: Weak<RuntimeShared>,
}

/// The original callable on its origin runtime, a one-way proxy elsewhere.
///
/// Calling the proxy synchronously throws; its hidden `__callAsync` adapts
/// the arguments and schedules the call on the origin runtime.
fn host_function(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
    function: &Arc<HostFunction>,
) -> Result<JsValue> {
    if function.origin() == runtime.kind {
        let original = runtime.tables.borrow().host_functions.value(function.id);
        return original.map(JsValue::from).ok_or_else(|| {
            WorkletError::RuntimeUnavailable(format!(
                "host function {} is no longer available",
                function.name()
            ))
        });
    }

    let capture = || HostCall {
        function: function.clone(),
        runtime: Rc::downgrade(runtime),
    };
    let call_async = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(call_host_async, capture()),
    )
    .name(js_string!(function.name()))
    .build();
    let proxy = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(call_host_sync, capture()),
    )
    .name(js_string!(function.name()))
    .build();

    define_hidden(&proxy, "__callAsync", call_async, context).map_err(js_failure)?;
    define_hidden(&proxy, "__hostFunctionId", function.id as f64, context).map_err(js_failure)?;
    runtime
        .tables
        .borrow_mut()
        .host_proxies
        .insert(function.id, function, ());
    runtime.remember(&proxy, value, context).map_err(js_failure)?;
    Ok(proxy.into())
}

fn call_host_sync(_this: &JsValue, _args: &[JsValue], call: &HostCall, _context: &mut Context) -> JsResult<JsValue> {
    let location = call
        .runtime
        .upgrade()
        .and_then(|runtime| runtime.receivers.current_location());
    Err(throw(WorkletError::cross_thread_sync_call(
        call.function.name(),
        location.as_deref(),
    )))
}

fn call_host_async(_this: &JsValue, args: &[JsValue], call: &HostCall, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&call.runtime)?;
    let args = adapt_args(&runtime, context, args)?;
    runtime.module.call_host_function(call.function.clone(), args);
    Ok(JsValue::undefined())
}

#[derive(Trace, Finalize)]
struct WorkletCall {
    compiled: JsObject,
    receiver: JsObject,
    #[unsafe_ignore_trace]
    descriptor: Arc<WorkletDescriptor>,
    #[unsafe_ignore_trace]
    runtime: Weak<RuntimeShared>,
}

/// Builds a worklet callable in this runtime.
pub(crate) fn local_worklet(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
    descriptor: &Arc<WorkletDescriptor>,
) -> Result<JsObject> {
    let compiled = runtime
        .worklets
        .try_borrow_mut()
        .map_err(|_| WorkletError::RuntimeUnavailable("worklet cache is busy".to_string()))?
        .get_compiled_function(context, descriptor)?;
    let closure = materialize(runtime, context, &descriptor.closure)?;
    let receiver = build_receiver(closure.clone(), descriptor, context).map_err(js_failure)?;

    let call = WorkletCall {
        compiled,
        receiver,
        descriptor: descriptor.clone(),
        runtime: Rc::downgrade(runtime),
    };
    let function: JsObject = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(call_worklet, call),
    )
    .name(js_string!("worklet"))
    .build()
    .into();

    attach_metadata(&function, descriptor, closure, context).map_err(js_failure)?;
    runtime.remember(&function, value, context).map_err(js_failure)?;
    Ok(function)
}

fn call_worklet(this: &JsValue, args: &[JsValue], call: &WorkletCall, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&call.runtime)?;
    let _frame = runtime.receivers.enter(call.descriptor.clone());
    tracing::trace!("Running worklet {} at depth {}", call.descriptor.id.0, runtime.receivers.depth());

    let this = if this.is_object() { this.clone() } else { JsValue::undefined() };
    let mut call_args = Vec::with_capacity(args.len() + 1);
    call_args.push(JsValue::from(call.receiver.clone()));
    call_args.extend_from_slice(args);

    match call.compiled.call(&this, &call_args, context) {
        Ok(result) => Ok(result),
        // Exceptions thrown by the body itself belong to its caller.
        Err(err) if err.as_opaque().is_some() => Err(err),
        Err(err) => {
            let err = WorkletError::javascript_worklet(err.to_string(), call.descriptor.location.as_deref());
            match runtime.kind {
                RuntimeKind::Ui => {
                    runtime.raise(&err);
                    Ok(JsValue::undefined())
                }
                RuntimeKind::Main => Err(throw(err)),
            }
        }
    }
}

#[derive(Trace, Finalize)]
struct UiDispatch {
    #[unsafe_ignore_trace]
    descriptor: Arc<WorkletDescriptor>,
    #[unsafe_ignore_trace]
    value: std::sync::Weak<Shared>,
    #[unsafe_ignore_trace]
    runtime: Weak<RuntimeShared>,
}

/// Builds the callable that runs a worklet on the UI runtime and returns
/// `undefined` without waiting.
pub(crate) fn ui_dispatch_proxy(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
    descriptor: &Arc<WorkletDescriptor>,
) -> Result<JsObject> {
    let closure = materialize(runtime, context, &descriptor.closure)?;
    let dispatch = UiDispatch {
        descriptor: descriptor.clone(),
        value: value.downgrade(),
        runtime: Rc::downgrade(runtime),
    };
    let proxy: JsObject = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(dispatch_to_ui, dispatch),
    )
    .name(js_string!("runOnUI"))
    .build()
    .into();
    attach_metadata(&proxy, descriptor, closure, context).map_err(js_failure)?;
    Ok(proxy)
}

fn dispatch_to_ui(_this: &JsValue, args: &[JsValue], dispatch: &UiDispatch, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&dispatch.runtime)?;
    let worklet = dispatch
        .value
        .upgrade()
        .map(ShareableValue::from_shared)
        .unwrap_or_else(|| ShareableValue::new(ValueKind::WorkletFunction(dispatch.descriptor.clone())));
    let args = adapt_args(&runtime, context, args)?;
    runtime.module.run_on_ui(worklet, args);
    Ok(JsValue::undefined())
}

/// Non-enumerable worklet markers read back by `adapt`.
fn attach_metadata(
    function: &JsObject,
    descriptor: &WorkletDescriptor,
    closure: JsValue,
    context: &mut Context,
) -> JsResult<()> {
    define_hidden(function, "__workletHash", descriptor.id.0 as f64, context)?;
    define_hidden(function, "asString", js_string!(descriptor.source.as_str()), context)?;
    define_hidden(function, "_closure", closure, context)?;
    if let Some(location) = &descriptor.location {
        define_hidden(function, "__location", js_string!(location.as_str()), context)?;
    }
    Ok(())
}

#[derive(Trace, Finalize, Clone)]
struct MutableAccess {
    #[unsafe_ignore_trace]
    value: Arc<MutableValue>,
    #[unsafe_ignore_trace]
    runtime: Weak<RuntimeShared>,
}

/// A frozen object whose `value` accessor reads and writes the cell.
fn mutable_handle(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
    mutable: &Arc<MutableValue>,
) -> Result<JsValue> {
    let prototype = context.intrinsics().constructors().object().prototype();
    let handle = JsObject::from_proto_and_data(prototype, MutableHandle { value: mutable.clone() });

    let access = MutableAccess {
        value: mutable.clone(),
        runtime: Rc::downgrade(runtime),
    };
    let getter = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(read_mutable, access.clone()),
    )
    .name(js_string!("get value"))
    .build();
    let setter = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(write_mutable, access),
    )
    .name(js_string!("set value"))
    .length(1)
    .build();

    handle
        .define_property_or_throw(
            js_string!("value"),
            PropertyDescriptor::builder()
                .get(getter)
                .set(setter)
                .enumerable(true)
                .configurable(false),
            context,
        )
        .map_err(js_failure)?;
    freeze(&handle, context).map_err(js_failure)?;
    runtime.remember(&handle, value, context).map_err(js_failure)?;
    Ok(handle.into())
}

fn read_mutable(_this: &JsValue, _args: &[JsValue], access: &MutableAccess, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&access.runtime)?;
    materialize(&runtime, context, &access.value.get()).map_err(throw)
}

/// Writes land directly on the owning runtime and are redirected to it from
/// the other one.
fn write_mutable(_this: &JsValue, args: &[JsValue], access: &MutableAccess, context: &mut Context) -> JsResult<JsValue> {
    let runtime = live(&access.runtime)?;
    let next = adapt(&runtime, context, args.get_or_undefined(0), Hint::None).map_err(throw)?;

    let target = access.value.clone();
    if target.owner() == runtime.kind {
        target.set(next);
    } else {
        tracing::debug!("Redirecting write of mutable value {} to the {} runtime", target.id(), target.owner());
        runtime.module.schedule(target.owner(), move |_| target.set(next));
    }
    Ok(JsValue::undefined())
}

/// The live instance on the UI runtime, an opaque frozen handle elsewhere.
fn remote_object(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &ShareableValue,
    remote: &Arc<RemoteObject>,
) -> Result<JsValue> {
    let prototype = context.intrinsics().constructors().object().prototype();

    if runtime.kind != RuntimeKind::Ui {
        let handle = JsObject::from_proto_and_data(prototype, RemoteHandle { object: remote.clone() });
        freeze(&handle, context).map_err(js_failure)?;
        runtime.remember(&handle, value, context).map_err(js_failure)?;
        return Ok(handle.into());
    }

    let cached = runtime.tables.borrow().remote_objects.value(remote.id);
    if let Some(instance) = cached {
        return Ok(instance.into());
    }

    let initial = materialize(runtime, context, &remote.initializer)?;
    let instance = JsObject::from_proto_and_data(
        prototype,
        RemoteInstance {
            object: Arc::downgrade(remote),
        },
    );
    if let Some(initial) = initial.as_object() {
        for key in object_keys(initial, context).map_err(js_failure)? {
            let property = initial.get(js_string!(key.as_str()), context).map_err(js_failure)?;
            instance
                .create_data_property_or_throw(js_string!(key.as_str()), property, context)
                .map_err(js_failure)?;
        }
    }
    runtime
        .tables
        .borrow_mut()
        .remote_objects
        .insert(remote.id, remote, instance.clone());
    tracing::debug!("Created live instance of remote object {}", remote.id);
    Ok(instance.into())
}

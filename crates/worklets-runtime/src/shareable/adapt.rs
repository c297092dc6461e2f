//! Native value -> [`ShareableValue`].

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::object::builtins::JsArray;
use boa_engine::{js_string, Context, JsObject, JsResult, JsValue};
use worklets_common::{Result, RuntimeKind, WorkletError};

use crate::mutable::MutableValue;
use crate::runtime::context::RuntimeShared;
use crate::runtime::js::{freeze, js_failure, object_keys, own_number, own_string, throw};
use crate::shareable::handles::{MutableHandle, RemoteHandle, RemoteInstance};
use crate::shareable::{HostFunction, Hint, RemoteObject, ShareableValue, ValueKind, WorkletDescriptor};

/// Objects snapshotted during one `adapt` call. They are frozen and
/// remembered only once the whole graph has converted.
type Snapshots = HashMap<JsObject, ShareableValue>;

/// Adapts `value`, which must belong to `runtime`'s context.
///
/// A failed conversion leaves the caller's objects unfrozen.
pub(crate) fn adapt(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &JsValue,
    hint: Hint,
) -> Result<ShareableValue> {
    let mut snapshots = Snapshots::new();
    let value = adapt_at(runtime, context, value, hint, 0, &mut snapshots)?;

    for (object, snapshot) in snapshots {
        freeze(&object, context).map_err(js_failure)?;
        if !snapshot.contains_host_function() {
            runtime.remember(&object, &snapshot, context).map_err(js_failure)?;
        }
    }
    Ok(value)
}

/// Adapts call arguments inside a native function, throwing on failure.
pub(crate) fn adapt_args(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    args: &[JsValue],
) -> JsResult<Vec<ShareableValue>> {
    args.iter()
        .map(|arg| adapt(runtime, context, arg, Hint::None))
        .collect::<Result<Vec<_>>>()
        .map_err(throw)
}

fn adapt_at(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    value: &JsValue,
    hint: Hint,
    depth: usize,
    snapshots: &mut Snapshots,
) -> Result<ShareableValue> {
    let max_depth = runtime.config.max_conversion_depth;
    if depth > max_depth {
        return Err(WorkletError::ConversionDepthExceeded(max_depth));
    }

    if hint == Hint::None {
        if let Some(object) = value.as_object() {
            if let Some(known) = snapshots.get(object) {
                return Ok(known.clone());
            }
            if let Some(known) = runtime.identity_lookup(object, context).map_err(js_failure)? {
                return Ok(known);
            }
        }
    }

    match hint {
        Hint::None => {}
        Hint::Mutable => {
            let initial = adapt_at(runtime, context, value, Hint::None, depth + 1, snapshots)?;
            let mutable = MutableValue::with_render_request(
                RuntimeKind::Ui,
                initial,
                runtime.module.render_request(),
            );
            tracing::debug!("Created mutable value {}", mutable.id());
            return Ok(ShareableValue::mutable(Arc::new(mutable)));
        }
        Hint::Remote => {
            if value.as_object().map_or(true, |object| object.is_callable()) {
                return Err(WorkletError::InvalidArgument(format!(
                    "remote objects must be created from an object, got {}",
                    value.type_of()
                )));
            }
            let initializer = adapt_at(runtime, context, value, Hint::None, depth + 1, snapshots)?;
            return Ok(ShareableValue::remote(Arc::new(RemoteObject::new(initializer))));
        }
    }

    if value.is_undefined() {
        return Ok(ShareableValue::undefined());
    }
    if value.is_null() {
        return Ok(ShareableValue::null());
    }
    if let Some(b) = value.as_boolean() {
        return Ok(ShareableValue::from(b));
    }
    if let Some(n) = value.as_number() {
        return Ok(ShareableValue::from(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(ShareableValue::from(s.to_std_string_escaped()));
    }
    if let Some(symbol) = value.as_symbol() {
        return Ok(ShareableValue::from(symbol.descriptive_string().to_std_string_escaped()));
    }

    let Some(object) = value.as_object() else {
        return Err(WorkletError::UnsupportedValueType(value.type_of().to_string()));
    };

    if let Some(handle) = object.downcast_ref::<MutableHandle>() {
        return Ok(ShareableValue::mutable(handle.value.clone()));
    }
    if let Some(handle) = object.downcast_ref::<RemoteHandle>() {
        return Ok(ShareableValue::remote(handle.object.clone()));
    }
    let instance = object
        .downcast_ref::<RemoteInstance>()
        .map(|instance| instance.object.upgrade());
    if let Some(Some(remote)) = instance {
        return Ok(ShareableValue::remote(remote));
    }

    if object.is_callable() {
        return adapt_function(runtime, context, object, depth, snapshots);
    }
    if object.is_array() {
        return adapt_array(runtime, context, object, depth, snapshots);
    }
    adapt_object(runtime, context, object, depth, snapshots)
}

fn adapt_function(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    function: &JsObject,
    depth: usize,
    snapshots: &mut Snapshots,
) -> Result<ShareableValue> {
    if own_number(function, "__workletHash", context).map_err(js_failure)?.is_some() {
        return adapt_worklet(runtime, context, function, depth, snapshots);
    }

    if let Some(id) = own_number(function, "__hostFunctionId", context).map_err(js_failure)? {
        let handle = runtime.tables.borrow().host_proxies.get(id as u64);
        if let Some((handle, ())) = handle {
            return Ok(ShareableValue::new(ValueKind::HostFunction(handle)));
        }
    }

    let name = function
        .get(js_string!("name"), context)
        .map_err(js_failure)?
        .as_string()
        .map(|name| name.to_std_string_escaped())
        .unwrap_or_default();
    let handle = Arc::new(HostFunction::new(runtime.kind, name));
    runtime
        .tables
        .borrow_mut()
        .host_functions
        .insert(handle.id, &handle, function.clone());

    let value = ShareableValue::new(ValueKind::HostFunction(handle));
    runtime
        .identity_register(function, &value, context)
        .map_err(js_failure)?;
    tracing::debug!("Adapted host function {} on the {} runtime", value.id(), runtime.kind);
    Ok(value)
}

fn adapt_worklet(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    function: &JsObject,
    depth: usize,
    snapshots: &mut Snapshots,
) -> Result<ShareableValue> {
    let source = own_string(function, "asString", context)
        .map_err(js_failure)?
        .ok_or_else(|| WorkletError::UnsupportedValueType("worklet without source".to_string()))?;
    let location = own_string(function, "__location", context).map_err(js_failure)?;

    let closure = function.get(js_string!("_closure"), context).map_err(js_failure)?;
    let closure = if closure.is_undefined() {
        ShareableValue::object(Vec::new())
    } else {
        adapt_at(runtime, context, &closure, Hint::None, depth + 1, snapshots)?
    };
    if !matches!(closure.kind(), ValueKind::Object(_)) {
        return Err(WorkletError::UnsupportedValueType(format!(
            "worklet closure must be an object, got {:?}",
            closure.value_type()
        )));
    }

    let value = ShareableValue::worklet(WorkletDescriptor::new(source, closure, location));
    runtime
        .identity_register(function, &value, context)
        .map_err(js_failure)?;
    Ok(value)
}

fn adapt_array(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    object: &JsObject,
    depth: usize,
    snapshots: &mut Snapshots,
) -> Result<ShareableValue> {
    let array = JsArray::from_object(object.clone()).map_err(js_failure)?;
    let length = array.length(context).map_err(js_failure)?;
    let limit = runtime.config.max_array_length;
    if length > limit as u64 {
        return Err(WorkletError::ArrayTooLarge { length, limit });
    }
    let mut items = Vec::with_capacity(length as usize);
    for i in 0..length {
        let item = array.get(i, context).map_err(js_failure)?;
        items.push(adapt_at(runtime, context, &item, Hint::None, depth + 1, snapshots)?);
    }
    Ok(ShareableValue::array(items))
}

fn adapt_object(
    runtime: &Rc<RuntimeShared>,
    context: &mut Context,
    object: &JsObject,
    depth: usize,
    snapshots: &mut Snapshots,
) -> Result<ShareableValue> {
    let keys = object_keys(object, context).map_err(js_failure)?;
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let property = object
            .get(js_string!(key.as_str()), context)
            .map_err(js_failure)?;
        let property = adapt_at(runtime, context, &property, Hint::None, depth + 1, snapshots)?;
        entries.push((key, property));
    }
    let value = ShareableValue::object(entries);

    // Snapshots taken on the main runtime freeze the original so it cannot
    // drift from the snapshot, and materialize back to it.
    if runtime.kind == RuntimeKind::Main {
        snapshots.insert(object.clone(), value.clone());
    }
    Ok(value)
}

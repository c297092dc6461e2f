//! Small helpers over the Boa object API.

use boa_engine::object::IntegrityLevel;
use boa_engine::property::PropertyDescriptor;
use boa_engine::{js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsValue};
use worklets_common::WorkletError;

/// Own enumerable string keys of `object`, in property order.
pub(crate) fn object_keys(object: &JsObject, context: &mut Context) -> JsResult<Vec<String>> {
    let object_ctor = context.intrinsics().constructors().object().constructor();
    let keys_fn = object_ctor.get(js_string!("keys"), context)?;
    let keys_fn = keys_fn
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("Object.keys is not callable"))?;
    let keys = keys_fn.call(&JsValue::undefined(), &[object.clone().into()], context)?;
    let keys = keys
        .as_object()
        .ok_or_else(|| JsNativeError::typ().with_message("Object.keys did not return an array"))?;

    let length = keys.get(js_string!("length"), context)?.to_length(context)?;
    let mut result = Vec::with_capacity(length as usize);
    for i in 0..length {
        let key = keys.get(i, context)?;
        result.push(key.to_string(context)?.to_std_string_escaped());
    }
    Ok(result)
}

pub(crate) fn freeze(object: &JsObject, context: &mut Context) -> JsResult<()> {
    object.set_integrity_level(IntegrityLevel::Frozen, context)?;
    Ok(())
}

/// Defines a non-enumerable, read-only property.
pub(crate) fn define_hidden(
    object: &JsObject,
    key: &str,
    value: impl Into<JsValue>,
    context: &mut Context,
) -> JsResult<()> {
    object.define_property_or_throw(
        js_string!(key),
        PropertyDescriptor::builder()
            .value(value)
            .writable(false)
            .enumerable(false)
            .configurable(false),
        context,
    )?;
    Ok(())
}

pub(crate) fn own_string(object: &JsObject, key: &str, context: &mut Context) -> JsResult<Option<String>> {
    if !object.has_own_property(js_string!(key), context)? {
        return Ok(None);
    }
    Ok(object
        .get(js_string!(key), context)?
        .as_string()
        .map(|s| s.to_std_string_escaped()))
}

pub(crate) fn own_number(object: &JsObject, key: &str, context: &mut Context) -> JsResult<Option<f64>> {
    if !object.has_own_property(js_string!(key), context)? {
        return Ok(None);
    }
    Ok(object.get(js_string!(key), context)?.as_number())
}

/// Converts a worklet error into a JavaScript exception.
pub(crate) fn throw(err: WorkletError) -> JsError {
    let native = if err.is_type_error() {
        JsNativeError::typ()
    } else {
        JsNativeError::error()
    };
    native.with_message(err.to_string()).into()
}

pub(crate) fn js_failure(err: JsError) -> WorkletError {
    WorkletError::JavaScriptExecution(err.to_string())
}

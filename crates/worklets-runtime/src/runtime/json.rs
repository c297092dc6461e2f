//! JSON <-> JavaScript value conversions
//!
//! Used at the two plain-data edges of the runtime:
//!
//! - event payloads arriving from the host as serialized JSON
//! - props bags handed to the host's commit pipeline
//!
//! # Type Mapping
//!
//! | JSON Type | JavaScript Type |
//! |-----------|-----------------|
//! | null | null |
//! | boolean | Boolean |
//! | number | Number |
//! | string | String |
//! | array | Array |
//! | object | Object |
//!
//! Going the other way, `undefined`, symbols and functions become `null`.
//! Non-finite numbers also become `null`, matching `JSON.stringify`.

use boa_engine::{js_string, object::builtins::JsArray, object::JsObject, value::JsValue, Context};
use serde_json::{Map, Value as JsonValue};
use worklets_common::{Result, WorkletError};

use crate::runtime::js::{js_failure, object_keys};

/// Deepest structure converted before giving up, guards cyclic props.
const MAX_DEPTH: usize = 64;

/// Longest array converted; sparse arrays count their holes.
const MAX_ARRAY_LENGTH: usize = 1 << 20;

/// Convert a `serde_json::Value` into a fresh JavaScript value.
pub fn json_to_js_value(json: &JsonValue, context: &mut Context) -> Result<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(*b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| WorkletError::InvalidArgument("Number out of range".into())),
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s.as_str()))),
        JsonValue::Array(items) => {
            let array = JsArray::new(context);
            for item in items {
                let value = json_to_js_value(item, context)?;
                array.push(value, context).map_err(js_failure)?;
            }
            Ok(array.into())
        }
        JsonValue::Object(entries) => {
            let object = JsObject::with_object_proto(context.intrinsics());
            for (key, value) in entries {
                let value = json_to_js_value(value, context)?;
                object
                    .create_data_property_or_throw(js_string!(key.as_str()), value, context)
                    .map_err(js_failure)?;
            }
            Ok(object.into())
        }
    }
}

/// Convert a JavaScript value into `serde_json::Value`.
pub fn js_value_to_json(value: &JsValue, context: &mut Context) -> Result<JsonValue> {
    to_json(value, context, 0)
}

/// Convert a JavaScript object into a JSON map, as used for props bags.
///
/// # Errors
///
/// Returns `WorkletError::InvalidArgument` if `value` is not a plain object.
pub fn js_object_to_map(value: &JsValue, context: &mut Context) -> Result<Map<String, JsonValue>> {
    let is_plain_object = value
        .as_object()
        .is_some_and(|object| !object.is_array() && !object.is_callable());
    if !is_plain_object {
        return Err(WorkletError::InvalidArgument(format!(
            "expected an object, got {}",
            value.type_of()
        )));
    }
    match to_json(value, context, 0)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(WorkletError::InvalidArgument(format!("expected an object, got {}", other))),
    }
}

fn to_json(value: &JsValue, context: &mut Context, depth: usize) -> Result<JsonValue> {
    if depth > MAX_DEPTH {
        return Err(WorkletError::ConversionDepthExceeded(MAX_DEPTH));
    }

    if value.is_undefined() || value.is_null() || value.is_symbol() {
        return Ok(JsonValue::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(JsonValue::Bool(b));
    }

    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
            return Ok(JsonValue::Number((n as i64).into()));
        }
        return Ok(serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null));
    }

    if let Some(s) = value.as_string() {
        return Ok(JsonValue::String(s.to_std_string_escaped()));
    }

    if value.is_bigint() {
        return Err(WorkletError::UnsupportedValueType("bigint".into()));
    }

    let Some(object) = value.as_object() else {
        return Ok(JsonValue::Null);
    };

    if object.is_callable() {
        return Ok(JsonValue::Null);
    }

    if object.is_array() {
        let array = JsArray::from_object(object.clone()).map_err(js_failure)?;
        let length = array.length(context).map_err(js_failure)?;
        if length > MAX_ARRAY_LENGTH as u64 {
            return Err(WorkletError::ArrayTooLarge {
                length,
                limit: MAX_ARRAY_LENGTH,
            });
        }
        let mut result = Vec::with_capacity(length as usize);
        for i in 0..length {
            let element = array.get(i, context).map_err(js_failure)?;
            result.push(to_json(&element, context, depth + 1)?);
        }
        return Ok(JsonValue::Array(result));
    }

    let mut result = Map::new();
    for key in object_keys(object, context).map_err(js_failure)? {
        let property = object.get(js_string!(key.as_str()), context).map_err(js_failure)?;
        result.insert(key, to_json(&property, context, depth + 1)?);
    }
    Ok(JsonValue::Object(result))
}

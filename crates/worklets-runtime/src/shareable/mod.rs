//! Shareable values
//!
//! A [`ShareableValue`] is an immutable, context-independent snapshot of a
//! JavaScript value. It is produced by adapting a value inside one runtime
//! and can be materialized into an equivalent native value inside any
//! runtime, on any thread.
//!
//! # Value Mapping
//!
//! | JavaScript value | ValueType |
//! |------------------|-----------|
//! | undefined | Undefined |
//! | null | Null |
//! | boolean | Boolean |
//! | number | Number |
//! | string, symbol | String |
//! | array | Array |
//! | plain object | Object |
//! | function | HostFunction |
//! | worklet function | WorkletFunction |
//! | mutable value handle | MutableValueRef |
//! | remote object handle | RemoteObjectRef |
//!
//! Composite values are adapted eagerly and recursively. Each value carries
//! a process-unique id that keys the per-runtime side tables (identity and
//! materialization memo); those tables only hold weak references back to
//! the value, so a `ShareableValue` lives exactly as long as its longest
//! holder.

pub(crate) mod adapt;
pub(crate) mod handles;
pub(crate) mod materialize;
pub(crate) mod side_table;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value as JsonValue;
use worklets_common::RuntimeKind;

use crate::mutable::MutableValue;
use crate::worklet_cache::is_bindable;

static NEXT_VALUE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_VALUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// The closed set of shareable value tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
    HostFunction,
    WorkletFunction,
    MutableValueRef,
    RemoteObjectRef,
}

/// Optional hint forcing how `adapt` classifies a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hint {
    #[default]
    None,
    /// Wrap the value in a new [`MutableValue`].
    Mutable,
    /// Wrap the object in a new [`RemoteObject`].
    Remote,
}

/// Tag-specific payload of a [`ShareableValue`].
#[derive(Debug)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<ShareableValue>),
    Object(Vec<(String, ShareableValue)>),
    HostFunction(Arc<HostFunction>),
    WorkletFunction(Arc<WorkletDescriptor>),
    MutableValueRef(Arc<MutableValue>),
    RemoteObjectRef(Arc<RemoteObject>),
}

/// Handle to a function that may only run on the runtime it came from.
///
/// The callable itself stays in the origin runtime's host-function table for
/// as long as any handle is alive.
#[derive(Debug)]
pub struct HostFunction {
    pub(crate) id: u64,
    pub(crate) origin: RuntimeKind,
    pub(crate) name: String,
}

impl HostFunction {
    pub(crate) fn new(origin: RuntimeKind, name: String) -> Self {
        Self { id: next_id(), origin, name }
    }

    pub fn origin(&self) -> RuntimeKind {
        self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Stable identifier of a worklet body; the compiled-function cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkletId(pub u64);

impl WorkletId {
    /// Derives an id from worklet source text (FNV-1a, truncated to 53 bits
    /// so it survives a round trip through a JavaScript number).
    pub fn from_source(source: &str) -> Self {
        Self::for_worklet(source, &[])
    }

    /// Derives an id from the source and the closure names its compiled
    /// wrapper binds as locals. Key order does not matter; with no keys this
    /// equals [`WorkletId::from_source`].
    pub fn for_worklet(source: &str, bound_keys: &[&str]) -> Self {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut keys = bound_keys.to_vec();
        keys.sort_unstable();
        keys.dedup();
        let key_bytes = keys
            .into_iter()
            .flat_map(|key| std::iter::once(0u8).chain(key.bytes()));
        let hash = source
            .bytes()
            .chain(key_bytes)
            .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME));
        WorkletId(hash & ((1 << 53) - 1))
    }
}

/// Immutable metadata of a worklet captured when it is adapted.
#[derive(Debug)]
pub struct WorkletDescriptor {
    pub id: WorkletId,
    pub source: String,
    pub location: Option<String>,
    /// Captured closure values; always an Object-tagged value
    pub closure: ShareableValue,
}

impl WorkletDescriptor {
    pub fn new(source: impl Into<String>, closure: ShareableValue, location: Option<String>) -> Self {
        let source = source.into();
        let id = WorkletId::for_worklet(&source, &bound_keys(&closure));
        Self {
            id,
            source,
            location,
            closure,
        }
    }

    /// Closure keys the compiled wrapper binds as local names.
    pub(crate) fn bound_keys(&self) -> Vec<&str> {
        bound_keys(&self.closure)
    }
}

fn bound_keys(closure: &ShareableValue) -> Vec<&str> {
    match closure.kind() {
        ValueKind::Object(entries) => entries
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| is_bindable(key))
            .collect(),
        _ => Vec::new(),
    }
}

/// An object whose live instance exists only on the UI runtime.
///
/// The main runtime holds an opaque handle; the UI runtime builds the live
/// object from `initializer` on first access and reuses it afterwards.
#[derive(Debug)]
pub struct RemoteObject {
    pub(crate) id: u64,
    pub(crate) initializer: ShareableValue,
}

impl RemoteObject {
    pub fn new(initializer: ShareableValue) -> Self {
        Self { id: next_id(), initializer }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    id: u64,
    kind: ValueKind,
    contains_host_function: bool,
}

/// Immutable, reference-counted, context-agnostic snapshot of a JS value.
#[derive(Debug, Clone)]
pub struct ShareableValue {
    inner: Arc<Shared>,
}

impl ShareableValue {
    pub fn new(kind: ValueKind) -> Self {
        let contains_host_function = match &kind {
            ValueKind::HostFunction(_) => true,
            ValueKind::Array(items) => items.iter().any(ShareableValue::contains_host_function),
            ValueKind::Object(entries) => entries.iter().any(|(_, value)| value.contains_host_function()),
            ValueKind::WorkletFunction(descriptor) => descriptor.closure.contains_host_function(),
            _ => false,
        };
        Self {
            inner: Arc::new(Shared {
                id: next_id(),
                kind,
                contains_host_function,
            }),
        }
    }

    pub fn undefined() -> Self {
        Self::new(ValueKind::Undefined)
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn array(items: Vec<ShareableValue>) -> Self {
        Self::new(ValueKind::Array(items))
    }

    pub fn object(entries: Vec<(String, ShareableValue)>) -> Self {
        Self::new(ValueKind::Object(entries))
    }

    pub fn worklet(descriptor: WorkletDescriptor) -> Self {
        Self::new(ValueKind::WorkletFunction(Arc::new(descriptor)))
    }

    pub fn mutable(value: Arc<MutableValue>) -> Self {
        Self::new(ValueKind::MutableValueRef(value))
    }

    pub fn remote(object: Arc<RemoteObject>) -> Self {
        Self::new(ValueKind::RemoteObjectRef(object))
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> &ValueKind {
        &self.inner.kind
    }

    pub fn value_type(&self) -> ValueType {
        match self.kind() {
            ValueKind::Undefined => ValueType::Undefined,
            ValueKind::Null => ValueType::Null,
            ValueKind::Boolean(_) => ValueType::Boolean,
            ValueKind::Number(_) => ValueType::Number,
            ValueKind::String(_) => ValueType::String,
            ValueKind::Array(_) => ValueType::Array,
            ValueKind::Object(_) => ValueType::Object,
            ValueKind::HostFunction(_) => ValueType::HostFunction,
            ValueKind::WorkletFunction(_) => ValueType::WorkletFunction,
            ValueKind::MutableValueRef(_) => ValueType::MutableValueRef,
            ValueKind::RemoteObjectRef(_) => ValueType::RemoteObjectRef,
        }
    }

    /// True if this value, or anything it transitively holds, is a function
    /// that can only run on its origin runtime.
    pub fn contains_host_function(&self) -> bool {
        self.inner.contains_host_function
    }

    /// True if both handles refer to the same adapted value.
    pub fn ptr_eq(&self, other: &ShareableValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.kind() {
            ValueKind::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind() {
            ValueKind::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.kind() {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Plain-data view of the value. Functions and handles become `null`,
    /// mutable values contribute their current contents.
    pub fn to_json(&self) -> JsonValue {
        match self.kind() {
            ValueKind::Undefined | ValueKind::Null => JsonValue::Null,
            ValueKind::Boolean(b) => JsonValue::Bool(*b),
            ValueKind::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            ValueKind::String(s) => JsonValue::String(s.clone()),
            ValueKind::Array(items) => JsonValue::Array(items.iter().map(ShareableValue::to_json).collect()),
            ValueKind::Object(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            ValueKind::MutableValueRef(mutable) => mutable.get().to_json(),
            ValueKind::HostFunction(_) | ValueKind::WorkletFunction(_) | ValueKind::RemoteObjectRef(_) => {
                JsonValue::Null
            }
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner
    }

    pub(crate) fn from_shared(inner: Arc<Shared>) -> Self {
        Self { inner }
    }
}

impl From<bool> for ShareableValue {
    fn from(value: bool) -> Self {
        Self::new(ValueKind::Boolean(value))
    }
}

impl From<f64> for ShareableValue {
    fn from(value: f64) -> Self {
        Self::new(ValueKind::Number(value))
    }
}

impl From<i32> for ShareableValue {
    fn from(value: i32) -> Self {
        Self::new(ValueKind::Number(f64::from(value)))
    }
}

impl From<&str> for ShareableValue {
    fn from(value: &str) -> Self {
        Self::new(ValueKind::String(value.to_string()))
    }
}

impl From<String> for ShareableValue {
    fn from(value: String) -> Self {
        Self::new(ValueKind::String(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_unique() {
        let a = ShareableValue::from(1.0);
        let b = ShareableValue::from(1.0);
        assert_ne!(a.id(), b.id());
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn test_value_types() {
        assert_eq!(ShareableValue::undefined().value_type(), ValueType::Undefined);
        assert_eq!(ShareableValue::null().value_type(), ValueType::Null);
        assert_eq!(ShareableValue::from(true).value_type(), ValueType::Boolean);
        assert_eq!(ShareableValue::from(2).value_type(), ValueType::Number);
        assert_eq!(ShareableValue::from("x").value_type(), ValueType::String);
        assert_eq!(ShareableValue::array(vec![]).value_type(), ValueType::Array);
        assert_eq!(ShareableValue::object(vec![]).value_type(), ValueType::Object);
    }

    #[test]
    fn test_host_function_flag_propagates() {
        let host = ShareableValue::new(ValueKind::HostFunction(Arc::new(HostFunction::new(
            RuntimeKind::Main,
            "log".to_string(),
        ))));
        assert!(host.contains_host_function());

        let nested = ShareableValue::object(vec![(
            "callbacks".to_string(),
            ShareableValue::array(vec![ShareableValue::from(1), host]),
        )]);
        assert!(nested.contains_host_function());

        let worklet = ShareableValue::worklet(WorkletDescriptor::new("function () {}", nested, None));
        assert!(worklet.contains_host_function());

        let plain = ShareableValue::array(vec![ShareableValue::from("a")]);
        assert!(!plain.contains_host_function());
    }

    #[test]
    fn test_worklet_id_is_stable_and_js_safe() {
        let a = WorkletId::from_source("function () { return 1; }");
        let b = WorkletId::from_source("function () { return 1; }");
        let c = WorkletId::from_source("function () { return 2; }");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.0 < (1 << 53));
        assert_eq!(a.0 as f64 as u64, a.0);
    }

    #[test]
    fn test_closure_keys() {
        let closure = ShareableValue::object(vec![
            ("width".to_string(), ShareableValue::from(10)),
            ("height".to_string(), ShareableValue::from(20)),
        ]);
        let descriptor = WorkletDescriptor::new("function () {}", closure, Some("a.js (1:1)".into()));
        assert_eq!(descriptor.bound_keys(), vec!["width", "height"]);
    }

    #[test]
    fn test_worklet_id_depends_on_bound_keys() {
        let source = "function () { return a; }";
        let closure = |keys: &[&str]| {
            ShareableValue::object(keys.iter().map(|key| (key.to_string(), ShareableValue::from(1))).collect())
        };

        let plain = WorkletDescriptor::new(source, closure(&[]), None);
        let one = WorkletDescriptor::new(source, closure(&["a"]), None);
        let two = WorkletDescriptor::new(source, closure(&["a", "b"]), None);
        let swapped = WorkletDescriptor::new(source, closure(&["b", "a"]), None);
        let unbindable = WorkletDescriptor::new(source, closure(&["a", "not-bound"]), None);

        assert_eq!(plain.id, WorkletId::from_source(source));
        assert_ne!(one.id, two.id);
        assert_ne!(plain.id, one.id);
        assert_eq!(two.id, swapped.id);
        assert_eq!(one.id, unbindable.id);
    }

    #[test]
    fn test_to_json() {
        let value = ShareableValue::object(vec![
            ("n".to_string(), ShareableValue::from(1.5)),
            (
                "items".to_string(),
                ShareableValue::array(vec![ShareableValue::from("a"), ShareableValue::null()]),
            ),
            ("ok".to_string(), ShareableValue::from(true)),
        ]);
        assert_eq!(value.to_json(), json!({"n": 1.5, "items": ["a", null], "ok": true}));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(ShareableValue::from(3).as_number(), Some(3.0));
        assert_eq!(ShareableValue::from(false).as_bool(), Some(false));
        assert_eq!(ShareableValue::from("hi").as_str(), Some("hi"));
        assert_eq!(ShareableValue::null().as_number(), None);
    }
}

//! Compiled worklet cache
//!
//! Each runtime compiles a worklet body at most once. The cache is keyed by
//! [`WorkletId`] alone. Ids derived by [`WorkletDescriptor::new`] cover the
//! source and the closure names bound as locals, so each distinct wrapper
//! gets its own id; an id reused by hand for different source returns the
//! function compiled first.

use std::collections::HashMap;

use boa_engine::{Context, JsObject, Source};
use worklets_common::{Result, WorkletError};

use crate::shareable::{WorkletDescriptor, WorkletId};

#[derive(Default)]
pub struct WorkletCache {
    compiled: HashMap<WorkletId, JsObject>,
}

impl WorkletCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled function for `descriptor`, compiling it in
    /// `context` on a miss.
    ///
    /// # Errors
    ///
    /// Returns `WorkletError::WorkletCompile` if the source does not parse or
    /// does not evaluate to a function. Failures are not cached.
    pub fn get_compiled_function(
        &mut self,
        context: &mut Context,
        descriptor: &WorkletDescriptor,
    ) -> Result<JsObject> {
        if let Some(function) = self.compiled.get(&descriptor.id) {
            return Ok(function.clone());
        }

        let function = compile(context, descriptor)?;
        tracing::debug!("Compiled worklet {}", descriptor.id.0);
        self.compiled.insert(descriptor.id, function.clone());
        Ok(function)
    }

    pub fn contains(&self, id: WorkletId) -> bool {
        self.compiled.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// Parameter names of the generated wrapper. Closure keys never shadow them.
const RECEIVER_PARAM: &str = "__workletReceiver";
const ARGS_PARAM: &str = "__workletArgs";

/// Names the wrapper declares itself, plus words a `const` binding rejects.
const UNBINDABLE: &[&str] = &[
    RECEIVER_PARAM, ARGS_PARAM, "jsThis", "arguments", "eval", "await", "break", "case", "catch",
    "class", "const", "continue", "debugger", "default", "delete", "do", "else", "enum", "export",
    "extends", "false", "finally", "for", "function", "if", "implements", "import", "in",
    "instanceof", "interface", "let", "new", "null", "package", "private", "protected", "public",
    "return", "static", "super", "switch", "this", "throw", "true", "try", "typeof", "var", "void",
    "while", "with", "yield",
];

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Closure keys that can be bound as local names in generated source.
/// Other keys stay reachable through `jsThis._closure`.
pub(crate) fn is_bindable(key: &str) -> bool {
    is_identifier(key) && !UNBINDABLE.contains(&key)
}

fn closure_bindings(descriptor: &WorkletDescriptor, from: &str) -> String {
    let keys = descriptor.bound_keys();
    if keys.is_empty() {
        String::new()
    } else {
        format!("  const {{ {} }} = {};\n", keys.join(", "), from)
    }
}

/// Wraps the body in a function taking the receiver as its first argument.
///
/// The receiver is bound to a local `jsThis` and each bindable closure key
/// becomes a local name, so the body never touches global state.
fn wrapped_source(descriptor: &WorkletDescriptor) -> String {
    format!(
        "(function ({receiver}, ...{args}) {{\n  const jsThis = {receiver};\n{bindings}  return ({source}\n  ).apply(this, {args});\n}})",
        receiver = RECEIVER_PARAM,
        args = ARGS_PARAM,
        bindings = closure_bindings(descriptor, &format!("{}._closure", RECEIVER_PARAM)),
        source = descriptor.source,
    )
}

/// Evaluates to the `typeof` of the body with closure names shadowed.
fn kind_check_source(descriptor: &WorkletDescriptor) -> String {
    format!(
        "(function () {{\n{}  return typeof ({}\n  );\n}})()",
        closure_bindings(descriptor, "{}"),
        descriptor.source
    )
}

fn compile(context: &mut Context, descriptor: &WorkletDescriptor) -> Result<JsObject> {
    let kind = context
        .eval(Source::from_bytes(&kind_check_source(descriptor)))
        .map_err(|e| WorkletError::WorkletCompile(e.to_string()))?;
    let kind = kind
        .as_string()
        .map(|kind| kind.to_std_string_escaped())
        .unwrap_or_default();
    if kind != "function" {
        return Err(WorkletError::WorkletCompile(format!("worklet source evaluated to {}", kind)));
    }

    context
        .eval(Source::from_bytes(&wrapped_source(descriptor)))
        .map_err(|e| WorkletError::WorkletCompile(e.to_string()))?
        .as_callable()
        .cloned()
        .ok_or_else(|| WorkletError::WorkletCompile("worklet wrapper is not callable".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shareable::ShareableValue;
    use boa_engine::JsValue;

    fn descriptor(source: &str) -> WorkletDescriptor {
        WorkletDescriptor::new(source, ShareableValue::object(vec![]), None)
    }

    #[test]
    fn test_same_id_returns_same_function() {
        let mut context = Context::default();
        let mut cache = WorkletCache::new();
        let worklet = descriptor("function () { return 1; }");

        let first = cache.get_compiled_function(&mut context, &worklet).unwrap();
        let second = cache.get_compiled_function(&mut context, &worklet).unwrap();
        assert!(JsObject::equals(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_ids_compile_distinct_functions() {
        let mut context = Context::default();
        let mut cache = WorkletCache::new();
        let one = cache
            .get_compiled_function(&mut context, &descriptor("function () { return 1; }"))
            .unwrap();
        let two = cache
            .get_compiled_function(&mut context, &descriptor("function () { return 2; }"))
            .unwrap();

        assert!(!JsObject::equals(&one, &two));
        assert_eq!(one.call(&JsValue::undefined(), &[], &mut context).unwrap().as_number(), Some(1.0));
        assert_eq!(two.call(&JsValue::undefined(), &[], &mut context).unwrap().as_number(), Some(2.0));
    }

    #[test]
    fn test_reused_id_returns_first_compilation() {
        let mut context = Context::default();
        let mut cache = WorkletCache::new();
        let first = descriptor("function () { return 'first'; }");
        let mut second = descriptor("function () { return 'second'; }");
        second.id = first.id;

        cache.get_compiled_function(&mut context, &first).unwrap();
        let function = cache.get_compiled_function(&mut context, &second).unwrap();
        let result = function.call(&JsValue::undefined(), &[], &mut context).unwrap();
        assert_eq!(result.as_string().unwrap().to_std_string_escaped(), "first");
    }

    #[test]
    fn test_malformed_source_is_not_cached() {
        let mut context = Context::default();
        let mut cache = WorkletCache::new();
        let broken = descriptor("function ( {");

        let err = cache.get_compiled_function(&mut context, &broken).unwrap_err();
        assert!(matches!(err, WorkletError::WorkletCompile(_)));
        assert!(!cache.contains(broken.id));
        assert!(cache.get_compiled_function(&mut context, &broken).is_err());
    }

    #[test]
    fn test_non_function_source_fails() {
        let mut context = Context::default();
        let mut cache = WorkletCache::new();
        let err = cache.get_compiled_function(&mut context, &descriptor("42")).unwrap_err();
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn test_closure_keys_become_locals() {
        let closure = ShareableValue::object(vec![
            ("offset".to_string(), ShareableValue::from(10)),
            ("not-an-identifier".to_string(), ShareableValue::from(1)),
        ]);
        let worklet = WorkletDescriptor::new("function (x) { return x + offset; }", closure, None);
        let source = wrapped_source(&worklet);
        assert!(source.contains("const { offset } = __workletReceiver._closure;"));
        assert!(!source.contains("not-an-identifier"));

        let mut context = Context::default();
        let receiver = context
            .eval(Source::from_bytes("({ _closure: { offset: 10 } })"))
            .unwrap();
        let mut cache = WorkletCache::new();
        let function = cache.get_compiled_function(&mut context, &worklet).unwrap();
        let result = function
            .call(&JsValue::undefined(), &[receiver, JsValue::new(5)], &mut context)
            .unwrap();
        assert_eq!(result.as_number(), Some(15.0));
    }

    #[test]
    fn test_receiver_is_visible_as_js_this() {
        let worklet = descriptor("function () { return jsThis.__location; }");
        let mut context = Context::default();
        let receiver = context
            .eval(Source::from_bytes("({ _closure: {}, __location: 'a.js (2:4)' })"))
            .unwrap();
        let mut cache = WorkletCache::new();
        let function = cache.get_compiled_function(&mut context, &worklet).unwrap();
        let result = function.call(&JsValue::undefined(), &[receiver], &mut context).unwrap();
        assert_eq!(result.as_string().unwrap().to_std_string_escaped(), "a.js (2:4)");

        let global = context.global_object();
        assert!(!global.has_property(boa_engine::js_string!("jsThis"), &mut context).unwrap());
    }

    #[test]
    fn test_is_bindable() {
        assert!(is_bindable("width"));
        assert!(is_bindable("_private"));
        assert!(is_bindable("$el"));
        assert!(is_bindable("x1"));
        assert!(is_bindable("args"));
        assert!(!is_bindable("1x"));
        assert!(!is_bindable(""));
        assert!(!is_bindable("a-b"));
        assert!(!is_bindable("default"));
        assert!(!is_bindable("class"));
        assert!(!is_bindable("jsThis"));
        assert!(!is_bindable(RECEIVER_PARAM));
    }

    #[test]
    fn test_capturable_names_that_shadow_wrapper_locals() {
        let closure = ShareableValue::object(vec![
            ("args".to_string(), ShareableValue::array(vec![ShareableValue::from(1), ShareableValue::from(2)])),
            ("default".to_string(), ShareableValue::from(3)),
            ("jsThis".to_string(), ShareableValue::from(4)),
        ]);
        let worklet = WorkletDescriptor::new(
            "function (x) { return x + args.length + jsThis._closure.default + jsThis._closure.jsThis; }",
            closure,
            None,
        );

        let mut context = Context::default();
        let receiver = context
            .eval(Source::from_bytes("({ _closure: { args: [1, 2], default: 3, jsThis: 4 } })"))
            .unwrap();
        let mut cache = WorkletCache::new();
        let function = cache.get_compiled_function(&mut context, &worklet).unwrap();
        let result = function
            .call(&JsValue::undefined(), &[receiver, JsValue::new(10)], &mut context)
            .unwrap();
        assert_eq!(result.as_number(), Some(19.0));
    }

    #[test]
    fn test_same_source_with_different_closure_keys_compiles_twice() {
        let source = "function () { return typeof b === 'undefined' ? a : a + b; }";
        let first = WorkletDescriptor::new(
            source,
            ShareableValue::object(vec![("a".to_string(), ShareableValue::from(1))]),
            None,
        );
        let second = WorkletDescriptor::new(
            source,
            ShareableValue::object(vec![
                ("a".to_string(), ShareableValue::from(1)),
                ("b".to_string(), ShareableValue::from(10)),
            ]),
            None,
        );

        let mut context = Context::default();
        let mut cache = WorkletCache::new();
        let one = cache.get_compiled_function(&mut context, &first).unwrap();
        let two = cache.get_compiled_function(&mut context, &second).unwrap();
        assert_eq!(cache.len(), 2);

        let receiver = |context: &mut Context, closure: &str| {
            context
                .eval(Source::from_bytes(format!("({{ _closure: {} }})", closure).as_str()))
                .unwrap()
        };
        let first_receiver = receiver(&mut context, "{ a: 1 }");
        let second_receiver = receiver(&mut context, "{ a: 1, b: 10 }");
        let one = one.call(&JsValue::undefined(), &[first_receiver], &mut context).unwrap();
        let two = two.call(&JsValue::undefined(), &[second_receiver], &mut context).unwrap();
        assert_eq!(one.as_number(), Some(1.0));
        assert_eq!(two.as_number(), Some(11.0));
    }
}

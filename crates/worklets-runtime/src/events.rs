//! Event handler registry
//!
//! Platform events reach the UI runtime by name with a JSON payload. Every
//! handler registered for that name runs, in registration order; the
//! runtime then executes any mapper the handlers made dirty.

use std::collections::BTreeMap;
use std::fmt;

use boa_engine::JsObject;

/// Registry key of an event handler. Allocated in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandlerId(pub u64);

impl fmt::Display for EventHandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Registration {
    event_name: String,
    handler: JsObject,
}

#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: BTreeMap<EventHandlerId, Registration>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_name`, replacing any handler already
    /// registered under `id`.
    pub fn register(&mut self, id: EventHandlerId, event_name: impl Into<String>, handler: JsObject) {
        let event_name = event_name.into();
        tracing::debug!("Registered event handler {} for {}", id, event_name);
        self.handlers.insert(id, Registration { event_name, handler });
    }

    /// Removes the handler with `id`. Returns false if it was not registered.
    pub fn unregister(&mut self, id: EventHandlerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Handlers registered for `event_name`, oldest first.
    pub fn handlers_for(&self, event_name: &str) -> Vec<JsObject> {
        self.handlers
            .values()
            .filter(|registration| registration.event_name == event_name)
            .map(|registration| registration.handler.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{Context, JsValue, Source};

    fn handler(context: &mut Context, tag: &str) -> JsObject {
        context
            .eval(Source::from_bytes(&format!("(function () {{ return '{}'; }})", tag)))
            .unwrap()
            .as_object()
            .cloned()
            .unwrap()
    }

    fn tags(handlers: &[JsObject], context: &mut Context) -> Vec<String> {
        handlers
            .iter()
            .map(|handler| {
                handler
                    .call(&JsValue::undefined(), &[], context)
                    .unwrap()
                    .as_string()
                    .unwrap()
                    .to_std_string_escaped()
            })
            .collect()
    }

    #[test]
    fn test_handlers_for_event_in_registration_order() {
        let mut context = Context::default();
        let mut registry = EventHandlerRegistry::new();
        let first = handler(&mut context, "first");
        let other = handler(&mut context, "other");
        let second = handler(&mut context, "second");
        registry.register(EventHandlerId(1), "onScroll", first);
        registry.register(EventHandlerId(2), "onPress", other);
        registry.register(EventHandlerId(3), "onScroll", second);

        let handlers = registry.handlers_for("onScroll");
        assert_eq!(tags(&handlers, &mut context), vec!["first", "second"]);
        assert!(registry.handlers_for("onLayout").is_empty());
    }

    #[test]
    fn test_unregister() {
        let mut context = Context::default();
        let mut registry = EventHandlerRegistry::new();
        registry.register(EventHandlerId(7), "onPress", handler(&mut context, "a"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(EventHandlerId(7)));
        assert!(!registry.unregister(EventHandlerId(7)));
        assert!(registry.is_empty());
        assert!(registry.handlers_for("onPress").is_empty());
    }
}

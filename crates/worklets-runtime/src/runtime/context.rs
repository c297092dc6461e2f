use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsObject, JsResult, JsValue, Source};
use serde_json::Value as JsonValue;
use worklets_common::{ErrorTarget, Props, RaiseError, Result, RuntimeKind, WorkletError};

use crate::config::RuntimeConfig;
use crate::events::{EventHandlerId, EventHandlerRegistry};
use crate::mapper::{run_pass, Mapper, MapperId, MapperRegistry};
use crate::module::WorkletModule;
use crate::mutable::MutableValue;
use crate::runtime::job_queue::MicrotaskQueue;
use crate::runtime::js::{js_failure, throw};
use crate::runtime::json::json_to_js_value;
use crate::runtime::receiver::ReceiverStack;
use crate::runtime::bindings;
use crate::shareable::side_table::WeakTable;
use crate::shareable::{adapt, materialize, HostFunction, Hint, RemoteObject, Shared, ShareableValue, ValueKind};
use crate::worklet_cache::WorkletCache;

/// Evaluated once per runtime. Captures the `WeakMap` built-ins so later
/// changes to the globals cannot affect identity lookups.
const IDENTITY_MAP_SOURCE: &str = r#"(function () {
  const map = new WeakMap();
  const apply = Reflect.apply;
  const get = WeakMap.prototype.get;
  const set = WeakMap.prototype.set;
  return [
    function (object) { return apply(get, map, [object]); },
    function (object, id) { apply(set, map, [object, id]); },
  ];
})()"#;

/// Object identity -> shareable value id, held weakly on both sides.
struct IdentityMap {
    get: JsObject,
    set: JsObject,
}

impl IdentityMap {
    fn new(context: &mut Context) -> JsResult<Self> {
        let pair = context.eval(Source::from_bytes(IDENTITY_MAP_SOURCE))?;
        let pair = pair
            .as_object()
            .ok_or_else(|| JsNativeError::typ().with_message("identity map did not initialise"))?;
        let function = |index: u32, context: &mut Context| -> JsResult<JsObject> {
            pair.get(index, context)?
                .as_callable()
                .cloned()
                .ok_or_else(|| JsNativeError::typ().with_message("identity map did not initialise").into())
        };
        Ok(Self {
            get: function(0, context)?,
            set: function(1, context)?,
        })
    }
}

pub(crate) struct SideTables {
    identity: WeakTable<Shared, ()>,
    memo: WeakTable<Shared, JsValue>,
    pub(crate) host_functions: WeakTable<HostFunction, JsObject>,
    pub(crate) host_proxies: WeakTable<HostFunction, ()>,
    pub(crate) remote_objects: WeakTable<RemoteObject, JsObject>,
}

impl SideTables {
    fn new(threshold: usize) -> Self {
        Self {
            identity: WeakTable::new(threshold),
            memo: WeakTable::new(threshold),
            host_functions: WeakTable::new(threshold),
            host_proxies: WeakTable::new(threshold),
            remote_objects: WeakTable::new(threshold),
        }
    }
}

/// The part of a runtime reachable from native functions.
///
/// Native functions hold it weakly. `RefCell` borrows are never held across
/// a call back into JavaScript.
pub(crate) struct RuntimeShared {
    pub(crate) kind: RuntimeKind,
    pub(crate) module: Arc<WorkletModule>,
    pub(crate) config: RuntimeConfig,
    identity_map: IdentityMap,
    pub(crate) tables: RefCell<SideTables>,
    pub(crate) worklets: RefCell<WorkletCache>,
    pub(crate) mappers: RefCell<MapperRegistry>,
    pub(crate) events: RefCell<EventHandlerRegistry>,
    pub(crate) pending_props: RefCell<Vec<(i64, Props)>>,
    pub(crate) error_listeners: RefCell<Vec<JsObject>>,
    reported_errors: RefCell<Vec<String>>,
    pub(crate) receivers: ReceiverStack,
    jobs: Rc<MicrotaskQueue>,
}

impl RuntimeShared {
    pub(crate) fn identity_lookup(&self, object: &JsObject, context: &mut Context) -> JsResult<Option<ShareableValue>> {
        let id = self
            .identity_map
            .get
            .call(&JsValue::undefined(), &[object.clone().into()], context)?;
        let Some(id) = id.as_number() else {
            return Ok(None);
        };
        Ok(self
            .tables
            .borrow()
            .identity
            .get(id as u64)
            .map(|(shared, ())| ShareableValue::from_shared(shared)))
    }

    pub(crate) fn identity_register(
        &self,
        object: &JsObject,
        value: &ShareableValue,
        context: &mut Context,
    ) -> JsResult<()> {
        self.identity_map.set.call(
            &JsValue::undefined(),
            &[object.clone().into(), JsValue::new(value.id() as f64)],
            context,
        )?;
        self.tables.borrow_mut().identity.insert(value.id(), value.shared(), ());
        Ok(())
    }

    pub(crate) fn memo_get(&self, value: &ShareableValue) -> Option<JsValue> {
        self.tables.borrow().memo.value(value.id())
    }

    pub(crate) fn memo_put(&self, value: &ShareableValue, native: JsValue) {
        self.tables.borrow_mut().memo.insert(value.id(), value.shared(), native);
    }

    /// Records a materialized composite so later adapts and materializes of
    /// the same value short-circuit.
    pub(crate) fn remember(&self, object: &JsObject, value: &ShareableValue, context: &mut Context) -> JsResult<()> {
        self.identity_register(object, value, context)?;
        self.memo_put(value, object.clone().into());
        Ok(())
    }

    pub(crate) fn raise(&self, err: &WorkletError) -> bool {
        self.module.error_handler().raise(err.to_string())
    }
}

/// Upgrades a native function's handle on its runtime.
pub(crate) fn live(runtime: &Weak<RuntimeShared>) -> JsResult<Rc<RuntimeShared>> {
    runtime
        .upgrade()
        .ok_or_else(|| throw(WorkletError::RuntimeUnavailable("runtime has shut down".to_string())))
}

/// One JavaScript execution context bound to the thread that created it.
///
/// Two runtimes exist per process: [`RuntimeKind::Main`] runs application
/// code and [`RuntimeKind::Ui`] runs worklets, mappers and event handlers.
/// Neither is `Send`; work reaches a runtime as a scheduled job.
pub struct Runtime {
    shared: Rc<RuntimeShared>,
    context: Context,
}

impl Runtime {
    /// Builds a Boa context with this runtime's bindings installed and the
    /// configured resource limits applied.
    pub fn new(kind: RuntimeKind, module: Arc<WorkletModule>, config: RuntimeConfig) -> Result<Self> {
        config.validate().map_err(WorkletError::InvalidArgument)?;

        let jobs = Rc::new(MicrotaskQueue::new());
        let mut context = Context::builder()
            .job_queue(jobs.clone())
            .build()
            .map_err(|e| WorkletError::RuntimeUnavailable(e.to_string()))?;
        config.limits.apply(&mut context);

        let identity_map = IdentityMap::new(&mut context).map_err(js_failure)?;
        let threshold = config.side_table_prune_threshold;
        let shared = Rc::new(RuntimeShared {
            kind,
            mappers: RefCell::new(MapperRegistry::with_render_request(module.render_request())),
            module,
            config,
            identity_map,
            tables: RefCell::new(SideTables::new(threshold)),
            worklets: RefCell::new(WorkletCache::new()),
            events: RefCell::new(EventHandlerRegistry::new()),
            pending_props: RefCell::new(Vec::new()),
            error_listeners: RefCell::new(Vec::new()),
            reported_errors: RefCell::new(Vec::new()),
            receivers: ReceiverStack::default(),
            jobs,
        });

        bindings::install(&shared, &mut context)?;
        tracing::info!("Created {} runtime", kind);
        Ok(Self { shared, context })
    }

    pub fn kind(&self) -> RuntimeKind {
        self.shared.kind
    }

    pub fn module(&self) -> &Arc<WorkletModule> {
        &self.shared.module
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Evaluates a script, then drains the promise jobs it queued.
    pub fn eval(&mut self, source: &str) -> Result<JsValue> {
        let result = self
            .context
            .eval(Source::from_bytes(source))
            .map_err(|e| WorkletError::JavaScriptExecution(format!("Script evaluation error: {}", e)));
        self.run_microtasks();
        result
    }

    pub fn adapt(&mut self, value: &JsValue, hint: Hint) -> Result<ShareableValue> {
        adapt::adapt(&self.shared, &mut self.context, value, hint)
    }

    pub fn materialize(&mut self, value: &ShareableValue) -> Result<JsValue> {
        materialize::materialize(&self.shared, &mut self.context, value)
    }

    /// Materializes `worklet` and calls it with `args`, returning the adapted
    /// result.
    pub fn call_worklet(&mut self, worklet: &ShareableValue, args: &[ShareableValue]) -> Result<ShareableValue> {
        if !matches!(worklet.kind(), ValueKind::WorkletFunction(_)) {
            return Err(WorkletError::InvalidArgument(format!(
                "expected a worklet, got {:?}",
                worklet.value_type()
            )));
        }
        let result = self.call_materialized(worklet, args);
        self.run_microtasks();
        result
    }

    /// Calls a host function on its origin runtime. Errors it throws are
    /// reported to this runtime's error listeners.
    pub fn call_host_function(&mut self, function: &Arc<HostFunction>, args: &[ShareableValue]) -> Result<()> {
        if function.origin() != self.kind() {
            return Err(WorkletError::InvalidArgument(format!(
                "host function {} belongs to the {} runtime",
                function.name(),
                function.origin()
            )));
        }
        let callable = self.shared.tables.borrow().host_functions.value(function.id);
        let Some(callable) = callable else {
            return Err(WorkletError::RuntimeUnavailable(format!(
                "host function {} is no longer available",
                function.name()
            )));
        };

        let args = self.materialize_all(args)?;
        let result = callable.call(&JsValue::undefined(), &args, &mut self.context);
        self.run_microtasks();
        if let Err(err) = result {
            let message = err.to_string();
            self.report_error(&message);
            return Err(WorkletError::JavaScriptExecution(message));
        }
        Ok(())
    }

    /// Runs one animation frame: every dirty mapper, then the props flush.
    ///
    /// Another frame is requested if a mapper is still dirty afterwards.
    pub fn on_render(&mut self, timestamp_ms: f64) -> Result<()> {
        self.shared.module.frame_started();
        self.context
            .register_global_property(js_string!("_frameTimestamp"), timestamp_ms, Attribute::all())
            .map_err(js_failure)?;

        let result = self.run_mappers();
        self.run_microtasks();
        if self.shared.mappers.borrow().need_run_on_render() {
            self.shared.module.maybe_request_render();
        }
        result
    }

    /// Delivers a platform event to its handlers, then runs the mappers the
    /// handlers made dirty.
    pub fn on_event(&mut self, event_name: &str, payload: &JsonValue) -> Result<()> {
        let handlers = self.shared.events.borrow().handlers_for(event_name);
        if handlers.is_empty() {
            tracing::debug!("No handler registered for event {}", event_name);
            return Ok(());
        }

        let event = json_to_js_value(payload, &mut self.context)?;
        for handler in handlers {
            if let Err(err) = handler.call(&JsValue::undefined(), &[event.clone()], &mut self.context) {
                let err = WorkletError::JavaScriptExecution(format!("event handler for {} failed: {}", event_name, err));
                self.raise(&err);
            }
        }

        let result = self.run_mappers();
        self.run_microtasks();
        result
    }

    /// Starts a mapper on this runtime. Restarting a live id replaces it.
    pub fn start_mapper(
        &mut self,
        id: MapperId,
        worklet: &ShareableValue,
        inputs: Vec<Arc<MutableValue>>,
        outputs: Vec<Arc<MutableValue>>,
    ) -> Result<()> {
        let body = self.callable(worklet)?;
        let mapper = Mapper::new(id, body, inputs, outputs);
        self.shared.mappers.borrow_mut().start_mapper(mapper);
        self.shared.module.maybe_request_render();
        Ok(())
    }

    pub fn stop_mapper(&mut self, id: MapperId) {
        self.shared.mappers.borrow_mut().stop_mapper(id);
    }

    pub fn register_event_handler(
        &mut self,
        id: EventHandlerId,
        event_name: &str,
        worklet: &ShareableValue,
    ) -> Result<()> {
        let handler = self.callable(worklet)?;
        self.shared.events.borrow_mut().register(id, event_name, handler);
        Ok(())
    }

    pub fn unregister_event_handler(&mut self, id: EventHandlerId) -> bool {
        self.shared.events.borrow_mut().unregister(id)
    }

    pub fn mapper_count(&self) -> usize {
        self.shared.mappers.borrow().len()
    }

    pub fn need_run_on_render(&self) -> bool {
        self.shared.mappers.borrow().need_run_on_render()
    }

    /// Drains queued promise jobs and commits buffered props.
    pub fn run_microtasks(&mut self) {
        if self.shared.jobs.has_pending_jobs() {
            self.context.run_jobs();
        }
        self.flush_props();
    }

    /// Hands every buffered `_updateProps` call to the props committer.
    pub fn flush_props(&mut self) -> usize {
        let pending = std::mem::take(&mut *self.shared.pending_props.borrow_mut());
        let count = pending.len();
        for (view_tag, props) in pending {
            self.shared.module.commit_props(view_tag, props);
        }
        count
    }

    /// Every error message delivered to this runtime, oldest first.
    pub fn reported_errors(&self) -> Vec<String> {
        self.shared.reported_errors.borrow().clone()
    }

    /// Reports `err` through the module's error handler.
    pub fn raise(&self, err: &WorkletError) -> bool {
        self.shared.raise(err)
    }

    fn run_mappers(&mut self) -> Result<()> {
        let order = self.shared.mappers.borrow_mut().execution_order();
        run_pass(&order, &mut self.context, self.shared.module.error_handler())
    }

    fn callable(&mut self, worklet: &ShareableValue) -> Result<JsObject> {
        let function = self.materialize(worklet)?;
        function.as_callable().cloned().ok_or_else(|| {
            WorkletError::InvalidArgument(format!("expected a function, got {:?}", worklet.value_type()))
        })
    }

    fn call_materialized(&mut self, worklet: &ShareableValue, args: &[ShareableValue]) -> Result<ShareableValue> {
        let function = self.callable(worklet)?;
        let args = self.materialize_all(args)?;
        let result = function
            .call(&JsValue::undefined(), &args, &mut self.context)
            .map_err(js_failure)?;
        self.adapt(&result, Hint::None)
    }

    fn materialize_all(&mut self, values: &[ShareableValue]) -> Result<Vec<JsValue>> {
        values.iter().map(|value| self.materialize(value)).collect()
    }
}

impl ErrorTarget for Runtime {
    fn report_error(&mut self, message: &str) {
        self.shared.reported_errors.borrow_mut().push(message.to_string());

        let listeners = self.shared.error_listeners.borrow().clone();
        if listeners.is_empty() {
            return;
        }
        let error: JsValue = JsNativeError::error()
            .with_message(message.to_string())
            .to_opaque(&mut self.context)
            .into();
        for listener in listeners {
            if let Err(err) = listener.call(&JsValue::undefined(), &[error.clone()], &mut self.context) {
                tracing::warn!("Error listener threw: {}", err);
            }
        }
        self.run_microtasks();
    }
}

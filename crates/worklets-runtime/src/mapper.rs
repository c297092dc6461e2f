//! Mappers
//!
//! A [`Mapper`] pairs a compiled body with the [`MutableValue`]s it reads
//! and writes. The [`MapperRegistry`] subscribes each mapper to its inputs,
//! marks it dirty when one of them changes and, once per frame, runs every
//! dirty mapper in dependency order.
//!
//! # Execution Order
//!
//! Mappers are ordered so that a mapper writing a value runs before any
//! mapper reading it; ties keep insertion order. The order is cached and
//! only recomputed after a mapper is started or stopped.
//!
//! # Failure
//!
//! A body that throws is reported to the error handler. If the handler does
//! not accept the error as recovered, the pass stops and the error is
//! returned, leaving the remaining mappers for the next frame.

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use boa_engine::{Context, JsObject, JsValue};
use worklets_common::{RaiseError, Result, WorkletError};

use crate::mutable::{ListenerHandle, MutableValue, RenderRequest};

/// Registry key of a mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapperId(pub u64);

impl fmt::Display for MapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One reactive computation.
pub struct Mapper {
    id: MapperId,
    body: JsObject,
    inputs: Vec<Arc<MutableValue>>,
    outputs: Vec<Arc<MutableValue>>,
    dirty: Arc<AtomicBool>,
    active: Cell<bool>,
}

impl Mapper {
    /// Creates a mapper. New mappers start dirty so they run on the first
    /// frame after they are started.
    pub fn new(
        id: MapperId,
        body: JsObject,
        inputs: Vec<Arc<MutableValue>>,
        outputs: Vec<Arc<MutableValue>>,
    ) -> Self {
        Self {
            id,
            body,
            inputs,
            outputs,
            dirty: Arc::new(AtomicBool::new(true)),
            active: Cell::new(false),
        }
    }

    pub fn id(&self) -> MapperId {
        self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn reads_any_of(&self, values: &[Arc<MutableValue>]) -> bool {
        self.inputs
            .iter()
            .any(|input| values.iter().any(|value| value.id() == input.id()))
    }

    fn execute(&self, context: &mut Context, errors: &dyn RaiseError) -> Result<()> {
        if !self.active.get() || !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(err) = self.body.call(&JsValue::undefined(), &[], context) {
            let message = err.to_string();
            tracing::debug!("Mapper {} failed: {}", self.id, message);
            if !errors.raise(message.clone()) {
                return Err(WorkletError::JavaScriptExecution(format!(
                    "mapper {} failed: {}",
                    self.id, message
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("id", &self.id)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// All live mappers of one runtime.
#[derive(Default)]
pub struct MapperRegistry {
    mappers: Vec<Rc<Mapper>>,
    subscriptions: HashMap<MapperId, Vec<ListenerHandle>>,
    sorted: Vec<Rc<Mapper>>,
    order_stale: bool,
    render_request: Option<RenderRequest>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose input subscriptions also request a render
    /// frame when they mark a mapper dirty.
    pub fn with_render_request(render_request: RenderRequest) -> Self {
        Self {
            render_request: Some(render_request),
            ..Self::default()
        }
    }

    /// Adds `mapper` to the live set and subscribes it to its inputs.
    ///
    /// Starting a mapper whose id is already live replaces the old one.
    pub fn start_mapper(&mut self, mapper: Mapper) -> Rc<Mapper> {
        self.stop_mapper(mapper.id);

        let mapper = Rc::new(mapper);
        mapper.active.set(true);

        let handles = mapper
            .inputs
            .iter()
            .map(|input| {
                let dirty = mapper.dirty.clone();
                let render_request = self.render_request.clone();
                input.add_listener(move || {
                    dirty.store(true, Ordering::Release);
                    if let Some(request) = &render_request {
                        request();
                    }
                })
            })
            .collect();
        self.subscriptions.insert(mapper.id, handles);

        self.mappers.push(mapper.clone());
        self.order_stale = true;
        tracing::debug!("Started mapper {}", mapper.id);
        mapper
    }

    /// Removes the mapper with `id` and detaches its input subscriptions.
    /// Stopping an unknown or already stopped mapper does nothing.
    pub fn stop_mapper(&mut self, id: MapperId) {
        let Some(index) = self.mappers.iter().position(|mapper| mapper.id == id) else {
            return;
        };
        let mapper = self.mappers.remove(index);
        mapper.active.set(false);

        for handle in self.subscriptions.remove(&id).unwrap_or_default() {
            handle.revoke();
        }
        self.order_stale = true;
        tracing::debug!("Stopped mapper {}", id);
    }

    /// True iff at least one live mapper is dirty.
    pub fn need_run_on_render(&self) -> bool {
        self.mappers.iter().any(|mapper| mapper.is_dirty())
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    pub fn contains(&self, id: MapperId) -> bool {
        self.mappers.iter().any(|mapper| mapper.id == id)
    }

    /// The cached execution order, recomputed first if stale.
    pub fn execution_order(&mut self) -> Vec<Rc<Mapper>> {
        if self.order_stale {
            self.sorted = sort_mappers(&self.mappers);
            self.order_stale = false;
        }
        self.sorted.clone()
    }

    /// Runs every dirty mapper once, in execution order.
    pub fn execute(&mut self, context: &mut Context, errors: &dyn RaiseError) -> Result<()> {
        let order = self.execution_order();
        run_pass(&order, context, errors)
    }
}

/// Runs a previously computed execution order.
///
/// The registry does not need to stay borrowed while bodies run, so bodies
/// may start or stop mappers; a mapper stopped mid-pass is skipped.
pub fn run_pass(order: &[Rc<Mapper>], context: &mut Context, errors: &dyn RaiseError) -> Result<()> {
    for mapper in order {
        mapper.execute(context, errors)?;
    }
    Ok(())
}

fn sort_mappers(mappers: &[Rc<Mapper>]) -> Vec<Rc<Mapper>> {
    let count = mappers.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut pending_inputs = vec![0usize; count];

    for (producer, mapper) in mappers.iter().enumerate() {
        for (consumer, other) in mappers.iter().enumerate() {
            if producer != consumer && other.reads_any_of(&mapper.outputs) {
                dependents[producer].push(consumer);
                pending_inputs[consumer] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| pending_inputs[i] == 0).collect();
    let mut sorted = Vec::with_capacity(count);
    let mut placed = vec![false; count];

    while let Some(next) = ready.pop_first() {
        placed[next] = true;
        sorted.push(mappers[next].clone());
        for &dependent in &dependents[next] {
            pending_inputs[dependent] -= 1;
            if pending_inputs[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if sorted.len() < count {
        tracing::warn!("Mapper graph contains a cycle, running the remainder in insertion order");
        sorted.extend(
            mappers
                .iter()
                .enumerate()
                .filter(|(i, _)| !placed[*i])
                .map(|(_, mapper)| mapper.clone()),
        );
    }
    sorted
}

//! The render graph façade (C13): the single type an embedder talks to.
//! Register node types, add instances, `connect` their slots, `compile`,
//! then call `render_frame` in a loop. Grounded on `original_source`'s
//! `RenderGraph.h` (owns every other subsystem; "no singletons" per the
//! design notes) and, for the public/internal split inside one `impl`
//! block, on the teacher's `frame::Frame` (`frame/mod.rs`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::access::{AccessType, ResourceAccessTracker};
use crate::budget::{CapacityTracker, TaskProfileRegistry};
use crate::cleanup::{CleanupStack, DeferredDestructionQueue};
use crate::connection::{ConnectMeta, ConnectionContext, ConnectionPipeline, ResolveOutcome};
use crate::error::{GraphError, GraphResult, PresentResult, TopologyError};
use crate::events::{messages, EventBus};
use crate::hooks::{
    GraphLifecycleHooks, GraphLifecyclePhase, NodeLifecyclePhase, ResourceDependencyTracker,
};
use crate::lifetime::ResourceLifetimeAnalyzer;
use crate::loop_manager::LoopManager;
use crate::node::{
    validate_param_schema, DeviceCapabilities, LoopId, LoopReference, NodeBehavior, NodeContext,
    NodeHandle, NodeInstance, NodeRegistry, NodeType, NodeTypeId, TaskIndex,
};
use crate::params::ParamValue;
use crate::resource::{Descriptor, Lifetime, Resource, ResourceId, ResourceKind};
use crate::schedule::wave::WaveScheduler;
use crate::schedule::{ExecutionMode, ExecutorConfig, GraphExecutor};
use crate::slot::{SlotFlags, SlotKind, SlotMutability, SlotNullability};
use crate::topology::{Edge, GraphTopology};

/// Tunable knobs fixed at construction (§4.8 frame budget, §4.6 execution
/// mode, §4.9 deferred-destruction margin).
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub frame_budget: Duration,
    pub budget_deadband_fraction: f32,
    pub execution_mode: ExecutionMode,
    pub max_concurrency: usize,
    /// Frames a replaced GPU handle waits in `DeferredDestructionQueue`
    /// before actual destruction (§4.9 "zero-stutter hot-reload").
    pub deferred_destruction_margin: u64,
    pub device_capabilities: DeviceCapabilities,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            frame_budget: Duration::from_millis(16),
            budget_deadband_fraction: 0.05,
            execution_mode: ExecutionMode::Parallel,
            max_concurrency: 0,
            deferred_destruction_margin: 3,
            device_capabilities: DeviceCapabilities::NONE,
        }
    }
}

/// Result of a partial-teardown call (§4.9 "cleanup_subgraph/by_tag/by_type").
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub cleaned: Vec<NodeHandle>,
    /// A targeted node whose cleanup was skipped because a dependent
    /// outside the target set hasn't been cleaned up yet.
    pub blocked: Vec<NodeHandle>,
    pub dry_run: bool,
}

/// State moved out of `Graph` for the duration of the parallel-execute
/// phase (see `execute_nodes`).
struct ExecState {
    instances: SlotMap<NodeHandle, NodeInstance>,
    resources: SlotMap<ResourceId, Resource>,
    deferred_destruction: DeferredDestructionQueue,
    dependency_tracker: ResourceDependencyTracker,
}

/// The render graph (§3 "Graph: Invariant — every Node, Resource, and Edge
/// is reachable only through the owning Graph"). Owns every subsystem in
/// the crate; nothing here is a singleton (§9 design note).
pub struct Graph {
    registry: NodeRegistry,
    instances: SlotMap<NodeHandle, NodeInstance>,
    resources: SlotMap<ResourceId, Resource>,
    output_resources: HashMap<(NodeHandle, u32, u32), ResourceId>,
    instance_names: HashMap<String, NodeHandle>,
    topology: GraphTopology,
    connection_pipeline: ConnectionPipeline,
    hooks: GraphLifecycleHooks,
    dependency_tracker: ResourceDependencyTracker,
    cleanup_stack: CleanupStack,
    deferred_destruction: DeferredDestructionQueue,
    events: Arc<EventBus>,
    capacity_tracker: CapacityTracker,
    profile_registry: TaskProfileRegistry,
    access_tracker: ResourceAccessTracker,
    wave_scheduler: WaveScheduler,
    executor: GraphExecutor,
    loop_manager: LoopManager,
    lifetime_analyzer: ResourceLifetimeAnalyzer,
    config: GraphConfig,
    device_capabilities: DeviceCapabilities,
    execution_order: Vec<NodeHandle>,
    is_compiled: bool,
    frame_index: u64,
    last_frame_duration: Duration,
    next_instance_id: u64,
    accumulation_entries: HashMap<(NodeHandle, u32), Vec<AccumulationEntry>>,
    next_accumulation_seq: u32,
    /// `task_id -> NodeHandle` binding populated by `bind_task_profile`, read
    /// by the `WorkUnitChangeCallback` registered in `Graph::new` to route a
    /// budget-driven work-unit change back to the node that owns the task
    /// (§4.8, §4.10 step 5).
    task_profile_nodes: Arc<Mutex<HashMap<String, NodeHandle>>>,
    /// Drained at the top of `render_frame`: nodes a `WorkUnitChangeCallback`
    /// marked dirty since the last frame.
    dirty_from_budget: Arc<Mutex<Vec<NodeHandle>>>,
}

/// One contribution to an accumulation input slot, kept so the final
/// container order can be re-derived as a stable sort by `(sort_key,
/// insertion_index)` every time a new contribution arrives (§4.4
/// "Accumulation slots", §8 worked example).
#[derive(Debug, Clone, Copy)]
struct AccumulationEntry {
    resource: ResourceId,
    sort_key: Option<i64>,
    insertion_index: u32,
}

impl Graph {
    //---------------------------------------------------------------
    // PUBLIC API
    //---------------------------------------------------------------

    pub fn new(config: GraphConfig) -> Self {
        let events = Arc::new(EventBus::new());
        let mut profile_registry = TaskProfileRegistry::new();
        profile_registry.subscribe_to_budget_events(&events);

        let task_profile_nodes: Arc<Mutex<HashMap<String, NodeHandle>>> = Arc::new(Mutex::new(HashMap::new()));
        let dirty_from_budget: Arc<Mutex<Vec<NodeHandle>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let task_profile_nodes = task_profile_nodes.clone();
            let dirty_from_budget = dirty_from_budget.clone();
            profile_registry.on_work_unit_change(move |task_id, old, new| {
                if let Some(&node) = task_profile_nodes.lock().get(task_id) {
                    debug!(
                        target: "rendergraph::budget",
                        "task {task_id:?} work_units {old} -> {new}; marking node {node:?} dirty"
                    );
                    dirty_from_budget.lock().push(node);
                } else {
                    trace!(target: "rendergraph::budget", "task {task_id:?} work_units {old} -> {new}; no node bound");
                }
            });
        }

        let executor = GraphExecutor::new(ExecutorConfig {
            mode: config.execution_mode,
            max_concurrency: config.max_concurrency,
            capture_errors: true,
        });
        let capacity_tracker = CapacityTracker::new(config.frame_budget, config.budget_deadband_fraction);
        let device_capabilities = config.device_capabilities;

        Graph {
            registry: NodeRegistry::new(),
            instances: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            output_resources: HashMap::new(),
            instance_names: HashMap::new(),
            topology: GraphTopology::new(),
            connection_pipeline: ConnectionPipeline::with_builtin_rules(),
            hooks: GraphLifecycleHooks::new(),
            dependency_tracker: ResourceDependencyTracker::new(),
            cleanup_stack: CleanupStack::new(),
            deferred_destruction: DeferredDestructionQueue::new(),
            events,
            capacity_tracker,
            profile_registry,
            access_tracker: ResourceAccessTracker::new(),
            wave_scheduler: WaveScheduler::new(),
            executor,
            loop_manager: LoopManager::new(),
            lifetime_analyzer: ResourceLifetimeAnalyzer::new(),
            config,
            device_capabilities,
            execution_order: Vec::new(),
            is_compiled: false,
            frame_index: 0,
            last_frame_duration: Duration::ZERO,
            next_instance_id: 0,
            accumulation_entries: HashMap::new(),
            next_accumulation_seq: 0,
            task_profile_nodes,
            dirty_from_budget,
        }
    }

    pub fn register_node_type(&mut self, node_type: NodeType) -> GraphResult<()> {
        self.registry.register(node_type)
    }

    pub fn add_node(&mut self, type_id: NodeTypeId, instance_name: impl Into<String>) -> GraphResult<NodeHandle> {
        let instance_name = instance_name.into();
        if self.instance_names.contains_key(&instance_name) {
            return Err(GraphError::DuplicateRegistration(format!(
                "node instance name {instance_name:?} already in use"
            )));
        }
        let node_type = self
            .registry
            .by_id(type_id)
            .ok_or_else(|| GraphError::NotFound(format!("node type {type_id:?} not registered")))?;
        let behavior = node_type.create();
        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;

        let name_for_closure = instance_name.clone();
        let handle = self.instances.insert_with_key(|handle| {
            NodeInstance::new(handle, name_for_closure, instance_id, type_id, node_type, behavior)
        });
        self.topology.add_node(handle);
        self.instance_names.insert(instance_name, handle);
        Ok(handle)
    }

    /// Convenience over `add_node` for a node type registered `with_lang_type`.
    pub fn add_node_by_type<T: NodeBehavior + 'static>(&mut self, instance_name: impl Into<String>) -> GraphResult<NodeHandle> {
        let type_id = self
            .registry
            .by_lang_type::<T>()
            .ok_or_else(|| GraphError::NotFound("no node type registered for this Rust type".into()))?
            .type_id;
        self.add_node(type_id, instance_name)
    }

    pub fn connect(
        &mut self,
        src_node: NodeHandle,
        src_slot: u32,
        src_array_index: u32,
        tgt_node: NodeHandle,
        tgt_slot: u32,
        tgt_array_index: u32,
    ) -> GraphResult<()> {
        self.connect_with_meta(src_node, src_slot, src_array_index, tgt_node, tgt_slot, tgt_array_index, None)
    }

    /// Full connect path, with an optional per-call `ConnectMeta` carrying
    /// extra modifiers (§4.4). Rejects a self-loop before the pipeline ever
    /// runs (§8 "Boundaries": a node may not connect to itself).
    #[allow(clippy::too_many_arguments)]
    pub fn connect_with_meta(
        &mut self,
        src_node: NodeHandle,
        src_slot: u32,
        src_array_index: u32,
        tgt_node: NodeHandle,
        tgt_slot: u32,
        tgt_array_index: u32,
        meta: Option<ConnectMeta>,
    ) -> GraphResult<()> {
        if src_node == tgt_node {
            return Err(GraphError::ConnectionRejected("a node cannot connect to itself".into()));
        }

        let src_type_id = self
            .instances
            .get(src_node)
            .ok_or_else(|| GraphError::NotFound(format!("source node {src_node:?} not found")))?
            .type_id;
        let tgt_type_id = self
            .instances
            .get(tgt_node)
            .ok_or_else(|| GraphError::NotFound(format!("target node {tgt_node:?} not found")))?
            .type_id;

        let src_type = self
            .registry
            .by_id(src_type_id)
            .ok_or_else(|| GraphError::NotFound(format!("node type {src_type_id:?} not registered")))?;
        let src_slot_info = src_type
            .output_slot(src_slot)
            .ok_or_else(|| GraphError::NotFound(format!("node {src_node:?} has no output slot {src_slot}")))?;
        let effective_resource_type = src_slot_info.behavior.resource_kind;

        let src_lifetime = self
            .output_resources
            .get(&(src_node, src_slot, src_array_index))
            .and_then(|id| self.resources.get(*id))
            .map(|r| r.lifetime)
            .unwrap_or(Lifetime::Transient);

        let tgt_type = self
            .registry
            .by_id(tgt_type_id)
            .ok_or_else(|| GraphError::NotFound(format!("node type {tgt_type_id:?} not registered")))?;
        let tgt_slot_info = tgt_type
            .input_slot(tgt_slot)
            .ok_or_else(|| GraphError::NotFound(format!("node {tgt_node:?} has no input slot {tgt_slot}")))?;

        let tgt_already_has_driver = tgt_slot_info.kind != SlotKind::Binding
            && !tgt_slot_info.behavior.flags.contains(SlotFlags::ACCUMULATION)
            && self
                .topology
                .incoming_edges(tgt_node)
                .iter()
                .any(|e| e.tgt_slot == tgt_slot && e.tgt_array_index == tgt_array_index);

        let ctx = ConnectionContext::new(
            src_node,
            src_slot,
            src_array_index,
            tgt_node,
            tgt_slot,
            tgt_array_index,
            effective_resource_type,
            tgt_slot_info.kind,
            tgt_slot_info.behavior.flags,
            tgt_slot_info.behavior.nullability,
            tgt_slot_info.behavior.resource_kind,
            tgt_already_has_driver,
            src_lifetime,
        );
        let tgt_descriptor_type = tgt_slot_info.descriptor_type;

        let (outcome, ctx) = self.connection_pipeline.run(ctx, meta)?;
        let is_accumulation = ctx.matched_rule_name == Some("AccumulationRule");
        let sort_key = ctx.sort_key;

        match outcome {
            ResolveOutcome::Edge(edge) => {
                self.topology.add_edge(edge)?;
                let resource = self.ensure_output_resource(src_node, src_slot, src_array_index, effective_resource_type);
                if is_accumulation {
                    self.push_accumulation_entry(tgt_node, tgt_slot, resource, sort_key);
                } else if let Some(tgt) = self.instances.get_mut(tgt_node) {
                    tgt.bundles[0].set_input(tgt_slot, tgt_array_index, resource);
                    tgt.mark_needs_recompile();
                }
                if let Some(src) = self.instances.get_mut(src_node) {
                    src.mark_needs_recompile();
                }
                self.dependency_tracker.set_producer(resource, src_node);
                self.dependency_tracker.add_consumer(resource, tgt_node);
            }
            ResolveOutcome::VariadicUpdate { binding, source_node, source_output } => {
                let resource = self.ensure_output_resource(source_node, source_output, src_array_index, effective_resource_type);
                let info = crate::node::VariadicSlotInfo {
                    resource,
                    kind: effective_resource_type,
                    binding,
                    descriptor_type: tgt_descriptor_type,
                    source_node,
                    source_output,
                    has_field_extraction: false,
                    field_offset: None,
                };
                if let Some(tgt) = self.instances.get_mut(tgt_node) {
                    tgt.update_variadic_slot(binding, info);
                    tgt.mark_needs_recompile();
                }
                let edge = Edge {
                    src: source_node,
                    src_slot: source_output,
                    src_array_index,
                    tgt: tgt_node,
                    tgt_slot: binding,
                    tgt_array_index,
                };
                self.topology.add_edge(edge)?;
                self.dependency_tracker.set_producer(resource, source_node);
                self.dependency_tracker.add_consumer(resource, tgt_node);
            }
            ResolveOutcome::None => {}
        }

        Ok(())
    }

    /// Overrides the lifetime of an output resource created at connect time
    /// (every output defaults to `Transient`; call this before `compile` for
    /// an output a `FieldExtractionModifier` connection needs `Persistent`,
    /// since an output resource has no backing until something connects to
    /// it — §4.4 "field extraction requires a Persistent-lifetime source").
    pub fn set_output_lifetime(
        &mut self,
        node: NodeHandle,
        slot: u32,
        array_index: u32,
        kind: ResourceKind,
        lifetime: Lifetime,
    ) {
        let id = self.ensure_output_resource(node, slot, array_index, kind);
        if let Some(resource) = self.resources.get_mut(id) {
            resource.lifetime = lifetime;
        }
    }

    pub fn add_explicit_dependency(&mut self, node: NodeHandle, depends_on: NodeHandle) -> GraphResult<()> {
        if node == depends_on {
            return Err(GraphError::InvariantBroken("a node cannot explicitly depend on itself".into()));
        }
        if !self.instances.contains_key(depends_on) {
            return Err(GraphError::NotFound(format!("node {depends_on:?} not found")));
        }
        let instance = self
            .instances
            .get_mut(node)
            .ok_or_else(|| GraphError::NotFound(format!("node {node:?} not found")))?;
        instance.add_dependency(depends_on);
        instance.mark_needs_recompile();
        Ok(())
    }

    pub fn add_tag(&mut self, node: NodeHandle, tag: impl Into<String>) -> GraphResult<()> {
        self.instances
            .get_mut(node)
            .ok_or_else(|| GraphError::NotFound(format!("node {node:?} not found")))?
            .add_tag(tag);
        Ok(())
    }

    pub fn set_param(&mut self, node: NodeHandle, name: impl Into<String>, value: ParamValue) -> GraphResult<()> {
        let instance = self
            .instances
            .get_mut(node)
            .ok_or_else(|| GraphError::NotFound(format!("node {node:?} not found")))?;
        instance.params.set(name, value);
        instance.mark_needs_recompile();
        Ok(())
    }

    pub fn create_loop(&mut self, name: impl Into<String>) -> LoopId {
        self.loop_manager.create_loop(name)
    }

    pub fn set_loop_active(&mut self, loop_id: LoopId, active: bool) {
        self.loop_manager.set_active(loop_id, active);
    }

    pub fn attach_loop(&mut self, node: NodeHandle, loop_id: LoopId) -> GraphResult<()> {
        if !self.loop_manager.is_registered(loop_id) {
            return Err(GraphError::NotFound(format!("loop {loop_id:?} not registered")));
        }
        self.instances
            .get_mut(node)
            .ok_or_else(|| GraphError::NotFound(format!("node {node:?} not found")))?
            .loop_refs
            .push(LoopReference { loop_id });
        Ok(())
    }

    /// Registers a callback that must run before `dependency_node_name`'s
    /// own cleanup (profiler markers, capture tooling); passed straight
    /// through to the cleanup stack (§4.9).
    pub fn register_external_cleanup(
        &mut self,
        dependency_node_name: impl Into<String>,
        external_system_name: impl Into<String>,
        callback: impl FnOnce() + Send + 'static,
    ) {
        self.cleanup_stack.register_external(dependency_node_name, external_system_name, callback);
    }

    /// Hands out the shared event bus so embedder-level code can subscribe
    /// (e.g. to `ShaderReloaded`) and react by calling `add_tag`/
    /// `set_param`/`add_explicit_dependency` externally — `NodeContext` only
    /// exposes `&EventBus`, which cannot call `EventBus::subscribe` (it
    /// requires `Arc<Self>`), so subscriptions from within a node's own
    /// `setup`/`compile` are not possible by design.
    pub fn events_bus(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn on_graph_phase<F>(&mut self, callback: F)
    where
        F: Fn(GraphLifecyclePhase) + Send + Sync + 'static,
    {
        self.hooks.on_graph_phase(callback);
    }

    pub fn on_node_phase<F>(&mut self, callback: F)
    where
        F: Fn(NodeLifecyclePhase, NodeHandle) + Send + Sync + 'static,
    {
        self.hooks.on_node_phase(callback);
    }

    /// Runs the nine-step compilation pipeline (§4.5). Any failure leaves
    /// the graph not-compiled and marks every node `Error`.
    pub fn compile(&mut self) -> GraphResult<()> {
        self.hooks.dispatch_graph(GraphLifecyclePhase::CompileBegin);
        let result = self.compile_inner();
        if result.is_err() {
            self.is_compiled = false;
            for instance in self.instances.values_mut() {
                instance.mark_error();
            }
        }
        self.hooks.dispatch_graph(GraphLifecyclePhase::CompileEnd);
        result
    }

    /// Runs the eleven-step per-frame pipeline (§4.10). Returns an error
    /// result rather than panicking; `Gpu`/device-loss handling is left to
    /// the embedder's own wrapping of node `Execute` failures.
    pub fn render_frame(&mut self, _delta_time: Duration) -> PresentResult {
        if !self.is_compiled {
            return PresentResult::Error("graph is not compiled".into());
        }
        let frame_start = Instant::now();
        self.hooks.dispatch_graph(GraphLifecyclePhase::FrameBegin);

        self.frame_index += 1;
        self.events.publish(&messages::FrameStart { frame_index: self.frame_index });

        self.capacity_tracker.record_frame(self.last_frame_duration, &self.events);
        self.profile_registry.process_deferred_actions();
        self.mark_budget_dirty_nodes();

        let result = self
            .recompile_dirty_nodes()
            .and_then(|()| self.execute_nodes().map_err(GraphError::InvariantBroken));

        self.deferred_destruction.process(self.frame_index, self.config.deferred_destruction_margin);

        let duration = frame_start.elapsed();
        self.last_frame_duration = duration;
        self.events.publish(&messages::FrameEnd {
            frame_index: self.frame_index,
            duration_ms: duration.as_secs_f32() * 1000.0,
        });
        self.hooks.dispatch_graph(GraphLifecyclePhase::FrameEnd);

        match result {
            Ok(()) => PresentResult::Ok,
            Err(e) => PresentResult::Error(e.to_string()),
        }
    }

    /// Tears down every node (reverse execution order, or insertion order if
    /// never compiled) and runs every externally-registered cleanup first.
    pub fn cleanup(&mut self) -> GraphResult<()> {
        self.hooks.dispatch_graph(GraphLifecyclePhase::CleanupBegin);
        self.events.publish(&messages::CleanupRequested { node: None });
        self.cleanup_stack.execute_all()?;

        let order: Vec<NodeHandle> = if self.is_compiled {
            self.execution_order.iter().rev().copied().collect()
        } else {
            self.instances.keys().collect()
        };
        for handle in order {
            self.cleanup_node(handle);
        }
        self.is_compiled = false;
        self.hooks.dispatch_graph(GraphLifecyclePhase::CleanupEnd);
        Ok(())
    }

    /// Tears down `roots` plus everything that transitively depends on
    /// them. A targeted node is skipped (reported as `blocked`) if a
    /// dependent outside the target set hasn't been cleaned up yet — it
    /// would be left holding a dangling resource otherwise (§4.9).
    pub fn cleanup_subgraph(&mut self, roots: &[NodeHandle], dry_run: bool) -> CleanupReport {
        let target = self.dependent_closure(roots);
        self.cleanup_set(&target, dry_run)
    }

    pub fn cleanup_by_tag(&mut self, tag: &str, dry_run: bool) -> CleanupReport {
        let roots: Vec<NodeHandle> = self
            .instances
            .iter()
            .filter(|(_, inst)| inst.has_tag(tag))
            .map(|(h, _)| h)
            .collect();
        self.cleanup_subgraph(&roots, dry_run)
    }

    pub fn cleanup_by_type(&mut self, type_id: NodeTypeId, dry_run: bool) -> CleanupReport {
        let roots: Vec<NodeHandle> = self
            .instances
            .iter()
            .filter(|(_, inst)| inst.type_id == type_id)
            .map(|(h, _)| h)
            .collect();
        self.cleanup_subgraph(&roots, dry_run)
    }

    pub fn get_instance(&self, handle: NodeHandle) -> Option<&NodeInstance> {
        self.instances.get(handle)
    }

    pub fn get_instance_by_name(&self, name: &str) -> Option<&NodeInstance> {
        self.instance_names.get(name).and_then(|h| self.instances.get(*h))
    }

    pub fn get_execution_order(&self) -> &[NodeHandle] {
        &self.execution_order
    }

    pub fn get_topology(&self) -> &GraphTopology {
        &self.topology
    }

    pub fn get_time(&self) -> (u64, Duration) {
        (self.frame_index, self.last_frame_duration)
    }

    pub fn get_budget_manager(&self) -> &CapacityTracker {
        &self.capacity_tracker
    }

    pub fn get_budget_manager_mut(&mut self) -> &mut CapacityTracker {
        &mut self.capacity_tracker
    }

    pub fn get_task_profile_registry(&self) -> &TaskProfileRegistry {
        &self.profile_registry
    }

    pub fn get_task_profile_registry_mut(&mut self) -> &mut TaskProfileRegistry {
        &mut self.profile_registry
    }

    /// Binds `task_id` to `node` so that a future `WorkUnitChangeCallback`
    /// firing for that task (via `process_deferred_actions` in
    /// `render_frame`) marks `node` dirty for recompilation (§4.8, §4.10
    /// step 5). Call after registering the node's `TaskProfile` with
    /// `get_task_profile_registry_mut()`.
    pub fn bind_task_profile(&mut self, node: NodeHandle, task_id: impl Into<String>) {
        self.task_profile_nodes.lock().insert(task_id.into(), node);
    }

    pub fn get_wave_scheduler(&self) -> &WaveScheduler {
        &self.wave_scheduler
    }

    pub fn get_lifetime_analyzer(&self) -> &ResourceLifetimeAnalyzer {
        &self.lifetime_analyzer
    }

    pub fn is_compiled(&self) -> bool {
        self.is_compiled
    }

    //---------------------------------------------------------------
    // INTERNAL API
    //---------------------------------------------------------------

    fn compile_inner(&mut self) -> GraphResult<()> {
        self.hooks.dispatch_graph(GraphLifecyclePhase::PreTopologyBuild);

        let slot_counts = |handle: NodeHandle| -> Option<(u32, u32)> {
            let instance = self.instances.get(handle)?;
            let node_type = self.registry.by_id(instance.type_id)?;
            Some((node_type.input_schema.len() as u32, node_type.output_schema.len() as u32))
        };
        self.topology.validate(slot_counts)?;

        self.hooks.dispatch_graph(GraphLifecyclePhase::PostTopologyBuild);
        self.hooks.dispatch_graph(GraphLifecyclePhase::PreExecutionOrder);

        let order = self.compute_execution_order()?;

        self.hooks.dispatch_graph(GraphLifecyclePhase::PostExecutionOrder);
        self.hooks.dispatch_graph(GraphLifecyclePhase::PreCompilation);

        self.cleanup_stack = CleanupStack::new();
        self.dependency_tracker.clear();
        for (idx, &handle) in order.iter().enumerate() {
            if let Some(instance) = self.instances.get_mut(handle) {
                instance.execution_order = idx as u32;
            }
            self.compile_node(handle)?;
        }

        self.events.reserve(order.len() * 3);

        self.rebuild_access_tracker(&order);
        self.wave_scheduler.compute_waves(&self.topology, &self.access_tracker)?;
        self.rebuild_lifetime_analysis(&order);

        self.execution_order = order;
        self.is_compiled = true;
        self.hooks.dispatch_graph(GraphLifecyclePhase::PostCompilation);
        Ok(())
    }

    /// Kahn's-algorithm execution order over both `GraphTopology` edges and
    /// `NodeInstance::explicit_dependencies`, always picking the earliest
    /// (by `topological_sort`'s own order) ready node so the result stays
    /// deterministic (§4.5 step 4, §5 determinism guarantee).
    fn compute_execution_order(&self) -> GraphResult<Vec<NodeHandle>> {
        let base_order = self.topology.topological_sort()?;
        let index_of: HashMap<NodeHandle, usize> = base_order.iter().enumerate().map(|(i, &h)| (h, i)).collect();

        let mut successors: HashMap<NodeHandle, Vec<NodeHandle>> = HashMap::new();
        let mut in_degree: HashMap<NodeHandle, u32> = base_order.iter().map(|&h| (h, 0u32)).collect();

        for &handle in &base_order {
            for dep in self.topology.dependencies(handle) {
                successors.entry(dep).or_default().push(handle);
                *in_degree.get_mut(&handle).unwrap() += 1;
            }
            if let Some(instance) = self.instances.get(handle) {
                for &dep in &instance.explicit_dependencies {
                    if index_of.contains_key(&dep) {
                        successors.entry(dep).or_default().push(handle);
                        *in_degree.get_mut(&handle).unwrap() += 1;
                    }
                }
            }
        }

        let mut order = Vec::with_capacity(base_order.len());
        let mut ready: Vec<NodeHandle> = base_order.iter().copied().filter(|h| in_degree[h] == 0).collect();

        while !ready.is_empty() {
            ready.sort_by_key(|h| index_of[h]);
            let next = ready.remove(0);
            order.push(next);
            if let Some(succs) = successors.get(&next) {
                for &succ in succs {
                    let deg = in_degree.get_mut(&succ).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(succ);
                    }
                }
            }
        }

        if order.len() != base_order.len() {
            let stuck = base_order.into_iter().find(|h| !order.contains(h)).unwrap();
            return Err(GraphError::Topology(TopologyError::Cycle(stuck)));
        }
        Ok(order)
    }

    /// Runs `Setup` then `Compile` for one node, checking the required-input
    /// invariant right before `Compile` and the required-output invariant
    /// right after (only for outputs something actually connected to —
    /// an unconnected output has no backing `Resource` in this arena model).
    fn compile_node(&mut self, handle: NodeHandle) -> GraphResult<()> {
        let type_id = self
            .instances
            .get(handle)
            .ok_or_else(|| GraphError::NotFound(format!("node {handle:?} not found")))?
            .type_id;

        let (input_schema, output_schema) = {
            let node_type = self
                .registry
                .by_id(type_id)
                .ok_or_else(|| GraphError::NotFound(format!("node type {type_id:?} not registered")))?;
            validate_param_schema(handle, node_type, &self.instances[handle].params)?;
            let task_count = self.instances[handle].determine_task_count(node_type).max(1);
            if let Some(instance) = self.instances.get_mut(handle) {
                instance.ensure_bundle_count(task_count, node_type);
            }
            (node_type.input_schema.clone(), node_type.output_schema.clone())
        };

        self.hooks.dispatch_node(NodeLifecyclePhase::BeforeSetup, handle);
        self.run_setup_phase(handle)?;
        self.hooks.dispatch_node(NodeLifecyclePhase::AfterSetup, handle);

        for (idx, slot) in input_schema.iter().enumerate() {
            if matches!(slot.behavior.nullability, SlotNullability::Required) {
                let wired = self.instances[handle]
                    .bundles[0]
                    .inputs
                    .get(idx)
                    .map(|arr| arr.iter().any(Option::is_some))
                    .unwrap_or(false);
                if !wired {
                    return Err(GraphError::MissingRequiredInput { node: handle, slot: idx as u32 });
                }
            }
        }

        self.hooks.dispatch_node(NodeLifecyclePhase::BeforeCompile, handle);
        self.run_compile_phase(handle)?;
        self.hooks.dispatch_node(NodeLifecyclePhase::AfterCompile, handle);

        for (idx, _slot) in output_schema.iter().enumerate() {
            let resource_ids: Vec<ResourceId> = self.instances[handle]
                .bundles[0]
                .outputs
                .get(idx)
                .map(|arr| arr.iter().filter_map(|r| *r).collect())
                .unwrap_or_default();
            for resource_id in resource_ids {
                if let Some(resource) = self.resources.get(resource_id) {
                    if !resource.is_produced() {
                        return Err(GraphError::InvariantBroken(format!(
                            "node {handle:?} did not produce a handle for connected output slot {idx}"
                        )));
                    }
                }
            }
        }

        self.register_node_cleanup(handle);
        Ok(())
    }

    fn run_setup_phase(&mut self, handle: NodeHandle) -> GraphResult<()> {
        let name = self
            .instances
            .get(handle)
            .ok_or_else(|| GraphError::NotFound(format!("node {handle:?} not found")))?
            .instance_name
            .clone();
        let params = self.instances[handle].params.clone();
        let instance = self.instances.get_mut(handle).unwrap();
        let mut ctx = NodeContext {
            instance_name: &name,
            instance_id: instance.instance_id,
            params: &params,
            device_capabilities: self.device_capabilities,
            resources: &mut self.resources,
            events: self.events.as_ref(),
            deferred_destruction: &mut self.deferred_destruction,
            frame_index: self.frame_index,
        };
        instance.run_setup(&mut ctx);
        Ok(())
    }

    fn run_compile_phase(&mut self, handle: NodeHandle) -> GraphResult<()> {
        let name = self
            .instances
            .get(handle)
            .ok_or_else(|| GraphError::NotFound(format!("node {handle:?} not found")))?
            .instance_name
            .clone();
        let params = self.instances[handle].params.clone();
        let instance = self.instances.get_mut(handle).unwrap();
        let mut ctx = NodeContext {
            instance_name: &name,
            instance_id: instance.instance_id,
            params: &params,
            device_capabilities: self.device_capabilities,
            resources: &mut self.resources,
            events: self.events.as_ref(),
            deferred_destruction: &mut self.deferred_destruction,
            frame_index: self.frame_index,
        };
        instance.run_compile(&mut ctx);
        Ok(())
    }

    /// Registers a placeholder cleanup-stack entry for `handle` purely so
    /// `register_external_cleanup`'s "runs before its dependency node"
    /// ordering has a named anchor; the actual teardown call
    /// (`NodeBehavior::cleanup`) happens in `cleanup_node`, not from inside
    /// this callback — `CleanupStack`'s callbacks are `'static` and cannot
    /// borrow the graph.
    fn register_node_cleanup(&mut self, handle: NodeHandle) {
        if let Some(instance) = self.instances.get(handle) {
            let name = instance.cleanup_name().to_string();
            if !self.cleanup_stack.is_registered(&name) {
                self.cleanup_stack.register(name, || {});
            }
        }
    }

    fn ensure_output_resource(&mut self, node: NodeHandle, slot: u32, array_index: u32, kind: ResourceKind) -> ResourceId {
        let key = (node, slot, array_index);
        if let Some(&id) = self.output_resources.get(&key) {
            return id;
        }
        let name = format!("{node:?}.out{slot}[{array_index}]");
        let descriptor = Descriptor::placeholder_for_kind(kind);
        let id = self.resources.insert(Resource::new(name, Lifetime::Transient, descriptor));
        self.output_resources.insert(key, id);
        if let Some(instance) = self.instances.get_mut(node) {
            instance.bundles[0].set_output(slot, array_index, id);
        }
        id
    }

    /// Records one more contribution to an accumulation input slot and
    /// rewrites the slot's bundle array into the final stable-sorted order
    /// (§4.4 "Accumulation slots": "the final sequence is a stable sort by
    /// `(sort_key, insertion_order)`"). An entry with no explicit sort key
    /// sorts by its own insertion index, so a slot with no sort keys at all
    /// keeps plain insertion order.
    fn push_accumulation_entry(&mut self, tgt_node: NodeHandle, tgt_slot: u32, resource: ResourceId, sort_key: Option<i64>) {
        let insertion_index = self.next_accumulation_seq;
        self.next_accumulation_seq += 1;

        let entries = self.accumulation_entries.entry((tgt_node, tgt_slot)).or_default();
        entries.push(AccumulationEntry {
            resource,
            sort_key,
            insertion_index,
        });
        entries.sort_by_key(|e| (e.sort_key.unwrap_or(e.insertion_index as i64), e.insertion_index));

        let ordered: Vec<ResourceId> = entries.iter().map(|e| e.resource).collect();
        if let Some(tgt) = self.instances.get_mut(tgt_node) {
            for (array_index, resource) in ordered.into_iter().enumerate() {
                tgt.bundles[0].set_input(tgt_slot, array_index as u32, resource);
            }
            tgt.mark_needs_recompile();
        }
    }

    fn rebuild_access_tracker(&mut self, order: &[NodeHandle]) {
        self.access_tracker.clear();
        for &handle in order {
            let Some(instance) = self.instances.get(handle) else { continue };
            let node_type = self.registry.by_id(instance.type_id);
            for bundle in &instance.bundles {
                for (slot, arr) in bundle.inputs.iter().enumerate() {
                    let mutability = node_type
                        .and_then(|t| t.input_slot(slot as u32))
                        .map(|s| s.behavior.mutability)
                        .unwrap_or(SlotMutability::ReadOnly);
                    let access_type = match mutability {
                        SlotMutability::ReadOnly => AccessType::Read,
                        SlotMutability::WriteOnly => AccessType::Write,
                        SlotMutability::ReadWrite => AccessType::ReadWrite,
                    };
                    for &resource in arr.iter().flatten() {
                        self.access_tracker.record_access(resource, handle, access_type, slot as u32, false);
                    }
                }
                for (slot, arr) in bundle.outputs.iter().enumerate() {
                    for &resource in arr.iter().flatten() {
                        self.access_tracker.record_access(resource, handle, AccessType::Write, slot as u32, true);
                    }
                }
            }
            for variadic in instance.variadic_slots.values() {
                self.access_tracker.record_access(variadic.resource, handle, AccessType::Read, variadic.binding, false);
            }
        }
    }

    fn rebuild_lifetime_analysis(&mut self, order: &[NodeHandle]) {
        let mut accesses: Vec<(ResourceId, NodeHandle, bool)> = Vec::new();
        for &handle in order {
            let Some(instance) = self.instances.get(handle) else { continue };
            for bundle in &instance.bundles {
                for &resource in bundle.outputs.iter().flatten().flatten() {
                    accesses.push((resource, handle, true));
                }
                for &resource in bundle.inputs.iter().flatten().flatten() {
                    accesses.push((resource, handle, false));
                }
            }
        }
        let persistent: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|(_, r)| r.lifetime == Lifetime::Persistent)
            .map(|(id, _)| id)
            .collect();
        self.lifetime_analyzer.compute_timelines(order, accesses, &persistent);
    }

    /// §4.10 step 5: drains the nodes a `WorkUnitChangeCallback` queued this
    /// frame (see `Graph::new`) and marks each one dirty, so
    /// `recompile_dirty_nodes` re-runs its `Compile` with the new
    /// `work_units` on the very next step.
    fn mark_budget_dirty_nodes(&mut self) {
        let dirty: Vec<NodeHandle> = std::mem::take(&mut *self.dirty_from_budget.lock());
        for handle in dirty {
            if let Some(instance) = self.instances.get_mut(handle) {
                instance.mark_needs_recompile();
            }
        }
    }

    /// §4.10 step 6: clears recompile flags, queues the node's current
    /// output handles for deferred destruction (hot-reload), then re-runs
    /// `Setup`/`Compile`.
    fn recompile_dirty_nodes(&mut self) -> GraphResult<()> {
        let dirty: Vec<NodeHandle> = self
            .execution_order
            .iter()
            .copied()
            .filter(|&h| self.instances.get(h).map(|i| i.needs_recompile || i.deferred_recompile).unwrap_or(false))
            .collect();

        for handle in dirty {
            if let Some(instance) = self.instances.get_mut(handle) {
                instance.clear_recompile_flags();
            }
            self.queue_node_resources_for_destruction(handle);
            if let Some(instance) = self.instances.get_mut(handle) {
                instance.reset_cleanup_flag();
            }
            self.compile_node(handle)?;
        }
        Ok(())
    }

    fn queue_node_resources_for_destruction(&mut self, handle: NodeHandle) {
        let resource_ids: Vec<ResourceId> = self
            .output_resources
            .iter()
            .filter(|((node, _, _), _)| *node == handle)
            .map(|(_, &id)| id)
            .collect();
        let frame_index = self.frame_index;
        for id in resource_ids {
            let gpu_handle = self.resources.get(id).and_then(|r| r.handle);
            if let Some(gpu_handle) = gpu_handle {
                self.deferred_destruction.add(gpu_handle, frame_index, |_h| {
                    trace!(target: "rendergraph::graph", "destroying stale output handle ahead of recompile");
                });
            }
        }
    }

    /// §4.6/§5: moves the resource arena, instance table, deferred
    /// destruction queue, and dependency tracker into a scratch `ExecState`
    /// behind one `parking_lot::Mutex` for the duration of the rayon-parallel
    /// wave execution, then moves them back. `GraphExecutor::execute`'s
    /// `run_node` closure is `Fn(...) + Sync` and may be called concurrently
    /// for distinct nodes in the same wave; `WaveScheduler` already
    /// guarantees no two nodes sharing a wave conflict over a resource, so
    /// the mutex is never contended across *different* resources — it only
    /// serializes the otherwise-unreconcilable `&mut` access to the shared
    /// arena, the way a single command-buffer recording thread would.
    fn execute_nodes(&mut self) -> Result<(), String> {
        self.hooks.dispatch_graph(GraphLifecyclePhase::ExecuteBegin);

        let state = Mutex::new(ExecState {
            instances: std::mem::take(&mut self.instances),
            resources: std::mem::take(&mut self.resources),
            deferred_destruction: std::mem::take(&mut self.deferred_destruction),
            dependency_tracker: std::mem::take(&mut self.dependency_tracker),
        });

        let device_capabilities = self.device_capabilities;
        let events: &EventBus = self.events.as_ref();
        let loop_manager = &self.loop_manager;
        let frame_index = self.frame_index;
        let waves = self.wave_scheduler.waves().to_vec();

        let errors = self.executor.execute(&waves, |handle| {
            let mut guard = state.lock();
            let ExecState { instances, resources, deferred_destruction, dependency_tracker } = &mut *guard;

            let Some(instance) = instances.get(handle) else {
                return Ok(());
            };
            if !loop_manager.should_execute_this_frame(&instance.loop_refs) {
                return Ok(());
            }
            let task_count = instance.bundles.len().max(1);
            let name = instance.instance_name.clone();
            let params = instance.params.clone();
            let read_resources: Vec<ResourceId> = instance.bundles[0].inputs.iter().flatten().flatten().copied().collect();

            for task in 0..task_count {
                let instance = instances.get_mut(handle).unwrap();
                let mut ctx = NodeContext {
                    instance_name: &name,
                    instance_id: instance.instance_id,
                    params: &params,
                    device_capabilities,
                    resources: &mut *resources,
                    events,
                    deferred_destruction: &mut *deferred_destruction,
                    frame_index,
                };
                instance.run_execute(&mut ctx, TaskIndex(task));
            }

            if let Some(instance) = instances.get_mut(handle) {
                instance.mark_complete();
            }
            for resource in read_resources {
                dependency_tracker.mark_consumed(resource, handle);
            }
            Ok(())
        });

        let ExecState { instances, resources, deferred_destruction, dependency_tracker } = state.into_inner();
        self.instances = instances;
        self.resources = resources;
        self.deferred_destruction = deferred_destruction;
        self.dependency_tracker = dependency_tracker;

        self.hooks.dispatch_graph(GraphLifecyclePhase::ExecuteEnd);

        if errors.is_empty() {
            Ok(())
        } else {
            let message = errors
                .iter()
                .map(|e| format!("{:?}: {}", e.node, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            for err in &errors {
                if let Some(instance) = self.instances.get_mut(err.node) {
                    instance.mark_error();
                }
            }
            Err(message)
        }
    }

    fn cleanup_node(&mut self, handle: NodeHandle) {
        let already_done = self.instances.get(handle).map(|i| i.is_cleaned_up()).unwrap_or(true);
        if already_done {
            return;
        }
        self.hooks.dispatch_node(NodeLifecyclePhase::BeforeCleanup, handle);
        let name = self.instances[handle].instance_name.clone();
        let params = self.instances[handle].params.clone();
        if let Some(instance) = self.instances.get_mut(handle) {
            let mut ctx = NodeContext {
                instance_name: &name,
                instance_id: instance.instance_id,
                params: &params,
                device_capabilities: self.device_capabilities,
                resources: &mut self.resources,
                events: self.events.as_ref(),
                deferred_destruction: &mut self.deferred_destruction,
                frame_index: self.frame_index,
            };
            instance.cleanup(&mut ctx);
        }
        self.hooks.dispatch_node(NodeLifecyclePhase::AfterCleanup, handle);
        self.events.publish(&messages::CleanupCompleted { node: Some(handle) });
    }

    fn dependent_closure(&self, roots: &[NodeHandle]) -> HashSet<NodeHandle> {
        let mut set: HashSet<NodeHandle> = roots.iter().copied().collect();
        for &root in roots {
            for dependent in self.topology.transitive_dependents(root) {
                set.insert(dependent);
            }
        }
        set
    }

    fn cleanup_set(&mut self, target: &HashSet<NodeHandle>, dry_run: bool) -> CleanupReport {
        let mut report = CleanupReport { cleaned: Vec::new(), blocked: Vec::new(), dry_run };

        for &handle in target {
            let blocked = self.topology.dependents(handle).into_iter().any(|dependent| {
                !target.contains(&dependent)
                    && self.instances.get(dependent).map(|i| !i.is_cleaned_up()).unwrap_or(false)
            });
            if blocked {
                report.blocked.push(handle);
            } else {
                report.cleaned.push(handle);
            }
        }

        if !dry_run {
            let mut order = report.cleaned.clone();
            order.sort_by_key(|&h| {
                std::cmp::Reverse(self.instances.get(h).map(|i| i.execution_order).unwrap_or(0))
            });
            for handle in order {
                self.cleanup_node(handle);
            }
        }

        report
    }
}

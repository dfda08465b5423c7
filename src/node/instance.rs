//! `NodeInstance`: per-node state, parameters, bundles, and the four-phase
//! lifecycle (C4). Grounded on `original_source`'s `NodeInstance.h` (tags,
//! dependencies, `cleanedUp` guard, `needsRecompile`/`deferredRecompile`,
//! `GetParameterValue<T>`) with the virtual `Setup/Compile/Execute/Cleanup`
//! quartet replaced by the `NodeBehavior` trait object per the design
//! notes ("deep inheritance ... replace with a NodeTrait").

use std::collections::{HashMap, HashSet};

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::cleanup::DeferredDestructionQueue;
use crate::error::GraphResult;
use crate::events::EventBus;
use crate::node::{DeviceCapabilities, NodeHandle, NodeType, NodeTypeId};
use crate::params::{ParamTable, ParamValue};
use crate::resource::{Resource, ResourceId, ResourceKind};
use crate::slot::SlotScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub u32);

/// A reference to a loop gating this node's per-frame execution (§3 "Loop
/// connections", §9 open question on loop semantics).
#[derive(Debug, Clone, Copy)]
pub struct LoopReference {
    pub loop_id: LoopId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Ready,
    Compiled,
    Executing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskIndex(pub usize);

/// Per-task `(inputs[], outputs[])` pair. Bundle *i* holds the resources for
/// task *i*; non-task-parallel nodes keep a single bundle at index 0 (§3
/// "Bundle").
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    /// `inputs[slot_index][array_index]`. Most slots bind a single resource,
    /// so each array stays inline up to 4 entries before spilling to the heap.
    pub inputs: Vec<SmallVec<[Option<ResourceId>; 4]>>,
    /// `outputs[slot_index][array_index]`.
    pub outputs: Vec<SmallVec<[Option<ResourceId>; 4]>>,
}

impl Bundle {
    pub fn with_slot_counts(input_slots: usize, output_slots: usize) -> Self {
        Bundle {
            inputs: vec![SmallVec::new(); input_slots],
            outputs: vec![SmallVec::new(); output_slots],
        }
    }

    pub fn input(&self, slot: u32, array_index: u32) -> Option<ResourceId> {
        self.inputs
            .get(slot as usize)
            .and_then(|arr| arr.get(array_index as usize))
            .copied()
            .flatten()
    }

    pub fn output(&self, slot: u32, array_index: u32) -> Option<ResourceId> {
        self.outputs
            .get(slot as usize)
            .and_then(|arr| arr.get(array_index as usize))
            .copied()
            .flatten()
    }

    pub fn set_input(&mut self, slot: u32, array_index: u32, resource: ResourceId) {
        let arr = &mut self.inputs[slot as usize];
        if arr.len() <= array_index as usize {
            arr.resize(array_index as usize + 1, None);
        }
        arr[array_index as usize] = Some(resource);
    }

    pub fn set_output(&mut self, slot: u32, array_index: u32, resource: ResourceId) {
        let arr = &mut self.outputs[slot as usize];
        if arr.len() <= array_index as usize {
            arr.resize(array_index as usize + 1, None);
        }
        arr[array_index as usize] = Some(resource);
    }
}

/// Runtime record of a shader-reflected binding slot wired through
/// `VariadicRule` (§4.4: "Each VariadicSlotInfo records {resource, kind,
/// binding, descriptor_type, source_node, source_output,
/// has_field_extraction, field_offset}"). Unlike static input/output slots,
/// these are discovered at `Compile` time from shader reflection and have no
/// `SlotInfo` counterpart in the node type's schema.
#[derive(Debug, Clone)]
pub struct VariadicSlotInfo {
    pub resource: ResourceId,
    pub kind: ResourceKind,
    pub binding: u32,
    pub descriptor_type: Option<u32>,
    pub source_node: NodeHandle,
    pub source_output: u32,
    pub has_field_extraction: bool,
    pub field_offset: Option<usize>,
}

/// Per-phase context handed to `NodeBehavior` methods. Resources are looked
/// up through `resources`, a mutable borrow of the graph's resource arena —
/// nodes never own resources directly, only the `ResourceId`s in their
/// bundle (§3 "Resource: Invariant", §9 "arena" design note).
pub struct NodeContext<'a> {
    pub instance_name: &'a str,
    pub instance_id: u64,
    pub params: &'a ParamTable,
    pub device_capabilities: DeviceCapabilities,
    pub resources: &'a mut SlotMap<ResourceId, Resource>,
    pub events: &'a EventBus,
    pub deferred_destruction: &'a mut DeferredDestructionQueue,
    pub frame_index: u64,
}

impl<'a> NodeContext<'a> {
    pub fn param_or(&self, name: &str, default: &ParamValue) -> ParamValue {
        self.params.get_or(name, default)
    }
}

/// The behavior a concrete node implements. The orchestrator (`NodeInstance`
/// plus the graph façade's hook firing) supplies everything else — state
/// transitions, hook dispatch, cleanup idempotence (§4.2).
pub trait NodeBehavior: Send {
    /// Runs before topology is finalized. May only touch static parameters
    /// (§4.2 invariant: "No inputs or outputs readable in Setup").
    fn setup(&mut self, ctx: &mut NodeContext);

    /// Runs after topology is finalized; may read connected inputs, acquire
    /// pipelines, and (for shader-bound nodes) create dynamic variadic
    /// slots. Must write every non-nullable output. Operates on the
    /// node-level bundle (index 0) — per-task bundles don't exist until
    /// `Execute` (§4.2 `determine_task_count`).
    fn compile(&mut self, ctx: &mut NodeContext, bundle: &mut Bundle);

    /// May run multiple times per frame, once per task (§4.2
    /// `determine_task_count`). Must not add or remove edges.
    fn execute(&mut self, ctx: &mut NodeContext, bundle: &mut Bundle, task: TaskIndex);

    /// Idempotent; the `NodeInstance` wrapper guarantees this is only ever
    /// invoked once regardless of how many times `NodeInstance::cleanup` is
    /// called.
    fn cleanup(&mut self, ctx: &mut NodeContext);

    /// Whether tasks within this node may run concurrently with each other
    /// (not with other nodes — that's the wave scheduler's job).
    fn is_parallel_safe(&self) -> bool {
        false
    }
}

/// Concrete instantiation of a `NodeType` (§3 "Node").
pub struct NodeInstance {
    pub handle: NodeHandle,
    pub instance_name: String,
    pub instance_id: u64,
    pub type_id: NodeTypeId,

    pub behavior: Box<dyn NodeBehavior>,

    pub params: ParamTable,
    pub tags: HashSet<String>,
    pub explicit_dependencies: Vec<NodeHandle>,
    pub loop_refs: Vec<LoopReference>,

    pub state: NodeState,
    pub execution_order: u32,
    pub needs_recompile: bool,
    pub deferred_recompile: bool,
    cleaned_up: bool,

    pub bundles: Vec<Bundle>,

    /// Shader-reflected binding slots, keyed by binding index. Populated by
    /// `UpdateVariadicSlot` as `VariadicRule` resolves connections to
    /// `SlotKind::Binding` inputs (§4.4).
    pub variadic_slots: HashMap<u32, VariadicSlotInfo>,

    /// Per-slot/array-index flag set by `Compile` when it actually reads an
    /// input, driving dependency tracking for Execute-role re-reads (§4.2
    /// step 2: "Marks 'input used in compile' per slot/array-index").
    pub inputs_used_in_compile: HashSet<(u32, u32)>,
}

impl NodeInstance {
    pub fn new(
        handle: NodeHandle,
        instance_name: impl Into<String>,
        instance_id: u64,
        type_id: NodeTypeId,
        node_type: &NodeType,
        behavior: Box<dyn NodeBehavior>,
    ) -> Self {
        let bundle = Bundle::with_slot_counts(node_type.input_schema.len(), node_type.output_schema.len());
        NodeInstance {
            handle,
            instance_name: instance_name.into(),
            instance_id,
            type_id,
            behavior,
            params: ParamTable::new(),
            tags: HashSet::new(),
            explicit_dependencies: Vec::new(),
            loop_refs: Vec::new(),
            state: NodeState::Created,
            execution_order: 0,
            needs_recompile: false,
            deferred_recompile: false,
            cleaned_up: false,
            bundles: vec![bundle],
            variadic_slots: HashMap::new(),
            inputs_used_in_compile: HashSet::new(),
        }
    }

    /// Idempotent overwrite: re-wiring the same binding index just replaces
    /// the previous record (§4.4 "UpdateVariadicSlot ... idempotent").
    pub fn update_variadic_slot(&mut self, binding: u32, info: VariadicSlotInfo) {
        self.variadic_slots.insert(binding, info);
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn add_dependency(&mut self, dep: NodeHandle) {
        if !self.explicit_dependencies.contains(&dep) {
            self.explicit_dependencies.push(dep);
        }
    }

    pub fn mark_needs_recompile(&mut self) {
        if self.state == NodeState::Executing {
            // Set during execution: defer until next frame (§3 "Recompile flags").
            self.deferred_recompile = true;
        } else {
            self.needs_recompile = true;
        }
    }

    pub fn clear_recompile_flags(&mut self) {
        self.needs_recompile = false;
        self.deferred_recompile = false;
    }

    /// §4.2 `determine_task_count`: `1` if every input slot is `NodeLevel`,
    /// otherwise the length of the driving `TaskLevel`/`InstanceLevel` input
    /// array.
    pub fn determine_task_count(&self, node_type: &NodeType) -> usize {
        let mut driving_len = 1usize;
        for (idx, slot) in node_type.input_schema.iter().enumerate() {
            if matches!(slot.behavior.scope, SlotScope::TaskLevel | SlotScope::InstanceLevel) {
                let len = self.bundles[0]
                    .inputs
                    .get(idx)
                    .map(|arr| arr.len())
                    .unwrap_or(0);
                driving_len = driving_len.max(len.max(1));
            }
        }
        driving_len
    }

    pub fn ensure_bundle_count(&mut self, count: usize, node_type: &NodeType) {
        while self.bundles.len() < count {
            self.bundles.push(Bundle::with_slot_counts(
                node_type.input_schema.len(),
                node_type.output_schema.len(),
            ));
        }
        self.bundles.truncate(count.max(1));
    }

    /// Runs `Setup`. The caller (graph façade) is responsible for firing
    /// `NodeLifecyclePhase::{Pre,Post}Setup` hooks around this call.
    pub fn run_setup(&mut self, ctx: &mut NodeContext) {
        self.behavior.setup(ctx);
        self.state = NodeState::Ready;
    }

    pub fn run_compile(&mut self, ctx: &mut NodeContext) {
        let mut bundle = std::mem::take(&mut self.bundles[0]);
        self.behavior.compile(ctx, &mut bundle);
        self.bundles[0] = bundle;
        self.state = NodeState::Compiled;
    }

    pub fn run_execute(&mut self, ctx: &mut NodeContext, task: TaskIndex) {
        self.state = NodeState::Executing;
        let mut bundle = std::mem::take(&mut self.bundles[task.0]);
        self.behavior.execute(ctx, &mut bundle, task);
        self.bundles[task.0] = bundle;
    }

    pub fn mark_complete(&mut self) {
        self.state = NodeState::Complete;
    }

    pub fn mark_error(&mut self) {
        self.state = NodeState::Error;
    }

    /// Idempotent cleanup (§4.2 invariant, §8 "`N.cleanup()` is idempotent").
    pub fn cleanup(&mut self, ctx: &mut NodeContext) {
        if self.cleaned_up {
            return;
        }
        self.behavior.cleanup(ctx);
        self.cleaned_up = true;
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// Allows a node that was cleaned up mid-lifetime (e.g. ahead of a
    /// recompile) to be cleaned up again later. Only the graph façade calls
    /// this, immediately before re-running `Setup`/`Compile`.
    pub fn reset_cleanup_flag(&mut self) {
        self.cleaned_up = false;
    }

    /// Cleanup name used for dependency-ordering lookups (§4.9).
    pub fn cleanup_name(&self) -> &str {
        &self.instance_name
    }
}

pub fn validate_param_schema(
    handle: NodeHandle,
    node_type: &NodeType,
    params: &ParamTable,
) -> GraphResult<()> {
    let missing = params.missing_required(&node_type.param_schema);
    if let Some(_name) = missing.first() {
        return Err(crate::error::GraphError::MissingRequiredInput { node: handle, slot: 0 });
    }
    Ok(())
}

//! Lifecycle hooks and resource dependency tracking (C7). Grounded on
//! `original_source`'s `GraphLifecycleHooks.h` (ordered, blocking callback
//! dispatch per phase transition — distinct from `events::EventBus`, which is
//! for fire-and-forget notifications) and `ResourceDependencyTracker.h`
//! (producer/last-consumer bookkeeping feeding the cleanup stack's
//! destroy-when-unreferenced decision).

use std::collections::HashMap;

use crate::node::NodeHandle;
use crate::resource::ResourceId;

/// Graph-wide lifecycle transitions a hook can observe (§4.1, §5). Unlike
/// `events::messages`, these fire synchronously and in a fixed order as part
/// of `render_frame`, never from arbitrary node code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphLifecyclePhase {
    FrameBegin,
    SetupBegin,
    SetupEnd,
    CompileBegin,
    CompileEnd,
    ExecuteBegin,
    ExecuteEnd,
    CleanupBegin,
    CleanupEnd,
    FrameEnd,

    /// `Graph::compile`'s nine ordered sub-phases (§4.5). Distinct from the
    /// coarse `CompileBegin`/`CompileEnd` above, which still bracket the
    /// whole pipeline for embedders that don't care about the steps inside.
    PreTopologyBuild,
    PostTopologyBuild,
    PreExecutionOrder,
    PostExecutionOrder,
    PreCompilation,
    PostCompilation,
}

/// Per-node lifecycle transitions (§4.2 `NodeState`), dispatched once per
/// node per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLifecyclePhase {
    BeforeSetup,
    AfterSetup,
    BeforeCompile,
    AfterCompile,
    BeforeExecute,
    AfterExecute,
    BeforeCleanup,
    AfterCleanup,
}

pub type GraphHook = Box<dyn Fn(GraphLifecyclePhase) + Send + Sync>;
pub type NodeHook = Box<dyn Fn(NodeLifecyclePhase, NodeHandle) + Send + Sync>;

/// Ordered, blocking callback registry for graph- and node-level lifecycle
/// transitions. Hooks run inline on the calling thread in registration
/// order; they are for embedder instrumentation (profiler markers, RenderDoc
/// captures) and must not mutate graph structure.
#[derive(Default)]
pub struct GraphLifecycleHooks {
    graph_hooks: Vec<GraphHook>,
    node_hooks: Vec<NodeHook>,
}

impl GraphLifecycleHooks {
    pub fn new() -> Self {
        GraphLifecycleHooks::default()
    }

    pub fn on_graph_phase<F>(&mut self, callback: F)
    where
        F: Fn(GraphLifecyclePhase) + Send + Sync + 'static,
    {
        self.graph_hooks.push(Box::new(callback));
    }

    pub fn on_node_phase<F>(&mut self, callback: F)
    where
        F: Fn(NodeLifecyclePhase, NodeHandle) + Send + Sync + 'static,
    {
        self.node_hooks.push(Box::new(callback));
    }

    pub fn dispatch_graph(&self, phase: GraphLifecyclePhase) {
        for hook in &self.graph_hooks {
            hook(phase);
        }
    }

    pub fn dispatch_node(&self, phase: NodeLifecyclePhase, node: NodeHandle) {
        for hook in &self.node_hooks {
            hook(phase, node);
        }
    }

    pub fn clear(&mut self) {
        self.graph_hooks.clear();
        self.node_hooks.clear();
    }
}

/// Tracks, per resource, the node that produced it and the set of nodes that
/// still consume it — the input the cleanup stack (C12) uses to decide when
/// a transient resource's last consumer has run and it is safe to destroy
/// (§4.9, §4.6 "resource lifetime" interplay). Distinct from
/// `access::ResourceAccessTracker`, which answers read/write conflict
/// queries for scheduling rather than destruction timing.
#[derive(Default)]
pub struct ResourceDependencyTracker {
    producer: HashMap<ResourceId, NodeHandle>,
    consumers: HashMap<ResourceId, Vec<NodeHandle>>,
    satisfied_consumers: HashMap<ResourceId, Vec<NodeHandle>>,
}

impl ResourceDependencyTracker {
    pub fn new() -> Self {
        ResourceDependencyTracker::default()
    }

    pub fn clear(&mut self) {
        self.producer.clear();
        self.consumers.clear();
        self.satisfied_consumers.clear();
    }

    pub fn set_producer(&mut self, resource: ResourceId, node: NodeHandle) {
        self.producer.insert(resource, node);
    }

    pub fn add_consumer(&mut self, resource: ResourceId, node: NodeHandle) {
        let list = self.consumers.entry(resource).or_default();
        if !list.contains(&node) {
            list.push(node);
        }
    }

    pub fn producer(&self, resource: ResourceId) -> Option<NodeHandle> {
        self.producer.get(&resource).copied()
    }

    pub fn consumers(&self, resource: ResourceId) -> &[NodeHandle] {
        self.consumers.get(&resource).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Called once a node finishes Execute; marks it as a satisfied
    /// consumer of any resource it reads.
    pub fn mark_consumed(&mut self, resource: ResourceId, node: NodeHandle) {
        if self
            .consumers
            .get(&resource)
            .map(|c| c.contains(&node))
            .unwrap_or(false)
        {
            let satisfied = self.satisfied_consumers.entry(resource).or_default();
            if !satisfied.contains(&node) {
                satisfied.push(node);
            }
        }
    }

    /// True once every registered consumer of `resource` has been marked
    /// consumed — the signal the cleanup stack waits on before releasing a
    /// transient resource (§4.9).
    pub fn all_consumers_satisfied(&self, resource: ResourceId) -> bool {
        let total = self.consumers.get(&resource).map(Vec::len).unwrap_or(0);
        if total == 0 {
            return true;
        }
        let satisfied = self.satisfied_consumers.get(&resource).map(Vec::len).unwrap_or(0);
        satisfied >= total
    }

    pub fn pending_resources(&self) -> Vec<ResourceId> {
        self.consumers
            .keys()
            .filter(|&&r| !self.all_consumers_satisfied(r))
            .copied()
            .collect()
    }
}

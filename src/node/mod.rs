//! Node type blueprint and registry (C3).
//!
//! Grounded on `original_source`'s `NodeType.h` / `NodeTypeRegistry.{h,cpp}`
//! (three lookup modes: by string, by id, by language-level type; duplicate
//! registration rejected) and, for the Rust-shaped factory/trait-object
//! split, on the teacher's `RendererBackend`-style associated-type traits
//! (`renderer/mod.rs`) generalized to a `NodeBehavior` trait object per the
//! design notes ("deep inheritance ... replace with a `NodeTrait`").

mod instance;
mod registry;

pub use instance::{
    validate_param_schema, Bundle, LoopId, LoopReference, NodeBehavior, NodeContext, NodeInstance,
    NodeState, TaskIndex, VariadicSlotInfo,
};
pub use registry::{NodeRegistry, NodeTypeId};

use std::any::TypeId;
use std::collections::HashMap;

use bitflags::bitflags;

use crate::params::ParamDef;
use crate::slot::SlotInfo;

use slotmap::new_key_type;

new_key_type! {
    /// Stable dense handle into the graph's instance table (§3 "Node: Identity",
    /// §6 `NodeHandle`).
    pub struct NodeHandle;
}

bitflags! {
    /// Which GPU queue families / capabilities a node type requires.
    #[derive(Default)]
    pub struct DeviceCapabilities: u32 {
        const NONE = 0;
        const RAY_TRACING = 1 << 0;
        const SWAPCHAIN_MAINTENANCE_3 = 1 << 1;
        const MESH_SHADERS = 1 << 2;
        const SPARSE_BINDING = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
    RayTracing,
    Transfer,
    None,
}

/// Immutable blueprint for a node (§3 "NodeType", §4.2).
///
/// `factory` produces a fresh `Box<dyn NodeBehavior>` per instance; schemas
/// are shared (`Arc`-free here since `NodeType` itself is owned by the
/// registry for the program's duration and instances only ever borrow it
/// through a `NodeTypeId` lookup).
pub struct NodeType {
    pub type_id: NodeTypeId,
    pub type_name: String,
    pub input_schema: Vec<SlotInfo>,
    pub output_schema: Vec<SlotInfo>,
    pub param_schema: Vec<ParamDef>,
    pub required_capabilities: DeviceCapabilities,
    pub pipeline_kind: PipelineKind,
    pub lang_type_id: Option<TypeId>,
    factory: Box<dyn Fn() -> Box<dyn NodeBehavior> + Send + Sync>,
}

impl NodeType {
    pub fn new<F>(
        type_id: NodeTypeId,
        type_name: impl Into<String>,
        input_schema: Vec<SlotInfo>,
        output_schema: Vec<SlotInfo>,
        param_schema: Vec<ParamDef>,
        required_capabilities: DeviceCapabilities,
        pipeline_kind: PipelineKind,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Box<dyn NodeBehavior> + Send + Sync + 'static,
    {
        NodeType {
            type_id,
            type_name: type_name.into(),
            input_schema,
            output_schema,
            param_schema,
            required_capabilities,
            pipeline_kind,
            lang_type_id: None,
            factory: Box::new(factory),
        }
    }

    /// Tag this `NodeType` with the Rust type of its concrete `NodeBehavior`
    /// impl, enabling the registry's "by language-level type" lookup mode.
    pub fn with_lang_type<T: NodeBehavior + 'static>(mut self) -> Self {
        self.lang_type_id = Some(TypeId::of::<T>());
        self
    }

    pub fn create(&self) -> Box<dyn NodeBehavior> {
        (self.factory)()
    }

    pub fn input_slot(&self, index: u32) -> Option<&SlotInfo> {
        self.input_schema.get(index as usize)
    }

    pub fn output_slot(&self, index: u32) -> Option<&SlotInfo> {
        self.output_schema.get(index as usize)
    }
}

/// Owns all registered `NodeType`s. Kept separate from `NodeRegistry`'s
/// index maps so tests can construct `NodeType`s freely without going
/// through the full registry machinery.
pub type NodeTypeMap = HashMap<NodeTypeId, NodeType>;

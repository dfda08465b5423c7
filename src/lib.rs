//! A render graph engine: typed nodes wire typed GPU resource slots into a
//! DAG, which is compiled once into a wave-parallel execution schedule and
//! then driven frame after frame under an adaptive time budget.
//!
//! The public entry point is [`graph::Graph`]: register node types, add node
//! instances, `connect` their slots, `compile`, then call `render_frame` in
//! a loop. See `graph::Graph` for the exact lifecycle.

#[macro_use]
extern crate log;

pub mod access;
pub mod budget;
pub mod cleanup;
pub mod connection;
pub mod error;
pub mod events;
pub mod graph;
pub mod hooks;
pub mod lifetime;
pub mod loop_manager;
pub mod node;
pub mod params;
pub mod resource;
pub mod schedule;
pub mod slot;
pub mod topology;

pub use budget::{CapacityTracker, ResolutionTaskProfile, SimpleTaskProfile, TaskProfile, TaskProfileRegistry};
pub use error::{GraphError, GraphResult, GpuFailure, PresentResult, TopologyError};
pub use events::{EventBus, Message, ScopedSubscriptions, Subscription};
pub use graph::{CleanupReport, Graph, GraphConfig};
pub use node::{NodeBehavior, NodeContext, NodeHandle, NodeInstance, NodeRegistry, NodeType, NodeTypeId};
pub use resource::{Descriptor, Resource, ResourceId, ResourceKind};
pub use slot::{SlotFlags, SlotInfo, SlotRole};
pub use topology::GraphTopology;

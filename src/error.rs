//! Error taxonomy for the render graph engine.
//!
//! Mirrors the taxonomy in the design notes: each variant names the phase
//! where it surfaces and the treatment the caller should apply. `RuntimeInvariantBroken`
//! from that taxonomy is deliberately not a variant here — it is a programming
//! error and is raised with `debug_assert!`/`panic!` at the point of violation
//! rather than returned.

use std::fmt;

use crate::node::NodeHandle;

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Connect-time: the two slots are not type-compatible.
    #[error("type mismatch connecting {src:?}.{src_slot} -> {tgt:?}.{tgt_slot}: {reason}")]
    TypeMismatch {
        src: NodeHandle,
        src_slot: u32,
        tgt: NodeHandle,
        tgt_slot: u32,
        reason: String,
    },

    /// Connect-time: no registered rule claims this connection, or a rule/modifier rejected it.
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),

    /// Compile-time: cycle, dangling edge, or out-of-range slot index.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Compile-time: a non-nullable input was never wired.
    #[error("node {node:?} is missing required input at slot {slot}")]
    MissingRequiredInput { node: NodeHandle, slot: u32 },

    /// Setup/Compile: a resource allocation exceeded the configured budget.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Execute-time: surfaced back through `render_frame`.
    #[error("gpu failure: {0:?}")]
    Gpu(GpuFailure),

    /// A node type or instance name lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Registering a node type or node instance under a name/id already in use.
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// A hard invariant was violated in a context that can still unwind
    /// cleanly back through the public API instead of panicking (e.g. a
    /// recompile attempted while a frame is mid-execute). Distinct from the
    /// `debug_assert!`/`panic!` treatment used for invariants checked on
    /// hot paths, where unwinding is not an option.
    #[error("invariant broken: {0}")]
    InvariantBroken(String),

    /// An event subscriber callback panicked or returned an error while
    /// handling a published message.
    #[error("event handler error: {0}")]
    EventHandler(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TopologyError {
    #[error("cycle detected involving node {0:?}")]
    Cycle(NodeHandle),
    #[error("edge references unknown node {0:?}")]
    DanglingNode(NodeHandle),
    #[error("edge slot index {index} out of range for node {node:?} (schema has {len} slots)")]
    BadSlotIndex {
        node: NodeHandle,
        index: u32,
        len: u32,
    },
}

/// What `render_frame` returns on the GPU-failure path (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuFailure {
    SwapchainOutOfDate,
    SwapchainSuboptimal,
    DeviceLost,
}

impl fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The overall outcome of a `render_frame` call (§6, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentResult {
    Ok,
    SwapchainOutOfDate,
    SwapchainSuboptimal,
    DeviceLost,
    Error(String),
}

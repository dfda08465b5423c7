//! Resource descriptors and the compile-time resource-kind trait (C1).
//!
//! Grounded on `frame::resource` in the teacher (`ImageId`/`BufferId` newtype
//! handles into a dense table, `FrameResource::{Imported, Transient}`,
//! kind-specific `ImageDesc`/`BufferDesc` structs) generalized from two
//! concrete kinds to the closed `ResourceKind` set in spec §3, and on
//! `Data/Core/ResourceTypeTraits.h` / `CompileTimeResourceSystem.h` in
//! `original_source` for the type-trait shape.

mod descriptor;
mod handle;
pub mod kind;

pub use descriptor::*;
pub use handle::GpuHandle;
pub use kind::{ResourceKind, ResourceKindOf};

use slotmap::new_key_type;

new_key_type! {
    /// Dense arena key for a resource instance, owned by the graph (§3 "Resource").
    pub struct ResourceId;
}

/// How long a resource instance lives (§3 "Lifetime").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Created for this frame, destroyed (or recycled) after.
    Transient,
    /// Owned by the graph across frames.
    Persistent,
    /// Owned by the embedder, borrowed by the graph (e.g. a swapchain image).
    Imported,
    /// Allocated once and never recreated for the life of the graph.
    Static,
}

/// An opaque GPU object plus its descriptor and lifetime tag, owned
/// exclusively by the graph (§3 "Resource" / "Invariant").
pub struct Resource {
    pub kind: ResourceKind,
    pub lifetime: Lifetime,
    pub descriptor: Descriptor,
    /// Set post-compile by the producing node; `None` before that node's
    /// `Compile` phase has run.
    pub handle: Option<GpuHandle>,
    /// Debug name, mirrors the teacher's `FrameResource::name()`.
    pub name: String,
}

impl Resource {
    pub fn new(name: impl Into<String>, lifetime: Lifetime, descriptor: Descriptor) -> Self {
        let kind = descriptor.kind();
        Resource {
            kind,
            lifetime,
            descriptor,
            handle: None,
            name: name.into(),
        }
    }

    pub fn is_produced(&self) -> bool {
        self.handle.is_some()
    }
}

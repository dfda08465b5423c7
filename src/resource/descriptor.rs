//! Kind-specific resource descriptors (§3 "Resource: Descriptor").
//!
//! Grounded on the teacher's `ImageDesc`/`BufferDesc` (`frame/resource.rs`),
//! generalized to every `ResourceKind` and made to compare by structural
//! equality as the spec requires ("Descriptors compare by structural
//! equality").

use super::kind::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: u32,
    pub usage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image3DDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub format: u32,
    pub usage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CubeMapDescriptor {
    pub size: u32,
    pub mip_levels: u32,
    pub format: u32,
    pub usage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub usage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: u32,
    pub memory_props: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccelerationStructureDescriptor {
    pub primitive_count: u32,
    pub flags: u32,
}

/// An opaque, backend-defined descriptor for kinds the core does not model
/// in detail (the `PassThroughStorage` escape hatch).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpaqueDescriptor {
    pub tag: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Image(ImageDescriptor),
    Image3D(Image3DDescriptor),
    CubeMap(CubeMapDescriptor),
    StorageImage(StorageImageDescriptor),
    Buffer(BufferDescriptor),
    AccelerationStructure(AccelerationStructureDescriptor),
    Opaque(OpaqueDescriptor),
}

impl Descriptor {
    /// A zeroed descriptor of the right variant for `kind`, used by the
    /// graph façade when it creates a `Resource` at connect time (§3
    /// "created by the owning graph when an output slot is wired") — the
    /// producing node's `Compile` fills in the real dimensions/usage by
    /// overwriting `ctx.resources[id].descriptor` before it reads or writes
    /// the handle.
    pub fn placeholder_for_kind(kind: ResourceKind) -> Descriptor {
        match kind {
            ResourceKind::Image => Descriptor::Image(ImageDescriptor {
                width: 0,
                height: 0,
                mip_levels: 1,
                array_layers: 1,
                format: 0,
                usage: 0,
            }),
            ResourceKind::Image3D => Descriptor::Image3D(Image3DDescriptor {
                width: 0,
                height: 0,
                depth: 0,
                mip_levels: 1,
                format: 0,
                usage: 0,
            }),
            ResourceKind::CubeMap => Descriptor::CubeMap(CubeMapDescriptor {
                size: 0,
                mip_levels: 1,
                format: 0,
                usage: 0,
            }),
            ResourceKind::StorageImage => Descriptor::StorageImage(StorageImageDescriptor {
                width: 0,
                height: 0,
                format: 0,
                usage: 0,
            }),
            ResourceKind::Buffer => Descriptor::Buffer(BufferDescriptor {
                size: 0,
                usage: 0,
                memory_props: 0,
            }),
            ResourceKind::AccelerationStructure => {
                Descriptor::AccelerationStructure(AccelerationStructureDescriptor {
                    primitive_count: 0,
                    flags: 0,
                })
            }
            ResourceKind::PassThroughStorage => Descriptor::Opaque(OpaqueDescriptor { tag: 0 }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Descriptor::Image(_) => ResourceKind::Image,
            Descriptor::Image3D(_) => ResourceKind::Image3D,
            Descriptor::CubeMap(_) => ResourceKind::CubeMap,
            Descriptor::StorageImage(_) => ResourceKind::StorageImage,
            Descriptor::Buffer(_) => ResourceKind::Buffer,
            Descriptor::AccelerationStructure(_) => ResourceKind::AccelerationStructure,
            Descriptor::Opaque(_) => ResourceKind::PassThroughStorage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_compare_structurally() {
        let a = Descriptor::Image(ImageDescriptor {
            width: 1920,
            height: 1080,
            mip_levels: 1,
            array_layers: 1,
            format: 0,
            usage: 0,
        });
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.kind(), ResourceKind::Image);
    }
}

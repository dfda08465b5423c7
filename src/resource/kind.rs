//! Compile-time resource-kind trait (§4.1).
//!
//! `original_source`'s `Data/Core/ResourceTypeTraits.h` maps each accepted
//! handle type to a `ResourceType` tag at compile time via a trait
//! specialization; `ResourceTypeCache.h` memoizes the lookup. Rust expresses
//! the same mapping directly as an associated-const trait impl, no caching
//! layer needed since the compiler resolves it statically.

/// The semantic tag a slot's type `T` maps to (§3 "Resource: Kind").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Buffer,
    CubeMap,
    Image3D,
    StorageImage,
    AccelerationStructure,
    /// The `PassThroughStorage` escape hatch (§4.1): connects to anything.
    PassThroughStorage,
}

/// Compile-time mapping from a host type `T` to its `ResourceKind`.
///
/// Every type usable as a `ResourceSlot<T, ..>` payload must implement this.
/// Container types (`Vec<T>`, `[T; N]`) strip to "many of `T`" rather than
/// gaining their own kind — callers ask `T::KIND` after stripping, which the
/// slot-construction helpers in `crate::slot` do via the `Elem` associated
/// type below.
pub trait ResourceKindOf {
    const KIND: ResourceKind;

    /// The element type after stripping one layer of `Vec`/array container.
    /// For non-container `T` this is `T` itself.
    type Elem: ResourceKindOf;
}

/// Opaque escape-hatch type: compatible with any other slot per §4.1.
pub struct PassThroughStorage;

impl ResourceKindOf for PassThroughStorage {
    const KIND: ResourceKind = ResourceKind::PassThroughStorage;
    type Elem = PassThroughStorage;
}

macro_rules! impl_resource_kind {
    ($ty:ty, $kind:expr) => {
        impl ResourceKindOf for $ty {
            const KIND: ResourceKind = $kind;
            type Elem = $ty;
        }
    };
}

/// Marker types standing in for the opaque GPU handle types the real
/// backend would define (§1: "the core treats GPU handles as opaque").
pub struct ImageHandleTy;
pub struct BufferHandleTy;
pub struct CubeMapHandleTy;
pub struct Image3DHandleTy;
pub struct StorageImageHandleTy;
pub struct AccelerationStructureHandleTy;

impl_resource_kind!(ImageHandleTy, ResourceKind::Image);
impl_resource_kind!(BufferHandleTy, ResourceKind::Buffer);
impl_resource_kind!(CubeMapHandleTy, ResourceKind::CubeMap);
impl_resource_kind!(Image3DHandleTy, ResourceKind::Image3D);
impl_resource_kind!(StorageImageHandleTy, ResourceKind::StorageImage);
impl_resource_kind!(
    AccelerationStructureHandleTy,
    ResourceKind::AccelerationStructure
);

impl<T: ResourceKindOf> ResourceKindOf for Vec<T> {
    const KIND: ResourceKind = T::KIND;
    type Elem = T;
}

impl<T: ResourceKindOf, const N: usize> ResourceKindOf for [T; N] {
    const KIND: ResourceKind = T::KIND;
    type Elem = T;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_stripping_preserves_kind() {
        assert_eq!(
            <Vec<ImageHandleTy> as ResourceKindOf>::KIND,
            ResourceKind::Image
        );
        assert_eq!(
            <[BufferHandleTy; 4] as ResourceKindOf>::KIND,
            ResourceKind::Buffer
        );
    }

    #[test]
    fn pass_through_is_its_own_kind() {
        assert_eq!(PassThroughStorage::KIND, ResourceKind::PassThroughStorage);
    }
}

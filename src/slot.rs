//! Unified slot metadata (C2), compile-time `ResourceSlot<T, IDX>` marker and
//! the runtime `SlotInfo` it and shader reflection both funnel into.
//!
//! `original_source`'s `Data/Core/SlotFields.h` makes the field list a single
//! X-macro'd source of truth so `ResourceSlot` (compile-time) and `SlotInfo`
//! (runtime) can never drift. Rust has no X-macros, but the equivalent
//! single-source-of-truth is achieved with one macro, `slot_fields!`, that
//! both `SlotInfo` and the `StaticSlotDef` compile-time constant are built
//! from — add a field in one place and both factories below pick it up.

use std::marker::PhantomData;

use bitflags::bitflags;

use crate::resource::{ResourceKind, ResourceKindOf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotNullability {
    Required,
    Optional,
}

bitflags! {
    /// When the slot is accessed during the node lifecycle (§3 "Slot: role").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotRole: u8 {
        const NONE        = 0;
        const DEPENDENCY  = 1 << 0;
        const EXECUTE     = 1 << 1;
        const CLEANUP_ONLY = 1 << 2;
        const OUTPUT      = 1 << 3;
        const DEBUG       = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotMutability {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Drives task-count determination (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotScope {
    NodeLevel,
    TaskLevel,
    InstanceLevel,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u8 {
        const NONE          = 0;
        const ACCUMULATION  = 1 << 0;
        const MULTI_CONNECT = 1 << 1;
        const EXPLICIT_ORDER = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotArrayMode {
    Single,
    Array,
}

/// How an accumulation slot stores its contributions (§4.4 "Accumulation slots").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageStrategy {
    Value,
    Reference,
    Span,
}

/// Discriminates the three things a `SlotInfo` can represent (§4.1 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    StaticInput,
    StaticOutput,
    Binding,
}

/// Validation lifecycle for a slot (§4.4 "Variadic slots").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Tentative,
    Validated,
    Compiled,
    Invalid,
}

/// Single source of truth for the behavioral fields shared by every slot,
/// whether it came from a compile-time `ResourceSlot<T, IDX>` or from shader
/// reflection via `SlotInfo::from_binding`.
macro_rules! slot_fields {
    ($ty:ident { $($field:ident : $fty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $ty {
            $(pub $field: $fty,)*
        }
    };
}

slot_fields! {
    SlotBehavior {
        index: u32,
        resource_kind: ResourceKind,
        nullability: SlotNullability,
        role: SlotRole,
        mutability: SlotMutability,
        scope: SlotScope,
        flags: SlotFlags,
        array_mode: SlotArrayMode,
    }
}

/// Compile-time slot template. `T` ties the slot to a `ResourceKindOf` impl;
/// `IDX` is the slot's stable ordinal, carried as a const generic so two
/// slots with different indices are distinct types (mirrors the teacher's
/// newtype-per-id style, generalized to a const generic since Rust has no
/// direct analogue of a non-type template parameter bound to a runtime u32
/// until `from_static` erases it).
pub struct ResourceSlot<T: ResourceKindOf, const IDX: u32> {
    _marker: PhantomData<T>,
}

impl<T: ResourceKindOf, const IDX: u32> ResourceSlot<T, IDX> {
    pub const INDEX: u32 = IDX;
    pub const KIND: ResourceKind = T::KIND;

    /// Build the behavior record a concrete node schema attaches to this
    /// slot. Call once per slot at `NodeType` registration time.
    pub const fn behavior(
        nullability: SlotNullability,
        role: SlotRole,
        mutability: SlotMutability,
        scope: SlotScope,
        flags: SlotFlags,
        array_mode: SlotArrayMode,
    ) -> SlotBehavior {
        SlotBehavior {
            index: IDX,
            resource_kind: T::KIND,
            nullability,
            role,
            mutability,
            scope,
            flags,
            array_mode,
        }
    }
}

/// Field-extraction metadata, present only when a connection used
/// `FieldExtractionModifier` (§4.4).
#[derive(Clone)]
pub struct FieldExtraction {
    pub field_offset: usize,
    pub field_size: usize,
}

/// Unified runtime slot representation — the single struct behind both
/// static input/output slots and shader-reflected bindings (§4.1 invariant:
/// "for any slot, kind_derived_from_T == slot_info.resource_kind").
#[derive(Clone)]
pub struct SlotInfo {
    pub name: String,
    pub kind: SlotKind,
    pub behavior: SlotBehavior,

    // Binding-only extras (§3).
    pub binding_index: Option<u32>,
    pub descriptor_type: Option<u32>,

    // Connection tracking (§4.4 "Variadic slots").
    pub state: SlotState,

    // Field-extraction extras (§3, §4.4).
    pub field_extraction: Option<FieldExtraction>,
}

impl SlotInfo {
    /// `from_static_slot<T>()` — builds a `SlotInfo` from a compile-time
    /// `ResourceSlot` behavior record. Both this and `from_binding` set the
    /// same `SlotBehavior` fields so the invariant in §4.1 holds by
    /// construction rather than by convention.
    pub fn from_static_slot(name: impl Into<String>, kind: SlotKind, behavior: SlotBehavior) -> Self {
        debug_assert!(matches!(kind, SlotKind::StaticInput | SlotKind::StaticOutput));
        SlotInfo {
            name: name.into(),
            kind,
            behavior,
            binding_index: None,
            descriptor_type: None,
            state: SlotState::Compiled,
            field_extraction: None,
        }
    }

    /// `from_binding()` — builds a tentative `SlotInfo` for a shader-reflected
    /// binding discovered at connection time (§4.4 "Variadic slots").
    pub fn from_binding(
        name: impl Into<String>,
        resource_kind: ResourceKind,
        binding_index: u32,
        descriptor_type: u32,
    ) -> Self {
        SlotInfo {
            name: name.into(),
            kind: SlotKind::Binding,
            behavior: SlotBehavior {
                index: binding_index,
                resource_kind,
                nullability: SlotNullability::Required,
                role: SlotRole::DEPENDENCY,
                mutability: SlotMutability::ReadOnly,
                scope: SlotScope::NodeLevel,
                flags: SlotFlags::NONE,
                array_mode: SlotArrayMode::Single,
            },
            binding_index: Some(binding_index),
            descriptor_type: Some(descriptor_type),
            state: SlotState::Tentative,
            field_extraction: None,
        }
    }

    pub fn with_field_extraction(mut self, offset: usize, size: usize, effective_kind: ResourceKind) -> Self {
        self.field_extraction = Some(FieldExtraction {
            field_offset: offset,
            field_size: size,
        });
        self.behavior.resource_kind = effective_kind;
        self
    }

    pub fn is_accumulation(&self) -> bool {
        self.behavior.flags.contains(SlotFlags::ACCUMULATION)
    }

    pub fn is_multi_connect(&self) -> bool {
        self.behavior.flags.contains(SlotFlags::MULTI_CONNECT)
    }

    pub fn is_optional(&self) -> bool {
        matches!(self.behavior.nullability, SlotNullability::Optional)
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, SlotKind::StaticInput | SlotKind::Binding)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.kind, SlotKind::StaticOutput)
    }
}

/// Type compatibility rule for a connection (§4.1).
pub fn types_compatible(src: ResourceKind, tgt: ResourceKind) -> bool {
    src == tgt
        || src == ResourceKind::PassThroughStorage
        || tgt == ResourceKind::PassThroughStorage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::kind::ImageHandleTy;

    #[test]
    fn static_and_binding_factories_agree_on_kind() {
        let behavior = ResourceSlot::<ImageHandleTy, 0>::behavior(
            SlotNullability::Required,
            SlotRole::DEPENDENCY,
            SlotMutability::ReadOnly,
            SlotScope::NodeLevel,
            SlotFlags::NONE,
            SlotArrayMode::Single,
        );
        let info = SlotInfo::from_static_slot("color", SlotKind::StaticInput, behavior);
        assert_eq!(info.behavior.resource_kind, ResourceKind::Image);
        assert_eq!(info.behavior.index, 0);
    }

    #[test]
    fn pass_through_is_compatible_with_anything() {
        assert!(types_compatible(
            ResourceKind::PassThroughStorage,
            ResourceKind::Buffer
        ));
        assert!(types_compatible(
            ResourceKind::Image,
            ResourceKind::PassThroughStorage
        ));
        assert!(!types_compatible(ResourceKind::Image, ResourceKind::Buffer));
    }
}

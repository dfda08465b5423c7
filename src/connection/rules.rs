//! Built-in connection rules (§4.4): `AccumulationRule` (100), `DirectRule`
//! (50), `VariadicRule` (25). Grounded on `original_source`'s
//! `StandardConnectionRules.cpp`.

use crate::error::{GraphError, GraphResult};
use crate::slot::{types_compatible, SlotFlags, SlotKind, SlotNullability};
use crate::topology::Edge;

use super::{ConnectionContext, ResolveOutcome, Rule};

/// Target is flagged `Accumulation`: appends one entry per call instead of
/// replacing a single driver.
pub struct AccumulationRule;

impl Rule for AccumulationRule {
    fn name(&self) -> &'static str {
        "AccumulationRule"
    }

    fn can_handle(&self, ctx: &ConnectionContext) -> bool {
        ctx.tgt_slot_flags.contains(SlotFlags::ACCUMULATION)
    }

    fn validate(&self, ctx: &ConnectionContext) -> GraphResult<()> {
        if !types_compatible(ctx.effective_resource_type, ctx.tgt_resource_kind) {
            return Err(GraphError::ConnectionRejected(format!(
                "type mismatch: {:?} -> {:?}",
                ctx.effective_resource_type, ctx.tgt_resource_kind
            )));
        }
        Ok(())
    }

    fn resolve(&self, ctx: &mut ConnectionContext, outcome: &mut ResolveOutcome) -> GraphResult<()> {
        *outcome = ResolveOutcome::Edge(Edge {
            src: ctx.src_node,
            src_slot: ctx.src_slot,
            src_array_index: ctx.src_array_index,
            tgt: ctx.tgt_node,
            tgt_slot: ctx.tgt_slot,
            tgt_array_index: ctx.tgt_array_index,
        });
        Ok(())
    }

    fn priority(&self) -> u32 {
        100
    }
}

/// Default 1:1 wiring: rejects a second driver for a non-accumulation
/// input, enforces type compatibility, honors nullability.
pub struct DirectRule;

impl Rule for DirectRule {
    fn name(&self) -> &'static str {
        "DirectRule"
    }

    fn can_handle(&self, ctx: &ConnectionContext) -> bool {
        ctx.tgt_slot_kind != SlotKind::Binding && !ctx.tgt_slot_flags.contains(SlotFlags::ACCUMULATION)
    }

    fn validate(&self, ctx: &ConnectionContext) -> GraphResult<()> {
        if ctx.tgt_already_has_driver {
            return Err(GraphError::ConnectionRejected(format!(
                "target slot {} on node {:?} already has a driver",
                ctx.tgt_slot, ctx.tgt_node
            )));
        }
        if !types_compatible(ctx.effective_resource_type, ctx.tgt_resource_kind) {
            return Err(GraphError::ConnectionRejected(format!(
                "type mismatch: {:?} -> {:?}",
                ctx.effective_resource_type, ctx.tgt_resource_kind
            )));
        }
        Ok(())
    }

    fn resolve(&self, ctx: &mut ConnectionContext, outcome: &mut ResolveOutcome) -> GraphResult<()> {
        *outcome = ResolveOutcome::Edge(Edge {
            src: ctx.src_node,
            src_slot: ctx.src_slot,
            src_array_index: ctx.src_array_index,
            tgt: ctx.tgt_node,
            tgt_slot: ctx.tgt_slot,
            tgt_array_index: ctx.tgt_array_index,
        });
        Ok(())
    }

    fn priority(&self) -> u32 {
        50
    }
}

/// Target is a shader `Binding`: updates the target's variadic slot map
/// rather than the static edge list.
pub struct VariadicRule;

impl Rule for VariadicRule {
    fn name(&self) -> &'static str {
        "VariadicRule"
    }

    fn can_handle(&self, ctx: &ConnectionContext) -> bool {
        ctx.tgt_slot_kind == SlotKind::Binding
    }

    fn validate(&self, _ctx: &ConnectionContext) -> GraphResult<()> {
        Ok(())
    }

    fn resolve(&self, ctx: &mut ConnectionContext, outcome: &mut ResolveOutcome) -> GraphResult<()> {
        *outcome = ResolveOutcome::VariadicUpdate {
            binding: ctx.tgt_slot,
            source_node: ctx.src_node,
            source_output: ctx.src_slot,
        };
        Ok(())
    }

    fn priority(&self) -> u32 {
        25
    }
}

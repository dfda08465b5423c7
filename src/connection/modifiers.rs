//! Built-in connection modifiers (§4.4). Grounded on `original_source`'s
//! `Connection/Modifiers/{FieldExtractionModifier,SlotRoleModifier,
//! DebugTagModifier,AccumulationSortConfig}.h`.

use crate::resource::{Lifetime, ResourceKind};
use crate::slot::SlotRole;

use super::{ConnectionContext, Modifier};
use crate::error::{GraphError, GraphResult};

/// What a single modifier phase did: continue to the next modifier, or skip
/// (a no-op for this modifier only — distinct from a hard `Err` abort) (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierOutcome {
    Continue,
    Skip,
}

/// Extracts a struct field at `(offset, size)` from a Persistent source,
/// narrowing the effective resource type so the rule's type-check compares
/// the field's type rather than the outer struct's (§4.4 "FieldExtractionModifier").
pub struct FieldExtractionModifier {
    pub field_offset: usize,
    pub field_size: usize,
    pub field_kind: ResourceKind,
    pub role_override: Option<SlotRole>,
}

impl FieldExtractionModifier {
    pub fn new(field_offset: usize, field_size: usize, field_kind: ResourceKind) -> Self {
        FieldExtractionModifier {
            field_offset,
            field_size,
            field_kind,
            role_override: None,
        }
    }

    pub fn with_role(mut self, role: SlotRole) -> Self {
        self.role_override = Some(role);
        self
    }
}

impl Modifier for FieldExtractionModifier {
    fn name(&self) -> &'static str {
        "FieldExtractionModifier"
    }

    fn priority(&self) -> u32 {
        75
    }

    fn pre_validation(&self, ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        ctx.effective_resource_type = self.field_kind;
        ctx.field_extraction = Some(crate::slot::FieldExtraction {
            field_offset: self.field_offset,
            field_size: self.field_size,
        });

        if ctx.src_lifetime != Lifetime::Persistent {
            return Err(GraphError::ConnectionRejected(
                "field extraction requires a Persistent-lifetime source (stable address); \
                 the source may be reallocated between frames"
                    .into(),
            ));
        }
        Ok(ModifierOutcome::Continue)
    }

    fn pre_resolve(&self, ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        if let Some(role) = self.role_override {
            ctx.role_override = Some(role);
        }
        Ok(ModifierOutcome::Continue)
    }
}

/// Overrides the `Dependency`/`Execute` role bitmask for this connection
/// (§4.4 "SlotRoleModifier"). Works with every rule, not just Direct.
pub struct SlotRoleModifier {
    pub role: SlotRole,
}

impl SlotRoleModifier {
    pub fn new(role: SlotRole) -> Self {
        SlotRoleModifier { role }
    }
}

impl Modifier for SlotRoleModifier {
    fn name(&self) -> &'static str {
        "SlotRoleModifier"
    }

    fn pre_resolve(&self, ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        ctx.role_override = Some(self.role);
        Ok(ModifierOutcome::Continue)
    }
}

/// Attaches a debug string for visualization; no semantic effect on the
/// resolved edge (§4.4 "DebugTagModifier").
pub struct DebugTagModifier {
    pub tag: String,
}

impl DebugTagModifier {
    pub fn new(tag: impl Into<String>) -> Self {
        DebugTagModifier { tag: tag.into() }
    }
}

impl Modifier for DebugTagModifier {
    fn name(&self) -> &'static str {
        "DebugTagModifier"
    }

    fn post_resolve(&self, ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        ctx.debug_tag = Some(self.tag.clone());
        log::debug!(target: "rendergraph::connection", "tagged connection {:?}.{} -> {:?}.{} as {:?}",
            ctx.src_node, ctx.src_slot, ctx.tgt_node, ctx.tgt_slot, self.tag);
        Ok(ModifierOutcome::Continue)
    }
}

/// Rule-config modifier for accumulation ordering: writes `sort_key` into
/// the context, but only if the matched rule is `AccumulationRule` — applied
/// to any other rule it logs and skips rather than erroring (§4.4
/// "AccumulationSortConfig", §8 "rule-config self-validation").
pub struct AccumulationSortConfig {
    pub sort_key: i64,
}

impl AccumulationSortConfig {
    pub fn new(sort_key: i64) -> Self {
        AccumulationSortConfig { sort_key }
    }
}

impl Modifier for AccumulationSortConfig {
    fn name(&self) -> &'static str {
        "AccumulationSortConfig"
    }

    fn pre_resolve(&self, ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        if ctx.matched_rule_name != Some("AccumulationRule") {
            log::warn!(
                target: "rendergraph::connection",
                "AccumulationSortConfig applied to a connection matched by {:?}, not AccumulationRule; skipping",
                ctx.matched_rule_name
            );
            return Ok(ModifierOutcome::Skip);
        }
        ctx.sort_key = Some(self.sort_key);
        Ok(ModifierOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionPipeline, ResolveOutcome};
    use crate::node::NodeHandle;
    use crate::slot::{SlotFlags, SlotKind, SlotNullability};
    use slotmap::SlotMap;

    fn handle() -> NodeHandle {
        let mut sm: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        sm.insert(())
    }

    fn accumulation_ctx() -> ConnectionContext {
        ConnectionContext::new(
            handle(),
            0,
            0,
            handle(),
            0,
            0,
            ResourceKind::Buffer,
            SlotKind::StaticInput,
            SlotFlags::ACCUMULATION,
            SlotNullability::Required,
            ResourceKind::Buffer,
            false,
            Lifetime::Transient,
        )
    }

    #[test]
    fn field_extraction_rejects_transient_source() {
        let modifier = FieldExtractionModifier::new(8, 4, ResourceKind::Image);
        let mut ctx = accumulation_ctx();
        ctx.src_lifetime = Lifetime::Transient;
        assert!(modifier.pre_validation(&mut ctx).is_err());
    }

    #[test]
    fn field_extraction_accepts_persistent_source() {
        let modifier = FieldExtractionModifier::new(8, 4, ResourceKind::Image);
        let mut ctx = accumulation_ctx();
        ctx.src_lifetime = Lifetime::Persistent;
        assert!(modifier.pre_validation(&mut ctx).is_ok());
        assert_eq!(ctx.effective_resource_type, ResourceKind::Image);
    }

    #[test]
    fn accumulation_sort_config_applies_on_accumulation_rule() {
        let pipeline = ConnectionPipeline::with_builtin_rules();
        let mut ctx = accumulation_ctx();
        ctx.matched_rule_name = Some("AccumulationRule");
        let modifier = AccumulationSortConfig::new(5);
        assert_eq!(modifier.pre_resolve(&mut ctx).unwrap(), ModifierOutcome::Continue);
        assert_eq!(ctx.sort_key, Some(5));
        let _ = pipeline;
    }

    #[test]
    fn accumulation_sort_config_skips_on_other_rule() {
        let mut ctx = accumulation_ctx();
        ctx.matched_rule_name = Some("DirectRule");
        let modifier = AccumulationSortConfig::new(5);
        assert_eq!(modifier.pre_resolve(&mut ctx).unwrap(), ModifierOutcome::Skip);
        assert_eq!(ctx.sort_key, None);
    }

    #[test]
    fn debug_tag_modifier_sets_tag_without_affecting_resolve() {
        let pipeline = ConnectionPipeline::with_builtin_rules();
        let ctx = accumulation_ctx();
        let meta = super::super::ConnectMeta {
            modifiers: vec![Box::new(DebugTagModifier::new("main"))],
        };
        let (outcome, _ctx) = pipeline.run(ctx, Some(meta)).unwrap();
        assert!(matches!(outcome, ResolveOutcome::Edge(_)));
    }
}

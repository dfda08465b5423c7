//! Connection system (C6): the rule + modifier pipeline that turns
//! declarative `connect` calls into validated topology edges or variadic
//! binding updates. Grounded on `original_source`'s `ConnectionRule.h` /
//! `ConnectionModifier.h` / `ConnectionPipeline.cpp` for the five-phase
//! orchestration, and on the teacher's trait-object registries
//! (`renderer::Pass` boxed trait list) for the Rust shape of "sorted list of
//! boxed trait objects, first match wins".

mod modifiers;
mod rules;

pub use modifiers::{
    AccumulationSortConfig, DebugTagModifier, FieldExtractionModifier, ModifierOutcome,
    SlotRoleModifier,
};
pub use rules::{AccumulationRule, DirectRule, VariadicRule};

use crate::error::{GraphError, GraphResult};
use crate::node::NodeHandle;
use crate::resource::{Lifetime, ResourceKind};
use crate::slot::{FieldExtraction, SlotFlags, SlotKind, SlotNullability, SlotRole};

/// Threaded through every phase of a single `connect` call; rules and
/// modifiers both read and write it (§4.4 "ConnectionContext").
pub struct ConnectionContext {
    pub src_node: NodeHandle,
    pub src_slot: u32,
    pub src_array_index: u32,
    pub tgt_node: NodeHandle,
    pub tgt_slot: u32,
    pub tgt_array_index: u32,

    /// Overridden by `FieldExtractionModifier`; otherwise equal to the
    /// source slot's declared kind.
    pub effective_resource_type: ResourceKind,
    pub field_extraction: Option<FieldExtraction>,

    pub role_override: Option<SlotRole>,
    pub sort_key: Option<i64>,
    pub debug_tag: Option<String>,

    /// Snapshot of the target slot's schema, looked up by the graph façade
    /// before the pipeline runs — rules never reach back into the registry
    /// mid-pipeline.
    pub tgt_slot_kind: SlotKind,
    pub tgt_slot_flags: SlotFlags,
    pub tgt_slot_nullability: SlotNullability,
    pub tgt_resource_kind: ResourceKind,
    pub tgt_already_has_driver: bool,
    pub src_lifetime: Lifetime,

    /// Set by whichever rule claims the connection; read by later pipeline
    /// phases (`AccumulationSortConfig` checks this to self-validate).
    pub matched_rule_name: Option<&'static str>,
}

impl ConnectionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src_node: NodeHandle,
        src_slot: u32,
        src_array_index: u32,
        tgt_node: NodeHandle,
        tgt_slot: u32,
        tgt_array_index: u32,
        effective_resource_type: ResourceKind,
        tgt_slot_kind: SlotKind,
        tgt_slot_flags: SlotFlags,
        tgt_slot_nullability: SlotNullability,
        tgt_resource_kind: ResourceKind,
        tgt_already_has_driver: bool,
        src_lifetime: Lifetime,
    ) -> Self {
        ConnectionContext {
            src_node,
            src_slot,
            src_array_index,
            tgt_node,
            tgt_slot,
            tgt_array_index,
            effective_resource_type,
            field_extraction: None,
            role_override: None,
            sort_key: None,
            debug_tag: None,
            tgt_slot_kind,
            tgt_slot_flags,
            tgt_slot_nullability,
            tgt_resource_kind,
            tgt_already_has_driver,
            src_lifetime,
            matched_rule_name: None,
        }
    }
}

/// Optional per-call metadata a caller of `connect` can attach, carrying
/// the modifiers to run for that one connection (§4.4 "`meta` carries
/// modifiers").
#[derive(Default)]
pub struct ConnectMeta {
    pub modifiers: Vec<Box<dyn Modifier>>,
}

/// A connection rule: claims connections by slot shape, then validates and
/// resolves them into an edge or variadic slot update (§4.4 "Rule").
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_handle(&self, ctx: &ConnectionContext) -> bool;
    fn validate(&self, ctx: &ConnectionContext) -> GraphResult<()>;
    fn resolve(&self, ctx: &mut ConnectionContext, outcome: &mut ResolveOutcome) -> GraphResult<()>;
    fn priority(&self) -> u32;
}

/// What `resolve` produced — an edge to splice into `GraphTopology`, or a
/// variadic slot update to apply to the target node's binding map (§4.4
/// "VariadicRule").
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Edge(crate::topology::Edge),
    VariadicUpdate {
        binding: u32,
        source_node: NodeHandle,
        source_output: u32,
    },
    None,
}

impl Default for ResolveOutcome {
    fn default() -> Self {
        ResolveOutcome::None
    }
}

/// A modifier runs in three phases bracketing the rule (§4.4 "Modifier").
pub trait Modifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32 {
        50
    }

    fn pre_validation(&self, _ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        Ok(ModifierOutcome::Continue)
    }
    fn pre_resolve(&self, _ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        Ok(ModifierOutcome::Continue)
    }
    fn post_resolve(&self, _ctx: &mut ConnectionContext) -> GraphResult<ModifierOutcome> {
        Ok(ModifierOutcome::Continue)
    }
}

/// Registered rules (sorted descending by priority) and the default
/// modifier set applied to every connection, before any per-call
/// `ConnectMeta` modifiers (§4.4).
#[derive(Default)]
pub struct ConnectionPipeline {
    rules: Vec<Box<dyn Rule>>,
    default_modifiers: Vec<Box<dyn Modifier>>,
}

impl ConnectionPipeline {
    pub fn new() -> Self {
        ConnectionPipeline::default()
    }

    /// The standard rule set at its suggested priorities (§4.4).
    pub fn with_builtin_rules() -> Self {
        let mut pipeline = ConnectionPipeline::new();
        pipeline.register_rule(Box::new(AccumulationRule));
        pipeline.register_rule(Box::new(DirectRule));
        pipeline.register_rule(Box::new(VariadicRule));
        pipeline
    }

    pub fn register_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub fn register_default_modifier(&mut self, modifier: Box<dyn Modifier>) {
        self.default_modifiers.push(modifier);
        self.default_modifiers.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    fn matching_rule(&self, ctx: &ConnectionContext) -> Option<&dyn Rule> {
        self.rules.iter().find(|r| r.can_handle(ctx)).map(|b| b.as_ref())
    }

    /// Runs the five phases in order for a single connection:
    /// modifiers' `pre_validation` (all) -> rule `validate` -> modifiers'
    /// `pre_resolve` (all) -> rule `resolve` -> modifiers' `post_resolve`
    /// (all). A modifier may abort the whole connection (`Error`) or skip
    /// only itself (`Skip`); any phase returning `Error` aborts with no
    /// edge created (§4.4).
    pub fn run(
        &self,
        mut ctx: ConnectionContext,
        meta: Option<ConnectMeta>,
    ) -> GraphResult<(ResolveOutcome, ConnectionContext)> {
        let mut extra_modifiers = meta.map(|m| m.modifiers).unwrap_or_default();
        extra_modifiers.sort_by(|a, b| b.priority().cmp(&a.priority()));

        let rule = self
            .matching_rule(&ctx)
            .ok_or_else(|| GraphError::ConnectionRejected("no rule claims this connection".into()))?;
        ctx.matched_rule_name = Some(rule.name());

        run_phase(&self.default_modifiers, &extra_modifiers, &mut ctx, |m, c| m.pre_validation(c))?;

        // Re-resolve the matching rule: `ctx` may have changed under
        // `pre_validation` (e.g. `FieldExtractionModifier` narrowing the
        // effective resource type) in a way that changes which rule claims it.
        let rule = self
            .matching_rule(&ctx)
            .ok_or_else(|| GraphError::ConnectionRejected("no rule claims this connection after pre_validation".into()))?;
        ctx.matched_rule_name = Some(rule.name());
        rule.validate(&ctx)?;

        run_phase(&self.default_modifiers, &extra_modifiers, &mut ctx, |m, c| m.pre_resolve(c))?;

        let rule = self
            .matching_rule(&ctx)
            .ok_or_else(|| GraphError::ConnectionRejected("no rule claims this connection after pre_resolve".into()))?;
        let mut outcome = ResolveOutcome::None;
        rule.resolve(&mut ctx, &mut outcome)?;

        run_phase(&self.default_modifiers, &extra_modifiers, &mut ctx, |m, c| m.post_resolve(c))?;

        Ok((outcome, ctx))
    }
}

fn run_phase(
    default_modifiers: &[Box<dyn Modifier>],
    extra_modifiers: &[Box<dyn Modifier>],
    ctx: &mut ConnectionContext,
    phase: impl Fn(&dyn Modifier, &mut ConnectionContext) -> GraphResult<ModifierOutcome>,
) -> GraphResult<()> {
    for modifier in default_modifiers.iter().chain(extra_modifiers.iter()) {
        match phase(modifier.as_ref(), ctx)? {
            ModifierOutcome::Continue => {}
            ModifierOutcome::Skip => continue,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeHandle;
    use slotmap::SlotMap;

    fn handle() -> NodeHandle {
        let mut sm: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        sm.insert(())
    }

    fn basic_ctx() -> ConnectionContext {
        ConnectionContext::new(
            handle(),
            0,
            0,
            handle(),
            0,
            0,
            ResourceKind::Image,
            SlotKind::StaticInput,
            SlotFlags::NONE,
            SlotNullability::Required,
            ResourceKind::Image,
            false,
            Lifetime::Transient,
        )
    }

    #[test]
    fn direct_rule_wins_by_default() {
        let pipeline = ConnectionPipeline::with_builtin_rules();
        let (outcome, _ctx) = pipeline.run(basic_ctx(), None).unwrap();
        assert!(matches!(outcome, ResolveOutcome::Edge(_)));
    }

    #[test]
    fn unhandled_connection_is_rejected() {
        let pipeline = ConnectionPipeline::new();
        assert!(pipeline.run(basic_ctx(), None).is_err());
    }
}

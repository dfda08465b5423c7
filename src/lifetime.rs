//! Resource lifetime analysis (SUPPLEMENT, ungrounded in spec.md but present
//! in the original system). Grounded on `original_source`'s
//! `ResourceLifetimeAnalyzer.h`: classifies each resource's lifetime scope
//! and birth/death execution indices from topological order, and groups
//! non-overlapping resources into aliasing candidates. Classification only
//! — this module never allocates or aliases actual GPU memory, matching
//! the memory-aliasing Non-goal.

use std::collections::HashMap;

use crate::node::NodeHandle;
use crate::resource::ResourceId;

/// How long a resource's lifetime spans the frame (§"ResourceLifetimeAnalyzer",
/// classification thresholds: Transient < 5 steps, Subpass < 10, Pass < 20,
/// Frame >= 20, Persistent assigned directly from `resource::Lifetime`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeScope {
    Transient,
    Subpass,
    Pass,
    Frame,
    Persistent,
}

/// Birth/death indices and consumer set for one resource, derived from a
/// compiled graph's execution order.
#[derive(Debug, Clone)]
pub struct ResourceTimeline {
    pub resource: ResourceId,
    pub producer: Option<NodeHandle>,
    pub consumers: Vec<NodeHandle>,
    pub birth_index: u32,
    pub death_index: u32,
    pub scope: LifetimeScope,
}

impl ResourceTimeline {
    pub fn is_transient(&self) -> bool {
        self.lifetime_length() < 5
    }

    pub fn lifetime_length(&self) -> u32 {
        self.death_index.saturating_sub(self.birth_index)
    }

    pub fn overlaps(&self, other: &ResourceTimeline) -> bool {
        !(self.death_index < other.birth_index || other.death_index < self.birth_index)
    }

    pub fn is_consumed_by(&self, node: NodeHandle) -> bool {
        self.consumers.contains(&node)
    }
}

/// Derives resource timelines from a node execution order and the set of
/// (producer, consumer, resource) triples supplied by the graph compiler
/// (§"ResourceLifetimeAnalyzer::ComputeTimelines").
#[derive(Default)]
pub struct ResourceLifetimeAnalyzer {
    timelines: HashMap<ResourceId, ResourceTimeline>,
}

impl ResourceLifetimeAnalyzer {
    pub fn new() -> Self {
        ResourceLifetimeAnalyzer::default()
    }

    pub fn clear(&mut self) {
        self.timelines.clear();
    }

    /// `accesses` is one entry per (resource, node, is_producer) touch;
    /// the caller (the graph façade, during Compile) derives this from
    /// `access::ResourceAccessTracker` plus the resolved edges.
    pub fn compute_timelines(
        &mut self,
        execution_order: &[NodeHandle],
        accesses: impl IntoIterator<Item = (ResourceId, NodeHandle, bool)>,
        persistent_resources: &[ResourceId],
    ) {
        self.clear();
        let index_of: HashMap<NodeHandle, u32> = execution_order
            .iter()
            .enumerate()
            .map(|(i, &n)| (n, i as u32))
            .collect();

        struct Touches {
            producer: Option<NodeHandle>,
            consumers: Vec<NodeHandle>,
        }
        let mut touches: HashMap<ResourceId, Touches> = HashMap::new();

        for (resource, node, is_producer) in accesses {
            let entry = touches.entry(resource).or_insert_with(|| Touches {
                producer: None,
                consumers: Vec::new(),
            });
            if is_producer {
                entry.producer = Some(node);
            } else if !entry.consumers.contains(&node) {
                entry.consumers.push(node);
            }
        }

        for (resource, touch) in touches {
            let birth_index = touch
                .producer
                .and_then(|p| index_of.get(&p).copied())
                .unwrap_or(0);
            let death_index = touch
                .consumers
                .iter()
                .filter_map(|c| index_of.get(c).copied())
                .max()
                .unwrap_or(birth_index);

            let scope = if persistent_resources.contains(&resource) {
                LifetimeScope::Persistent
            } else {
                Self::determine_scope(birth_index, death_index)
            };

            self.timelines.insert(
                resource,
                ResourceTimeline {
                    resource,
                    producer: touch.producer,
                    consumers: touch.consumers,
                    birth_index,
                    death_index,
                    scope,
                },
            );
        }
    }

    fn determine_scope(birth_index: u32, death_index: u32) -> LifetimeScope {
        let span = death_index.saturating_sub(birth_index);
        match span {
            0..=4 => LifetimeScope::Transient,
            5..=9 => LifetimeScope::Subpass,
            10..=19 => LifetimeScope::Pass,
            _ => LifetimeScope::Frame,
        }
    }

    pub fn timeline(&self, resource: ResourceId) -> Option<&ResourceTimeline> {
        self.timelines.get(&resource)
    }

    pub fn all_timelines(&self) -> impl Iterator<Item = &ResourceTimeline> {
        self.timelines.values()
    }

    pub fn tracked_resource_count(&self) -> usize {
        self.timelines.len()
    }

    /// Resources whose lifetime does not overlap `resource`'s — candidates
    /// for memory aliasing in a future allocator, surfaced here purely as
    /// information (§"FindAliasingCandidates"; no allocation performed).
    pub fn find_aliasing_candidates(&self, resource: ResourceId) -> Vec<ResourceId> {
        let Some(target) = self.timelines.get(&resource) else {
            return Vec::new();
        };
        self.timelines
            .values()
            .filter(|t| t.resource != resource && !t.overlaps(target))
            .map(|t| t.resource)
            .collect()
    }

    /// Greedy interval-scheduling grouping of non-overlapping resources
    /// (§"ComputeAliasingGroups"). Each returned group lists resources that
    /// could, in principle, share one memory allocation — this module does
    /// not perform that allocation.
    pub fn compute_aliasing_groups(&self) -> Vec<Vec<ResourceId>> {
        let mut sorted: Vec<&ResourceTimeline> = self.timelines.values().collect();
        sorted.sort_by_key(|t| t.birth_index);

        let mut groups: Vec<Vec<&ResourceTimeline>> = Vec::new();
        'resource: for timeline in sorted {
            for group in groups.iter_mut() {
                if group.iter().all(|member| !member.overlaps(timeline)) {
                    group.push(timeline);
                    continue 'resource;
                }
            }
            groups.push(vec![timeline]);
        }

        groups
            .into_iter()
            .map(|g| g.into_iter().map(|t| t.resource).collect())
            .collect()
    }

    pub fn validate_timelines(&self) -> Result<(), String> {
        for timeline in self.timelines.values() {
            if timeline.death_index < timeline.birth_index {
                return Err(format!(
                    "resource {:?} dies before it is born ({} < {})",
                    timeline.resource, timeline.death_index, timeline.birth_index
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn handles(n: usize) -> Vec<NodeHandle> {
        let mut sm: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    fn resources(n: usize) -> Vec<ResourceId> {
        let mut sm: SlotMap<ResourceId, ()> = SlotMap::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    #[test]
    fn short_span_classified_transient() {
        let h = handles(2);
        let r = resources(1);
        let mut analyzer = ResourceLifetimeAnalyzer::new();
        analyzer.compute_timelines(&h, vec![(r[0], h[0], true), (r[0], h[1], false)], &[]);
        let timeline = analyzer.timeline(r[0]).unwrap();
        assert_eq!(timeline.scope, LifetimeScope::Transient);
        assert!(timeline.is_transient());
    }

    #[test]
    fn persistent_resources_are_classified_persistent_regardless_of_span() {
        let h = handles(2);
        let r = resources(1);
        let mut analyzer = ResourceLifetimeAnalyzer::new();
        analyzer.compute_timelines(&h, vec![(r[0], h[0], true), (r[0], h[1], false)], &[r[0]]);
        assert_eq!(analyzer.timeline(r[0]).unwrap().scope, LifetimeScope::Persistent);
    }

    #[test]
    fn non_overlapping_resources_are_aliasing_candidates() {
        let h = handles(4);
        let r = resources(2);
        let mut analyzer = ResourceLifetimeAnalyzer::new();
        analyzer.compute_timelines(
            &h,
            vec![
                (r[0], h[0], true),
                (r[0], h[1], false),
                (r[1], h[2], true),
                (r[1], h[3], false),
            ],
            &[],
        );
        let candidates = analyzer.find_aliasing_candidates(r[0]);
        assert_eq!(candidates, vec![r[1]]);
        assert_eq!(analyzer.compute_aliasing_groups().len(), 1);
    }
}

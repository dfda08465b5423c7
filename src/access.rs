//! Resource access tracker (C8): per-resource reader/writer bookkeeping used
//! to answer "do nodes A and B conflict?" for the wave scheduler and TBB
//! executor. Grounded on `original_source`'s `ResourceAccessTracker.{h,cpp}`
//! (conflict rule: writer+writer or writer+reader on the same resource
//! conflicts; reader+reader does not).

use std::collections::{HashMap, HashSet};

use crate::node::NodeHandle;
use crate::resource::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
}

impl AccessType {
    fn writes(self) -> bool {
        matches!(self, AccessType::Write | AccessType::ReadWrite)
    }

    fn reads(self) -> bool {
        matches!(self, AccessType::Read | AccessType::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceAccess {
    pub node: NodeHandle,
    pub access_type: AccessType,
    pub slot_index: u32,
    pub is_output: bool,
}

#[derive(Debug, Default)]
struct ResourceAccessInfo {
    accesses: Vec<ResourceAccess>,
}

impl ResourceAccessInfo {
    fn writers(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.accesses.iter().filter(|a| a.access_type.writes()).map(|a| a.node)
    }

    fn readers(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.accesses.iter().filter(|a| a.access_type.reads()).map(|a| a.node)
    }

    fn has_writer(&self) -> bool {
        self.accesses.iter().any(|a| a.access_type.writes())
    }
}

/// Tracks, for each resource, which nodes access it and how (§4.6). Built
/// once per compile from the nodes' declared accesses (static schema roles
/// plus any node-declared dynamic access), then queried by the wave
/// scheduler and TBB executor for conflict detection.
#[derive(Default)]
pub struct ResourceAccessTracker {
    resource_accesses: HashMap<ResourceId, ResourceAccessInfo>,
    node_resources: HashMap<NodeHandle, HashSet<ResourceId>>,
    node_writes: HashMap<NodeHandle, HashSet<ResourceId>>,
    node_reads: HashMap<NodeHandle, HashSet<ResourceId>>,
}

impl ResourceAccessTracker {
    pub fn new() -> Self {
        ResourceAccessTracker::default()
    }

    pub fn clear(&mut self) {
        self.resource_accesses.clear();
        self.node_resources.clear();
        self.node_writes.clear();
        self.node_reads.clear();
    }

    /// Record one node's access to one resource. Called once per
    /// input/output slot during compile-time bundle resolution (§4.6:
    /// "each node, at Compile, implicitly or explicitly declares per-resource
    /// access").
    pub fn record_access(
        &mut self,
        resource: ResourceId,
        node: NodeHandle,
        access_type: AccessType,
        slot_index: u32,
        is_output: bool,
    ) {
        self.resource_accesses
            .entry(resource)
            .or_default()
            .accesses
            .push(ResourceAccess {
                node,
                access_type,
                slot_index,
                is_output,
            });
        self.node_resources.entry(node).or_default().insert(resource);
        if access_type.writes() {
            self.node_writes.entry(node).or_default().insert(resource);
        }
        if access_type.reads() {
            self.node_reads.entry(node).or_default().insert(resource);
        }
    }

    /// True iff `a` and `b` share a resource where at least one writes
    /// (§4.6, §8 "Conflict detection").
    pub fn has_conflict(&self, a: NodeHandle, b: NodeHandle) -> bool {
        if a == b {
            return false;
        }
        let empty = HashSet::new();
        let a_res = self.node_resources.get(&a).unwrap_or(&empty);
        let b_res = self.node_resources.get(&b).unwrap_or(&empty);
        let (smaller, larger, smaller_is_a) = if a_res.len() <= b_res.len() {
            (a_res, b_res, true)
        } else {
            (b_res, a_res, false)
        };
        for &resource in smaller {
            if larger.contains(&resource) {
                let a_writes = if smaller_is_a {
                    self.node_writes.get(&a).map(|s| s.contains(&resource)).unwrap_or(false)
                } else {
                    self.node_writes.get(&b).map(|s| s.contains(&resource)).unwrap_or(false)
                };
                let b_writes = if smaller_is_a {
                    self.node_writes.get(&b).map(|s| s.contains(&resource)).unwrap_or(false)
                } else {
                    self.node_writes.get(&a).map(|s| s.contains(&resource)).unwrap_or(false)
                };
                if a_writes || b_writes {
                    return true;
                }
            }
        }
        false
    }

    pub fn conflicting_nodes(&self, node: NodeHandle) -> HashSet<NodeHandle> {
        let mut out = HashSet::new();
        let Some(resources) = self.node_resources.get(&node) else {
            return out;
        };
        for &resource in resources {
            let Some(info) = self.resource_accesses.get(&resource) else {
                continue;
            };
            let node_is_writer = self.node_writes.get(&node).map(|s| s.contains(&resource)).unwrap_or(false);
            if node_is_writer {
                for other in info.writers().chain(info.readers()) {
                    if other != node {
                        out.insert(other);
                    }
                }
            } else if info.has_writer() {
                for other in info.writers() {
                    if other != node {
                        out.insert(other);
                    }
                }
            }
        }
        out
    }

    pub fn shared_resources(&self, a: NodeHandle, b: NodeHandle) -> Vec<ResourceId> {
        let empty = HashSet::new();
        let a_res = self.node_resources.get(&a).unwrap_or(&empty);
        let b_res = self.node_resources.get(&b).unwrap_or(&empty);
        a_res.intersection(b_res).copied().collect()
    }

    pub fn node_resources(&self, node: NodeHandle) -> Vec<ResourceId> {
        self.node_resources.get(&node).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn node_writes(&self, node: NodeHandle) -> Vec<ResourceId> {
        self.node_writes.get(&node).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn node_reads(&self, node: NodeHandle) -> Vec<ResourceId> {
        self.node_reads.get(&node).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn is_writer(&self, node: NodeHandle) -> bool {
        self.node_writes.get(&node).map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn resource_count(&self) -> usize {
        self.resource_accesses.len()
    }

    pub fn node_count(&self) -> usize {
        self.node_resources.len()
    }

    /// Number of resources written by more than one node — a definite
    /// conflict for any pair of their writers.
    pub fn conflicting_resource_count(&self) -> usize {
        self.resource_accesses
            .values()
            .filter(|info| info.writers().collect::<HashSet<_>>().len() > 1)
            .count()
    }

    pub fn max_writers_per_resource(&self) -> usize {
        self.resource_accesses
            .values()
            .map(|info| info.writers().collect::<HashSet<_>>().len())
            .max()
            .unwrap_or(0)
    }
}

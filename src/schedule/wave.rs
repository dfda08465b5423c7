//! Wave scheduler (C9): partitions a topologically sorted graph into
//! "execution waves" — groups of nodes with no mutual dependency and no
//! resource conflict, safe to run concurrently within a wave with a barrier
//! between waves. Grounded on `original_source`'s `WaveScheduler.{h,cpp}`;
//! algorithm complexity is O(N*E) as documented there.

use std::collections::HashMap;

use crate::access::ResourceAccessTracker;
use crate::error::GraphResult;
use crate::node::NodeHandle;
use crate::topology::GraphTopology;

/// A group of nodes with no mutual dependency or resource conflict; every
/// node in `nodes` may execute concurrently with every other (§4.6, §5).
#[derive(Debug, Default, Clone)]
pub struct ExecutionWave {
    pub wave_index: u32,
    pub nodes: Vec<NodeHandle>,
}

impl ExecutionWave {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WaveSchedulerStats {
    pub total_nodes: usize,
    pub wave_count: usize,
    pub max_wave_size: usize,
    pub min_wave_size: usize,
    pub avg_wave_size: f32,
    pub parallelism_factor: f32,
    pub conflict_count: usize,
}

/// Computes execution waves for a compiled graph (§4.6 "Parallel Execution
/// Waves"). Not thread-safe; `compute_waves` must complete before results
/// are queried.
#[derive(Default)]
pub struct WaveScheduler {
    waves: Vec<ExecutionWave>,
    node_to_wave: HashMap<NodeHandle, u32>,
    total_nodes: usize,
    conflict_count: usize,
    computed: bool,
}

impl WaveScheduler {
    pub fn new() -> Self {
        WaveScheduler::default()
    }

    pub fn clear(&mut self) {
        self.waves.clear();
        self.node_to_wave.clear();
        self.total_nodes = 0;
        self.conflict_count = 0;
        self.computed = false;
    }

    /// Greedy wave assignment: walk nodes in topological order; each node
    /// starts at `1 + max(dependency wave)` (0 for roots) and advances to
    /// the next wave as long as some already-placed peer in the candidate
    /// wave conflicts with it (§4.6, `WaveScheduler.cpp`).
    pub fn compute_waves(
        &mut self,
        topology: &GraphTopology,
        access_tracker: &ResourceAccessTracker,
    ) -> GraphResult<()> {
        self.clear();
        let order = topology.topological_sort()?;

        for &node in &order {
            let mut wave_index = topology
                .dependencies(node)
                .into_iter()
                .map(|dep| self.node_to_wave.get(&dep).copied().map(|w| w + 1).unwrap_or(0))
                .max()
                .unwrap_or(0);

            while self.has_conflict_in_wave(node, wave_index, access_tracker) {
                self.conflict_count += 1;
                wave_index += 1;
            }

            self.ensure_wave_exists(wave_index);
            self.waves[wave_index as usize].nodes.push(node);
            self.node_to_wave.insert(node, wave_index);
        }

        self.total_nodes = order.len();
        self.computed = true;
        Ok(())
    }

    fn has_conflict_in_wave(
        &self,
        node: NodeHandle,
        wave_index: u32,
        access_tracker: &ResourceAccessTracker,
    ) -> bool {
        let Some(wave) = self.waves.get(wave_index as usize) else {
            return false;
        };
        wave.nodes.iter().any(|&peer| access_tracker.has_conflict(node, peer))
    }

    fn ensure_wave_exists(&mut self, wave_index: u32) {
        while self.waves.len() <= wave_index as usize {
            let idx = self.waves.len() as u32;
            self.waves.push(ExecutionWave {
                wave_index: idx,
                nodes: Vec::new(),
            });
        }
    }

    pub fn waves(&self) -> &[ExecutionWave] {
        &self.waves
    }

    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    pub fn node_wave(&self, node: NodeHandle) -> Option<u32> {
        self.node_to_wave.get(&node).copied()
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    pub fn parallelism_factor(&self) -> f32 {
        if self.waves.is_empty() {
            0.0
        } else {
            self.total_nodes as f32 / self.waves.len() as f32
        }
    }

    pub fn theoretical_speedup(&self) -> f32 {
        self.parallelism_factor()
    }

    pub fn stats(&self) -> WaveSchedulerStats {
        let sizes: Vec<usize> = self.waves.iter().map(ExecutionWave::len).collect();
        let wave_count = sizes.len();
        let max_wave_size = sizes.iter().copied().max().unwrap_or(0);
        let min_wave_size = sizes.iter().copied().min().unwrap_or(0);
        let avg_wave_size = if wave_count == 0 {
            0.0
        } else {
            self.total_nodes as f32 / wave_count as f32
        };
        WaveSchedulerStats {
            total_nodes: self.total_nodes,
            wave_count,
            max_wave_size,
            min_wave_size,
            avg_wave_size,
            parallelism_factor: self.parallelism_factor(),
            conflict_count: self.conflict_count,
        }
    }

    /// Checks that every node from `topology` was scheduled, every
    /// dependency lands in a strictly earlier wave, and no wave contains a
    /// conflicting pair (§8 "wave partition invariants").
    pub fn validate(
        &self,
        topology: &GraphTopology,
        access_tracker: &ResourceAccessTracker,
    ) -> Result<(), String> {
        if !self.computed {
            return Err("waves not computed".into());
        }
        if self.node_to_wave.len() != topology.node_count() {
            return Err(format!(
                "scheduled {} nodes but topology has {}",
                self.node_to_wave.len(),
                topology.node_count()
            ));
        }
        for (&node, &wave) in &self.node_to_wave {
            for dep in topology.dependencies(node) {
                let dep_wave = self
                    .node_to_wave
                    .get(&dep)
                    .ok_or_else(|| format!("dependency {:?} of {:?} not scheduled", dep, node))?;
                if *dep_wave >= wave {
                    return Err(format!(
                        "dependency violation: {:?} (wave {}) depends on {:?} (wave {})",
                        node, wave, dep, dep_wave
                    ));
                }
            }
        }
        for wave in &self.waves {
            for (i, &a) in wave.nodes.iter().enumerate() {
                for &b in &wave.nodes[i + 1..] {
                    if access_tracker.has_conflict(a, b) {
                        return Err(format!(
                            "conflicting nodes {:?} and {:?} in same wave {}",
                            a, b, wave.wave_index
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessType;
    use crate::resource::ResourceId;
    use crate::topology::Edge;
    use slotmap::SlotMap;

    fn handles(n: usize) -> Vec<NodeHandle> {
        let mut sm: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    fn resources(n: usize) -> Vec<ResourceId> {
        let mut sm: SlotMap<ResourceId, ()> = SlotMap::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    fn edge(src: NodeHandle, tgt: NodeHandle) -> Edge {
        Edge {
            src,
            src_slot: 0,
            src_array_index: 0,
            tgt,
            tgt_slot: 0,
            tgt_array_index: 0,
        }
    }

    #[test]
    fn independent_nodes_land_in_one_wave() {
        let h = handles(3);
        let mut topo = GraphTopology::new();
        for &n in &h {
            topo.add_node(n);
        }
        let tracker = ResourceAccessTracker::new();
        let mut scheduler = WaveScheduler::new();
        scheduler.compute_waves(&topo, &tracker).unwrap();
        assert_eq!(scheduler.wave_count(), 1);
        assert_eq!(scheduler.waves()[0].len(), 3);
        scheduler.validate(&topo, &tracker).unwrap();
    }

    #[test]
    fn chain_produces_one_wave_per_node() {
        let h = handles(3);
        let mut topo = GraphTopology::new();
        for &n in &h {
            topo.add_node(n);
        }
        topo.add_edge(edge(h[0], h[1])).unwrap();
        topo.add_edge(edge(h[1], h[2])).unwrap();
        let tracker = ResourceAccessTracker::new();
        let mut scheduler = WaveScheduler::new();
        scheduler.compute_waves(&topo, &tracker).unwrap();
        assert_eq!(scheduler.wave_count(), 3);
        assert_eq!(scheduler.node_wave(h[0]), Some(0));
        assert_eq!(scheduler.node_wave(h[1]), Some(1));
        assert_eq!(scheduler.node_wave(h[2]), Some(2));
        scheduler.validate(&topo, &tracker).unwrap();
    }

    #[test]
    fn resource_conflict_splits_independent_nodes_into_separate_waves() {
        let h = handles(2);
        let r = resources(1);
        let mut topo = GraphTopology::new();
        for &n in &h {
            topo.add_node(n);
        }
        let mut tracker = ResourceAccessTracker::new();
        tracker.record_access(r[0], h[0], AccessType::Write, 0, true);
        tracker.record_access(r[0], h[1], AccessType::Write, 0, true);

        let mut scheduler = WaveScheduler::new();
        scheduler.compute_waves(&topo, &tracker).unwrap();
        assert_eq!(scheduler.wave_count(), 2);
        assert_ne!(scheduler.node_wave(h[0]), scheduler.node_wave(h[1]));
        scheduler.validate(&topo, &tracker).unwrap();
    }
}

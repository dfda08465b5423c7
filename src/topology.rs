//! Graph topology (C2): the DAG of node handles and the edges between
//! their slots. Grounded on the teacher's `frame::graph` (a `petgraph::Graph`
//! wrapper with `dependency.rs` walking it for scheduling) and on
//! `original_source`'s `GraphTopology.h` for the exact query surface
//! (roots/leaves, direct vs. transitive dependents, `HasCycle`).

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

use crate::error::{GraphResult, TopologyError};
use crate::node::NodeHandle;

/// One connection between a producing node's output slot and a consuming
/// node's input slot (§3 "Edge").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub src: NodeHandle,
    pub src_slot: u32,
    pub src_array_index: u32,
    pub tgt: NodeHandle,
    pub tgt_slot: u32,
    pub tgt_array_index: u32,
}

/// The DAG of node handles. Kept separate from `NodeInstance` storage so
/// the scheduler and connection pipeline can reason about structure without
/// borrowing node behavior state.
#[derive(Default)]
pub struct GraphTopology {
    graph: petgraph::Graph<NodeHandle, Edge>,
    index_of: HashMap<NodeHandle, NodeIndex>,
}

impl GraphTopology {
    pub fn new() -> Self {
        GraphTopology::default()
    }

    pub fn add_node(&mut self, handle: NodeHandle) {
        if self.index_of.contains_key(&handle) {
            return;
        }
        let idx = self.graph.add_node(handle);
        self.index_of.insert(handle, idx);
    }

    /// Removes a node and every edge touching it (§4.9 "cascading removal").
    pub fn remove_node(&mut self, handle: NodeHandle) {
        if let Some(idx) = self.index_of.remove(&handle) {
            self.graph.remove_node(idx);
            // `remove_node` swaps the last index into the removed slot;
            // petgraph updates edge endpoints for us, but our index cache
            // needs to follow the swapped node.
            self.reindex();
        }
    }

    fn reindex(&mut self) {
        self.index_of.clear();
        for idx in self.graph.node_indices() {
            self.index_of.insert(self.graph[idx], idx);
        }
    }

    pub fn contains_node(&self, handle: NodeHandle) -> bool {
        self.index_of.contains_key(&handle)
    }

    /// Adds an edge; a duplicate `(src, src_slot, src_array_index, tgt,
    /// tgt_slot, tgt_array_index)` edge is a no-op (§4.4 "dedup").
    pub fn add_edge(&mut self, edge: Edge) -> GraphResult<()> {
        let src_idx = *self
            .index_of
            .get(&edge.src)
            .ok_or(TopologyError::DanglingNode(edge.src))?;
        let tgt_idx = *self
            .index_of
            .get(&edge.tgt)
            .ok_or(TopologyError::DanglingNode(edge.tgt))?;

        let already_present = self
            .graph
            .edges_connecting(src_idx, tgt_idx)
            .any(|e| *e.weight() == edge);
        if !already_present {
            self.graph.add_edge(src_idx, tgt_idx, edge);
        }
        Ok(())
    }

    pub fn remove_edge(&mut self, edge: Edge) {
        let (Some(&src_idx), Some(&tgt_idx)) = (self.index_of.get(&edge.src), self.index_of.get(&edge.tgt)) else {
            return;
        };
        if let Some(e) = self
            .graph
            .edges_connecting(src_idx, tgt_idx)
            .find(|e| *e.weight() == edge)
            .map(|e| e.id())
        {
            self.graph.remove_edge(e);
        }
    }

    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Reverse-post-order DFS topological sort, ties broken by insertion
    /// order (petgraph walks nodes in index order, which is insertion
    /// order here since we never reuse freed indices across a `reindex`
    /// within a single compile pass).
    pub fn topological_sort(&self) -> GraphResult<Vec<NodeHandle>> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|idx| self.graph[idx]).collect())
            .map_err(|cycle| TopologyError::Cycle(self.graph[cycle.node_id()]).into())
    }

    pub fn roots(&self) -> Vec<NodeHandle> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    pub fn leaves(&self) -> Vec<NodeHandle> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    pub fn incoming_edges(&self, handle: NodeHandle) -> Vec<Edge> {
        let Some(&idx) = self.index_of.get(&handle) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| *e.weight())
            .collect()
    }

    pub fn outgoing_edges(&self, handle: NodeHandle) -> Vec<Edge> {
        let Some(&idx) = self.index_of.get(&handle) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| *e.weight())
            .collect()
    }

    /// Direct producers of `handle` (nodes with an edge pointing at it).
    pub fn dependencies(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.incoming_edges(handle).into_iter().map(|e| e.src).collect()
    }

    /// Direct consumers of `handle`.
    pub fn dependents(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.outgoing_edges(handle).into_iter().map(|e| e.tgt).collect()
    }

    /// Every node reachable by walking backward from `handle` (§4.9,
    /// "transitive dependencies" — used for partial-cleanup ordering).
    pub fn transitive_dependencies(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.walk(handle, Direction::Incoming)
    }

    pub fn transitive_dependents(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.walk(handle, Direction::Outgoing)
    }

    fn walk(&self, handle: NodeHandle, direction: Direction) -> Vec<NodeHandle> {
        let Some(&start) = self.index_of.get(&handle) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![start];
        let mut out = Vec::new();
        while let Some(idx) = stack.pop() {
            for e in self.graph.edges_directed(idx, direction) {
                let next = match direction {
                    Direction::Incoming => e.source(),
                    Direction::Outgoing => e.target(),
                };
                if seen.insert(next) {
                    out.push(self.graph[next]);
                    stack.push(next);
                }
            }
        }
        out
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Full structural validation run at Compile time (§4.3): no cycles, no
    /// dangling edges, no out-of-range slot indices given each node's
    /// schema slot counts.
    pub fn validate(&self, slot_counts: impl Fn(NodeHandle) -> Option<(u32, u32)>) -> GraphResult<()> {
        if let Err(e) = self.topological_sort() {
            return Err(e);
        }
        for idx in self.graph.node_indices() {
            let handle = self.graph[idx];
            let (input_len, output_len) = slot_counts(handle)
                .ok_or(TopologyError::DanglingNode(handle))?;
            for e in self.graph.edges_directed(idx, Direction::Outgoing) {
                let edge = e.weight();
                if edge.src_slot >= output_len {
                    return Err(TopologyError::BadSlotIndex {
                        node: handle,
                        index: edge.src_slot,
                        len: output_len,
                    }
                    .into());
                }
            }
            for e in self.graph.edges_directed(idx, Direction::Incoming) {
                let edge = e.weight();
                let (tgt_input_len, _) = slot_counts(edge.tgt).ok_or(TopologyError::DanglingNode(edge.tgt))?;
                if edge.tgt_slot >= tgt_input_len {
                    return Err(TopologyError::BadSlotIndex {
                        node: edge.tgt,
                        index: edge.tgt_slot,
                        len: tgt_input_len,
                    }
                    .into());
                }
            }
            let _ = input_len;
        }
        Ok(())
    }
}

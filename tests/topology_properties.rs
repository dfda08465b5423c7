//! Property-style invariants for `GraphTopology` (§8): topological order
//! must respect every edge, and cycle detection must agree with whether a
//! topological sort can succeed at all.

use proptest::prelude::*;
use slotmap::SlotMap;

use rendergraph::node::NodeHandle;
use rendergraph::topology::{Edge, GraphTopology};

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

/// Builds an acyclic topology of `n` nodes with edges only from a lower
/// index to a higher one, picked from `pairs` (each a `(from, to)` offset
/// into `0..n`, `from < to` by construction below).
fn acyclic_topology(n: usize, pairs: &[(usize, usize)]) -> (GraphTopology, Vec<NodeHandle>) {
    let mut sm: SlotMap<NodeHandle, ()> = SlotMap::with_key();
    let handles: Vec<_> = (0..n).map(|_| sm.insert(())).collect();
    let mut topo = GraphTopology::new();
    for &h in &handles {
        topo.add_node(h);
    }
    for &(a, b) in pairs {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        if lo != hi {
            topo.add_edge(edge(handles[lo], handles[hi])).unwrap();
        }
    }
    (topo, handles)
}

proptest! {
    /// Any topological sort of an acyclic graph places every edge's source
    /// strictly before its target.
    #[test]
    fn topo_order_respects_every_edge(
        n in 2usize..12,
        raw_pairs in prop::collection::vec((0usize..12, 0usize..12), 0..20),
    ) {
        let pairs: Vec<_> = raw_pairs
            .into_iter()
            .filter(|&(a, b)| a < n && b < n)
            .collect();
        let (topo, handles) = acyclic_topology(n, &pairs);

        let order = topo.topological_sort().unwrap();
        prop_assert_eq!(order.len(), n);

        let pos = |h: NodeHandle| order.iter().position(|&x| x == h).unwrap();
        for &(a, b) in &pairs {
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            if lo != hi {
                prop_assert!(pos(handles[lo]) < pos(handles[hi]));
            }
        }
    }

    /// `has_cycle` and `topological_sort` must always agree: a sort
    /// succeeds iff no cycle is reachable.
    #[test]
    fn has_cycle_agrees_with_topological_sort(
        n in 2usize..10,
        raw_pairs in prop::collection::vec((0usize..10, 0usize..10), 0..20),
        add_back_edge in prop::bool::ANY,
    ) {
        let pairs: Vec<_> = raw_pairs
            .into_iter()
            .filter(|&(a, b)| a < n && b < n && a != b)
            .collect();
        let (mut topo, handles) = acyclic_topology(n, &pairs);

        if add_back_edge && n >= 2 {
            // Close a cycle by wiring the highest-indexed node back to the
            // lowest: guaranteed to create a cycle since every other edge
            // in `pairs` only ever points from a lower index to a higher one.
            topo.add_edge(edge(handles[n - 1], handles[0])).unwrap();
        }

        prop_assert_eq!(topo.has_cycle(), topo.topological_sort().is_err());
    }
}

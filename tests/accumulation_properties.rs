//! Property-style invariant for accumulation slots (§8): whatever mix of
//! explicit `AccumulationSortConfig` sort keys and un-tagged connections
//! feeds an accumulation input, the final order is always the stable sort
//! of `(sort_key.unwrap_or(insertion_index), insertion_index)` — ties (no
//! explicit key, or two equal keys) fall back to connection order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use rendergraph::connection::{AccumulationSortConfig, ConnectMeta};
use rendergraph::params::ParamValue;
use rendergraph::{GraphConfig, NodeTypeId};

mod common;
use common::{
    accumulation_input_slot, buffer_output_slot, new_graph, node_type, AccumulationSink,
    ParamDrivenProducer,
};

proptest! {
    #[test]
    fn accumulation_settles_into_stable_sort_by_key_then_insertion(
        // one entry per contribution: (value, optional explicit sort key)
        contributions in prop::collection::vec((0u64..1000, prop::option::of(-5i64..5)), 1..8),
    ) {
        let mut graph = new_graph(GraphConfig::default());

        let producer_type = node_type(1, "Contributor", vec![], vec![buffer_output_slot("value")], || {
            Box::new(ParamDrivenProducer)
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink_order = order.clone();
        let sink_type = node_type(
            2,
            "Sink",
            vec![accumulation_input_slot("contributions")],
            vec![],
            move || Box::new(AccumulationSink { order: sink_order.clone() }),
        );
        graph.register_node_type(producer_type).unwrap();
        graph.register_node_type(sink_type).unwrap();
        let sink = graph.add_node(NodeTypeId(2), "sink").unwrap();

        for (i, (value, sort_key)) in contributions.iter().enumerate() {
            let contributor = graph.add_node(NodeTypeId(1), format!("contributor{i}")).unwrap();
            graph.set_param(contributor, "value", ParamValue::UInt(*value)).unwrap();
            let meta = sort_key.map(|key| ConnectMeta {
                modifiers: vec![Box::new(AccumulationSortConfig::new(key))],
            });
            graph.connect_with_meta(contributor, 0, 0, sink, 0, 0, meta).unwrap();
        }

        graph.compile().unwrap();
        graph.render_frame(Duration::ZERO);

        let mut expected: Vec<(usize, u64, Option<i64>)> = contributions
            .iter()
            .enumerate()
            .map(|(i, &(value, key))| (i, value, key))
            .collect();
        expected.sort_by_key(|&(i, _, key)| (key.unwrap_or(i as i64), i));
        let expected_values: Vec<u64> = expected.into_iter().map(|(_, value, _)| value).collect();

        prop_assert_eq!(order.lock().clone(), expected_values);
    }
}

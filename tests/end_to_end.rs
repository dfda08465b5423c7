//! Façade-level end-to-end scenarios: everything below goes through
//! `Graph`'s public API only, the way an embedder would, rather than
//! poking at individual subsystems directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use rendergraph::connection::{AccumulationSortConfig, ConnectMeta};
use rendergraph::node::{Bundle, TaskIndex};
use rendergraph::params::ParamValue;
use rendergraph::slot::SlotMutability;
use rendergraph::{
    GraphConfig, NodeBehavior, NodeContext, NodeTypeId, PresentResult, SimpleTaskProfile,
};

mod common;
use common::{
    accumulation_input_slot, buffer_input_slot, buffer_output_slot, new_graph, node_type,
    AccumulationSink, ParamDrivenProducer,
};

/// Reads its single input's resolved handle once per `Execute` and appends
/// the raw payload to a shared log, so a test can observe exactly how many
/// times, and with what value, a downstream node saw a resource.
struct LoggingConsumer {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl NodeBehavior for LoggingConsumer {
    fn setup(&mut self, _ctx: &mut NodeContext) {}
    fn compile(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle) {}

    fn execute(&mut self, ctx: &mut NodeContext, bundle: &mut Bundle, _task: TaskIndex) {
        if let Some(id) = bundle.input(0, 0) {
            if let Some(handle) = ctx.resources.get(id).and_then(|r| r.handle) {
                self.seen.lock().push(handle.raw());
            }
        }
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext) {}
}

/// Writes its input's resource handle back into itself during `Execute`;
/// used purely to give the wave scheduler a `Write` access to a shared
/// resource so two independent instances conflict.
struct WriterSink;

impl NodeBehavior for WriterSink {
    fn setup(&mut self, _ctx: &mut NodeContext) {}
    fn compile(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle) {}
    fn execute(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle, _task: TaskIndex) {}
    fn cleanup(&mut self, _ctx: &mut NodeContext) {}
}

struct CountingNode {
    counter: Arc<AtomicUsize>,
}

impl NodeBehavior for CountingNode {
    fn setup(&mut self, _ctx: &mut NodeContext) {}
    fn compile(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle) {}
    fn execute(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle, _task: TaskIndex) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
    fn cleanup(&mut self, _ctx: &mut NodeContext) {}
}

/// Sleeps past any reasonable frame budget, to drive the adaptive-budget
/// feedback loop into overrun on every frame it runs in. Counts its own
/// `Compile` calls so a test can observe a `WorkUnitChangeCallback`-driven
/// recompile (§4.8, §4.10 step 5) distinct from the one `Graph::compile`
/// itself performs.
struct SlowNode {
    compile_count: Arc<AtomicUsize>,
}

impl NodeBehavior for SlowNode {
    fn setup(&mut self, _ctx: &mut NodeContext) {}
    fn compile(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle) {
        self.compile_count.fetch_add(1, Ordering::SeqCst);
    }
    fn execute(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle, _task: TaskIndex) {
        std::thread::sleep(Duration::from_millis(14));
    }
    fn cleanup(&mut self, _ctx: &mut NodeContext) {}
}

#[test]
fn two_node_chain_delivers_the_produced_value_exactly_once() {
    let mut graph = new_graph(GraphConfig::default());

    let producer_type = node_type(1, "Producer", vec![], vec![buffer_output_slot("count")], || {
        Box::new(ParamDrivenProducer)
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumer_seen = seen.clone();
    let consumer_type = node_type(
        2,
        "Consumer",
        vec![buffer_input_slot("n", SlotMutability::ReadOnly)],
        vec![],
        move || {
            Box::new(LoggingConsumer {
                seen: consumer_seen.clone(),
            })
        },
    );

    graph.register_node_type(producer_type).unwrap();
    graph.register_node_type(consumer_type).unwrap();

    let producer = graph.add_node(NodeTypeId(1), "producer").unwrap();
    let consumer = graph.add_node(NodeTypeId(2), "consumer").unwrap();
    graph.set_param(producer, "value", ParamValue::UInt(7)).unwrap();
    graph.connect(producer, 0, 0, consumer, 0, 0).unwrap();

    graph.compile().unwrap();
    assert_eq!(graph.render_frame(Duration::ZERO), PresentResult::Ok);

    assert_eq!(*seen.lock(), vec![7]);
}

#[test]
fn fan_out_delivers_the_same_value_to_every_consumer_in_one_wave() {
    let mut graph = new_graph(GraphConfig::default());

    let producer_type = node_type(1, "Producer", vec![], vec![buffer_output_slot("count")], || {
        Box::new(ParamDrivenProducer)
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumer_seen = seen.clone();
    let consumer_type = node_type(
        2,
        "Consumer",
        vec![buffer_input_slot("n", SlotMutability::ReadOnly)],
        vec![],
        move || {
            Box::new(LoggingConsumer {
                seen: consumer_seen.clone(),
            })
        },
    );

    graph.register_node_type(producer_type).unwrap();
    graph.register_node_type(consumer_type).unwrap();

    let producer = graph.add_node(NodeTypeId(1), "producer").unwrap();
    graph.set_param(producer, "value", ParamValue::UInt(7)).unwrap();
    let mut consumers = Vec::new();
    for i in 0..3 {
        let consumer = graph.add_node(NodeTypeId(2), format!("consumer{i}")).unwrap();
        graph.connect(producer, 0, 0, consumer, 0, 0).unwrap();
        consumers.push(consumer);
    }

    graph.compile().unwrap();

    // Three read-only consumers of the same resource never conflict, so the
    // scheduler keeps them together, one wave behind the producer.
    let scheduler = graph.get_wave_scheduler();
    assert_eq!(scheduler.wave_count(), 2);
    let producer_wave = scheduler.node_wave(producer).unwrap();
    for &consumer in &consumers {
        assert_eq!(scheduler.node_wave(consumer), Some(producer_wave + 1));
    }

    graph.render_frame(Duration::ZERO);
    let mut observed = seen.lock().clone();
    observed.sort_unstable();
    assert_eq!(observed, vec![7, 7, 7]);
}

#[test]
fn two_writers_of_the_same_resource_land_in_different_waves() {
    let mut graph = new_graph(GraphConfig::default());

    let producer_type = node_type(1, "Producer", vec![], vec![buffer_output_slot("count")], || {
        Box::new(ParamDrivenProducer)
    });
    let writer_type = node_type(
        2,
        "Writer",
        vec![buffer_input_slot("target", SlotMutability::WriteOnly)],
        vec![],
        || Box::new(WriterSink),
    );

    graph.register_node_type(producer_type).unwrap();
    graph.register_node_type(writer_type).unwrap();

    let producer = graph.add_node(NodeTypeId(1), "producer").unwrap();
    let writer_a = graph.add_node(NodeTypeId(2), "writer_a").unwrap();
    let writer_b = graph.add_node(NodeTypeId(2), "writer_b").unwrap();
    graph.connect(producer, 0, 0, writer_a, 0, 0).unwrap();
    graph.connect(producer, 0, 0, writer_b, 0, 0).unwrap();

    graph.compile().unwrap();

    let scheduler = graph.get_wave_scheduler();
    assert_ne!(scheduler.node_wave(writer_a), scheduler.node_wave(writer_b));
}

#[test]
fn accumulation_slot_settles_into_stable_sort_key_order() {
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
        move || {
            Box::new(AccumulationSink {
                order: sink_order.clone(),
            })
        },
    );

    graph.register_node_type(producer_type).unwrap();
    graph.register_node_type(sink_type).unwrap();

    let sink = graph.add_node(NodeTypeId(2), "sink").unwrap();

    // sort_key 2 -> value 10, sort_key 0 -> value 20, sort_key 1 -> value 30;
    // final order must be [20, 30, 10].
    let contributions = [(10u64, 2i64), (20u64, 0i64), (30u64, 1i64)];
    for (i, (value, sort_key)) in contributions.iter().enumerate() {
        let contributor = graph.add_node(NodeTypeId(1), format!("contributor{i}")).unwrap();
        graph.set_param(contributor, "value", ParamValue::UInt(*value)).unwrap();
        let meta = ConnectMeta {
            modifiers: vec![Box::new(AccumulationSortConfig::new(*sort_key))],
        };
        graph
            .connect_with_meta(contributor, 0, 0, sink, 0, 0, Some(meta))
            .unwrap();
    }

    graph.compile().unwrap();
    graph.render_frame(Duration::ZERO);

    assert_eq!(*order.lock(), vec![20, 30, 10]);
}

#[test]
fn hot_reload_propagates_a_new_value_without_rewiring() {
    let mut graph = new_graph(GraphConfig::default());

    let producer_type = node_type(1, "Producer", vec![], vec![buffer_output_slot("count")], || {
        Box::new(ParamDrivenProducer)
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumer_seen = seen.clone();
    let consumer_type = node_type(
        2,
        "Consumer",
        vec![buffer_input_slot("n", SlotMutability::ReadOnly)],
        vec![],
        move || {
            Box::new(LoggingConsumer {
                seen: consumer_seen.clone(),
            })
        },
    );

    graph.register_node_type(producer_type).unwrap();
    graph.register_node_type(consumer_type).unwrap();

    let producer = graph.add_node(NodeTypeId(1), "producer").unwrap();
    let consumer = graph.add_node(NodeTypeId(2), "consumer").unwrap();
    graph.set_param(producer, "value", ParamValue::UInt(1)).unwrap();
    graph.connect(producer, 0, 0, consumer, 0, 0).unwrap();

    graph.compile().unwrap();
    graph.render_frame(Duration::ZERO);

    // Simulates a shader-reload event handler calling `set_param` on the
    // affected node; the graph notices via `needs_recompile` on the next
    // frame rather than needing to be told which resources changed.
    graph.set_param(producer, "value", ParamValue::UInt(2)).unwrap();
    graph.render_frame(Duration::ZERO);

    assert_eq!(*seen.lock(), vec![1, 2]);
}

#[test]
fn adaptive_budget_decreases_work_units_under_sustained_overrun() {
    let config = GraphConfig {
        frame_budget: Duration::from_millis(10),
        ..GraphConfig::default()
    };
    let mut graph = new_graph(config);

    let compile_count = Arc::new(AtomicUsize::new(0));
    let node_compile_count = compile_count.clone();
    let slow_type = node_type(1, "SlowNode", vec![], vec![], move || {
        Box::new(SlowNode { compile_count: node_compile_count.clone() })
    });
    graph.register_node_type(slow_type).unwrap();
    let slow = graph.add_node(NodeTypeId(1), "slow").unwrap();

    graph
        .get_task_profile_registry_mut()
        .register_task(Box::new(SimpleTaskProfile::new("shadow", "shadow", 0, 4).with_priority(10)));
    // Binds the task id to the node so the registry's `WorkUnitChangeCallback`
    // (wired up in `Graph::new`) marks `slow` dirty when its work units move.
    graph.bind_task_profile(slow, "shadow");

    graph.compile().unwrap();
    assert_eq!(compile_count.load(Ordering::SeqCst), 1);

    let baseline = graph.get_task_profile_registry().profile("shadow").unwrap().work_units();

    // Each frame sleeps 14ms against a 10ms budget, well outside the ±5%
    // deadband; after enough frames the only registered task's work units
    // must have been pulled down from its baseline.
    for _ in 0..5 {
        graph.render_frame(Duration::ZERO);
    }

    let final_units = graph.get_task_profile_registry().profile("shadow").unwrap().work_units();
    assert!(final_units < baseline, "expected work units to decrease from {baseline}, got {final_units}");

    // The work-unit change must have routed back to the bound node and
    // triggered at least one additional `Compile` beyond the initial one,
    // proving the callback -> dirty -> recompile path actually ran.
    assert!(
        compile_count.load(Ordering::SeqCst) > 1,
        "expected the bound node to recompile after its work units changed, got {} compiles",
        compile_count.load(Ordering::SeqCst)
    );
}

#[test]
fn empty_graph_compiles_and_renders_as_a_no_op() {
    let mut graph = new_graph(GraphConfig::default());
    graph.compile().unwrap();
    assert_eq!(graph.render_frame(Duration::ZERO), PresentResult::Ok);
    assert!(graph.get_execution_order().is_empty());
}

#[test]
fn single_node_executes_exactly_once_per_frame() {
    let mut graph = new_graph(GraphConfig::default());
    let counter = Arc::new(AtomicUsize::new(0));
    let node_counter = counter.clone();
    let ty = node_type(1, "Counter", vec![], vec![], move || {
        Box::new(CountingNode {
            counter: node_counter.clone(),
        })
    });
    graph.register_node_type(ty).unwrap();
    graph.add_node(NodeTypeId(1), "counter").unwrap();

    graph.compile().unwrap();
    graph.render_frame(Duration::ZERO);

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn self_loop_is_rejected_at_connect_time() {
    let mut graph = new_graph(GraphConfig::default());
    let ty = node_type(
        1,
        "SelfLoop",
        vec![buffer_input_slot("n", SlotMutability::ReadOnly)],
        vec![buffer_output_slot("n")],
        || Box::new(ParamDrivenProducer),
    );
    graph.register_node_type(ty).unwrap();
    let handle = graph.add_node(NodeTypeId(1), "node").unwrap();

    assert!(graph.connect(handle, 0, 0, handle, 0, 0).is_err());
}

#[test]
fn duplicate_connection_to_a_non_accumulation_input_is_rejected() {
    let mut graph = new_graph(GraphConfig::default());
    let producer_type = node_type(1, "Producer", vec![], vec![buffer_output_slot("count")], || {
        Box::new(ParamDrivenProducer)
    });
    let consumer_type = node_type(
        2,
        "Consumer",
        vec![buffer_input_slot("n", SlotMutability::ReadOnly)],
        vec![],
        || {
            Box::new(LoggingConsumer {
                seen: Arc::new(Mutex::new(Vec::new())),
            })
        },
    );
    graph.register_node_type(producer_type).unwrap();
    graph.register_node_type(consumer_type).unwrap();

    let producer_a = graph.add_node(NodeTypeId(1), "producer_a").unwrap();
    let producer_b = graph.add_node(NodeTypeId(1), "producer_b").unwrap();
    let consumer = graph.add_node(NodeTypeId(2), "consumer").unwrap();

    graph.connect(producer_a, 0, 0, consumer, 0, 0).unwrap();
    assert!(graph.connect(producer_b, 0, 0, consumer, 0, 0).is_err());
}

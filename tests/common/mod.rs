#![allow(dead_code)] // Shared across several integration-test binaries; each uses a subset.

use std::sync::Arc;

use parking_lot::Mutex;

use rendergraph::node::{Bundle, DeviceCapabilities, PipelineKind, TaskIndex};
use rendergraph::params::ParamValue;
use rendergraph::resource::kind::BufferHandleTy;
use rendergraph::resource::GpuHandle;
use rendergraph::slot::{
    ResourceSlot, SlotArrayMode, SlotFlags, SlotInfo, SlotKind, SlotMutability, SlotNullability,
    SlotRole, SlotScope,
};
use rendergraph::{Graph, GraphConfig, NodeBehavior, NodeContext, NodeType, NodeTypeId};

/// Installs `env_logger` for whichever test binary calls this, so a failing
/// test can be re-run with `RUST_LOG=debug` to see the graph's own
/// `debug!`/`trace!` output. Safe to call more than once per process (each
/// integration test file is its own binary, but within one binary multiple
/// `#[test]` functions may call it — `try_init` just reports `Err` on the
/// second call, which we ignore).
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// `Graph::new`, but makes sure `env_logger` is installed first so a test
/// run with `RUST_LOG=debug` shows the graph's own log output.
pub fn new_graph(config: GraphConfig) -> Graph {
    init_logging();
    Graph::new(config)
}

pub fn buffer_output_slot(name: &str) -> SlotInfo {
    let behavior = ResourceSlot::<BufferHandleTy, 0>::behavior(
        SlotNullability::Required,
        SlotRole::OUTPUT,
        SlotMutability::WriteOnly,
        SlotScope::NodeLevel,
        SlotFlags::NONE,
        SlotArrayMode::Single,
    );
    SlotInfo::from_static_slot(name, SlotKind::StaticOutput, behavior)
}

pub fn buffer_input_slot(name: &str, mutability: SlotMutability) -> SlotInfo {
    let behavior = ResourceSlot::<BufferHandleTy, 0>::behavior(
        SlotNullability::Required,
        SlotRole::DEPENDENCY,
        mutability,
        SlotScope::NodeLevel,
        SlotFlags::NONE,
        SlotArrayMode::Single,
    );
    SlotInfo::from_static_slot(name, SlotKind::StaticInput, behavior)
}

pub fn accumulation_input_slot(name: &str) -> SlotInfo {
    let behavior = ResourceSlot::<BufferHandleTy, 0>::behavior(
        SlotNullability::Required,
        SlotRole::DEPENDENCY,
        SlotMutability::ReadOnly,
        SlotScope::NodeLevel,
        SlotFlags::ACCUMULATION,
        SlotArrayMode::Array,
    );
    SlotInfo::from_static_slot(name, SlotKind::StaticInput, behavior)
}

pub fn node_type(
    id: u32,
    name: &str,
    inputs: Vec<SlotInfo>,
    outputs: Vec<SlotInfo>,
    factory: impl Fn() -> Box<dyn NodeBehavior> + Send + Sync + 'static,
) -> NodeType {
    NodeType::new(
        NodeTypeId(id),
        name,
        inputs,
        outputs,
        vec![],
        DeviceCapabilities::NONE,
        PipelineKind::None,
        factory,
    )
}

/// Writes a fixed `u64` into its single output during `Compile`, reading it
/// back out of a param so hot-reload tests can change it between frames.
pub struct ParamDrivenProducer;

impl NodeBehavior for ParamDrivenProducer {
    fn setup(&mut self, _ctx: &mut NodeContext) {}

    fn compile(&mut self, ctx: &mut NodeContext, bundle: &mut Bundle) {
        let value = match ctx.param_or("value", &ParamValue::UInt(0)) {
            ParamValue::UInt(v) => v,
            _ => 0,
        };
        if let Some(id) = bundle.output(0, 0) {
            if let Some(resource) = ctx.resources.get_mut(id) {
                resource.handle = Some(GpuHandle::Buffer(value));
            }
        }
    }

    fn execute(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle, _task: TaskIndex) {}
    fn cleanup(&mut self, _ctx: &mut NodeContext) {}
}

/// Drains every contribution of an accumulation input, in array order, into
/// a shared log — used to observe the final sorted order a slot settled on.
pub struct AccumulationSink {
    pub order: Arc<Mutex<Vec<u64>>>,
}

impl NodeBehavior for AccumulationSink {
    fn setup(&mut self, _ctx: &mut NodeContext) {}
    fn compile(&mut self, _ctx: &mut NodeContext, _bundle: &mut Bundle) {}

    fn execute(&mut self, ctx: &mut NodeContext, bundle: &mut Bundle, _task: TaskIndex) {
        let mut values = Vec::new();
        let mut index = 0u32;
        while let Some(id) = bundle.input(0, index) {
            if let Some(handle) = ctx.resources.get(id).and_then(|r| r.handle) {
                values.push(handle.raw());
            }
            index += 1;
        }
        *self.order.lock() = values;
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext) {}
}

//! Physical operators and their ports.

use std::collections::HashMap;

use freshet_types::app::{Annotation, OperatorParameter, PortKind, ResourcesDescription, ThreadedPortDescription};
use freshet_types::ids::{
    ChannelIndex, OperatorIndex, PeIndex, PePortIndex, PortIndex, SplitterIndex, ToolkitIndex,
    TupleTypeIndex,
};
use freshet_types::physical::{
    PhysicalExportedStreamDescription, PhysicalImportedStreamDescription,
};

use crate::physical::splitter::PhysicalSplitter;

/// A resolved directed edge between two physical operator ports. `from` is
/// the port the connection is stored on; `port_kind` is the kind of the far
/// end. Connections that fan out through a splitter carry the splitter and
/// channel they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalConnection {
    pub from_oper: OperatorIndex,
    pub from_port: PortIndex,
    pub to_oper: OperatorIndex,
    pub to_port: PortIndex,
    pub port_kind: PortKind,
    pub splitter_index: Option<SplitterIndex>,
    pub channel_index: Option<u64>,
}

impl PhysicalConnection {
    pub fn direct(
        from_oper: OperatorIndex,
        from_port: PortIndex,
        to_oper: OperatorIndex,
        to_port: PortIndex,
        port_kind: PortKind,
    ) -> Self {
        Self {
            from_oper,
            from_port,
            to_oper,
            to_port,
            port_kind,
            splitter_index: None,
            channel_index: None,
        }
    }

    pub fn through_splitter(
        from_oper: OperatorIndex,
        from_port: PortIndex,
        to_oper: OperatorIndex,
        to_port: PortIndex,
        port_kind: PortKind,
        splitter_index: SplitterIndex,
        channel_index: u64,
    ) -> Self {
        Self {
            from_oper,
            from_port,
            to_oper,
            to_port,
            port_kind,
            splitter_index: Some(splitter_index),
            channel_index: Some(channel_index),
        }
    }
}

#[derive(Debug)]
pub struct PhysicalOperatorInputPort {
    pub index: PortIndex,
    pub name: String,
    pub transport: String,
    pub encoding: String,
    pub is_mutable: bool,
    pub is_control: bool,
    pub tuple_type_index: TupleTypeIndex,
    pub threaded_port: Option<ThreadedPortDescription>,
    /// Whether the threaded port was injected by the planner rather than
    /// declared by the user; injected ones may be removed late.
    pub has_injected_thread: bool,
    pub imported_streams: Vec<PhysicalImportedStreamDescription>,
    pub connections: Vec<PhysicalConnection>,
    pub pe_port: Option<PePortIndex>,
}

#[derive(Debug)]
pub struct PhysicalOperatorOutputPort {
    pub index: PortIndex,
    pub name: String,
    pub transport: String,
    pub encoding: String,
    pub is_mutable: bool,
    pub tuple_type_index: TupleTypeIndex,
    pub stream_name: String,
    pub logical_stream_name: String,
    pub viewable: Option<bool>,
    pub single_threaded_on_output: bool,
    pub exported_stream: Option<PhysicalExportedStreamDescription>,
    pub splitters: Vec<PhysicalSplitter>,
    /// Direct connections; splitter fan-out lives on the splitters.
    pub connections: Vec<PhysicalConnection>,
    pub pe_port: Option<PePortIndex>,
    /// PE output ports realizing individual splitter channels.
    pub pe_port_by_channel: HashMap<(SplitterIndex, u64), PePortIndex>,
}

#[derive(Debug)]
pub struct PhysicalOperator {
    pub index: OperatorIndex,
    pub logical_index: OperatorIndex,
    pub name: String,
    pub logical_name: String,
    pub kind: String,
    pub toolkit_index: ToolkitIndex,
    pub channel_index: ChannelIndex,
    pub max_channels: i64,
    pub is_replica: bool,
    pub placement: String,
    pub colocation_constraint: bool,
    pub resources: ResourcesDescription,
    pub parameters: Vec<OperatorParameter>,
    pub annotations: Vec<Annotation>,
    pub owning_pe: PeIndex,
    pub original_pe: PeIndex,
    pub single_threaded_on_inputs: bool,
    pub single_threaded_on_outputs: bool,
    pub input_ports: Vec<PhysicalOperatorInputPort>,
    pub output_ports: Vec<PhysicalOperatorOutputPort>,
    /// Canonical consistent-cut region slot, when the operator is in one.
    pub cc_slot: Option<usize>,
}

//! The physical application description.
//!
//! Output of the planner: every parallel region expanded, every connection
//! resolved to concrete endpoints, every PE carrying its operators, ports
//! and static connections. The runtime consumes this tree as-is.

use serde::{Deserialize, Serialize};

use crate::app::{
    Annotation, ExportStreamDescription, HostpoolMembership, OperatorParameter, PortKind,
    ThreadedPortDescription,
};
use crate::ids::{
    ChannelIndex, HostpoolIndex, OperatorIndex, PeIndex, PePortIndex, PortIndex, RegionIndex,
    SplitterIndex, ToolkitIndex, TupleTypeIndex,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalAppDescription {
    pub name: String,
    pub hostpools: Vec<PhysicalHostpoolDescription>,
    pub operators: Vec<PhysicalOperatorDescription>,
    pub pes: Vec<PhysicalPeDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalHostpoolDescription {
    pub index: HostpoolIndex,
    pub name: String,
    pub size: Option<u64>,
    pub membership: HostpoolMembership,
    pub hosts: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalOperatorDescription {
    pub index: OperatorIndex,
    /// Index of the logical operator this one was derived from. Differs from
    /// `index` only for replicas.
    pub logical_index: OperatorIndex,
    pub name: String,
    pub logical_name: String,
    pub kind: String,
    pub toolkit_index: ToolkitIndex,
    pub channel_index: ChannelIndex,
    pub max_channels: i64,
    pub is_replica: bool,
    pub pe_index: PeIndex,
    pub single_threaded_on_inputs: bool,
    pub single_threaded_on_outputs: bool,
    pub resources: PhysicalResourcesDescription,
    pub parameters: Vec<OperatorParameter>,
    pub annotations: Vec<Annotation>,
    pub input_ports: Vec<PhysicalInputPortDescription>,
    pub output_ports: Vec<PhysicalOutputPortDescription>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicalResourcesDescription {
    pub placement: String,
    pub colocation_constraint: bool,
    pub pool_location: Option<PhysicalPoolLocationDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPoolLocationDescription {
    pub pool_index: HostpoolIndex,
    pub in_pool_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalInputPortDescription {
    pub index: PortIndex,
    pub name: String,
    pub transport: String,
    pub encoding: String,
    pub is_mutable: bool,
    pub is_control: bool,
    pub tuple_type_index: TupleTypeIndex,
    pub threaded_port: Option<ThreadedPortDescription>,
    /// PE input port realizing this operator port, when one was needed.
    pub pe_port_index: Option<PePortIndex>,
    pub imported_streams: Vec<PhysicalImportedStreamDescription>,
    pub inter_pe_connections: Vec<PhysicalConnectionDescription>,
    pub intra_pe_connections: Vec<PhysicalConnectionDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalOutputPortDescription {
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
    pub pe_port_index: Option<PePortIndex>,
    pub exported_stream: Option<PhysicalExportedStreamDescription>,
    pub splitters: Vec<PhysicalSplitterDescription>,
    /// Connections fanning out through a splitter appear only inside
    /// `splitters`, never in these flat lists.
    pub inter_pe_connections: Vec<PhysicalConnectionDescription>,
    pub intra_pe_connections: Vec<PhysicalConnectionDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalConnectionDescription {
    pub oper_index: OperatorIndex,
    pub port_index: PortIndex,
    pub port_kind: PortKind,
    pub splitter_index: Option<SplitterIndex>,
    pub channel_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSplitterDescription {
    pub index: SplitterIndex,
    /// Input port of the parallel region this splitter feeds.
    pub iport_index: PortIndex,
    pub region_index: RegionIndex,
    pub channels: Vec<PhysicalParallelChannelDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParallelChannelDescription {
    pub index: u64,
    pub pe_port_index: Option<PePortIndex>,
    pub connections: Vec<PhysicalConnectionDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPeDescription {
    pub index: PeIndex,
    pub logical_index: PeIndex,
    pub channel_index: ChannelIndex,
    pub operators: Vec<OperatorIndex>,
    pub input_ports: Vec<PeInputPortDescription>,
    pub output_ports: Vec<PeOutputPortDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeInputPortDescription {
    pub index: PePortIndex,
    pub tuple_type_index: TupleTypeIndex,
    pub transport: String,
    pub encoding: String,
    pub oper_index: OperatorIndex,
    pub oper_port_index: PortIndex,
    pub imported_streams: Vec<PhysicalImportedStreamDescription>,
    pub static_connections: Vec<StaticConnectionDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeOutputPortDescription {
    pub index: PePortIndex,
    pub tuple_type_index: TupleTypeIndex,
    pub transport: String,
    pub encoding: String,
    pub oper_index: OperatorIndex,
    pub oper_port_index: PortIndex,
    pub single_threaded_on_output: bool,
    /// Set when this PE port carries one parallel channel of a splitter.
    pub splitter_index: Option<SplitterIndex>,
    pub channel_index: Option<u64>,
    pub exported_streams: Vec<PhysicalExportedStreamDescription>,
    pub static_connections: Vec<StaticConnectionDescription>,
}

/// One side of a cross-PE edge, recorded on a PE port. The matching record
/// with the opposite `port_kind` lives on the PE port it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConnectionDescription {
    pub pe_index: PeIndex,
    pub pe_port_index: PePortIndex,
    pub port_kind: PortKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalImportedStreamDescription {
    pub import_oper_name: String,
    pub logical_import_oper_name: String,
    pub filter: String,
    pub application_scope: String,
    pub stream: PhysicalImportStream,
    pub max_channels: i64,
    pub channel_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalImportStream {
    NameBased {
        application_name: String,
        stream_name: String,
    },
    PropertyBased {
        subscription: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalExportedStreamDescription {
    pub export_oper_name: String,
    pub logical_export_oper_name: String,
    pub allow_filter: bool,
    pub stream: ExportStreamDescription,
    pub max_channels: i64,
    pub channel_index: i64,
}

//! Processing elements, PE ports and static connections.

use std::collections::HashMap;

use freshet_types::app::PortKind;
use freshet_types::ids::{
    ChannelIndex, OperatorIndex, PeIndex, PePortIndex, PortIndex, RegionIndex, SplitterIndex,
    TupleTypeIndex, NO_CHANNEL,
};
use freshet_types::physical::{
    PhysicalExportedStreamDescription, PhysicalImportedStreamDescription,
};

/// One side of a cross-PE edge. The PE port it points at records the
/// mirror-image entry with the opposite port kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticConnection {
    pub pe_index: PeIndex,
    pub pe_port_index: PePortIndex,
    pub port_kind: PortKind,
}

#[derive(Debug)]
pub struct PhysicalPeInputPort {
    pub index: PePortIndex,
    pub tuple_type_index: TupleTypeIndex,
    pub transport: String,
    pub encoding: String,
    pub oper_index: OperatorIndex,
    pub oper_port_index: PortIndex,
    pub imported_streams: Vec<PhysicalImportedStreamDescription>,
    pub static_connections: Vec<StaticConnection>,
}

#[derive(Debug)]
pub struct PhysicalPeOutputPort {
    pub index: PePortIndex,
    pub tuple_type_index: TupleTypeIndex,
    pub transport: String,
    pub encoding: String,
    pub oper_index: OperatorIndex,
    pub oper_port_index: PortIndex,
    /// Set when this port carries one parallel channel of a splitter.
    pub splitter_index: Option<SplitterIndex>,
    pub channel_index: Option<u64>,
    pub exported_streams: Vec<PhysicalExportedStreamDescription>,
    pub static_connections: Vec<StaticConnection>,
}

#[derive(Debug)]
pub struct PhysicalPE {
    pub index: PeIndex,
    pub logical_index: PeIndex,
    pub channel_index: ChannelIndex,
    pub region_index: Option<RegionIndex>,
    pub operators: Vec<OperatorIndex>,
    pub input_ports: Vec<PhysicalPeInputPort>,
    pub output_ports: Vec<PhysicalPeOutputPort>,
    /// Per-channel replicas of this PE; the original acts as channel 0.
    pub replica_map: HashMap<ChannelIndex, PeIndex>,
}

impl PhysicalPE {
    pub fn new(index: PeIndex) -> Self {
        Self {
            index,
            logical_index: index,
            channel_index: NO_CHANNEL,
            region_index: None,
            operators: Vec::new(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            replica_map: HashMap::new(),
        }
    }

    /// A replica of this PE for one parallel channel, as a fresh instance.
    pub fn replica(&self, index: PeIndex, region_index: RegionIndex, channel: ChannelIndex) -> Self {
        Self {
            index,
            logical_index: self.logical_index,
            channel_index: channel,
            region_index: Some(region_index),
            operators: Vec::new(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            replica_map: HashMap::new(),
        }
    }
}

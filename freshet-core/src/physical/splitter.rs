//! Physical splitters and their parallel channels.
//!
//! A physical splitter materializes a logical splitter operator on the
//! output port that feeds it. A port may own several splitters: resolving a
//! channel that reaches a nested region's splitter materializes the nested
//! splitter on the same port.

use freshet_types::ids::{OperatorIndex, PePortIndex, PortIndex, RegionIndex, SplitterIndex};

use crate::physical::operator::PhysicalConnection;

#[derive(Debug)]
pub struct PhysicalParallelChannel {
    pub index: u64,
    pub connections: Vec<PhysicalConnection>,
    pub pe_port: Option<PePortIndex>,
}

#[derive(Debug)]
pub struct PhysicalSplitter {
    /// Splitter index, unique per owning output port.
    pub index: SplitterIndex,
    /// Input port of the parallel region the splitter feeds.
    pub iport_index: PortIndex,
    pub region_index: RegionIndex,
    /// The logical splitter operator this one realizes.
    pub logical_splitter: OperatorIndex,
    pub channels: Vec<PhysicalParallelChannel>,
}

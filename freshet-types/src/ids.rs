//! Index aliases used across the logical and physical models.
//!
//! Entities are owned by their model and refer to each other by index, never
//! by pointer. Indices are unique within one transform invocation.

pub type OperatorIndex = u64;
pub type PortIndex = u64;
pub type PeIndex = u64;
pub type PePortIndex = u64;
pub type HostpoolIndex = u64;
pub type RegionIndex = u64;
pub type TupleTypeIndex = u64;
pub type ToolkitIndex = u64;
pub type SplitterIndex = u64;

/// Parallel channel number. `NO_CHANNEL` marks an operator outside any
/// parallel region.
pub type ChannelIndex = i64;

pub const NO_CHANNEL: ChannelIndex = -1;

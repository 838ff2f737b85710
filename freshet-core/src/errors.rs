use freshet_types::ids::{
    ChannelIndex, HostpoolIndex, OperatorIndex, PeIndex, PortIndex, RegionIndex,
};
use freshet_types::thiserror;
use freshet_types::thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("operator index {0} not found in the model")]
    OperatorIndexOutOfRange(OperatorIndex),

    #[error("port {port_index} not found on operator {oper_index}")]
    PortIndexOutOfRange {
        oper_index: OperatorIndex,
        port_index: PortIndex,
    },

    #[error("hostpool index {0} not found in the model")]
    HostpoolIndexOutOfRange(HostpoolIndex),

    #[error("PE index {0} not found in the model")]
    PeIndexOutOfRange(PeIndex),

    #[error("parallel region {region_index} has invalid width {width}")]
    InvalidParallelWidth { region_index: RegionIndex, width: i64 },

    #[error("hostpool {pool_index} replica for region {region_index} channel {channel_index} requested with incompatible tags")]
    HostpoolConflict {
        pool_index: HostpoolIndex,
        region_index: RegionIndex,
        channel_index: ChannelIndex,
    },

    #[error("{count} streams resolved on operator {oper_index} port {port_index}, at most one is allowed")]
    StreamResolutionFailure {
        oper_index: OperatorIndex,
        port_index: PortIndex,
        count: usize,
    },

    #[error("cannot evaluate intrinsic expression `{text}`: {reason}")]
    IntrinsicEvalFailure { text: String, reason: String },
}

//! The operator sum type.
//!
//! The model distinguishes six operator variants; shared fields live in an
//! embedded `OperatorBase`. Back references (owning composite, containing
//! parallel region) are indices resolved against the owning model.

use freshet_types::app::{Annotation, OperatorParameter, ResourcesDescription};
use freshet_types::ids::{
    ChannelIndex, OperatorIndex, PeIndex, PortIndex, RegionIndex, ToolkitIndex, NO_CHANNEL,
};

use crate::consistent_cut::CCInfo;
use crate::model::port::{CompositePort, PrimitiveInputPort, PrimitiveOutputPort, PrimitivePort};

#[derive(Debug, Clone)]
pub struct OperatorBase {
    pub name: String,
    pub index: OperatorIndex,
    pub channel_index: ChannelIndex,
    /// `None` only for the main composite.
    pub owning_composite: Option<OperatorIndex>,
    pub is_replica: bool,
    /// Set on an operator that is itself the root of a parallel region.
    pub parallel_region: Option<RegionIndex>,
}

impl OperatorBase {
    pub fn new(name: String, index: OperatorIndex, owning_composite: Option<OperatorIndex>) -> Self {
        Self {
            name,
            index,
            channel_index: NO_CHANNEL,
            owning_composite,
            is_replica: false,
            parallel_region: None,
        }
    }

    /// The name with any parallel-channel subscripting applied.
    pub fn subscripted_name(&self) -> String {
        if self.parallel_region.is_some() && self.channel_index != NO_CHANNEL {
            format!("{}[{}]", self.name, self.channel_index)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModelOperator {
    Composite(CompositeOperator),
    Primitive(PrimitiveOperator),
    Import(ImportOperator),
    Export(ExportOperator),
    Splitter(SplitterOperator),
    Merger(MergerOperator),
}

impl ModelOperator {
    pub fn base(&self) -> &OperatorBase {
        match self {
            ModelOperator::Composite(op) => &op.base,
            ModelOperator::Primitive(op) => &op.base,
            ModelOperator::Import(op) => &op.base,
            ModelOperator::Export(op) => &op.base,
            ModelOperator::Splitter(op) => &op.base,
            ModelOperator::Merger(op) => &op.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut OperatorBase {
        match self {
            ModelOperator::Composite(op) => &mut op.base,
            ModelOperator::Primitive(op) => &mut op.base,
            ModelOperator::Import(op) => &mut op.base,
            ModelOperator::Export(op) => &mut op.base,
            ModelOperator::Splitter(op) => &mut op.base,
            ModelOperator::Merger(op) => &mut op.base,
        }
    }

    pub fn index(&self) -> OperatorIndex {
        self.base().index
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ModelOperator::Composite(_))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, ModelOperator::Primitive(_))
    }

    pub fn is_import(&self) -> bool {
        matches!(self, ModelOperator::Import(_))
    }

    pub fn is_export(&self) -> bool {
        matches!(self, ModelOperator::Export(_))
    }

    pub fn is_splitter(&self) -> bool {
        matches!(self, ModelOperator::Splitter(_))
    }

    pub fn is_merger(&self) -> bool {
        matches!(self, ModelOperator::Merger(_))
    }

    pub fn as_composite(&self) -> Option<&CompositeOperator> {
        match self {
            ModelOperator::Composite(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_composite_mut(&mut self) -> Option<&mut CompositeOperator> {
        match self {
            ModelOperator::Composite(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveOperator> {
        match self {
            ModelOperator::Primitive(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_primitive_mut(&mut self) -> Option<&mut PrimitiveOperator> {
        match self {
            ModelOperator::Primitive(op) => Some(op),
            _ => None,
        }
    }

    /// The consistent-cut info of a primitive-family operator, when the
    /// variant carries one. Splitters and mergers are bookkeeping operators
    /// and never participate in a cut.
    pub fn cc_info(&self) -> Option<&CCInfo> {
        match self {
            ModelOperator::Primitive(op) => Some(&op.cc_info),
            _ => None,
        }
    }

    pub fn cc_info_mut(&mut self) -> Option<&mut CCInfo> {
        match self {
            ModelOperator::Primitive(op) => Some(&mut op.cc_info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompositeOperator {
    pub base: OperatorBase,
    pub description: String,
    pub input_ports: Vec<CompositePort>,
    pub output_ports: Vec<CompositePort>,
    /// Child composite operators, in declaration order.
    pub composites: Vec<OperatorIndex>,
    /// Child primitive-family operators (primitives, imports, exports, and
    /// injected splitters/mergers), in declaration order.
    pub primitives: Vec<OperatorIndex>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct PrimitiveOperator {
    pub base: OperatorBase,
    pub kind: String,
    pub toolkit_index: ToolkitIndex,
    /// Index of the logical operator this one was derived from; differs from
    /// `base.index` only for replicas.
    pub logical_index: OperatorIndex,
    pub input_ports: Vec<PrimitiveInputPort>,
    pub output_ports: Vec<PrimitiveOutputPort>,
    pub parameters: Vec<OperatorParameter>,
    pub annotations: Vec<Annotation>,
    pub resources: ResourcesDescription,
    pub cc_info: CCInfo,
    /// PE the upstream fusion pass assigned the logical operator to.
    pub original_pe: PeIndex,
}

#[derive(Debug, Clone)]
pub struct ImportOperator {
    pub base: OperatorBase,
    /// Logical (pre-replication) name; keys the interned stream descriptor.
    pub stream_key: String,
    pub output_ports: Vec<PrimitivePort>,
}

#[derive(Debug, Clone)]
pub struct ExportOperator {
    pub base: OperatorBase,
    pub stream_key: String,
    pub input_ports: Vec<PrimitivePort>,
}

/// Synthetic fan-out operator injected in front of a parallel region's input
/// port. Lives in the region's parent composite; output port `k` feeds
/// channel `k`.
#[derive(Debug, Clone)]
pub struct SplitterOperator {
    pub base: OperatorBase,
    pub region_index: RegionIndex,
    /// Input port of the region composite this splitter was injected for.
    pub injecting_iport_index: PortIndex,
    pub input_port: PrimitivePort,
    pub output_ports: Vec<PrimitivePort>,
}

/// Synthetic fan-in counterpart of the splitter; input port `k` drains
/// channel `k`. Only a bookkeeping placeholder: the physical layer routes
/// connections through it without realizing it as a runtime operator.
#[derive(Debug, Clone)]
pub struct MergerOperator {
    pub base: OperatorBase,
    pub region_index: RegionIndex,
    pub input_ports: Vec<PrimitivePort>,
    pub output_port: PrimitivePort,
}

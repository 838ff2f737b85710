//! The logical application description.
//!
//! This is the in-memory tree handed to the planner by the submission
//! front-end: a hierarchy of composite operator instances enclosing
//! primitive instances, with ports, stream connections, hostpools, the
//! fusion pass's PE assignment, and parallel-region / consistent-region
//! annotations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{
    HostpoolIndex, OperatorIndex, PeIndex, PortIndex, RegionIndex, ToolkitIndex, TupleTypeIndex,
};

/// Annotation tags the planner recognizes. Anything else is carried through
/// to the physical description untouched.
pub mod annotations {
    /// Composite-level: declares a consistent region rooted at the composite.
    pub const CONSISTENT_REGION: &str = "consistentRegion";
    /// Primitive-level: marks an operator as participating in a region.
    pub const CONSISTENT_REGION_ENTRY: &str = "consistentRegionEntry";
    /// Primitive-level: the operator never joins any consistent region.
    pub const AUTONOMOUS: &str = "autonomous";

    pub const PROP_INDEX: &str = "index";
    pub const PROP_TRIGGER: &str = "trigger";
    pub const PROP_DRAIN_TIMEOUT: &str = "drainTimeout";
    pub const PROP_RESET_TIMEOUT: &str = "resetTimeout";
    pub const PROP_IS_START_OF_REGION: &str = "isStartOfRegion";
    pub const PROP_IS_END_OF_REGION: &str = "isEndOfRegion";

    pub const TRIGGER_OPERATOR_DRIVEN: &str = "operatorDriven";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDescription {
    pub name: String,
    /// The main composite; all other operator instances nest inside it.
    pub main_composite: CompositeInstance,
    #[serde(default)]
    pub hostpools: Vec<HostpoolDescription>,
    #[serde(default)]
    pub parallel_regions: Vec<ParallelRegionDescription>,
    /// PE assignment produced by the upstream fusion pass.
    #[serde(default)]
    pub pes: Vec<PeDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeInstance {
    pub index: OperatorIndex,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_ports: Vec<CompositePortDescription>,
    #[serde(default)]
    pub output_ports: Vec<CompositePortDescription>,
    #[serde(default)]
    pub composites: Vec<CompositeInstance>,
    #[serde(default)]
    pub primitives: Vec<PrimitiveInstance>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// A composite port carries two connection lists, named relative to the
/// composite interior: `incoming` is where tuples come from, `outgoing` is
/// where they go. For an input port `incoming` faces the parent scope and
/// `outgoing` the interior; for an output port it is the other way around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositePortDescription {
    pub index: PortIndex,
    #[serde(default)]
    pub tuple_type_index: TupleTypeIndex,
    #[serde(default)]
    pub incoming_connections: Vec<PortConnection>,
    #[serde(default)]
    pub outgoing_connections: Vec<PortConnection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveInstance {
    pub index: OperatorIndex,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Operator kind as named by the toolkit, e.g. `relational::Filter`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub toolkit_index: ToolkitIndex,
    #[serde(default)]
    pub input_ports: Vec<PrimitiveInputPortDescription>,
    #[serde(default)]
    pub output_ports: Vec<PrimitiveOutputPortDescription>,
    /// Configuration parameters; values may contain submission-time
    /// intrinsic calls such as `getChannel()`.
    #[serde(default)]
    pub parameters: Vec<OperatorParameter>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub resources: ResourcesDescription,
    /// Present iff this instance is an Import pseudo-operator.
    #[serde(default)]
    pub import: Option<ImportDescription>,
    /// Present iff this instance is an Export pseudo-operator.
    #[serde(default)]
    pub export: Option<ExportDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveInputPortDescription {
    pub index: PortIndex,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub transport: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub is_mutable: bool,
    #[serde(default)]
    pub tuple_type_index: TupleTypeIndex,
    #[serde(default)]
    pub connections: Vec<PortConnection>,
    #[serde(default)]
    pub threaded_port: Option<ThreadedPortDescription>,
    #[serde(default)]
    pub is_control: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveOutputPortDescription {
    pub index: PortIndex,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub transport: String,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub is_mutable: bool,
    #[serde(default)]
    pub tuple_type_index: TupleTypeIndex,
    #[serde(default)]
    pub stream_name: String,
    #[serde(default)]
    pub viewable: Option<bool>,
    #[serde(default = "default_true")]
    pub single_threaded_on_output: bool,
    #[serde(default)]
    pub connections: Vec<PortConnection>,
}

/// One endpoint of a directed edge. A full edge is represented as a pair of
/// these: a forward entry on the source port and a reverse entry on the
/// destination port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortConnection {
    pub oper_index: OperatorIndex,
    pub port_index: PortIndex,
    pub port_kind: PortKind,
}

impl PortConnection {
    pub fn new(oper_index: OperatorIndex, port_index: PortIndex, port_kind: PortKind) -> Self {
        Self {
            oper_index,
            port_index,
            port_kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadedPortDescription {
    #[serde(default = "default_congestion_policy")]
    pub congestion_policy: String,
    #[serde(default)]
    pub queue_size: u64,
    #[serde(default = "default_true")]
    pub single_threaded_on_input: bool,
}

impl Default for ThreadedPortDescription {
    fn default() -> Self {
        Self {
            congestion_policy: default_congestion_policy(),
            queue_size: 0,
            single_threaded_on_input: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorParameter {
    pub name: String,
    pub value: String,
}

/// A generic key/value annotation. The planner interprets the tags listed in
/// [`annotations`] and forwards everything else verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub tag: String,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl Annotation {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourcesDescription {
    #[serde(default)]
    pub placement: String,
    #[serde(default)]
    pub colocation_constraint: bool,
    #[serde(default)]
    pub pool_location: Option<PoolLocationDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolLocationDescription {
    pub pool_index: HostpoolIndex,
    #[serde(default)]
    pub in_pool_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDescription {
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub application_scope: String,
    pub stream: ImportStreamDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportStreamDescription {
    NameBased {
        application_name: String,
        stream_name: String,
    },
    PropertyBased {
        subscription: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDescription {
    #[serde(default)]
    pub allow_filter: bool,
    pub stream: ExportStreamDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExportStreamDescription {
    NameBased { stream_name: String },
    PropertyBased { properties: Vec<StreamProperty> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProperty {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostpoolDescription {
    pub index: HostpoolIndex,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub membership: HostpoolMembership,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HostpoolMembership {
    #[default]
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelRegionDescription {
    pub index: RegionIndex,
    /// The composite operator instance that is the region's root.
    pub oper_index: OperatorIndex,
    /// Replication width; must be positive. Widths are statically known;
    /// a width depending on an enclosing region's channel is rejected.
    pub width: i64,
    #[serde(default)]
    pub replicate_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeDescription {
    pub index: PeIndex,
    #[serde(default)]
    pub operators: Vec<OperatorIndex>,
}

fn default_true() -> bool {
    true
}

fn default_congestion_policy() -> String {
    "wait".to_string()
}

//! The in-memory entity graph shared by every transform stage.
//!
//! `LogicalModel` owns every operator, hostpool, stream descriptor and
//! region in an index-keyed arena; entities refer to each other by index
//! only. Indices are allocated from a monotonically growing counter, so a
//! fresh index never collides with an existing one.

pub mod hostpool;
pub mod operator;
pub mod port;
pub mod stream;

use std::collections::HashMap;

use freshet_types::app::PortKind;
use freshet_types::ids::{
    ChannelIndex, HostpoolIndex, OperatorIndex, PeIndex, PortIndex, RegionIndex, SplitterIndex,
    NO_CHANNEL,
};
use freshet_types::indexmap::IndexMap;

use crate::consistent_cut::ConsistentCutRegions;
use crate::errors::TransformError;
use crate::model::hostpool::Hostpool;
use crate::model::operator::{CompositeOperator, ModelOperator, PrimitiveOperator};
use crate::model::port::ModelConnection;
use crate::model::stream::{ExportedStream, ImportedStream};

#[derive(Debug, Clone)]
pub struct ParallelRegion {
    pub index: RegionIndex,
    pub width: i64,
    /// The composite operator instance the region annotation names.
    pub oper_index: OperatorIndex,
    pub replicate_tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ParallelRegions {
    regions: IndexMap<RegionIndex, ParallelRegion>,
    by_operator: HashMap<OperatorIndex, RegionIndex>,
}

impl ParallelRegions {
    pub fn insert(&mut self, region: ParallelRegion) {
        self.by_operator.insert(region.oper_index, region.index);
        self.regions.insert(region.index, region);
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The region rooted at the given operator, if any. Only meaningful for
    /// the pre-replication roots; replicas carry the region on their base.
    pub fn region_of_operator(&self, oper_index: OperatorIndex) -> Option<RegionIndex> {
        self.by_operator.get(&oper_index).copied()
    }

    pub fn region(&self, index: RegionIndex) -> Result<&ParallelRegion, TransformError> {
        self.regions
            .get(&index)
            .ok_or(TransformError::MalformedInput(format!(
                "parallel region {index} is not defined"
            )))
    }
}

/// Records which physical splitter realizes a logical splitter operator:
/// the owning physical operator, its output port, and the per-port splitter
/// index. Assumes statically known widths; nested parallelism with widths
/// depending on an enclosing channel is rejected up front.
#[derive(Debug, Clone, Copy)]
pub struct SplitterMapEntry {
    pub oper_index: OperatorIndex,
    pub port_index: PortIndex,
    pub splitter_index: SplitterIndex,
}

#[derive(Debug)]
pub struct LogicalModel {
    pub app_name: String,
    operators: IndexMap<OperatorIndex, ModelOperator>,
    main_composite: OperatorIndex,
    max_primitive_oper_index: u64,
    hostpools: IndexMap<HostpoolIndex, Hostpool>,
    max_hostpool_index: u64,
    pub imported_streams: IndexMap<String, ImportedStream>,
    pub exported_streams: IndexMap<String, ExportedStream>,
    pub parallel_regions: ParallelRegions,
    pub cc_regions: ConsistentCutRegions,
    /// Primitives whose annotation marks them as the start of a cut region,
    /// in construction order; replication appends replicas.
    pub cc_start_operators: Vec<OperatorIndex>,
    /// PE assignment carried over from the fusion pass.
    pub pe_seeds: IndexMap<PeIndex, Vec<OperatorIndex>>,
    splitter_map: IndexMap<OperatorIndex, Vec<SplitterMapEntry>>,
}

impl LogicalModel {
    pub(crate) fn with_main(app_name: String, main_composite: OperatorIndex) -> Self {
        Self {
            app_name,
            operators: IndexMap::new(),
            main_composite,
            max_primitive_oper_index: 0,
            hostpools: IndexMap::new(),
            max_hostpool_index: 0,
            imported_streams: IndexMap::new(),
            exported_streams: IndexMap::new(),
            parallel_regions: ParallelRegions::default(),
            cc_regions: ConsistentCutRegions::default(),
            cc_start_operators: Vec::new(),
            pe_seeds: IndexMap::new(),
            splitter_map: IndexMap::new(),
        }
    }

    pub fn main_composite(&self) -> OperatorIndex {
        self.main_composite
    }

    pub fn operators(&self) -> &IndexMap<OperatorIndex, ModelOperator> {
        &self.operators
    }

    pub fn operator(&self, index: OperatorIndex) -> Result<&ModelOperator, TransformError> {
        self.operators
            .get(&index)
            .ok_or(TransformError::OperatorIndexOutOfRange(index))
    }

    pub fn operator_mut(
        &mut self,
        index: OperatorIndex,
    ) -> Result<&mut ModelOperator, TransformError> {
        self.operators
            .get_mut(&index)
            .ok_or(TransformError::OperatorIndexOutOfRange(index))
    }

    pub fn composite(&self, index: OperatorIndex) -> Result<&CompositeOperator, TransformError> {
        self.operator(index)?.as_composite().ok_or_else(|| {
            TransformError::MalformedInput(format!("operator {index} is not a composite"))
        })
    }

    pub fn composite_mut(
        &mut self,
        index: OperatorIndex,
    ) -> Result<&mut CompositeOperator, TransformError> {
        self.operator_mut(index)?.as_composite_mut().ok_or_else(|| {
            TransformError::MalformedInput(format!("operator {index} is not a composite"))
        })
    }

    pub fn primitive(&self, index: OperatorIndex) -> Result<&PrimitiveOperator, TransformError> {
        self.operator(index)?.as_primitive().ok_or_else(|| {
            TransformError::MalformedInput(format!("operator {index} is not a primitive"))
        })
    }

    pub fn primitive_mut(
        &mut self,
        index: OperatorIndex,
    ) -> Result<&mut PrimitiveOperator, TransformError> {
        self.operator_mut(index)?.as_primitive_mut().ok_or_else(|| {
            TransformError::MalformedInput(format!("operator {index} is not a primitive"))
        })
    }

    pub(crate) fn insert_operator(&mut self, op: ModelOperator) {
        let index = op.index();
        debug_assert!(!self.operators.contains_key(&index));
        self.bump_max_primitive_index(index);
        self.operators.insert(index, op);
    }

    /// Keeps the index counter at the high-water mark of every index seen.
    pub fn bump_max_primitive_index(&mut self, index: OperatorIndex) {
        if self.max_primitive_oper_index < index {
            self.max_primitive_oper_index = index;
        }
    }

    /// Hands out the next free operator index.
    pub fn allocate_operator_index(&mut self) -> OperatorIndex {
        self.max_primitive_oper_index += 1;
        self.max_primitive_oper_index
    }

    pub fn hostpools(&self) -> &IndexMap<HostpoolIndex, Hostpool> {
        &self.hostpools
    }

    pub fn hostpool(&self, index: HostpoolIndex) -> Result<&Hostpool, TransformError> {
        self.hostpools
            .get(&index)
            .ok_or(TransformError::HostpoolIndexOutOfRange(index))
    }

    pub(crate) fn insert_hostpool(&mut self, pool: Hostpool) {
        if self.max_hostpool_index < pool.index {
            self.max_hostpool_index = pool.index;
        }
        self.hostpools.insert(pool.index, pool);
    }

    /// Returns the derivative hostpool for one parallel channel, creating it
    /// on first use. The replica carries `intersect_tags` (the overlap of
    /// the pool's tags with the region's replicate tags).
    pub fn find_or_create_hostpool_replica(
        &mut self,
        pool_index: HostpoolIndex,
        region_index: RegionIndex,
        channel_index: ChannelIndex,
        intersect_tags: Vec<String>,
    ) -> Result<HostpoolIndex, TransformError> {
        let existing = self
            .hostpool(pool_index)?
            .replica_map
            .get(&(region_index, channel_index))
            .copied();
        if let Some(replica) = existing {
            if self.hostpool(replica)?.tags != intersect_tags {
                return Err(TransformError::HostpoolConflict {
                    pool_index,
                    region_index,
                    channel_index,
                });
            }
            return Ok(replica);
        }
        self.max_hostpool_index += 1;
        let replica_index = self.max_hostpool_index;
        let replica = self.hostpool(pool_index)?.make_replica(
            replica_index,
            region_index,
            channel_index,
            intersect_tags,
        );
        self.hostpools
            .get_mut(&pool_index)
            .expect("pool looked up above")
            .replica_map
            .insert((region_index, channel_index), replica_index);
        self.insert_hostpool(replica);
        Ok(replica_index)
    }

    pub fn find_imported_stream(&self, oper_name: &str) -> Option<&ImportedStream> {
        self.imported_streams.get(oper_name)
    }

    pub fn find_exported_stream(&self, oper_name: &str) -> Option<&ExportedStream> {
        self.exported_streams.get(oper_name)
    }

    pub fn splitter_map(&self) -> &IndexMap<OperatorIndex, Vec<SplitterMapEntry>> {
        &self.splitter_map
    }

    pub fn add_splitter_mapping(
        &mut self,
        splitter_oper_index: OperatorIndex,
        owning_oper_index: OperatorIndex,
        owning_port_index: PortIndex,
        physical_splitter_index: SplitterIndex,
    ) {
        self.splitter_map
            .entry(splitter_oper_index)
            .or_default()
            .push(SplitterMapEntry {
                oper_index: owning_oper_index,
                port_index: owning_port_index,
                splitter_index: physical_splitter_index,
            });
    }

    pub fn find_splitter_mapping(
        &self,
        splitter_oper_index: OperatorIndex,
        owning_oper_index: OperatorIndex,
        owning_port_index: PortIndex,
    ) -> Option<SplitterMapEntry> {
        self.splitter_map.get(&splitter_oper_index).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.oper_index == owning_oper_index && e.port_index == owning_port_index)
                .copied()
        })
    }

    /// Fully-qualified logical name: the owning-composite chain joined with
    /// dots, without channel subscripts.
    pub fn fully_qualified_logical_name(
        &self,
        index: OperatorIndex,
    ) -> Result<String, TransformError> {
        let mut segments = Vec::new();
        let mut cursor = Some(index);
        while let Some(idx) = cursor {
            let base = self.operator(idx)?.base();
            segments.push(base.name.clone());
            cursor = base.owning_composite;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    /// Fully-qualified name with parallel-channel subscripting applied to
    /// region-root segments.
    pub fn fully_qualified_name(&self, index: OperatorIndex) -> Result<String, TransformError> {
        let mut segments = Vec::new();
        let mut cursor = Some(index);
        while let Some(idx) = cursor {
            let base = self.operator(idx)?.base();
            segments.push(base.subscripted_name());
            cursor = base.owning_composite;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    /// The closest containing parallel region of an operator and the
    /// operator's channel within it. `None` outside any region.
    pub fn containing_parallel_region(
        &self,
        index: OperatorIndex,
    ) -> Result<Option<(RegionIndex, ChannelIndex)>, TransformError> {
        let channel = self.operator(index)?.base().channel_index;
        if channel == NO_CHANNEL {
            return Ok(None);
        }
        let mut cursor = Some(index);
        while let Some(idx) = cursor {
            let base = self.operator(idx)?.base();
            if let Some(region) = base.parallel_region {
                return Ok(Some((region, channel)));
            }
            cursor = base.owning_composite;
        }
        Err(TransformError::MalformedInput(format!(
            "operator {index} carries channel {channel} but no containing parallel region"
        )))
    }

    /// Width of the operator's closest containing region, −1 outside any.
    pub fn containing_max_channels(&self, index: OperatorIndex) -> Result<i64, TransformError> {
        match self.containing_parallel_region(index)? {
            Some((region, _)) => Ok(self.parallel_regions.region(region)?.width),
            None => Ok(-1),
        }
    }

    /// All operators of the subtree rooted at `root` (inclusive), parents
    /// before children, composites before primitives.
    pub fn collect_subtree(
        &self,
        root: OperatorIndex,
        out: &mut Vec<OperatorIndex>,
    ) -> Result<(), TransformError> {
        out.push(root);
        if let Some(comp) = self.operator(root)?.as_composite() {
            let composites = comp.composites.clone();
            let primitives = comp.primitives.clone();
            for child in composites {
                self.collect_subtree(child, out)?;
            }
            out.extend(primitives);
        }
        Ok(())
    }

    /// Rewrites, on the port identified by `at`, the reverse connection that
    /// points at the old endpoint so it points at the new one. Composite
    /// ports are searched on both sides. Returns whether a connection was
    /// rewritten.
    #[allow(clippy::too_many_arguments)]
    pub fn fix_reverse_connection(
        &mut self,
        at: ModelConnection,
        old_oper: OperatorIndex,
        old_port: PortIndex,
        old_kind: PortKind,
        new_oper: OperatorIndex,
        new_port: PortIndex,
        new_kind: PortKind,
    ) -> Result<bool, TransformError> {
        let oper_index = at.oper_index;
        let port_index = at.port_index;
        let missing = TransformError::PortIndexOutOfRange {
            oper_index,
            port_index,
        };
        let op = self.operator_mut(oper_index)?;
        let fixed = match op {
            ModelOperator::Primitive(p) => match at.port_kind {
                PortKind::Input => p
                    .input_ports
                    .get_mut(port_index as usize)
                    .ok_or(missing)?
                    .port
                    .fix_connection(old_oper, old_port, old_kind, new_oper, new_port, new_kind),
                PortKind::Output => p
                    .output_ports
                    .get_mut(port_index as usize)
                    .ok_or(missing)?
                    .port
                    .fix_connection(old_oper, old_port, old_kind, new_oper, new_port, new_kind),
            },
            ModelOperator::Import(p) => p
                .output_ports
                .get_mut(port_index as usize)
                .ok_or(missing)?
                .fix_connection(old_oper, old_port, old_kind, new_oper, new_port, new_kind),
            ModelOperator::Export(p) => p
                .input_ports
                .get_mut(port_index as usize)
                .ok_or(missing)?
                .fix_connection(old_oper, old_port, old_kind, new_oper, new_port, new_kind),
            ModelOperator::Splitter(p) => match at.port_kind {
                PortKind::Input => p.input_port.fix_connection(
                    old_oper, old_port, old_kind, new_oper, new_port, new_kind,
                ),
                PortKind::Output => p
                    .output_ports
                    .get_mut(port_index as usize)
                    .ok_or(missing)?
                    .fix_connection(old_oper, old_port, old_kind, new_oper, new_port, new_kind),
            },
            ModelOperator::Merger(p) => match at.port_kind {
                PortKind::Input => p
                    .input_ports
                    .get_mut(port_index as usize)
                    .ok_or(missing)?
                    .fix_connection(old_oper, old_port, old_kind, new_oper, new_port, new_kind),
                PortKind::Output => p.output_port.fix_connection(
                    old_oper, old_port, old_kind, new_oper, new_port, new_kind,
                ),
            },
            ModelOperator::Composite(c) => {
                let port = match at.port_kind {
                    PortKind::Input => c.input_ports.get_mut(port_index as usize),
                    PortKind::Output => c.output_ports.get_mut(port_index as usize),
                }
                .ok_or(missing)?;
                port.fix_incoming_connection(
                    old_oper, old_port, old_kind, new_oper, new_port, new_kind,
                ) || port.fix_outgoing_connection(
                    old_oper, old_port, old_kind, new_oper, new_port, new_kind,
                )
            }
        };
        Ok(fixed)
    }

    /// Checks the reverse-connection invariant over the whole model: every
    /// forward connection has exactly one matching entry on the port it
    /// points at. Transform stages must preserve this.
    pub fn check_connection_symmetry(&self) -> Result<(), TransformError> {
        for (&index, op) in &self.operators {
            for (port_index, kind, conns) in operator_connection_lists(op) {
                for conn in conns {
                    let matches = self.count_connections_back(*conn, index, port_index)?;
                    if matches != 1 {
                        return Err(TransformError::MalformedInput(format!(
                            "connection from operator {index} port {port_index:?} ({kind:?}) to \
                             operator {} port {} has {matches} reverse entries, expected 1",
                            conn.oper_index, conn.port_index
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn count_connections_back(
        &self,
        at: ModelConnection,
        back_oper: OperatorIndex,
        back_port: PortIndex,
    ) -> Result<usize, TransformError> {
        let op = self.operator(at.oper_index)?;
        let mut count = 0;
        for (port_index, list_kind, conns) in operator_connection_lists(op) {
            if port_index != at.port_index || list_kind != at.port_kind {
                continue;
            }
            count += conns
                .iter()
                .filter(|c| c.points_at(back_oper, back_port))
                .count();
        }
        Ok(count)
    }
}

/// Flattens an operator's connection lists as `(port_index, kind, list)`
/// tuples. Composite ports contribute both of their lists.
pub(crate) fn operator_connection_lists(
    op: &ModelOperator,
) -> Vec<(PortIndex, PortKind, &[ModelConnection])> {
    let mut lists: Vec<(PortIndex, PortKind, &[ModelConnection])> = Vec::new();
    match op {
        ModelOperator::Primitive(p) => {
            for port in &p.input_ports {
                lists.push((port.port.index, PortKind::Input, &port.port.connections));
            }
            for port in &p.output_ports {
                lists.push((port.port.index, PortKind::Output, &port.port.connections));
            }
        }
        ModelOperator::Import(p) => {
            for port in &p.output_ports {
                lists.push((port.index, PortKind::Output, &port.connections));
            }
        }
        ModelOperator::Export(p) => {
            for port in &p.input_ports {
                lists.push((port.index, PortKind::Input, &port.connections));
            }
        }
        ModelOperator::Splitter(p) => {
            lists.push((p.input_port.index, PortKind::Input, &p.input_port.connections));
            for port in &p.output_ports {
                lists.push((port.index, PortKind::Output, &port.connections));
            }
        }
        ModelOperator::Merger(p) => {
            for port in &p.input_ports {
                lists.push((port.index, PortKind::Input, &port.connections));
            }
            lists.push((
                p.output_port.index,
                PortKind::Output,
                &p.output_port.connections,
            ));
        }
        ModelOperator::Composite(c) => {
            for port in &c.input_ports {
                lists.push((port.index, PortKind::Input, &port.incoming));
                lists.push((port.index, PortKind::Input, &port.outgoing));
            }
            for port in &c.output_ports {
                lists.push((port.index, PortKind::Output, &port.incoming));
                lists.push((port.index, PortKind::Output, &port.outgoing));
            }
        }
    }
    lists
}

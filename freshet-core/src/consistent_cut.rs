//! Consistent-cut region discovery and merging.
//!
//! A region is the set of primitive operators reachable downstream from the
//! region's start operators, stopping at oblivious operators and at
//! end-of-region markers. Regions that share an operator are merged
//! transitively; merging is tracked in an explicit disjoint-set keyed by
//! region slot, with the smaller logical index winning as canonical.

use std::collections::{HashMap, HashSet};

use daggy::petgraph::graph::{DiGraph, NodeIndex};
use daggy::petgraph::Direction;
use freshet_types::app::{annotations, Annotation, PortKind};
use freshet_types::ids::{ChannelIndex, OperatorIndex, RegionIndex, NO_CHANNEL};
use freshet_types::indexmap::{IndexMap, IndexSet};
use freshet_types::log::warn;

use crate::errors::TransformError;
use crate::model::operator::ModelOperator;
use crate::model::port::ModelConnection;
use crate::model::{operator_connection_lists, LogicalModel};

/// One `consistentRegionEntry` annotation on a primitive operator.
#[derive(Debug, Clone, Copy)]
pub struct CCEntry {
    pub region_logical_index: RegionIndex,
    pub is_start_of_region: bool,
    pub is_end_of_region: bool,
}

/// Per-primitive consistent-cut annotation state. Operators without any
/// entry annotation are oblivious and never join a region.
#[derive(Debug, Clone, Default)]
pub struct CCInfo {
    pub entries: Vec<CCEntry>,
    pub is_oblivious: bool,
    /// Region slots this operator ended up in; reduced to the canonical
    /// slot once merging finishes.
    pub regions: Vec<usize>,
    /// The raw annotations, carried through to the physical description.
    pub key_values: Vec<Annotation>,
}

impl CCInfo {
    pub fn from_annotations(annots: &[Annotation]) -> Self {
        let mut info = CCInfo {
            is_oblivious: true,
            ..CCInfo::default()
        };
        for annot in annots {
            match annot.tag.as_str() {
                annotations::CONSISTENT_REGION_ENTRY => {
                    let region_logical_index = annot
                        .property(annotations::PROP_INDEX)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    let entry = CCEntry {
                        region_logical_index,
                        is_start_of_region: annot
                            .property(annotations::PROP_IS_START_OF_REGION)
                            .map(|v| v == "true")
                            .unwrap_or(false),
                        is_end_of_region: annot
                            .property(annotations::PROP_IS_END_OF_REGION)
                            .map(|v| v == "true")
                            .unwrap_or(false),
                    };
                    info.entries.push(entry);
                    info.is_oblivious = false;
                    info.key_values.push(annot.clone());
                }
                annotations::AUTONOMOUS => {
                    info.is_oblivious = true;
                    info.entries.clear();
                    info.key_values.push(annot.clone());
                }
                _ => {}
            }
        }
        info
    }

    pub fn is_start_of_region(&self) -> bool {
        self.entries.iter().any(|e| e.is_start_of_region)
    }

    pub fn is_end_of_region(&self) -> bool {
        self.entries.iter().any(|e| e.is_end_of_region)
    }
}

/// Region configuration taken from a composite-level `consistentRegion`
/// annotation.
#[derive(Debug, Clone, Copy)]
pub struct CCRegionTemplate {
    pub logical_index: RegionIndex,
    pub is_operator_driven: bool,
    pub drain_timeout: f64,
    pub reset_timeout: f64,
}

#[derive(Debug, Clone)]
pub struct CCRegion {
    /// Unique region index (slot order of creation).
    pub index: u64,
    pub logical_index: RegionIndex,
    pub channel_index: ChannelIndex,
    pub is_operator_driven: bool,
    pub drain_timeout: f64,
    pub reset_timeout: f64,
    pub operators: IndexSet<OperatorIndex>,
}

#[derive(Debug, Default)]
pub struct ConsistentCutRegions {
    templates: IndexMap<RegionIndex, CCRegionTemplate>,
    regions: Vec<CCRegion>,
    by_key: HashMap<(RegionIndex, ChannelIndex), usize>,
    /// Disjoint-set parents over region slots.
    parent: Vec<usize>,
    /// Unordered pairs already merged, by unique region index.
    merged_pairs: HashSet<(u64, u64)>,
}

impl ConsistentCutRegions {
    pub fn register_template(&mut self, template: CCRegionTemplate) {
        if let Some(existing) = self.templates.get(&template.logical_index) {
            if existing.drain_timeout != template.drain_timeout
                || existing.reset_timeout != template.reset_timeout
                || existing.is_operator_driven != template.is_operator_driven
            {
                warn!(
                    "[planner] conflicting consistent-region annotations for region {}; keeping the first",
                    template.logical_index
                );
            }
            return;
        }
        self.templates.insert(template.logical_index, template);
    }

    pub fn template(&self, logical_index: RegionIndex) -> Option<&CCRegionTemplate> {
        self.templates.get(&logical_index)
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[CCRegion] {
        &self.regions
    }

    pub fn region(&self, slot: usize) -> &CCRegion {
        &self.regions[slot]
    }

    /// The region for `(logical_index, channel_index)`, created on first use
    /// from the registered template. A region inside a parallel region
    /// exists once per channel.
    pub fn find_or_create(
        &mut self,
        logical_index: RegionIndex,
        channel_index: ChannelIndex,
    ) -> usize {
        if let Some(&slot) = self.by_key.get(&(logical_index, channel_index)) {
            return slot;
        }
        let template = self.templates.get(&logical_index).copied().unwrap_or_else(|| {
            warn!(
                "[planner] consistent-region entry references region {logical_index} with no \
                 region annotation; using defaults"
            );
            CCRegionTemplate {
                logical_index,
                is_operator_driven: false,
                drain_timeout: 180.0,
                reset_timeout: 180.0,
            }
        });
        let slot = self.regions.len();
        self.regions.push(CCRegion {
            index: slot as u64,
            logical_index,
            channel_index,
            is_operator_driven: template.is_operator_driven,
            drain_timeout: template.drain_timeout,
            reset_timeout: template.reset_timeout,
            operators: IndexSet::new(),
        });
        self.parent.push(slot);
        self.by_key.insert((logical_index, channel_index), slot);
        slot
    }

    /// Disjoint-set find with path compression.
    pub fn find(&mut self, slot: usize) -> usize {
        let mut root = slot;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cursor = slot;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    /// Read-only find, without compression.
    pub fn canonical_of(&self, slot: usize) -> usize {
        let mut root = slot;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        root
    }

    pub fn is_canonical(&self, slot: usize) -> bool {
        self.parent[slot] == slot
    }

    /// Merges the regions holding slots `a` and `b`. The canonical survivor
    /// is the one with the smaller logical index; the other's operator set
    /// is drained into it. Idempotent per unordered pair.
    pub fn merge(&mut self, a: usize, b: usize) {
        let pair = {
            let ia = self.regions[a].index;
            let ib = self.regions[b].index;
            (ia.min(ib), ia.max(ib))
        };
        if !self.merged_pairs.insert(pair) {
            return;
        }
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (winner, loser) = {
            let la = self.regions[ra].logical_index;
            let lb = self.regions[rb].logical_index;
            if la < lb || (la == lb && self.regions[ra].index <= self.regions[rb].index) {
                (ra, rb)
            } else {
                (rb, ra)
            }
        };
        if self.regions[winner].drain_timeout != self.regions[loser].drain_timeout
            || self.regions[winner].reset_timeout != self.regions[loser].reset_timeout
        {
            warn!(
                "[planner] merging consistent regions {} and {} with different timeouts; \
                 region {} wins",
                self.regions[winner].index, self.regions[loser].index, self.regions[winner].index
            );
        }
        let moved: Vec<OperatorIndex> = self.regions[loser].operators.drain(..).collect();
        self.regions[winner].operators.extend(moved);
        self.parent[loser] = winner;
    }
}

/// Discovers and merges the consistent-cut regions of the post-transform
/// model. Invoked once, after parallel expansion.
pub fn compute_cc_regions(model: &mut LogicalModel) -> Result<(), TransformError> {
    let graph = ReachabilityGraph::build(model)?;
    let mut cc = std::mem::take(&mut model.cc_regions);
    let mut multi_region: IndexSet<OperatorIndex> = IndexSet::new();

    // Seed one walk per start annotation per start operator.
    let starts = model.cc_start_operators.clone();
    for start in starts {
        let (channel, entries) = {
            let op = model.primitive(start)?;
            let channel = model
                .containing_parallel_region(start)?
                .map(|(_, ch)| ch)
                .unwrap_or(NO_CHANNEL);
            (channel, op.cc_info.entries.clone())
        };
        for entry in entries.iter().filter(|e| e.is_start_of_region) {
            let slot = cc.find_or_create(entry.region_logical_index, channel);
            walk_region(model, &graph, &mut cc, slot, start, &mut multi_region)?;
        }
    }

    // Transitive merging over multi-region operators.
    for &oper in &multi_region {
        let regions = model.primitive(oper)?.cc_info.regions.clone();
        for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                cc.merge(regions[i], regions[j]);
            }
        }
    }

    // Reduce every operator's region list to the canonical slot.
    let oper_indexes: Vec<OperatorIndex> = model
        .operators()
        .iter()
        .filter(|(_, op)| op.is_primitive())
        .map(|(&idx, _)| idx)
        .collect();
    for idx in oper_indexes {
        let op = model.primitive(idx)?;
        if op.cc_info.regions.is_empty() {
            if !op.cc_info.is_oblivious {
                warn!(
                    "[planner] operator {idx} carries consistent-region annotations but is not \
                     reachable from any region start"
                );
            }
            continue;
        }
        let canonical = cc.find(op.cc_info.regions[0]);
        model.primitive_mut(idx)?.cc_info.regions = vec![canonical];
    }

    model.cc_regions = cc;
    Ok(())
}

fn walk_region(
    model: &mut LogicalModel,
    graph: &ReachabilityGraph,
    cc: &mut ConsistentCutRegions,
    slot: usize,
    start: OperatorIndex,
    multi_region: &mut IndexSet<OperatorIndex>,
) -> Result<(), TransformError> {
    let mut visited: HashSet<OperatorIndex> = HashSet::new();
    let mut stack = vec![(start, true)];
    while let Some((oper, join)) = stack.pop() {
        if !visited.insert(oper) {
            continue;
        }
        let mut traverse_past = true;
        if join {
            let root = cc.find(slot);
            cc.regions[root].operators.insert(oper);
            let info = &mut model.primitive_mut(oper)?.cc_info;
            if !info.regions.contains(&slot) {
                info.regions.push(slot);
            }
            if info.regions.len() > 1 {
                multi_region.insert(oper);
            }
            traverse_past = !info.is_end_of_region();
        }
        if !traverse_past {
            continue;
        }
        for succ in graph.successors(oper) {
            match model.operator(succ)? {
                // Splitters and mergers never join a region; the walk passes
                // through them.
                ModelOperator::Splitter(_) | ModelOperator::Merger(_) => {
                    stack.push((succ, false));
                }
                ModelOperator::Import(_) | ModelOperator::Export(_) => {}
                ModelOperator::Primitive(p) => {
                    if !p.cc_info.is_oblivious {
                        stack.push((succ, true));
                    }
                }
                ModelOperator::Composite(_) => {
                    return Err(TransformError::MalformedInput(format!(
                        "composite operator {succ} appears in the reachability graph"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Operator-level connection graph over the primitive-family operators of
/// the post-transform model. Edges resolve through composite ports.
struct ReachabilityGraph {
    graph: DiGraph<OperatorIndex, ()>,
    nodes: HashMap<OperatorIndex, NodeIndex>,
}

impl ReachabilityGraph {
    fn build(model: &LogicalModel) -> Result<Self, TransformError> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for (&idx, op) in model.operators() {
            if !op.is_composite() {
                nodes.insert(idx, graph.add_node(idx));
            }
        }
        for (&idx, op) in model.operators() {
            if op.is_composite() {
                continue;
            }
            let from = nodes[&idx];
            for (_, kind, conns) in operator_connection_lists(op) {
                if kind != PortKind::Output {
                    continue;
                }
                for conn in conns {
                    let mut targets = Vec::new();
                    resolve_downstream(model, *conn, &mut targets)?;
                    for target in targets {
                        let to = *nodes.get(&target).ok_or(
                            TransformError::OperatorIndexOutOfRange(target),
                        )?;
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }
        Ok(Self { graph, nodes })
    }

    fn successors(&self, oper: OperatorIndex) -> Vec<OperatorIndex> {
        let Some(&node) = self.nodes.get(&oper) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect()
    }
}

/// Follows a connection downstream to the primitive-family operators it
/// reaches, passing through composite ports via their `outgoing` lists.
fn resolve_downstream(
    model: &LogicalModel,
    conn: ModelConnection,
    out: &mut Vec<OperatorIndex>,
) -> Result<(), TransformError> {
    match model.operator(conn.oper_index)? {
        ModelOperator::Composite(comp) => {
            let port = match conn.port_kind {
                PortKind::Input => comp.input_ports.get(conn.port_index as usize),
                PortKind::Output => comp.output_ports.get(conn.port_index as usize),
            }
            .ok_or(TransformError::PortIndexOutOfRange {
                oper_index: conn.oper_index,
                port_index: conn.port_index,
            })?;
            for next in &port.outgoing {
                resolve_downstream(model, *next, out)?;
            }
        }
        _ => out.push(conn.oper_index),
    }
    Ok(())
}

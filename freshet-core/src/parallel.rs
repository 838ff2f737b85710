//! Parallel-region expansion.
//!
//! Each parallel-annotated composite is expanded into `width` replicated
//! subgraphs. Regions are expanded innermost-first, so a region's children
//! are already replicated when the region itself is visited. Channel 0 is
//! the original subtree, re-tagged; channels 1..width are deep clones with
//! remapped indices. Splitters and mergers are injected in the parent scope
//! and all affected connections are rewired in forward/reverse pairs.

use std::collections::HashMap;

use freshet_types::app::PortKind;
use freshet_types::ids::{ChannelIndex, OperatorIndex, RegionIndex, NO_CHANNEL};
use freshet_types::log::debug;

use crate::errors::TransformError;
use crate::intrinsic;
use crate::model::operator::{MergerOperator, ModelOperator, OperatorBase, SplitterOperator};
use crate::model::port::{ModelConnection, PrimitivePort};
use crate::model::{LogicalModel, ParallelRegion};

/// Old-index to new-index mapping for one replicated channel.
#[derive(Debug, Default)]
pub struct ParallelTransformState {
    operator_index_map: HashMap<OperatorIndex, OperatorIndex>,
}

impl ParallelTransformState {
    pub fn insert(&mut self, old: OperatorIndex, new: OperatorIndex) {
        self.operator_index_map.insert(old, new);
    }

    /// `None` for operators outside the replicated subtree.
    pub fn mapped_operator_index(&self, index: OperatorIndex) -> Option<OperatorIndex> {
        self.operator_index_map.get(&index).copied()
    }
}

/// Expands every parallel region of the model, innermost regions first.
pub fn perform_parallel_transform(model: &mut LogicalModel) -> Result<(), TransformError> {
    if model.parallel_regions.is_empty() {
        return Ok(());
    }
    transform_composite(model, model.main_composite())
}

fn transform_composite(
    model: &mut LogicalModel,
    comp_index: OperatorIndex,
) -> Result<(), TransformError> {
    let children = model.composite(comp_index)?.composites.clone();
    for child in children {
        transform_composite(model, child)?;
    }
    if let Some(region_index) = model.parallel_regions.region_of_operator(comp_index) {
        replicate_region(model, comp_index, region_index)?;
    }
    Ok(())
}

fn replicate_region(
    model: &mut LogicalModel,
    comp_index: OperatorIndex,
    region_index: RegionIndex,
) -> Result<(), TransformError> {
    let region = model.parallel_regions.region(region_index)?.clone();
    let width = region.width;
    if width <= 0 {
        return Err(TransformError::InvalidParallelWidth {
            region_index,
            width,
        });
    }
    debug!(
        "[planner] expanding parallel region {region_index} at operator {comp_index} to width {width}"
    );

    let mut subtree = Vec::new();
    model.collect_subtree(comp_index, &mut subtree)?;

    // Channels 1..width clone the pristine original; the original itself is
    // re-tagged as channel 0 afterwards, so intrinsic call sites are still
    // present in every clone source.
    let mut channel_roots = vec![comp_index];
    for channel in 1..width {
        let root = replicate_channel(model, &subtree, region_index, channel, &region)?;
        channel_roots.push(root);
    }

    for &index in &subtree {
        let base = model.operator_mut(index)?.base_mut();
        if base.channel_index == NO_CHANNEL {
            base.channel_index = 0;
        }
    }
    model.operator_mut(comp_index)?.base_mut().parallel_region = Some(region_index);
    apply_channel_effects(model, &subtree, &region, 0)?;

    let parent = model
        .operator(comp_index)?
        .base()
        .owning_composite
        .ok_or_else(|| {
            TransformError::MalformedInput(format!(
                "parallel region {region_index} is rooted at the main composite"
            ))
        })?;

    inject_splitters(model, comp_index, parent, &region, &channel_roots)?;
    inject_mergers(model, comp_index, parent, &region, &channel_roots)?;
    Ok(())
}

/// Deep-clones the region subtree for one channel. Returns the clone of the
/// region root.
fn replicate_channel(
    model: &mut LogicalModel,
    subtree: &[OperatorIndex],
    region_index: RegionIndex,
    channel: ChannelIndex,
    region: &ParallelRegion,
) -> Result<OperatorIndex, TransformError> {
    let mut state = ParallelTransformState::default();
    for &old in subtree {
        let new = model.allocate_operator_index();
        state.insert(old, new);
    }

    let mut clone_indexes = Vec::with_capacity(subtree.len());
    for &old in subtree {
        let is_root = old == subtree[0];
        let mut clone = model.operator(old)?.clone();
        {
            let base = clone.base_mut();
            base.index = state
                .mapped_operator_index(old)
                .expect("every subtree operator is mapped");
            if let Some(owner) = base.owning_composite {
                if let Some(mapped) = state.mapped_operator_index(owner) {
                    base.owning_composite = Some(mapped);
                }
            }
            if base.channel_index == NO_CHANNEL {
                base.channel_index = channel;
            }
            base.is_replica = true;
            if is_root {
                base.parallel_region = Some(region_index);
            }
        }
        fix_clone_connections(&mut clone, &state);
        let new_index = clone.index();
        let is_cc_start = clone
            .cc_info()
            .map(|info| info.is_start_of_region())
            .unwrap_or(false);
        model.insert_operator(clone);
        if is_cc_start {
            model.cc_start_operators.push(new_index);
        }
        clone_indexes.push(new_index);
    }

    // The root replica joins its parent composite next to the original.
    let root_clone = clone_indexes[0];
    let parent = model
        .operator(root_clone)?
        .base()
        .owning_composite
        .expect("region root is never the main composite");
    model.composite_mut(parent)?.composites.push(root_clone);

    apply_channel_effects(model, &clone_indexes, region, channel)?;
    Ok(root_clone)
}

/// Rewrites every connection list of a cloned operator through the index
/// map. Connections to operators outside the subtree are left alone; the
/// splitter/merger injection re-targets those.
fn fix_clone_connections(clone: &mut ModelOperator, state: &ParallelTransformState) {
    match clone {
        ModelOperator::Composite(c) => {
            for child in &mut c.composites {
                if let Some(mapped) = state.mapped_operator_index(*child) {
                    *child = mapped;
                }
            }
            for child in &mut c.primitives {
                if let Some(mapped) = state.mapped_operator_index(*child) {
                    *child = mapped;
                }
            }
            for port in &mut c.input_ports {
                port.fix_incoming_connections(state);
                port.fix_outgoing_connections(state);
            }
            for port in &mut c.output_ports {
                port.fix_incoming_connections(state);
                port.fix_outgoing_connections(state);
            }
        }
        ModelOperator::Primitive(p) => {
            for port in &mut p.input_ports {
                port.port.fix_connections(state);
            }
            for port in &mut p.output_ports {
                port.port.fix_connections(state);
            }
            p.cc_info.regions.clear();
        }
        ModelOperator::Import(p) => {
            for port in &mut p.output_ports {
                port.fix_connections(state);
            }
        }
        ModelOperator::Export(p) => {
            for port in &mut p.input_ports {
                port.fix_connections(state);
            }
        }
        ModelOperator::Splitter(p) => {
            p.input_port.fix_connections(state);
            for port in &mut p.output_ports {
                port.fix_connections(state);
            }
        }
        ModelOperator::Merger(p) => {
            for port in &mut p.input_ports {
                port.fix_connections(state);
            }
            p.output_port.fix_connections(state);
        }
    }
}

/// Channel-dependent rewrites applied to one channel's operators: intrinsic
/// substitution in parameter expressions and hostpool replication.
fn apply_channel_effects(
    model: &mut LogicalModel,
    indexes: &[OperatorIndex],
    region: &ParallelRegion,
    channel: ChannelIndex,
) -> Result<(), TransformError> {
    for &index in indexes {
        if !model.operator(index)?.is_primitive() {
            continue;
        }

        let param_count = model.primitive(index)?.parameters.len();
        for p in 0..param_count {
            let value = model.primitive(index)?.parameters[p].value.clone();
            if intrinsic::mentions_intrinsic(&value) {
                let resolved = intrinsic::eval_intrinsic(&value, channel, region.width)?;
                model.primitive_mut(index)?.parameters[p].value = resolved;
            }
        }

        let pool_location = model.primitive(index)?.resources.pool_location.clone();
        if let Some(location) = pool_location {
            let pool = model.hostpool(location.pool_index)?;
            let intersect: Vec<String> = pool
                .tags
                .iter()
                .filter(|t| region.replicate_tags.contains(t))
                .cloned()
                .collect();
            if !intersect.is_empty() {
                let replica = model.find_or_create_hostpool_replica(
                    location.pool_index,
                    region.index,
                    channel,
                    intersect,
                )?;
                model
                    .primitive_mut(index)?
                    .resources
                    .pool_location
                    .as_mut()
                    .expect("pool location checked above")
                    .pool_index = replica;
            }
        }
    }
    Ok(())
}

/// Injects one splitter per region input port into the parent composite.
/// The splitter takes over the port's producers; output port `k` feeds
/// channel `k`'s copy of the port.
fn inject_splitters(
    model: &mut LogicalModel,
    comp_index: OperatorIndex,
    parent: OperatorIndex,
    region: &ParallelRegion,
    channel_roots: &[OperatorIndex],
) -> Result<(), TransformError> {
    let port_count = model.composite(comp_index)?.input_ports.len();
    for port_pos in 0..port_count {
        let (port_index, tuple_type_index, producers) = {
            let port = &model.composite(comp_index)?.input_ports[port_pos];
            (port.index, port.tuple_type_index, port.incoming.clone())
        };

        let splitter_index = model.allocate_operator_index();
        let name = format!(
            "{}_splitter_{}",
            model.operator(comp_index)?.base().name,
            port_index
        );

        let mut input_port = PrimitivePort::bare(0, tuple_type_index);
        input_port.connections = producers.clone();
        let mut output_ports = Vec::with_capacity(channel_roots.len());
        for (channel, &root) in channel_roots.iter().enumerate() {
            let mut port = PrimitivePort::bare(channel as u64, tuple_type_index);
            port.connections = vec![ModelConnection::new(root, port_index, PortKind::Input)];
            output_ports.push(port);
        }

        model.insert_operator(ModelOperator::Splitter(SplitterOperator {
            base: OperatorBase::new(name, splitter_index, Some(parent)),
            region_index: region.index,
            injecting_iport_index: port_index,
            input_port,
            output_ports,
        }));
        model.composite_mut(parent)?.primitives.push(splitter_index);

        // Re-target every producer at the splitter input.
        for producer in &producers {
            let fixed = model.fix_reverse_connection(
                *producer,
                comp_index,
                port_index,
                PortKind::Input,
                splitter_index,
                0,
                PortKind::Input,
            )?;
            if !fixed {
                return Err(TransformError::MalformedInput(format!(
                    "producer {}:{} has no connection back to parallel region input {}:{}",
                    producer.oper_index, producer.port_index, comp_index, port_index
                )));
            }
        }

        // Each channel's copy of the port is now fed by splitter output `k`.
        for (channel, &root) in channel_roots.iter().enumerate() {
            let port = model
                .composite_mut(root)?
                .input_ports
                .get_mut(port_pos)
                .ok_or(TransformError::PortIndexOutOfRange {
                    oper_index: root,
                    port_index,
                })?;
            port.incoming = vec![ModelConnection::new(
                splitter_index,
                channel as u64,
                PortKind::Output,
            )];
        }
    }
    Ok(())
}

/// Injects one merger per region output port into the parent composite.
/// Input port `k` drains channel `k`; the merger output takes over the
/// original consumers.
fn inject_mergers(
    model: &mut LogicalModel,
    comp_index: OperatorIndex,
    parent: OperatorIndex,
    region: &ParallelRegion,
    channel_roots: &[OperatorIndex],
) -> Result<(), TransformError> {
    let port_count = model.composite(comp_index)?.output_ports.len();
    for port_pos in 0..port_count {
        let (port_index, tuple_type_index, consumers) = {
            let port = &model.composite(comp_index)?.output_ports[port_pos];
            (port.index, port.tuple_type_index, port.outgoing.clone())
        };

        let merger_index = model.allocate_operator_index();
        let name = format!(
            "{}_merger_{}",
            model.operator(comp_index)?.base().name,
            port_index
        );

        let mut input_ports = Vec::with_capacity(channel_roots.len());
        for (channel, &root) in channel_roots.iter().enumerate() {
            let mut port = PrimitivePort::bare(channel as u64, tuple_type_index);
            port.connections = vec![ModelConnection::new(root, port_index, PortKind::Output)];
            input_ports.push(port);
        }
        let mut output_port = PrimitivePort::bare(0, tuple_type_index);
        output_port.connections = consumers.clone();

        model.insert_operator(ModelOperator::Merger(MergerOperator {
            base: OperatorBase::new(name, merger_index, Some(parent)),
            region_index: region.index,
            input_ports,
            output_port,
        }));
        model.composite_mut(parent)?.primitives.push(merger_index);

        for consumer in &consumers {
            let fixed = model.fix_reverse_connection(
                *consumer,
                comp_index,
                port_index,
                PortKind::Output,
                merger_index,
                0,
                PortKind::Output,
            )?;
            if !fixed {
                return Err(TransformError::MalformedInput(format!(
                    "consumer {}:{} has no connection back to parallel region output {}:{}",
                    consumer.oper_index, consumer.port_index, comp_index, port_index
                )));
            }
        }

        for (channel, &root) in channel_roots.iter().enumerate() {
            let port = model
                .composite_mut(root)?
                .output_ports
                .get_mut(port_pos)
                .ok_or(TransformError::PortIndexOutOfRange {
                    oper_index: root,
                    port_index,
                })?;
            port.outgoing = vec![ModelConnection::new(
                merger_index,
                channel as u64,
                PortKind::Input,
            )];
        }
    }
    Ok(())
}

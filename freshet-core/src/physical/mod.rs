//! Physical model construction.
//!
//! Consumes the post-transform logical model and produces the physical
//! application: PEs with concrete operators and ports, resolved
//! connections classified inter- vs intra-PE, splitters with parallel
//! channels, static PE-port topology and import/export stream records.
//!
//! Stage order matters and is preserved from the observed behavior of the
//! runtime this feeds: threaded ports are injected before PE-port
//! classification, and injected ports fed only by a colocated splitter are
//! removed after static connections are built.

pub mod connection;
pub mod operator;
pub mod pe;
pub mod splitter;

use std::collections::{HashMap, HashSet};

use freshet_types::app::{annotations, Annotation, PortKind, ThreadedPortDescription};
use freshet_types::ids::{
    ChannelIndex, OperatorIndex, PeIndex, PortIndex, RegionIndex, SplitterIndex, NO_CHANNEL,
};
use freshet_types::indexmap::IndexMap;
use freshet_types::log::info;
use freshet_types::physical::{
    PeInputPortDescription, PeOutputPortDescription, PhysicalAppDescription,
    PhysicalConnectionDescription, PhysicalExportedStreamDescription, PhysicalHostpoolDescription,
    PhysicalImportedStreamDescription, PhysicalInputPortDescription, PhysicalOperatorDescription,
    PhysicalOutputPortDescription, PhysicalParallelChannelDescription, PhysicalPeDescription,
    PhysicalPoolLocationDescription, PhysicalResourcesDescription, PhysicalSplitterDescription,
    StaticConnectionDescription,
};

use crate::errors::TransformError;
use crate::model::operator::ModelOperator;
use crate::model::LogicalModel;
use crate::physical::connection::{
    resolve_downstream, resolve_upstream, DownstreamLeaf, UpstreamLeaf,
};
use crate::physical::operator::{
    PhysicalConnection, PhysicalOperator, PhysicalOperatorInputPort, PhysicalOperatorOutputPort,
};
use crate::physical::pe::{
    PhysicalPE, PhysicalPeInputPort, PhysicalPeOutputPort, StaticConnection,
};
use crate::physical::splitter::{PhysicalParallelChannel, PhysicalSplitter};

#[derive(Debug)]
pub struct PhysicalModel {
    pub logical: LogicalModel,
    pub operators: IndexMap<OperatorIndex, PhysicalOperator>,
    pub pes: IndexMap<PeIndex, PhysicalPE>,
    next_pe_index: PeIndex,
}

impl PhysicalModel {
    pub fn build(logical: LogicalModel) -> Result<Self, TransformError> {
        let mut model = PhysicalModel {
            logical,
            operators: IndexMap::new(),
            pes: IndexMap::new(),
            next_pe_index: 0,
        };
        model.create_pes()?;
        model.create_operators()?;
        model.build_output_connections()?;
        model.build_input_connections()?;
        model.inject_threaded_ports();
        model.allocate_pe_ports()?;
        model.build_static_connections()?;
        model.remove_colocated_injected_threads();
        model.fix_single_threaded();
        info!(
            "[planner] physical model built: {} operators in {} PEs",
            model.operators.len(),
            model.pes.len()
        );
        Ok(model)
    }

    pub fn operator(&self, index: OperatorIndex) -> Result<&PhysicalOperator, TransformError> {
        self.operators
            .get(&index)
            .ok_or(TransformError::OperatorIndexOutOfRange(index))
    }

    pub fn pe(&self, index: PeIndex) -> Result<&PhysicalPE, TransformError> {
        self.pes
            .get(&index)
            .ok_or(TransformError::PeIndexOutOfRange(index))
    }

    pub fn owning_pe_of(&self, oper: OperatorIndex) -> Result<PeIndex, TransformError> {
        Ok(self.operator(oper)?.owning_pe)
    }

    pub fn is_inter_pe(&self, conn: &PhysicalConnection) -> Result<bool, TransformError> {
        Ok(self.owning_pe_of(conn.from_oper)? != self.owning_pe_of(conn.to_oper)?)
    }

    fn create_pes(&mut self) -> Result<(), TransformError> {
        for (&index, _) in &self.logical.pe_seeds {
            self.pes.insert(index, PhysicalPE::new(index));
            if index >= self.next_pe_index {
                self.next_pe_index = index + 1;
            }
        }
        Ok(())
    }

    /// One physical operator per surviving primitive model operator, placed
    /// on its PE. PEs are replicated per parallel channel; the original PE
    /// serves channel 0.
    fn create_operators(&mut self) -> Result<(), TransformError> {
        let indexes: Vec<OperatorIndex> = self
            .logical
            .operators()
            .iter()
            .filter(|(_, op)| op.is_primitive())
            .map(|(&idx, _)| idx)
            .collect();
        for index in indexes {
            let region = self.logical.containing_parallel_region(index)?;
            let max_channels = self.logical.containing_max_channels(index)?;
            let name = self.logical.fully_qualified_name(index)?;
            let logical_name = self.logical.fully_qualified_logical_name(index)?;

            let p = self.logical.primitive(index)?;
            let original_pe = p.original_pe;
            let channel_index = p.base.channel_index;
            let is_replica = p.base.is_replica;
            let logical_index = p.logical_index;
            let kind = p.kind.clone();
            let toolkit_index = p.toolkit_index;
            let parameters = p.parameters.clone();
            let annotations = p.annotations.clone();
            let resources = p.resources.clone();
            let cc_slot = p.cc_info.regions.first().copied();

            let owning_pe = match region {
                Some((region_index, channel)) => {
                    self.find_or_create_pe_replica(original_pe, region_index, channel)?
                }
                None => {
                    if !self.pes.contains_key(&original_pe) {
                        return Err(TransformError::PeIndexOutOfRange(original_pe));
                    }
                    original_pe
                }
            };

            let p = self.logical.primitive(index)?;
            let input_ports = p
                .input_ports
                .iter()
                .map(|port| PhysicalOperatorInputPort {
                    index: port.port.index,
                    name: port.port.name.clone(),
                    transport: port.port.transport.clone(),
                    encoding: port.port.encoding.clone(),
                    is_mutable: port.port.is_mutable,
                    is_control: port.is_control,
                    tuple_type_index: port.port.tuple_type_index,
                    threaded_port: port.threaded_port.clone(),
                    has_injected_thread: false,
                    imported_streams: Vec::new(),
                    connections: Vec::new(),
                    pe_port: None,
                })
                .collect();
            let output_ports = p
                .output_ports
                .iter()
                .map(|port| {
                    let stream_name = if channel_index == NO_CHANNEL {
                        port.logical_stream_name.clone()
                    } else {
                        format!("{}[{}]", port.logical_stream_name, channel_index)
                    };
                    PhysicalOperatorOutputPort {
                        index: port.port.index,
                        name: port.port.name.clone(),
                        transport: port.port.transport.clone(),
                        encoding: port.port.encoding.clone(),
                        is_mutable: port.port.is_mutable,
                        tuple_type_index: port.port.tuple_type_index,
                        stream_name,
                        logical_stream_name: port.logical_stream_name.clone(),
                        viewable: port.viewable,
                        single_threaded_on_output: port.single_threaded_on_output,
                        exported_stream: None,
                        splitters: Vec::new(),
                        connections: Vec::new(),
                        pe_port: None,
                        pe_port_by_channel: HashMap::new(),
                    }
                })
                .collect();

            let placement = resources.placement.clone();
            let colocation_constraint = resources.colocation_constraint;
            self.operators.insert(
                index,
                PhysicalOperator {
                    index,
                    logical_index,
                    name,
                    logical_name,
                    kind,
                    toolkit_index,
                    channel_index,
                    max_channels,
                    is_replica,
                    placement,
                    colocation_constraint,
                    resources,
                    parameters,
                    annotations,
                    owning_pe,
                    original_pe,
                    single_threaded_on_inputs: true,
                    single_threaded_on_outputs: true,
                    input_ports,
                    output_ports,
                    cc_slot,
                },
            );
            self.pes
                .get_mut(&owning_pe)
                .expect("owning PE created above")
                .operators
                .push(index);
        }
        Ok(())
    }

    fn find_or_create_pe_replica(
        &mut self,
        pe_index: PeIndex,
        region_index: RegionIndex,
        channel: ChannelIndex,
    ) -> Result<PeIndex, TransformError> {
        if !self.pes.contains_key(&pe_index) {
            return Err(TransformError::PeIndexOutOfRange(pe_index));
        }
        // The original PE is the channel-0 instance; operators fused with
        // the region but outside it stay with channel 0.
        if channel == 0 {
            return Ok(pe_index);
        }
        if let Some(&replica) = self.pes[&pe_index].replica_map.get(&channel) {
            return Ok(replica);
        }
        let new_index = self.next_pe_index;
        self.next_pe_index += 1;
        let replica = self.pes[&pe_index].replica(new_index, region_index, channel);
        self.pes
            .get_mut(&pe_index)
            .expect("checked above")
            .replica_map
            .insert(channel, new_index);
        self.pes.insert(new_index, replica);
        Ok(new_index)
    }

    /// Resolves every operator output port: direct connections, splitter
    /// materialization, and exported streams.
    fn build_output_connections(&mut self) -> Result<(), TransformError> {
        let oper_indexes: Vec<OperatorIndex> = self.operators.keys().copied().collect();
        for oper_index in oper_indexes {
            let port_count = self.operators[&oper_index].output_ports.len();
            for port_pos in 0..port_count {
                let port_index = self.operators[&oper_index].output_ports[port_pos].index;
                let model_conns = self.logical.primitive(oper_index)?.output_ports[port_pos]
                    .port
                    .connections
                    .clone();
                let mut leaves = Vec::new();
                for conn in model_conns {
                    resolve_downstream(&self.logical, conn, &mut leaves)?;
                }
                for leaf in leaves {
                    match leaf {
                        DownstreamLeaf::Primitive { oper, port } => {
                            self.operators[&oper_index].output_ports[port_pos]
                                .connections
                                .push(PhysicalConnection::direct(
                                    oper_index,
                                    port_index,
                                    oper,
                                    port,
                                    PortKind::Input,
                                ));
                        }
                        DownstreamLeaf::Splitter { oper } => {
                            self.materialize_splitter(oper_index, port_pos, oper)?;
                        }
                        DownstreamLeaf::Export { oper } => {
                            self.attach_exported_stream(oper_index, port_pos, oper)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Materializes a logical splitter as a physical splitter on the given
    /// output port, resolving each parallel channel's fan-out. Idempotent
    /// per (port, logical splitter). A channel that reaches a nested
    /// region's splitter materializes the nested splitter on the same port.
    fn materialize_splitter(
        &mut self,
        oper_index: OperatorIndex,
        port_pos: usize,
        splitter_oper: OperatorIndex,
    ) -> Result<SplitterIndex, TransformError> {
        let port_index = self.operators[&oper_index].output_ports[port_pos].index;
        if let Some(entry) =
            self.logical
                .find_splitter_mapping(splitter_oper, oper_index, port_index)
        {
            return Ok(entry.splitter_index);
        }

        let (region_index, iport_index, channel_conns) =
            match self.logical.operator(splitter_oper)? {
                ModelOperator::Splitter(s) => (
                    s.region_index,
                    s.injecting_iport_index,
                    s.output_ports
                        .iter()
                        .map(|p| p.connections.clone())
                        .collect::<Vec<_>>(),
                ),
                _ => {
                    return Err(TransformError::MalformedInput(format!(
                        "operator {splitter_oper} is not a splitter"
                    )))
                }
            };

        // Reserve the per-port index up front so nested materialization
        // observes it.
        let splitter_index = {
            let port = &mut self.operators[&oper_index].output_ports[port_pos];
            let index = port.splitters.len() as SplitterIndex;
            port.splitters.push(PhysicalSplitter {
                index,
                iport_index,
                region_index,
                logical_splitter: splitter_oper,
                channels: Vec::new(),
            });
            index
        };
        self.logical
            .add_splitter_mapping(splitter_oper, oper_index, port_index, splitter_index);

        let mut channels = Vec::with_capacity(channel_conns.len());
        for (channel, conns) in channel_conns.iter().enumerate() {
            let mut leaves = Vec::new();
            for &conn in conns {
                resolve_downstream(&self.logical, conn, &mut leaves)?;
            }
            let mut physical_conns = Vec::new();
            for leaf in leaves {
                match leaf {
                    DownstreamLeaf::Primitive { oper, port } => {
                        physical_conns.push(PhysicalConnection::through_splitter(
                            oper_index,
                            port_index,
                            oper,
                            port,
                            PortKind::Input,
                            splitter_index,
                            channel as u64,
                        ));
                    }
                    DownstreamLeaf::Splitter { oper } => {
                        self.materialize_splitter(oper_index, port_pos, oper)?;
                    }
                    DownstreamLeaf::Export { oper } => {
                        self.attach_exported_stream(oper_index, port_pos, oper)?;
                    }
                }
            }
            channels.push(PhysicalParallelChannel {
                index: channel as u64,
                connections: physical_conns,
                pe_port: None,
            });
        }

        let port = &mut self.operators[&oper_index].output_ports[port_pos];
        let slot = port
            .splitters
            .iter_mut()
            .find(|s| s.index == splitter_index)
            .expect("reserved above");
        slot.channels = channels;
        Ok(splitter_index)
    }

    fn attach_exported_stream(
        &mut self,
        oper_index: OperatorIndex,
        port_pos: usize,
        export_oper: OperatorIndex,
    ) -> Result<(), TransformError> {
        let stream = self.make_exported_stream(export_oper)?;
        let port = &mut self.operators[&oper_index].output_ports[port_pos];
        if port.exported_stream.is_some() {
            return Err(TransformError::StreamResolutionFailure {
                oper_index,
                port_index: port.index,
                count: 2,
            });
        }
        port.exported_stream = Some(stream);
        Ok(())
    }

    fn make_exported_stream(
        &self,
        export_oper: OperatorIndex,
    ) -> Result<PhysicalExportedStreamDescription, TransformError> {
        let stream_key = match self.logical.operator(export_oper)? {
            ModelOperator::Export(e) => e.stream_key.clone(),
            _ => {
                return Err(TransformError::MalformedInput(format!(
                    "operator {export_oper} is not an Export"
                )))
            }
        };
        let stream = self
            .logical
            .find_exported_stream(&stream_key)
            .ok_or_else(|| {
                TransformError::MalformedInput(format!(
                    "no exported stream registered for `{stream_key}`"
                ))
            })?
            .clone();
        let name = self.logical.fully_qualified_name(export_oper)?;
        let logical_name = self.logical.fully_qualified_logical_name(export_oper)?;
        let channel = self
            .logical
            .containing_parallel_region(export_oper)?
            .map(|(_, ch)| ch)
            .unwrap_or(NO_CHANNEL);
        let max_channels = self.logical.containing_max_channels(export_oper)?;
        stream.create_physical(name, logical_name, max_channels, channel)
    }

    fn make_imported_stream(
        &self,
        import_oper: OperatorIndex,
    ) -> Result<PhysicalImportedStreamDescription, TransformError> {
        let stream_key = match self.logical.operator(import_oper)? {
            ModelOperator::Import(i) => i.stream_key.clone(),
            _ => {
                return Err(TransformError::MalformedInput(format!(
                    "operator {import_oper} is not an Import"
                )))
            }
        };
        let stream = self
            .logical
            .find_imported_stream(&stream_key)
            .ok_or_else(|| {
                TransformError::MalformedInput(format!(
                    "no imported stream registered for `{stream_key}`"
                ))
            })?
            .clone();
        let name = self.logical.fully_qualified_name(import_oper)?;
        let logical_name = self.logical.fully_qualified_logical_name(import_oper)?;
        let channel = self
            .logical
            .containing_parallel_region(import_oper)?
            .map(|(_, ch)| ch)
            .unwrap_or(NO_CHANNEL);
        let max_channels = self.logical.containing_max_channels(import_oper)?;
        stream.create_physical(name, logical_name, max_channels, channel)
    }

    /// Resolves every operator input port upstream: direct and
    /// through-splitter connections, and imported streams.
    fn build_input_connections(&mut self) -> Result<(), TransformError> {
        let oper_indexes: Vec<OperatorIndex> = self.operators.keys().copied().collect();
        for oper_index in oper_indexes {
            let port_count = self.operators[&oper_index].input_ports.len();
            for port_pos in 0..port_count {
                let port_index = self.operators[&oper_index].input_ports[port_pos].index;
                let model_conns = self.logical.primitive(oper_index)?.input_ports[port_pos]
                    .port
                    .connections
                    .clone();
                let mut leaves = Vec::new();
                for conn in model_conns {
                    resolve_upstream(&self.logical, conn, &mut leaves)?;
                }
                for leaf in leaves {
                    match leaf {
                        UpstreamLeaf::Primitive { oper, port, via } => {
                            let conn = match via {
                                Some((splitter_oper, channel)) => {
                                    let entry = self
                                        .logical
                                        .find_splitter_mapping(splitter_oper, oper, port)
                                        .ok_or_else(|| {
                                            TransformError::MalformedInput(format!(
                                                "splitter {splitter_oper} was not materialized \
                                                 on operator {oper} port {port}"
                                            ))
                                        })?;
                                    PhysicalConnection::through_splitter(
                                        oper_index,
                                        port_index,
                                        oper,
                                        port,
                                        PortKind::Output,
                                        entry.splitter_index,
                                        channel,
                                    )
                                }
                                None => PhysicalConnection::direct(
                                    oper_index,
                                    port_index,
                                    oper,
                                    port,
                                    PortKind::Output,
                                ),
                            };
                            self.operators[&oper_index].input_ports[port_pos]
                                .connections
                                .push(conn);
                        }
                        UpstreamLeaf::Import { oper } => {
                            let stream = self.make_imported_stream(oper)?;
                            let port = &mut self.operators[&oper_index].input_ports[port_pos];
                            port.imported_streams.push(stream);
                            if port.imported_streams.len() > 1 {
                                return Err(TransformError::StreamResolutionFailure {
                                    oper_index,
                                    port_index,
                                    count: port.imported_streams.len(),
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Injects a default threaded port on every splitter-fed input port
    /// that does not declare one, so parallel channels can run
    /// concurrently. Happens before PE classification; colocated cases are
    /// removed again afterwards.
    fn inject_threaded_ports(&mut self) {
        for (_, op) in self.operators.iter_mut() {
            for port in &mut op.input_ports {
                if port.threaded_port.is_none()
                    && port.connections.iter().any(|c| c.splitter_index.is_some())
                {
                    port.threaded_port = Some(ThreadedPortDescription::default());
                    port.has_injected_thread = true;
                }
            }
        }
    }

    /// Allocates PE ports. An input port needs one when it receives from
    /// another PE or terminates an imported stream; an output port when it
    /// sends to another PE or carries an exported stream. Splitter channels
    /// get one PE output port per crossing channel, keyed by
    /// (splitter, channel).
    fn allocate_pe_ports(&mut self) -> Result<(), TransformError> {
        let oper_indexes: Vec<OperatorIndex> = self.operators.keys().copied().collect();
        for oper_index in oper_indexes {
            let owning_pe = self.operators[&oper_index].owning_pe;

            let input_count = self.operators[&oper_index].input_ports.len();
            for port_pos in 0..input_count {
                let needs = {
                    let port = &self.operators[&oper_index].input_ports[port_pos];
                    let mut inter = !port.imported_streams.is_empty();
                    for conn in &port.connections {
                        if self.is_inter_pe(conn)? {
                            inter = true;
                            break;
                        }
                    }
                    inter
                };
                if !needs {
                    continue;
                }
                let port = &self.operators[&oper_index].input_ports[port_pos];
                let pe_port = PhysicalPeInputPort {
                    index: 0,
                    tuple_type_index: port.tuple_type_index,
                    transport: port.transport.clone(),
                    encoding: port.encoding.clone(),
                    oper_index,
                    oper_port_index: port.index,
                    imported_streams: port.imported_streams.clone(),
                    static_connections: Vec::new(),
                };
                let pe = self.pes.get_mut(&owning_pe).expect("PE exists");
                let pe_port_index = pe.input_ports.len() as u64;
                let mut pe_port = pe_port;
                pe_port.index = pe_port_index;
                pe.input_ports.push(pe_port);
                self.operators[&oper_index].input_ports[port_pos].pe_port = Some(pe_port_index);
            }

            let output_count = self.operators[&oper_index].output_ports.len();
            for port_pos in 0..output_count {
                // Flat connections and the exported stream share one PE port.
                let needs_flat = {
                    let port = &self.operators[&oper_index].output_ports[port_pos];
                    let mut needs = port.exported_stream.is_some();
                    for conn in &port.connections {
                        if self.is_inter_pe(conn)? {
                            needs = true;
                            break;
                        }
                    }
                    needs
                };
                if needs_flat {
                    let port = &self.operators[&oper_index].output_ports[port_pos];
                    let exported: Vec<PhysicalExportedStreamDescription> =
                        port.exported_stream.iter().cloned().collect();
                    let template = PhysicalPeOutputPort {
                        index: 0,
                        tuple_type_index: port.tuple_type_index,
                        transport: port.transport.clone(),
                        encoding: port.encoding.clone(),
                        oper_index,
                        oper_port_index: port.index,
                        splitter_index: None,
                        channel_index: None,
                        exported_streams: exported,
                        static_connections: Vec::new(),
                    };
                    let pe = self.pes.get_mut(&owning_pe).expect("PE exists");
                    let pe_port_index = pe.output_ports.len() as u64;
                    let mut pe_port = template;
                    pe_port.index = pe_port_index;
                    pe.output_ports.push(pe_port);
                    self.operators[&oper_index].output_ports[port_pos].pe_port =
                        Some(pe_port_index);
                }

                // One PE port per splitter channel that crosses a PE
                // boundary.
                let splitter_count =
                    self.operators[&oper_index].output_ports[port_pos].splitters.len();
                for splitter_pos in 0..splitter_count {
                    let channel_count = self.operators[&oper_index].output_ports[port_pos]
                        .splitters[splitter_pos]
                        .channels
                        .len();
                    for channel_pos in 0..channel_count {
                        let (splitter_index, channel_index, needs) = {
                            let splitter = &self.operators[&oper_index].output_ports[port_pos]
                                .splitters[splitter_pos];
                            let channel = &splitter.channels[channel_pos];
                            let mut needs = false;
                            for conn in &channel.connections {
                                if self.is_inter_pe(conn)? {
                                    needs = true;
                                    break;
                                }
                            }
                            (splitter.index, channel.index, needs)
                        };
                        if !needs {
                            continue;
                        }
                        let port = &self.operators[&oper_index].output_ports[port_pos];
                        let template = PhysicalPeOutputPort {
                            index: 0,
                            tuple_type_index: port.tuple_type_index,
                            transport: port.transport.clone(),
                            encoding: port.encoding.clone(),
                            oper_index,
                            oper_port_index: port.index,
                            splitter_index: Some(splitter_index),
                            channel_index: Some(channel_index),
                            exported_streams: Vec::new(),
                            static_connections: Vec::new(),
                        };
                        let pe = self.pes.get_mut(&owning_pe).expect("PE exists");
                        let pe_port_index = pe.output_ports.len() as u64;
                        let mut pe_port = template;
                        pe_port.index = pe_port_index;
                        pe.output_ports.push(pe_port);
                        let port = &mut self.operators[&oper_index].output_ports[port_pos];
                        port.pe_port_by_channel
                            .insert((splitter_index, channel_index), pe_port_index);
                        port.splitters[splitter_pos].channels[channel_pos].pe_port =
                            Some(pe_port_index);
                    }
                }
            }
        }
        Ok(())
    }

    /// Derives static connections per PE port by walking that port's
    /// physical connections; each side derives its own records, so the
    /// incoming and outgoing lists match by construction.
    fn build_static_connections(&mut self) -> Result<(), TransformError> {
        let pe_indexes: Vec<PeIndex> = self.pes.keys().copied().collect();
        for pe_index in pe_indexes {
            let output_count = self.pes[&pe_index].output_ports.len();
            for port_pos in 0..output_count {
                let (oper_index, oper_port_index, splitter, channel) = {
                    let port = &self.pes[&pe_index].output_ports[port_pos];
                    (
                        port.oper_index,
                        port.oper_port_index,
                        port.splitter_index,
                        port.channel_index,
                    )
                };
                let conns = self.output_port_connections(oper_index, oper_port_index, splitter, channel)?;
                let mut statics = Vec::new();
                for conn in conns {
                    if !self.is_inter_pe(&conn)? {
                        continue;
                    }
                    let to_pe = self.owning_pe_of(conn.to_oper)?;
                    let to_port = self
                        .operator(conn.to_oper)?
                        .input_ports
                        .iter()
                        .find(|p| p.index == conn.to_port)
                        .and_then(|p| p.pe_port)
                        .ok_or_else(|| {
                            TransformError::MalformedInput(format!(
                                "inter-PE connection to operator {} port {} has no PE input port",
                                conn.to_oper, conn.to_port
                            ))
                        })?;
                    statics.push(StaticConnection {
                        pe_index: to_pe,
                        pe_port_index: to_port,
                        port_kind: PortKind::Input,
                    });
                }
                self.pes.get_mut(&pe_index).expect("PE exists").output_ports[port_pos]
                    .static_connections = statics;
            }

            let input_count = self.pes[&pe_index].input_ports.len();
            for port_pos in 0..input_count {
                let (oper_index, oper_port_index) = {
                    let port = &self.pes[&pe_index].input_ports[port_pos];
                    (port.oper_index, port.oper_port_index)
                };
                let conns: Vec<PhysicalConnection> = self
                    .operator(oper_index)?
                    .input_ports
                    .iter()
                    .find(|p| p.index == oper_port_index)
                    .map(|p| p.connections.clone())
                    .unwrap_or_default();
                let mut statics = Vec::new();
                for conn in conns {
                    if !self.is_inter_pe(&conn)? {
                        continue;
                    }
                    let from_pe = self.owning_pe_of(conn.to_oper)?;
                    let producer = self.operator(conn.to_oper)?;
                    let producer_port = producer
                        .output_ports
                        .iter()
                        .find(|p| p.index == conn.to_port)
                        .ok_or(TransformError::PortIndexOutOfRange {
                            oper_index: conn.to_oper,
                            port_index: conn.to_port,
                        })?;
                    let from_port = match (conn.splitter_index, conn.channel_index) {
                        (Some(s), Some(c)) => producer_port.pe_port_by_channel.get(&(s, c)).copied(),
                        _ => producer_port.pe_port,
                    }
                    .ok_or_else(|| {
                        TransformError::MalformedInput(format!(
                            "inter-PE connection from operator {} port {} has no PE output port",
                            conn.to_oper, conn.to_port
                        ))
                    })?;
                    statics.push(StaticConnection {
                        pe_index: from_pe,
                        pe_port_index: from_port,
                        port_kind: PortKind::Output,
                    });
                }
                self.pes.get_mut(&pe_index).expect("PE exists").input_ports[port_pos]
                    .static_connections = statics;
            }
        }
        Ok(())
    }

    /// The physical connections a PE output port stands for: one splitter
    /// channel's fan-out, or the port's direct connections.
    fn output_port_connections(
        &self,
        oper_index: OperatorIndex,
        oper_port_index: PortIndex,
        splitter: Option<SplitterIndex>,
        channel: Option<u64>,
    ) -> Result<Vec<PhysicalConnection>, TransformError> {
        let port = self
            .operator(oper_index)?
            .output_ports
            .iter()
            .find(|p| p.index == oper_port_index)
            .ok_or(TransformError::PortIndexOutOfRange {
                oper_index,
                port_index: oper_port_index,
            })?;
        match (splitter, channel) {
            (Some(s), Some(c)) => Ok(port
                .splitters
                .iter()
                .find(|sp| sp.index == s)
                .map(|sp| {
                    sp.channels
                        .iter()
                        .find(|ch| ch.index == c)
                        .map(|ch| ch.connections.clone())
                        .unwrap_or_default()
                })
                .unwrap_or_default()),
            _ => Ok(port.connections.clone()),
        }
    }

    /// Late removal: an injected threaded port whose feeds are exclusively
    /// splitter channels from the same PE decouples nothing and is dropped.
    fn remove_colocated_injected_threads(&mut self) {
        let oper_indexes: Vec<OperatorIndex> = self.operators.keys().copied().collect();
        for oper_index in oper_indexes {
            let port_count = self.operators[&oper_index].input_ports.len();
            for port_pos in 0..port_count {
                let removable = {
                    let op = &self.operators[&oper_index];
                    let port = &op.input_ports[port_pos];
                    port.has_injected_thread
                        && !port.connections.is_empty()
                        && port.connections.iter().all(|c| {
                            c.splitter_index.is_some()
                                && self
                                    .operators
                                    .get(&c.to_oper)
                                    .map(|p| p.owning_pe == op.owning_pe)
                                    .unwrap_or(false)
                        })
                };
                if removable {
                    let port = &mut self.operators[&oper_index].input_ports[port_pos];
                    port.threaded_port = None;
                    port.has_injected_thread = false;
                }
            }
        }
    }

    /// Clears `single_threaded_on_output` on every operator that can
    /// observe more than one upstream thread. Threaded ports, inter-PE
    /// boundaries and source operators are the definitive thread sources.
    fn fix_single_threaded(&mut self) {
        let oper_indexes: Vec<OperatorIndex> = self.operators.keys().copied().collect();
        let mut memo: HashMap<OperatorIndex, u64> = HashMap::new();
        for &oper_index in &oper_indexes {
            let mut visiting = HashSet::new();
            self.observable_upstream_new_threads(oper_index, &mut memo, &mut visiting);
        }
        for oper_index in oper_indexes {
            let threads = memo[&oper_index];
            let op = self.operators.get_mut(&oper_index).expect("operator exists");
            op.single_threaded_on_inputs = threads <= 1;
            if threads > 1 {
                op.single_threaded_on_outputs = false;
                for port in &mut op.output_ports {
                    port.single_threaded_on_output = false;
                }
            }
        }
    }

    fn observable_upstream_new_threads(
        &self,
        oper_index: OperatorIndex,
        memo: &mut HashMap<OperatorIndex, u64>,
        visiting: &mut HashSet<OperatorIndex>,
    ) -> u64 {
        if let Some(&count) = memo.get(&oper_index) {
            return count;
        }
        if !visiting.insert(oper_index) {
            return 0;
        }
        let op = &self.operators[&oper_index];
        let mut count = 0;
        if op.input_ports.is_empty() {
            count = 1;
        } else {
            for port in &op.input_ports {
                if port.threaded_port.is_some() {
                    count += 1;
                    continue;
                }
                if !port.imported_streams.is_empty() {
                    count += 1;
                }
                for conn in &port.connections {
                    let remote_pe = self
                        .operators
                        .get(&conn.to_oper)
                        .map(|p| p.owning_pe)
                        .unwrap_or(op.owning_pe);
                    if remote_pe != op.owning_pe {
                        count += 1;
                    } else {
                        count += self.observable_upstream_new_threads(conn.to_oper, memo, visiting);
                    }
                }
            }
        }
        visiting.remove(&oper_index);
        memo.insert(oper_index, count);
        count
    }

    /// Encodes the physical model as the output description tree. All
    /// sections are emitted in ascending index order, so identical inputs
    /// produce byte-identical outputs.
    pub fn encode(&self) -> Result<PhysicalAppDescription, TransformError> {
        let mut hostpools: Vec<PhysicalHostpoolDescription> = self
            .logical
            .hostpools()
            .values()
            .map(|pool| PhysicalHostpoolDescription {
                index: pool.index,
                name: pool.name.clone(),
                size: pool.size,
                membership: pool.membership,
                hosts: pool.hosts.clone(),
                tags: pool.tags.clone(),
            })
            .collect();
        hostpools.sort_by_key(|p| p.index);

        let mut operators = Vec::with_capacity(self.operators.len());
        let mut oper_indexes: Vec<OperatorIndex> = self.operators.keys().copied().collect();
        oper_indexes.sort_unstable();
        for index in oper_indexes {
            operators.push(self.encode_operator(&self.operators[&index])?);
        }

        let mut pes = Vec::with_capacity(self.pes.len());
        let mut pe_indexes: Vec<PeIndex> = self.pes.keys().copied().collect();
        pe_indexes.sort_unstable();
        for index in pe_indexes {
            pes.push(self.encode_pe(&self.pes[&index])?);
        }

        Ok(PhysicalAppDescription {
            name: self.logical.app_name.clone(),
            hostpools,
            operators,
            pes,
        })
    }

    fn encode_operator(
        &self,
        op: &PhysicalOperator,
    ) -> Result<PhysicalOperatorDescription, TransformError> {
        let mut annots = op.annotations.clone();
        if let Some(slot) = op.cc_slot {
            let region = self.logical.cc_regions.region(slot);
            let mut properties = freshet_types::indexmap::IndexMap::new();
            properties.insert(annotations::PROP_INDEX.to_string(), region.index.to_string());
            properties.insert(
                "logicalIndex".to_string(),
                region.logical_index.to_string(),
            );
            properties.insert(
                annotations::PROP_DRAIN_TIMEOUT.to_string(),
                region.drain_timeout.to_string(),
            );
            properties.insert(
                annotations::PROP_RESET_TIMEOUT.to_string(),
                region.reset_timeout.to_string(),
            );
            properties.insert(
                annotations::PROP_TRIGGER.to_string(),
                if region.is_operator_driven {
                    annotations::TRIGGER_OPERATOR_DRIVEN.to_string()
                } else {
                    "periodic".to_string()
                },
            );
            annots.push(Annotation {
                tag: annotations::CONSISTENT_REGION.to_string(),
                properties,
            });
        }

        let input_ports = op
            .input_ports
            .iter()
            .map(|port| {
                let (inter, intra) = self.split_connections(&port.connections)?;
                Ok(PhysicalInputPortDescription {
                    index: port.index,
                    name: port.name.clone(),
                    transport: port.transport.clone(),
                    encoding: port.encoding.clone(),
                    is_mutable: port.is_mutable,
                    is_control: port.is_control,
                    tuple_type_index: port.tuple_type_index,
                    threaded_port: port.threaded_port.clone(),
                    pe_port_index: port.pe_port,
                    imported_streams: port.imported_streams.clone(),
                    inter_pe_connections: inter,
                    intra_pe_connections: intra,
                })
            })
            .collect::<Result<Vec<_>, TransformError>>()?;

        let output_ports = op
            .output_ports
            .iter()
            .map(|port| {
                let (inter, intra) = self.split_connections(&port.connections)?;
                let splitters = port
                    .splitters
                    .iter()
                    .map(|s| PhysicalSplitterDescription {
                        index: s.index,
                        iport_index: s.iport_index,
                        region_index: s.region_index,
                        channels: s
                            .channels
                            .iter()
                            .map(|c| PhysicalParallelChannelDescription {
                                index: c.index,
                                pe_port_index: c.pe_port,
                                connections: c
                                    .connections
                                    .iter()
                                    .map(encode_connection)
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect();
                Ok(PhysicalOutputPortDescription {
                    index: port.index,
                    name: port.name.clone(),
                    transport: port.transport.clone(),
                    encoding: port.encoding.clone(),
                    is_mutable: port.is_mutable,
                    tuple_type_index: port.tuple_type_index,
                    stream_name: port.stream_name.clone(),
                    logical_stream_name: port.logical_stream_name.clone(),
                    viewable: port.viewable,
                    single_threaded_on_output: port.single_threaded_on_output,
                    pe_port_index: port.pe_port,
                    exported_stream: port.exported_stream.clone(),
                    splitters,
                    inter_pe_connections: inter,
                    intra_pe_connections: intra,
                })
            })
            .collect::<Result<Vec<_>, TransformError>>()?;

        Ok(PhysicalOperatorDescription {
            index: op.index,
            logical_index: op.logical_index,
            name: op.name.clone(),
            logical_name: op.logical_name.clone(),
            kind: op.kind.clone(),
            toolkit_index: op.toolkit_index,
            channel_index: op.channel_index,
            max_channels: op.max_channels,
            is_replica: op.is_replica,
            pe_index: op.owning_pe,
            single_threaded_on_inputs: op.single_threaded_on_inputs,
            single_threaded_on_outputs: op.single_threaded_on_outputs,
            resources: PhysicalResourcesDescription {
                placement: op.placement.clone(),
                colocation_constraint: op.colocation_constraint,
                pool_location: op.resources.pool_location.as_ref().map(|loc| {
                    PhysicalPoolLocationDescription {
                        pool_index: loc.pool_index,
                        in_pool_index: loc.in_pool_index,
                    }
                }),
            },
            parameters: op.parameters.clone(),
            annotations: annots,
            input_ports,
            output_ports,
        })
    }

    fn split_connections(
        &self,
        conns: &[PhysicalConnection],
    ) -> Result<
        (
            Vec<PhysicalConnectionDescription>,
            Vec<PhysicalConnectionDescription>,
        ),
        TransformError,
    > {
        let mut inter = Vec::new();
        let mut intra = Vec::new();
        for conn in conns {
            let desc = encode_connection(conn);
            if self.is_inter_pe(conn)? {
                inter.push(desc);
            } else {
                intra.push(desc);
            }
        }
        Ok((inter, intra))
    }

    fn encode_pe(&self, pe: &PhysicalPE) -> Result<PhysicalPeDescription, TransformError> {
        let input_ports = pe
            .input_ports
            .iter()
            .map(|port| PeInputPortDescription {
                index: port.index,
                tuple_type_index: port.tuple_type_index,
                transport: port.transport.clone(),
                encoding: port.encoding.clone(),
                oper_index: port.oper_index,
                oper_port_index: port.oper_port_index,
                imported_streams: port.imported_streams.clone(),
                static_connections: port
                    .static_connections
                    .iter()
                    .map(encode_static_connection)
                    .collect(),
            })
            .collect();
        let output_ports = pe
            .output_ports
            .iter()
            .map(|port| {
                let single_threaded = self
                    .operator(port.oper_index)
                    .ok()
                    .and_then(|op| {
                        op.output_ports
                            .iter()
                            .find(|p| p.index == port.oper_port_index)
                            .map(|p| p.single_threaded_on_output)
                    })
                    .unwrap_or(true);
                PeOutputPortDescription {
                    index: port.index,
                    tuple_type_index: port.tuple_type_index,
                    transport: port.transport.clone(),
                    encoding: port.encoding.clone(),
                    oper_index: port.oper_index,
                    oper_port_index: port.oper_port_index,
                    single_threaded_on_output: single_threaded,
                    splitter_index: port.splitter_index,
                    channel_index: port.channel_index,
                    exported_streams: port.exported_streams.clone(),
                    static_connections: port
                        .static_connections
                        .iter()
                        .map(encode_static_connection)
                        .collect(),
                }
            })
            .collect();
        Ok(PhysicalPeDescription {
            index: pe.index,
            logical_index: pe.logical_index,
            channel_index: pe.channel_index,
            operators: pe.operators.clone(),
            input_ports,
            output_ports,
        })
    }
}

fn encode_connection(conn: &PhysicalConnection) -> PhysicalConnectionDescription {
    PhysicalConnectionDescription {
        oper_index: conn.to_oper,
        port_index: conn.to_port,
        port_kind: conn.port_kind,
        splitter_index: conn.splitter_index,
        channel_index: conn.channel_index,
    }
}

fn encode_static_connection(conn: &StaticConnection) -> StaticConnectionDescription {
    StaticConnectionDescription {
        pe_index: conn.pe_index,
        pe_port_index: conn.pe_port_index,
        port_kind: conn.port_kind,
    }
}

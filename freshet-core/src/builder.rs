//! Logical model construction.
//!
//! Walks the application description depth-first, creating operators, ports
//! and forward/reverse connection pairs, and registering name maps and
//! annotations. Malformed input (duplicate or dangling indices, missing PE
//! assignment) is fatal.

use std::collections::HashMap;

use freshet_types::app::{
    annotations, AppDescription, CompositeInstance, CompositePortDescription, PrimitiveInstance,
};
use freshet_types::ids::{OperatorIndex, PeIndex};
use freshet_types::log::info;

use crate::consistent_cut::{CCInfo, CCRegionTemplate};
use crate::errors::TransformError;
use crate::model::operator::{
    CompositeOperator, ExportOperator, ImportOperator, ModelOperator, OperatorBase,
    PrimitiveOperator,
};
use crate::model::port::{CompositePort, PrimitiveInputPort, PrimitiveOutputPort, PrimitivePort};
use crate::model::stream::{ExportedStream, ImportedStream};
use crate::model::{LogicalModel, ParallelRegion};
use crate::TransformOptions;

pub fn build_logical_model(
    app: &AppDescription,
    options: &TransformOptions,
) -> Result<LogicalModel, TransformError> {
    if let Some(expected) = &options.main_composite {
        if *expected != app.main_composite.name {
            return Err(TransformError::MalformedInput(format!(
                "main composite is `{}`, expected `{expected}`",
                app.main_composite.name
            )));
        }
    }

    let mut model = LogicalModel::with_main(app.name.clone(), app.main_composite.index);

    for pool in &app.hostpools {
        if model.hostpools().contains_key(&pool.index) {
            return Err(TransformError::MalformedInput(format!(
                "duplicate hostpool index {}",
                pool.index
            )));
        }
        model.insert_hostpool(crate::model::hostpool::Hostpool::from_description(pool));
    }

    for region in &app.parallel_regions {
        if region.width <= 0 {
            return Err(TransformError::InvalidParallelWidth {
                region_index: region.index,
                width: region.width,
            });
        }
        model.parallel_regions.insert(ParallelRegion {
            index: region.index,
            width: region.width,
            oper_index: region.oper_index,
            replicate_tags: region.replicate_tags.clone(),
        });
    }

    let mut pe_map: HashMap<OperatorIndex, PeIndex> = HashMap::new();
    for pe in &app.pes {
        if model.pe_seeds.contains_key(&pe.index) {
            return Err(TransformError::MalformedInput(format!(
                "duplicate PE index {}",
                pe.index
            )));
        }
        for &oper in &pe.operators {
            if pe_map.insert(oper, pe.index).is_some() {
                return Err(TransformError::MalformedInput(format!(
                    "operator {oper} is assigned to more than one PE"
                )));
            }
        }
        model.pe_seeds.insert(pe.index, pe.operators.clone());
    }

    build_composite(&mut model, &app.main_composite, None, &pe_map)?;

    // Every parallel region must name a composite that exists.
    for region in &app.parallel_regions {
        model.composite(region.oper_index).map_err(|_| {
            TransformError::MalformedInput(format!(
                "parallel region {} names operator {} which is not a composite in the model",
                region.index, region.oper_index
            ))
        })?;
    }

    model.check_connection_symmetry()?;
    info!(
        "[planner] logical model built: {} operators, {} hostpools, {} parallel regions",
        model.operators().len(),
        model.hostpools().len(),
        app.parallel_regions.len()
    );
    Ok(model)
}

fn build_composite(
    model: &mut LogicalModel,
    desc: &CompositeInstance,
    owning: Option<OperatorIndex>,
    pe_map: &HashMap<OperatorIndex, PeIndex>,
) -> Result<OperatorIndex, TransformError> {
    ensure_fresh_index(model, desc.index)?;

    for annot in &desc.annotations {
        if annot.tag == annotations::CONSISTENT_REGION {
            model.cc_regions.register_template(parse_region_template(annot));
        }
    }

    let composite = CompositeOperator {
        base: OperatorBase::new(desc.name.clone(), desc.index, owning),
        description: desc.description.clone(),
        input_ports: desc.input_ports.iter().map(composite_port).collect(),
        output_ports: desc.output_ports.iter().map(composite_port).collect(),
        composites: Vec::new(),
        primitives: Vec::new(),
        annotations: desc.annotations.clone(),
    };
    model.insert_operator(ModelOperator::Composite(composite));

    let mut child_composites = Vec::with_capacity(desc.composites.len());
    for child in &desc.composites {
        child_composites.push(build_composite(model, child, Some(desc.index), pe_map)?);
    }
    let mut child_primitives = Vec::with_capacity(desc.primitives.len());
    for child in &desc.primitives {
        child_primitives.push(build_primitive(model, child, desc.index, pe_map)?);
    }

    let composite = model.composite_mut(desc.index)?;
    composite.composites = child_composites;
    composite.primitives = child_primitives;
    Ok(desc.index)
}

fn build_primitive(
    model: &mut LogicalModel,
    desc: &PrimitiveInstance,
    owning: OperatorIndex,
    pe_map: &HashMap<OperatorIndex, PeIndex>,
) -> Result<OperatorIndex, TransformError> {
    ensure_fresh_index(model, desc.index)?;
    if desc.import.is_some() && desc.export.is_some() {
        return Err(TransformError::MalformedInput(format!(
            "operator {} is declared as both Import and Export",
            desc.index
        )));
    }

    let logical_name = format!(
        "{}.{}",
        model.fully_qualified_logical_name(owning)?,
        desc.name
    );
    let base = OperatorBase::new(desc.name.clone(), desc.index, Some(owning));

    if let Some(import) = &desc.import {
        let output_ports: Vec<PrimitivePort> =
            desc.output_ports.iter().map(output_port_bare).collect();
        let (transport, encoding, tuple_type_index) = output_ports
            .first()
            .map(|p| (p.transport.clone(), p.encoding.clone(), p.tuple_type_index))
            .unwrap_or_default();
        model.imported_streams.insert(
            logical_name.clone(),
            ImportedStream::new(import, transport, encoding, tuple_type_index),
        );
        model.insert_operator(ModelOperator::Import(ImportOperator {
            base,
            stream_key: logical_name,
            output_ports,
        }));
        return Ok(desc.index);
    }

    if let Some(export) = &desc.export {
        let input_ports: Vec<PrimitivePort> =
            desc.input_ports.iter().map(input_port_bare).collect();
        let (transport, encoding, tuple_type_index) = input_ports
            .first()
            .map(|p| (p.transport.clone(), p.encoding.clone(), p.tuple_type_index))
            .unwrap_or_default();
        model.exported_streams.insert(
            logical_name.clone(),
            ExportedStream::new(export, transport, encoding, tuple_type_index),
        );
        model.insert_operator(ModelOperator::Export(ExportOperator {
            base,
            stream_key: logical_name,
            input_ports,
        }));
        return Ok(desc.index);
    }

    let original_pe = *pe_map.get(&desc.index).ok_or_else(|| {
        TransformError::MalformedInput(format!(
            "operator {} (`{}`) has no PE assignment",
            desc.index, desc.name
        ))
    })?;

    let cc_info = CCInfo::from_annotations(&desc.annotations);
    if cc_info.is_start_of_region() {
        model.cc_start_operators.push(desc.index);
    }

    let primitive = PrimitiveOperator {
        base,
        kind: desc.kind.clone(),
        toolkit_index: desc.toolkit_index,
        logical_index: desc.index,
        input_ports: desc
            .input_ports
            .iter()
            .map(|p| PrimitiveInputPort {
                port: input_port_bare(p),
                threaded_port: p.threaded_port.clone(),
                is_control: p.is_control,
            })
            .collect(),
        output_ports: desc
            .output_ports
            .iter()
            .map(|p| PrimitiveOutputPort {
                port: output_port_bare(p),
                logical_stream_name: p.stream_name.clone(),
                viewable: p.viewable,
                single_threaded_on_output: p.single_threaded_on_output,
            })
            .collect(),
        parameters: desc.parameters.clone(),
        annotations: desc.annotations.clone(),
        resources: desc.resources.clone(),
        cc_info,
        original_pe,
    };
    model.insert_operator(ModelOperator::Primitive(primitive));
    Ok(desc.index)
}

fn ensure_fresh_index(
    model: &LogicalModel,
    index: OperatorIndex,
) -> Result<(), TransformError> {
    if model.operators().contains_key(&index) {
        return Err(TransformError::MalformedInput(format!(
            "duplicate operator index {index}"
        )));
    }
    Ok(())
}

fn composite_port(desc: &CompositePortDescription) -> CompositePort {
    CompositePort {
        index: desc.index,
        tuple_type_index: desc.tuple_type_index,
        incoming: desc.incoming_connections.iter().map(Into::into).collect(),
        outgoing: desc.outgoing_connections.iter().map(Into::into).collect(),
    }
}

fn input_port_bare(desc: &freshet_types::app::PrimitiveInputPortDescription) -> PrimitivePort {
    PrimitivePort {
        index: desc.index,
        name: desc.name.clone(),
        transport: desc.transport.clone(),
        encoding: desc.encoding.clone(),
        is_mutable: desc.is_mutable,
        tuple_type_index: desc.tuple_type_index,
        connections: desc.connections.iter().map(Into::into).collect(),
    }
}

fn output_port_bare(desc: &freshet_types::app::PrimitiveOutputPortDescription) -> PrimitivePort {
    PrimitivePort {
        index: desc.index,
        name: desc.name.clone(),
        transport: desc.transport.clone(),
        encoding: desc.encoding.clone(),
        is_mutable: desc.is_mutable,
        tuple_type_index: desc.tuple_type_index,
        connections: desc.connections.iter().map(Into::into).collect(),
    }
}

fn parse_region_template(annot: &freshet_types::app::Annotation) -> CCRegionTemplate {
    CCRegionTemplate {
        logical_index: annot
            .property(annotations::PROP_INDEX)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        is_operator_driven: annot
            .property(annotations::PROP_TRIGGER)
            .map(|v| v == annotations::TRIGGER_OPERATOR_DRIVEN)
            .unwrap_or(false),
        drain_timeout: annot
            .property(annotations::PROP_DRAIN_TIMEOUT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(180.0),
        reset_timeout: annot
            .property(annotations::PROP_RESET_TIMEOUT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(180.0),
    }
}

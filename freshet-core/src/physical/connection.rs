//! Model-connection resolution.
//!
//! Physical connection building walks model connections through the
//! composite hierarchy until primitive-family endpoints are reached.
//! Composite ports are transparent (downstream follows `outgoing`,
//! upstream follows `incoming`), mergers are transparent in both
//! directions, and splitters terminate the downstream walk (they are
//! materialized on the owning output port) while the upstream walk passes
//! through them, remembering the innermost splitter and channel crossed.

use freshet_types::app::PortKind;
use freshet_types::ids::{OperatorIndex, PortIndex};

use crate::errors::TransformError;
use crate::model::operator::ModelOperator;
use crate::model::port::ModelConnection;
use crate::model::LogicalModel;

/// Endpoint reached by a downstream walk from an output port.
#[derive(Debug, Clone, Copy)]
pub enum DownstreamLeaf {
    /// A primitive input port.
    Primitive { oper: OperatorIndex, port: PortIndex },
    /// A logical splitter; the caller materializes it on the owning port.
    Splitter { oper: OperatorIndex },
    /// An Export pseudo-operator.
    Export { oper: OperatorIndex },
}

/// Endpoint reached by an upstream walk from an input port. `via` records
/// the innermost splitter output crossed on the way, if any.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamLeaf {
    Primitive {
        oper: OperatorIndex,
        port: PortIndex,
        via: Option<(OperatorIndex, u64)>,
    },
    /// An Import pseudo-operator.
    Import { oper: OperatorIndex },
}

pub fn resolve_downstream(
    model: &LogicalModel,
    conn: ModelConnection,
    out: &mut Vec<DownstreamLeaf>,
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
            for &next in &port.outgoing {
                resolve_downstream(model, next, out)?;
            }
        }
        ModelOperator::Primitive(_) => out.push(DownstreamLeaf::Primitive {
            oper: conn.oper_index,
            port: conn.port_index,
        }),
        ModelOperator::Splitter(_) => out.push(DownstreamLeaf::Splitter {
            oper: conn.oper_index,
        }),
        ModelOperator::Merger(merger) => {
            for &next in &merger.output_port.connections {
                resolve_downstream(model, next, out)?;
            }
        }
        ModelOperator::Export(_) => out.push(DownstreamLeaf::Export {
            oper: conn.oper_index,
        }),
        ModelOperator::Import(_) => {
            return Err(TransformError::MalformedInput(format!(
                "output connection reaches Import operator {}",
                conn.oper_index
            )));
        }
    }
    Ok(())
}

pub fn resolve_upstream(
    model: &LogicalModel,
    conn: ModelConnection,
    out: &mut Vec<UpstreamLeaf>,
) -> Result<(), TransformError> {
    resolve_upstream_inner(model, conn, None, out)
}

fn resolve_upstream_inner(
    model: &LogicalModel,
    conn: ModelConnection,
    via: Option<(OperatorIndex, u64)>,
    out: &mut Vec<UpstreamLeaf>,
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
            for &next in &port.incoming {
                resolve_upstream_inner(model, next, via, out)?;
            }
        }
        ModelOperator::Primitive(_) => out.push(UpstreamLeaf::Primitive {
            oper: conn.oper_index,
            port: conn.port_index,
            via,
        }),
        ModelOperator::Splitter(splitter) => {
            // The innermost splitter crossed wins; an enclosing one only
            // routes us further up to the producer.
            let via = via.or(Some((conn.oper_index, conn.port_index)));
            for &next in &splitter.input_port.connections {
                resolve_upstream_inner(model, next, via, out)?;
            }
        }
        ModelOperator::Merger(merger) => {
            for port in &merger.input_ports {
                for &next in &port.connections {
                    resolve_upstream_inner(model, next, via, out)?;
                }
            }
        }
        ModelOperator::Import(_) => out.push(UpstreamLeaf::Import {
            oper: conn.oper_index,
        }),
        ModelOperator::Export(_) => {
            return Err(TransformError::MalformedInput(format!(
                "input connection reaches Export operator {}",
                conn.oper_index
            )));
        }
    }
    Ok(())
}

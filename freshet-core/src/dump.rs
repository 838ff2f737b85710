//! Trace dumps of the logical and physical models.
//!
//! Enabled through `TransformOptions::trace_model`; the text goes to
//! `log::trace!` at stage boundaries.

use std::fmt;

use freshet_types::app::PortKind;

use crate::model::operator::ModelOperator;
use crate::model::{operator_connection_lists, LogicalModel};
use crate::physical::PhysicalModel;

pub struct LogicalDump<'a>(pub &'a LogicalModel);

impl fmt::Display for LogicalDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        writeln!(f, "logical model `{}`:", model.app_name)?;
        for (&index, op) in model.operators() {
            let base = op.base();
            let kind = match op {
                ModelOperator::Composite(_) => "composite",
                ModelOperator::Primitive(_) => "primitive",
                ModelOperator::Import(_) => "import",
                ModelOperator::Export(_) => "export",
                ModelOperator::Splitter(_) => "splitter",
                ModelOperator::Merger(_) => "merger",
            };
            write!(f, "  {index} {kind} `{}`", base.name)?;
            if base.channel_index >= 0 {
                write!(f, " ch={}", base.channel_index)?;
            }
            if base.is_replica {
                write!(f, " replica")?;
            }
            writeln!(f)?;
            for (port, port_kind, conns) in operator_connection_lists(op) {
                if conns.is_empty() {
                    continue;
                }
                let arrow = match port_kind {
                    PortKind::Input => "<-",
                    PortKind::Output => "->",
                };
                write!(f, "    {port_kind:?}[{port}] {arrow}")?;
                for conn in conns {
                    write!(
                        f,
                        " {}:{}({:?})",
                        conn.oper_index, conn.port_index, conn.port_kind
                    )?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

pub struct PhysicalDump<'a>(pub &'a PhysicalModel);

impl fmt::Display for PhysicalDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        writeln!(f, "physical model `{}`:", model.logical.app_name)?;
        for (&index, pe) in &model.pes {
            writeln!(
                f,
                "  pe {index} (logical {}) operators {:?} in {} out {}",
                pe.logical_index,
                pe.operators,
                pe.input_ports.len(),
                pe.output_ports.len()
            )?;
        }
        for (&index, op) in &model.operators {
            writeln!(
                f,
                "  oper {index} `{}` pe={} ch={} splitters={}",
                op.name,
                op.owning_pe,
                op.channel_index,
                op.output_ports
                    .iter()
                    .map(|p| p.splitters.len())
                    .sum::<usize>()
            )?;
        }
        Ok(())
    }
}

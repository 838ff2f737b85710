//! Ports and model connections.
//!
//! A directed edge is stored as a pair of `ModelConnection`s: a forward
//! entry on the source port and a reverse entry on the destination port.
//! Every rewiring operation keeps the pair symmetric.

use freshet_types::app::{PortConnection, PortKind, ThreadedPortDescription};
use freshet_types::ids::{OperatorIndex, PortIndex, TupleTypeIndex};

use crate::parallel::ParallelTransformState;

/// One endpoint reference stored on a port's connection list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelConnection {
    pub oper_index: OperatorIndex,
    pub port_index: PortIndex,
    pub port_kind: PortKind,
}

impl ModelConnection {
    pub fn new(oper_index: OperatorIndex, port_index: PortIndex, port_kind: PortKind) -> Self {
        Self {
            oper_index,
            port_index,
            port_kind,
        }
    }

    pub fn points_at(&self, oper_index: OperatorIndex, port_index: PortIndex) -> bool {
        self.oper_index == oper_index && self.port_index == port_index
    }

    pub fn points_at_port(
        &self,
        oper_index: OperatorIndex,
        port_index: PortIndex,
        port_kind: PortKind,
    ) -> bool {
        self.points_at(oper_index, port_index) && self.port_kind == port_kind
    }

    /// Remaps the operator end through a replication state. Connections to
    /// operators outside the replicated subtree are left alone.
    pub fn fix_operator_index(&mut self, state: &ParallelTransformState) {
        if let Some(mapped) = state.mapped_operator_index(self.oper_index) {
            self.oper_index = mapped;
        }
    }
}

impl From<&PortConnection> for ModelConnection {
    fn from(conn: &PortConnection) -> Self {
        Self {
            oper_index: conn.oper_index,
            port_index: conn.port_index,
            port_kind: conn.port_kind,
        }
    }
}

/// Data common to every primitive-family port (primitive, import, export,
/// splitter and merger ports all embed one).
#[derive(Debug, Clone)]
pub struct PrimitivePort {
    pub index: PortIndex,
    pub name: String,
    pub transport: String,
    pub encoding: String,
    pub is_mutable: bool,
    pub tuple_type_index: TupleTypeIndex,
    pub connections: Vec<ModelConnection>,
}

impl PrimitivePort {
    pub fn bare(index: PortIndex, tuple_type_index: TupleTypeIndex) -> Self {
        Self {
            index,
            name: String::new(),
            transport: String::new(),
            encoding: String::new(),
            is_mutable: false,
            tuple_type_index,
            connections: Vec::new(),
        }
    }

    pub fn add_connection(&mut self, conn: ModelConnection) {
        self.connections.push(conn);
    }

    pub fn fix_connections(&mut self, state: &ParallelTransformState) {
        for conn in &mut self.connections {
            conn.fix_operator_index(state);
        }
    }

    /// Rewrites the connection pointing at the old endpoint to point at the
    /// new one. Returns whether a connection was rewritten.
    #[allow(clippy::too_many_arguments)]
    pub fn fix_connection(
        &mut self,
        old_oper: OperatorIndex,
        old_port: PortIndex,
        old_kind: PortKind,
        new_oper: OperatorIndex,
        new_port: PortIndex,
        new_kind: PortKind,
    ) -> bool {
        fix_in_list(
            &mut self.connections,
            old_oper,
            old_port,
            old_kind,
            new_oper,
            new_port,
            new_kind,
        )
    }
}

#[derive(Debug, Clone)]
pub struct PrimitiveInputPort {
    pub port: PrimitivePort,
    pub threaded_port: Option<ThreadedPortDescription>,
    pub is_control: bool,
}

#[derive(Debug, Clone)]
pub struct PrimitiveOutputPort {
    pub port: PrimitivePort,
    /// Stream name as written in the source.
    pub logical_stream_name: String,
    pub viewable: Option<bool>,
    pub single_threaded_on_output: bool,
}

/// Composite ports keep two connection lists, named relative to the
/// composite interior: `incoming` holds where tuples come from, `outgoing`
/// where they go. Resolution downstream always follows `outgoing`,
/// upstream always follows `incoming`, regardless of the port's direction.
#[derive(Debug, Clone)]
pub struct CompositePort {
    pub index: PortIndex,
    pub tuple_type_index: TupleTypeIndex,
    pub incoming: Vec<ModelConnection>,
    pub outgoing: Vec<ModelConnection>,
}

impl CompositePort {
    pub fn fix_incoming_connections(&mut self, state: &ParallelTransformState) {
        for conn in &mut self.incoming {
            conn.fix_operator_index(state);
        }
    }

    pub fn fix_outgoing_connections(&mut self, state: &ParallelTransformState) {
        for conn in &mut self.outgoing {
            conn.fix_operator_index(state);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fix_incoming_connection(
        &mut self,
        old_oper: OperatorIndex,
        old_port: PortIndex,
        old_kind: PortKind,
        new_oper: OperatorIndex,
        new_port: PortIndex,
        new_kind: PortKind,
    ) -> bool {
        fix_in_list(
            &mut self.incoming,
            old_oper,
            old_port,
            old_kind,
            new_oper,
            new_port,
            new_kind,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fix_outgoing_connection(
        &mut self,
        old_oper: OperatorIndex,
        old_port: PortIndex,
        old_kind: PortKind,
        new_oper: OperatorIndex,
        new_port: PortIndex,
        new_kind: PortKind,
    ) -> bool {
        fix_in_list(
            &mut self.outgoing,
            old_oper,
            old_port,
            old_kind,
            new_oper,
            new_port,
            new_kind,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn fix_in_list(
    list: &mut [ModelConnection],
    old_oper: OperatorIndex,
    old_port: PortIndex,
    old_kind: PortKind,
    new_oper: OperatorIndex,
    new_port: PortIndex,
    new_kind: PortKind,
) -> bool {
    for conn in list {
        if conn.points_at_port(old_oper, old_port, old_kind) {
            *conn = ModelConnection::new(new_oper, new_port, new_kind);
            return true;
        }
    }
    false
}

//! Physical model construction: PE assignment, connection resolution,
//! classification, static connections, threaded ports, streams.

use freshet_types::app::{
    ExportDescription, ExportStreamDescription, ImportDescription, ImportStreamDescription,
    PortKind, ThreadedPortDescription,
};
use freshet_types::physical::PhysicalAppDescription;

use crate::errors::TransformError;
use crate::tests::common::*;
use crate::{transform, TransformOptions};

fn planned(app: &freshet_types::app::AppDescription) -> PhysicalAppDescription {
    transform(app, &TransformOptions::default()).unwrap()
}

#[test]
fn trivial_passthrough_stays_intra_pe() {
    let out = planned(&passthrough_app(true));

    assert_eq!(out.operators.len(), 2);
    assert!(out.operators.iter().all(|op| op.pe_index == 0));

    let src = &out.operators[0];
    assert_eq!(src.output_ports[0].intra_pe_connections.len(), 1);
    assert!(src.output_ports[0].inter_pe_connections.is_empty());
    assert_eq!(src.output_ports[0].intra_pe_connections[0].oper_index, 2);

    // No PE ports anywhere.
    assert_eq!(out.pes.len(), 1);
    assert!(out.pes[0].input_ports.is_empty());
    assert!(out.pes[0].output_ports.is_empty());
}

#[test]
fn cross_pe_connection_gets_pe_ports_and_statics() {
    let out = planned(&passthrough_app(false));

    let src = &out.operators[0];
    let snk = &out.operators[1];
    assert_eq!(src.pe_index, 0);
    assert_eq!(snk.pe_index, 1);
    assert_eq!(src.output_ports[0].inter_pe_connections.len(), 1);
    assert!(src.output_ports[0].intra_pe_connections.is_empty());

    let pe0 = &out.pes[0];
    let pe1 = &out.pes[1];
    assert_eq!(pe0.output_ports.len(), 1);
    assert_eq!(pe1.input_ports.len(), 1);

    let outgoing = &pe0.output_ports[0].static_connections;
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].pe_index, 1);
    assert_eq!(outgoing[0].pe_port_index, 0);
    assert_eq!(outgoing[0].port_kind, PortKind::Input);

    let incoming = &pe1.input_ports[0].static_connections;
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].pe_index, 0);
    assert_eq!(incoming[0].pe_port_index, 0);
    assert_eq!(incoming[0].port_kind, PortKind::Output);
}

#[test]
fn width_three_region_materializes_splitter_and_channels() {
    let out = planned(&parallel_app(3));

    // Three Work replicas on their channels, each in its own PE (channel 0
    // keeps the original PE).
    let works: Vec<_> = out
        .operators
        .iter()
        .filter(|op| op.logical_index == 3)
        .collect();
    assert_eq!(works.len(), 3);
    let mut channels: Vec<i64> = works.iter().map(|op| op.channel_index).collect();
    channels.sort_unstable();
    assert_eq!(channels, vec![0, 1, 2]);
    let mut pes: Vec<u64> = works.iter().map(|op| op.pe_index).collect();
    pes.sort_unstable();
    pes.dedup();
    assert_eq!(pes.len(), 3, "each channel gets its own PE");
    for op in &works {
        assert_eq!(op.max_channels, 3);
        assert_eq!(op.logical_name, "Main.Workers.Work");
        assert_eq!(op.name, format!("Main.Workers[{}].Work", op.channel_index));
    }

    // Src's output port carries one splitter with three channels; the
    // fan-out lives on the channels, not the flat connection lists.
    let src = out.operators.iter().find(|op| op.index == 1).unwrap();
    let port = &src.output_ports[0];
    assert!(port.inter_pe_connections.is_empty());
    assert!(port.intra_pe_connections.is_empty());
    assert_eq!(port.splitters.len(), 1);
    let splitter = &port.splitters[0];
    assert_eq!(splitter.region_index, 0);
    assert_eq!(splitter.channels.len(), 3);
    for (channel_index, channel) in splitter.channels.iter().enumerate() {
        assert_eq!(channel.index, channel_index as u64);
        assert_eq!(channel.connections.len(), 1);
        let conn = &channel.connections[0];
        assert_eq!(conn.splitter_index, Some(0));
        assert_eq!(conn.channel_index, Some(channel_index as u64));
        let target = out
            .operators
            .iter()
            .find(|op| op.index == conn.oper_index)
            .unwrap();
        assert_eq!(target.logical_index, 3);
        assert_eq!(target.channel_index, channel_index as i64);
    }

    // Snk drains all three replicas through the merger, unannotated.
    let snk = out.operators.iter().find(|op| op.index == 4).unwrap();
    let in_port = &snk.input_ports[0];
    let total =
        in_port.inter_pe_connections.len() + in_port.intra_pe_connections.len();
    assert_eq!(total, 3);
    for conn in in_port
        .inter_pe_connections
        .iter()
        .chain(&in_port.intra_pe_connections)
    {
        assert_eq!(conn.splitter_index, None);
    }
}

#[test]
fn splitter_channels_crossing_pes_get_per_channel_pe_ports() {
    let out = planned(&parallel_app(3));

    // Src sits on PE 0, every Work channel on another PE, so each channel
    // needs its own PE output port.
    let pe0 = &out.pes[0];
    let channel_ports: Vec<_> = pe0
        .output_ports
        .iter()
        .filter(|p| p.splitter_index.is_some())
        .collect();
    assert_eq!(channel_ports.len(), 3);
    for port in channel_ports {
        assert_eq!(port.oper_index, 1);
        assert_eq!(port.static_connections.len(), 1);
        assert_eq!(port.static_connections[0].port_kind, PortKind::Input);
    }
}

#[test]
fn inter_pe_classification_is_symmetric() {
    let out = planned(&parallel_app(3));
    let pe_of = |oper: u64| {
        out.operators
            .iter()
            .find(|op| op.index == oper)
            .map(|op| op.pe_index)
            .unwrap()
    };
    for op in &out.operators {
        for port in &op.input_ports {
            for conn in &port.inter_pe_connections {
                assert_ne!(op.pe_index, pe_of(conn.oper_index));
            }
            for conn in &port.intra_pe_connections {
                assert_eq!(op.pe_index, pe_of(conn.oper_index));
            }
        }
        for port in &op.output_ports {
            for conn in &port.inter_pe_connections {
                assert_ne!(op.pe_index, pe_of(conn.oper_index));
            }
            for conn in &port.intra_pe_connections {
                assert_eq!(op.pe_index, pe_of(conn.oper_index));
            }
        }
    }
}

#[test]
fn replica_inputs_get_injected_threaded_ports_when_crossing_pes() {
    let out = planned(&parallel_app(2));
    for op in out.operators.iter().filter(|op| op.logical_index == 3) {
        // Channel 0 shares PE 1 with nothing else; the splitter sits on
        // Src's port in PE 0, so the feed crosses PEs and the injected
        // threaded port survives.
        assert!(
            op.input_ports[0].threaded_port.is_some(),
            "channel {} lost its threaded port",
            op.channel_index
        );
    }
}

#[test]
fn colocated_splitter_feed_drops_injected_threaded_port() {
    let mut app = parallel_app(2);
    // Fuse everything into one PE. Channel 0 stays on the original PE next
    // to the splitter, so its injected threaded port is removed again;
    // channel 1 lives on the replica PE and keeps its thread.
    app.pes = vec![pe(0, vec![1, 3, 4])];
    let out = planned(&app);
    for op in out.operators.iter().filter(|op| op.logical_index == 3) {
        if op.channel_index == 0 {
            assert!(op.input_ports[0].threaded_port.is_none());
        } else {
            assert!(op.input_ports[0].threaded_port.is_some());
        }
    }
}

#[test]
fn user_declared_threaded_port_survives_colocation() {
    let mut app = parallel_app(2);
    app.pes = vec![pe(0, vec![1, 3, 4])];
    app.main_composite.composites[0].primitives[0].input_ports[0].threaded_port =
        Some(ThreadedPortDescription {
            congestion_policy: "dropFirst".to_string(),
            queue_size: 500,
            single_threaded_on_input: false,
        });
    let out = planned(&app);
    for op in out.operators.iter().filter(|op| op.logical_index == 3) {
        let tp = op.input_ports[0].threaded_port.as_ref().unwrap();
        assert_eq!(tp.congestion_policy, "dropFirst");
        assert_eq!(tp.queue_size, 500);
    }
}

#[test]
fn multiple_upstream_threads_clear_single_threaded_flags() {
    let out = planned(&parallel_app(3));
    // Snk observes three inter-PE feeds.
    let snk = out.operators.iter().find(|op| op.index == 4).unwrap();
    assert!(!snk.single_threaded_on_inputs);
    // Src is a source: single upstream thread, outputs untouched.
    let src = out.operators.iter().find(|op| op.index == 1).unwrap();
    assert!(src.single_threaded_on_inputs);
    assert!(src.output_ports[0].single_threaded_on_output);
}

fn import_export_app() -> freshet_types::app::AppDescription {
    let mut main = composite(0, "Main");

    let mut import = primitive(1, "In");
    import.import = Some(ImportDescription {
        filter: String::new(),
        application_scope: "default".to_string(),
        stream: ImportStreamDescription::PropertyBased {
            subscription: "kind == \"sensor\"".to_string(),
        },
    });
    import.output_ports = vec![output_port(0, "", vec![conn(2, 0, PortKind::Input)])];

    let mut work = primitive(2, "Work");
    work.input_ports = vec![input_port(0, vec![conn(1, 0, PortKind::Output)])];
    work.output_ports = vec![output_port(0, "Cooked", vec![conn(3, 0, PortKind::Input)])];

    let mut export = primitive(3, "Out");
    export.export = Some(ExportDescription {
        allow_filter: true,
        stream: ExportStreamDescription::NameBased {
            stream_name: "Cooked".to_string(),
        },
    });
    export.input_ports = vec![input_port(0, vec![conn(2, 0, PortKind::Output)])];

    main.primitives = vec![import, work, export];
    let mut app = app("edges", main);
    app.pes = vec![pe(0, vec![2])];
    app
}

#[test]
fn imports_and_exports_become_streams_not_operators() {
    let out = planned(&import_export_app());

    // Only Work is a physical operator.
    assert_eq!(out.operators.len(), 1);
    let work = &out.operators[0];

    let imported = &work.input_ports[0].imported_streams;
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].logical_import_oper_name, "Main.In");
    assert_eq!(imported[0].channel_index, -1);
    assert!(work.input_ports[0].inter_pe_connections.is_empty());
    assert!(work.input_ports[0].intra_pe_connections.is_empty());

    let exported = work.output_ports[0].exported_stream.as_ref().unwrap();
    assert_eq!(exported.logical_export_oper_name, "Main.Out");
    assert!(exported.allow_filter);

    // Both streams surface on PE ports.
    let pe0 = &out.pes[0];
    assert_eq!(pe0.input_ports.len(), 1);
    assert_eq!(pe0.input_ports[0].imported_streams.len(), 1);
    assert_eq!(pe0.output_ports.len(), 1);
    assert_eq!(pe0.output_ports[0].exported_streams.len(), 1);
}

#[test]
fn two_exports_on_one_port_are_fatal() {
    let mut app = import_export_app();
    let mut second = primitive(4, "Out2");
    second.export = Some(ExportDescription {
        allow_filter: false,
        stream: ExportStreamDescription::NameBased {
            stream_name: "CookedToo".to_string(),
        },
    });
    second.input_ports = vec![input_port(0, vec![conn(2, 0, PortKind::Output)])];
    app.main_composite.primitives.push(second);
    app.main_composite.primitives[1].output_ports[0]
        .connections
        .push(conn(4, 0, PortKind::Input));

    let err = transform(&app, &TransformOptions::default()).unwrap_err();
    assert!(
        matches!(err, TransformError::StreamResolutionFailure { oper_index: 2, .. }),
        "{err}"
    );
}

#[test]
fn import_inside_parallel_region_carries_channel_context() {
    let mut app = parallel_app(2);
    // Replace Work's upstream with an Import inside the region.
    let region = &mut app.main_composite.composites[0];
    let mut import = primitive(5, "Feed");
    import.import = Some(ImportDescription {
        filter: String::new(),
        application_scope: String::new(),
        stream: ImportStreamDescription::PropertyBased {
            subscription: "shard == getChannel()".to_string(),
        },
    });
    import.output_ports = vec![output_port(0, "", vec![conn(3, 0, PortKind::Input)])];
    region.primitives[0].input_ports[0].connections = vec![conn(5, 0, PortKind::Output)];
    region.primitives.push(import);
    region.input_ports.clear();
    app.main_composite.primitives[0].output_ports[0].connections.clear();

    let out = planned(&app);
    let mut seen = Vec::new();
    for op in out.operators.iter().filter(|op| op.logical_index == 3) {
        let streams = &op.input_ports[0].imported_streams;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].max_channels, 2);
        assert_eq!(streams[0].channel_index, op.channel_index);
        match &streams[0].stream {
            freshet_types::physical::PhysicalImportStream::PropertyBased { subscription } => {
                seen.push(subscription.clone());
                assert_eq!(*subscription, format!("shard == {}", op.channel_index));
            }
            other => panic!("expected property-based import, got {other:?}"),
        }
    }
    assert_eq!(seen.len(), 2);
}

#[test]
fn nested_regions_materialize_nested_splitters() {
    let out = planned(&nested_parallel_app());

    // Four Work replicas total.
    let works: Vec<_> = out
        .operators
        .iter()
        .filter(|op| op.logical_index == 4)
        .collect();
    assert_eq!(works.len(), 4);

    // All splitters materialize on Src's output port: the outer one plus
    // one inner splitter per outer channel.
    let src = out.operators.iter().find(|op| op.index == 1).unwrap();
    assert_eq!(src.output_ports[0].splitters.len(), 3);

    // Each Work replica is fed through an inner splitter channel.
    for work in &works {
        let conns = work.input_ports[0]
            .inter_pe_connections
            .iter()
            .chain(&work.input_ports[0].intra_pe_connections)
            .collect::<Vec<_>>();
        assert_eq!(conns.len(), 1);
        assert!(conns[0].splitter_index.is_some());
        assert_eq!(conns[0].oper_index, 1);
    }

    // Snk sees all four replicas through the merger chain.
    let snk = out.operators.iter().find(|op| op.index == 5).unwrap();
    let total = snk.input_ports[0].inter_pe_connections.len()
        + snk.input_ports[0].intra_pe_connections.len();
    assert_eq!(total, 4);
}

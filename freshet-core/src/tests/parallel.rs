//! Parallel-region expansion.

use freshet_types::ids::NO_CHANNEL;

use crate::builder::build_logical_model;
use crate::model::operator::ModelOperator;
use crate::model::LogicalModel;
use crate::parallel::perform_parallel_transform;
use crate::tests::common::*;
use crate::TransformOptions;

fn transformed(app: &freshet_types::app::AppDescription) -> LogicalModel {
    let mut model = build_logical_model(app, &TransformOptions::default()).unwrap();
    perform_parallel_transform(&mut model).unwrap();
    model
}

fn count_named_primitives(model: &LogicalModel, name: &str) -> usize {
    model
        .operators()
        .values()
        .filter(|op| op.is_primitive() && op.base().name == name)
        .count()
}

#[test]
fn width_three_replicates_and_injects() {
    let app = parallel_app(3);
    let model = transformed(&app);

    // W primitives, one splitter for the region input, one merger for the
    // region output.
    assert_eq!(count_named_primitives(&model, "Work"), 3);
    let splitters: Vec<_> = model
        .operators()
        .values()
        .filter(|op| op.is_splitter())
        .collect();
    let mergers: Vec<_> = model
        .operators()
        .values()
        .filter(|op| op.is_merger())
        .collect();
    assert_eq!(splitters.len(), 1);
    assert_eq!(mergers.len(), 1);

    // Channel tags 0..W on the replicas.
    let mut channels: Vec<i64> = model
        .operators()
        .values()
        .filter(|op| op.is_primitive() && op.base().name == "Work")
        .map(|op| op.base().channel_index)
        .collect();
    channels.sort_unstable();
    assert_eq!(channels, vec![0, 1, 2]);

    // Channel 0 keeps the original index; replicas are flagged.
    let original = model.primitive(3).unwrap();
    assert_eq!(original.base.channel_index, 0);
    assert!(!original.base.is_replica);

    // Operators outside the region are untouched.
    assert_eq!(model.primitive(1).unwrap().base.channel_index, NO_CHANNEL);

    model.check_connection_symmetry().unwrap();
}

#[test]
fn splitter_wiring_fans_out_to_every_channel() {
    let app = parallel_app(3);
    let model = transformed(&app);

    let splitter = model
        .operators()
        .values()
        .find_map(|op| match op {
            ModelOperator::Splitter(s) => Some(s),
            _ => None,
        })
        .unwrap();
    assert_eq!(splitter.output_ports.len(), 3);
    assert_eq!(splitter.injecting_iport_index, 0);
    // Fed by the original producer.
    assert_eq!(splitter.input_port.connections.len(), 1);
    assert_eq!(splitter.input_port.connections[0].oper_index, 1);

    // Src's forward connection now points at the splitter.
    let src = model.primitive(1).unwrap();
    assert_eq!(src.output_ports[0].port.connections[0].oper_index, splitter.base.index);

    // Each output port feeds a distinct region replica's input port.
    let mut roots: Vec<u64> = splitter
        .output_ports
        .iter()
        .map(|p| p.connections[0].oper_index)
        .collect();
    roots.dedup();
    assert_eq!(roots.len(), 3);
}

#[test]
fn merger_wiring_drains_every_channel() {
    let app = parallel_app(3);
    let model = transformed(&app);

    let merger = model
        .operators()
        .values()
        .find_map(|op| match op {
            ModelOperator::Merger(m) => Some(m),
            _ => None,
        })
        .unwrap();
    assert_eq!(merger.input_ports.len(), 3);
    assert_eq!(merger.output_port.connections.len(), 1);
    assert_eq!(merger.output_port.connections[0].oper_index, 4);

    // Snk's reverse connection now points at the merger.
    let snk = model.primitive(4).unwrap();
    assert_eq!(snk.input_ports[0].port.connections[0].oper_index, merger.base.index);
}

#[test]
fn replica_indices_are_fresh_and_unique() {
    let app = parallel_app(4);
    let model = transformed(&app);
    // Index uniqueness is structural (arena keyed by index); check the
    // replica count and that logical indices point back at the original.
    let replicas: Vec<_> = model
        .operators()
        .values()
        .filter_map(|op| op.as_primitive())
        .filter(|p| p.base.name == "Work" && p.base.is_replica)
        .collect();
    assert_eq!(replicas.len(), 3);
    for replica in replicas {
        assert_eq!(replica.logical_index, 3);
        assert_ne!(replica.base.index, 3);
    }
}

#[test]
fn intrinsic_rewrite_per_channel() {
    let mut app = parallel_app(4);
    app.main_composite.composites[0].primitives[0].parameters = vec![parameter(
        "threshold",
        "\"threshold_\" + (rstring)getChannel() + \"_\" + (rstring)getMaxChannels()",
    )];
    let model = transformed(&app);

    let mut values: Vec<(i64, String)> = model
        .operators()
        .values()
        .filter_map(|op| op.as_primitive())
        .filter(|p| p.base.name == "Work")
        .map(|p| (p.base.channel_index, p.parameters[0].value.clone()))
        .collect();
    values.sort();
    assert_eq!(values.len(), 4);
    for (channel, value) in values {
        assert_eq!(
            value,
            format!("\"threshold_\" + (rstring){channel} + \"_\" + (rstring)4")
        );
    }
}

#[test]
fn hostpool_replication_per_channel() {
    let app = hostpool_app();
    let model = transformed(&app);

    // The base pool plus one replica per channel.
    assert_eq!(model.hostpools().len(), 3);
    let base = model.hostpool(0).unwrap();
    assert_eq!(base.replica_map.len(), 2);

    for channel in 0..2 {
        let replica_index = base.replica_map[&(0, channel)];
        let replica = model.hostpool(replica_index).unwrap();
        assert_eq!(replica.name, format!("gpuPool[0][{channel}]"));
        // Intersection of pool tags and region replicate tags.
        assert_eq!(replica.tags, vec!["gpu".to_string()]);
        assert_eq!(replica.size, Some(4));
    }

    // Each channel's Work references its channel's replica pool.
    for op in model.operators().values() {
        let Some(p) = op.as_primitive() else { continue };
        if p.base.name != "Work" {
            continue;
        }
        let pool = p.resources.pool_location.as_ref().unwrap().pool_index;
        assert_eq!(pool, base.replica_map[&(0, p.base.channel_index)]);
    }
}

#[test]
fn nested_regions_multiply_widths() {
    let app = nested_parallel_app();
    let model = transformed(&app);

    assert_eq!(count_named_primitives(&model, "Work"), 4);
    // One inner splitter/merger pair per outer channel, plus the outer pair.
    let splitter_count = model
        .operators()
        .values()
        .filter(|op| op.is_splitter())
        .count();
    let merger_count = model
        .operators()
        .values()
        .filter(|op| op.is_merger())
        .count();
    assert_eq!(splitter_count, 3);
    assert_eq!(merger_count, 3);

    // Inner channels stay local: each outer channel sees inner channels
    // 0 and 1.
    let mut channels: Vec<i64> = model
        .operators()
        .values()
        .filter_map(|op| op.as_primitive())
        .filter(|p| p.base.name == "Work")
        .map(|p| p.base.channel_index)
        .collect();
    channels.sort_unstable();
    assert_eq!(channels, vec![0, 0, 1, 1]);

    model.check_connection_symmetry().unwrap();
}

#[test]
fn transform_without_regions_is_a_no_op() {
    let app = passthrough_app(true);
    let mut model = build_logical_model(&app, &TransformOptions::default()).unwrap();
    let before = model.operators().len();
    perform_parallel_transform(&mut model).unwrap();
    assert_eq!(model.operators().len(), before);
}

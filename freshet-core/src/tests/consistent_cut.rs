//! Consistent-cut region discovery and merging.

use crate::builder::build_logical_model;
use crate::consistent_cut::compute_cc_regions;
use crate::model::LogicalModel;
use crate::parallel::perform_parallel_transform;
use crate::tests::common::*;
use crate::TransformOptions;

fn computed(app: &freshet_types::app::AppDescription) -> LogicalModel {
    let mut model = build_logical_model(app, &TransformOptions::default()).unwrap();
    perform_parallel_transform(&mut model).unwrap();
    compute_cc_regions(&mut model).unwrap();
    model
}

#[test]
fn overlapping_regions_merge_transitively() {
    let model = computed(&cc_app());

    let canonical: Vec<_> = (0..model.cc_regions.regions().len())
        .filter(|&slot| model.cc_regions.is_canonical(slot))
        .collect();
    assert_eq!(canonical.len(), 1);

    // The canonical region is the one with the smaller logical index and
    // holds the union of both operator sets.
    let region = model.cc_regions.region(canonical[0]);
    assert_eq!(region.logical_index, 0);
    let mut operators: Vec<u64> = region.operators.iter().copied().collect();
    operators.sort_unstable();
    assert_eq!(operators, vec![1, 2, 3]);

    // The merged-away region resolves to the canonical one.
    for slot in 0..model.cc_regions.regions().len() {
        assert_eq!(model.cc_regions.canonical_of(slot), canonical[0]);
    }

    // Every operator's info was reduced to the canonical slot.
    for index in [1u64, 2, 3] {
        assert_eq!(
            model.primitive(index).unwrap().cc_info.regions,
            vec![canonical[0]]
        );
    }
}

#[test]
fn merge_is_idempotent() {
    let mut model = computed(&cc_app());
    let canonical_before: Vec<_> = (0..model.cc_regions.regions().len())
        .filter(|&slot| model.cc_regions.is_canonical(slot))
        .collect();
    let sets_before: Vec<usize> = model
        .cc_regions
        .regions()
        .iter()
        .map(|r| r.operators.len())
        .collect();

    // Merging the same pair again changes nothing.
    model.cc_regions.merge(0, 1);
    model.cc_regions.merge(1, 0);

    let canonical_after: Vec<_> = (0..model.cc_regions.regions().len())
        .filter(|&slot| model.cc_regions.is_canonical(slot))
        .collect();
    let sets_after: Vec<usize> = model
        .cc_regions
        .regions()
        .iter()
        .map(|r| r.operators.len())
        .collect();
    assert_eq!(canonical_before, canonical_after);
    assert_eq!(sets_before, sets_after);
}

#[test]
fn oblivious_operator_blocks_reachability() {
    let mut app = cc_app();
    // B opts out entirely: the walk from A stops there, and region 1 never
    // materializes because its start operator is oblivious.
    app.main_composite.primitives[1].annotations = vec![annotation("autonomous", &[])];
    let model = computed(&app);

    let regions = model.cc_regions.regions();
    assert_eq!(regions.len(), 1);
    let operators: Vec<u64> = regions[0].operators.iter().copied().collect();
    assert_eq!(operators, vec![1]);
    assert!(model.primitive(2).unwrap().cc_info.regions.is_empty());
}

#[test]
fn end_of_region_blocks_downstream_walk() {
    let mut app = cc_app();
    // B ends region 0 and no longer starts region 1; C keeps an annotation
    // but nothing reaches it.
    app.main_composite.primitives[1].annotations = vec![annotation(
        "consistentRegionEntry",
        &[("index", "0"), ("isEndOfRegion", "true")],
    )];
    let model = computed(&app);

    assert_eq!(model.cc_regions.regions().len(), 1);
    let mut operators: Vec<u64> = model.cc_regions.regions()[0]
        .operators
        .iter()
        .copied()
        .collect();
    operators.sort_unstable();
    assert_eq!(operators, vec![1, 2]);
    assert!(model.primitive(3).unwrap().cc_info.regions.is_empty());
}

#[test]
fn region_inside_parallel_region_exists_per_channel() {
    let mut app = parallel_app(2);
    app.main_composite.annotations = vec![annotation(
        "consistentRegion",
        &[("index", "0"), ("trigger", "operatorDriven")],
    )];
    app.main_composite.composites[0].primitives[0].annotations = vec![annotation(
        "consistentRegionEntry",
        &[("index", "0"), ("isStartOfRegion", "true")],
    )];
    let model = computed(&app);

    // One region per channel, each holding that channel's replica.
    assert_eq!(model.cc_regions.regions().len(), 2);
    for region in model.cc_regions.regions() {
        assert_eq!(region.operators.len(), 1);
        let oper = *region.operators.iter().next().unwrap();
        assert_eq!(
            model.primitive(oper).unwrap().base.channel_index,
            region.channel_index
        );
    }
}

#[test]
fn walk_passes_through_splitters_and_mergers() {
    let mut app = parallel_app(2);
    app.main_composite.annotations = vec![annotation(
        "consistentRegion",
        &[("index", "0"), ("trigger", "periodic")],
    )];
    // Src starts the region; the walk must cross the injected splitter to
    // reach the replicas, and the merger to reach Snk.
    app.main_composite.primitives[0].annotations = vec![annotation(
        "consistentRegionEntry",
        &[("index", "0"), ("isStartOfRegion", "true")],
    )];
    app.main_composite.composites[0].primitives[0].annotations =
        vec![annotation("consistentRegionEntry", &[("index", "0")])];
    app.main_composite.primitives[1].annotations =
        vec![annotation("consistentRegionEntry", &[("index", "0")])];
    let model = computed(&app);

    assert_eq!(model.cc_regions.regions().len(), 1);
    let region = &model.cc_regions.regions()[0];
    // Src, both Work replicas, Snk; never the splitter or merger.
    assert_eq!(region.operators.len(), 4);
    for &oper in &region.operators {
        assert!(model.operator(oper).unwrap().is_primitive());
    }
}

//! Fixture builders shared by the planner tests.

use freshet_types::app::{
    Annotation, AppDescription, CompositeInstance, CompositePortDescription, HostpoolDescription,
    HostpoolMembership, OperatorParameter, ParallelRegionDescription, PeDescription,
    PoolLocationDescription, PortConnection, PortKind, PrimitiveInputPortDescription,
    PrimitiveInstance, PrimitiveOutputPortDescription, ResourcesDescription,
};
use freshet_types::indexmap::IndexMap;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn conn(oper_index: u64, port_index: u64, port_kind: PortKind) -> PortConnection {
    PortConnection::new(oper_index, port_index, port_kind)
}

pub fn app(name: &str, main: CompositeInstance) -> AppDescription {
    AppDescription {
        name: name.to_string(),
        main_composite: main,
        hostpools: Vec::new(),
        parallel_regions: Vec::new(),
        pes: Vec::new(),
    }
}

pub fn composite(index: u64, name: &str) -> CompositeInstance {
    CompositeInstance {
        index,
        name: name.to_string(),
        description: String::new(),
        input_ports: Vec::new(),
        output_ports: Vec::new(),
        composites: Vec::new(),
        primitives: Vec::new(),
        annotations: Vec::new(),
    }
}

pub fn composite_port(
    index: u64,
    incoming: Vec<PortConnection>,
    outgoing: Vec<PortConnection>,
) -> CompositePortDescription {
    CompositePortDescription {
        index,
        tuple_type_index: 0,
        incoming_connections: incoming,
        outgoing_connections: outgoing,
    }
}

pub fn primitive(index: u64, name: &str) -> PrimitiveInstance {
    PrimitiveInstance {
        index,
        name: name.to_string(),
        description: String::new(),
        kind: "test::Op".to_string(),
        toolkit_index: 0,
        input_ports: Vec::new(),
        output_ports: Vec::new(),
        parameters: Vec::new(),
        annotations: Vec::new(),
        resources: ResourcesDescription::default(),
        import: None,
        export: None,
    }
}

pub fn input_port(index: u64, connections: Vec<PortConnection>) -> PrimitiveInputPortDescription {
    PrimitiveInputPortDescription {
        index,
        name: format!("in{index}"),
        transport: "tcp".to_string(),
        encoding: "binary".to_string(),
        is_mutable: false,
        tuple_type_index: 0,
        connections,
        threaded_port: None,
        is_control: false,
    }
}

pub fn output_port(
    index: u64,
    stream_name: &str,
    connections: Vec<PortConnection>,
) -> PrimitiveOutputPortDescription {
    PrimitiveOutputPortDescription {
        index,
        name: format!("out{index}"),
        transport: "tcp".to_string(),
        encoding: "binary".to_string(),
        is_mutable: false,
        tuple_type_index: 0,
        stream_name: stream_name.to_string(),
        viewable: None,
        single_threaded_on_output: true,
        connections,
    }
}

pub fn pe(index: u64, operators: Vec<u64>) -> PeDescription {
    PeDescription { index, operators }
}

pub fn parameter(name: &str, value: &str) -> OperatorParameter {
    OperatorParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

pub fn annotation(tag: &str, properties: &[(&str, &str)]) -> Annotation {
    let mut map = IndexMap::new();
    for (key, value) in properties {
        map.insert(key.to_string(), value.to_string());
    }
    Annotation {
        tag: tag.to_string(),
        properties: map,
    }
}

/// `Src(1) -> Snk(2)` inside `Main(0)`, with configurable PE placement.
pub fn passthrough_app(same_pe: bool) -> AppDescription {
    let mut main = composite(0, "Main");
    let mut src = primitive(1, "Src");
    src.output_ports = vec![output_port(0, "Lines", vec![conn(2, 0, PortKind::Input)])];
    let mut snk = primitive(2, "Snk");
    snk.input_ports = vec![input_port(0, vec![conn(1, 0, PortKind::Output)])];
    main.primitives = vec![src, snk];

    let mut app = app("passthrough", main);
    app.pes = if same_pe {
        vec![pe(0, vec![1, 2])]
    } else {
        vec![pe(0, vec![1]), pe(1, vec![2])]
    };
    app
}

/// `Src(1) -> C(2){ Work(3) } -> Snk(4)` with `C` a parallel region of the
/// given width. `Src` and `Snk` share PE 0; `Work` is on PE 1.
pub fn parallel_app(width: i64) -> AppDescription {
    let mut main = composite(0, "Main");

    let mut src = primitive(1, "Src");
    src.output_ports = vec![output_port(0, "Raw", vec![conn(2, 0, PortKind::Input)])];

    let mut region = composite(2, "Workers");
    region.input_ports = vec![composite_port(
        0,
        vec![conn(1, 0, PortKind::Output)],
        vec![conn(3, 0, PortKind::Input)],
    )];
    region.output_ports = vec![composite_port(
        0,
        vec![conn(3, 0, PortKind::Output)],
        vec![conn(4, 0, PortKind::Input)],
    )];
    let mut work = primitive(3, "Work");
    work.input_ports = vec![input_port(0, vec![conn(2, 0, PortKind::Input)])];
    work.output_ports = vec![output_port(0, "Cooked", vec![conn(2, 0, PortKind::Output)])];
    region.primitives = vec![work];

    let mut snk = primitive(4, "Snk");
    snk.input_ports = vec![input_port(0, vec![conn(2, 0, PortKind::Output)])];

    main.composites = vec![region];
    main.primitives = vec![src, snk];

    let mut app = app("scaled", main);
    app.parallel_regions = vec![ParallelRegionDescription {
        index: 0,
        oper_index: 2,
        width,
        replicate_tags: Vec::new(),
    }];
    app.pes = vec![pe(0, vec![1, 4]), pe(1, vec![3])];
    app
}

/// Width-2 region whose `Work` references a gpu-tagged hostpool.
pub fn hostpool_app() -> AppDescription {
    let mut app = parallel_app(2);
    app.hostpools = vec![HostpoolDescription {
        index: 0,
        name: "gpuPool".to_string(),
        size: Some(4),
        membership: HostpoolMembership::Shared,
        hosts: Vec::new(),
        tags: vec!["gpu".to_string()],
    }];
    app.parallel_regions[0].replicate_tags = vec!["gpu".to_string(), "net".to_string()];
    let work = &mut app.main_composite.composites[0].primitives[0];
    work.resources.pool_location = Some(PoolLocationDescription {
        pool_index: 0,
        in_pool_index: None,
    });
    app
}

/// `A(1) -> B(2) -> C(3)` where A and B carry region 0 and B and C carry
/// region 1; A starts region 0, B starts region 1.
pub fn cc_app() -> AppDescription {
    let mut main = composite(0, "Main");
    main.annotations = vec![
        annotation(
            "consistentRegion",
            &[
                ("index", "0"),
                ("trigger", "operatorDriven"),
                ("drainTimeout", "180"),
                ("resetTimeout", "180"),
            ],
        ),
        annotation(
            "consistentRegion",
            &[
                ("index", "1"),
                ("trigger", "periodic"),
                ("drainTimeout", "60"),
                ("resetTimeout", "60"),
            ],
        ),
    ];

    let mut a = primitive(1, "A");
    a.output_ports = vec![output_port(0, "SA", vec![conn(2, 0, PortKind::Input)])];
    a.annotations = vec![annotation(
        "consistentRegionEntry",
        &[("index", "0"), ("isStartOfRegion", "true")],
    )];

    let mut b = primitive(2, "B");
    b.input_ports = vec![input_port(0, vec![conn(1, 0, PortKind::Output)])];
    b.output_ports = vec![output_port(0, "SB", vec![conn(3, 0, PortKind::Input)])];
    b.annotations = vec![
        annotation("consistentRegionEntry", &[("index", "0")]),
        annotation(
            "consistentRegionEntry",
            &[("index", "1"), ("isStartOfRegion", "true")],
        ),
    ];

    let mut c = primitive(3, "C");
    c.input_ports = vec![input_port(0, vec![conn(2, 0, PortKind::Output)])];
    c.annotations = vec![annotation("consistentRegionEntry", &[("index", "1")])];

    main.primitives = vec![a, b, c];
    let mut app = app("checkpointed", main);
    app.pes = vec![pe(0, vec![1, 2, 3])];
    app
}

/// Nested parallel regions: outer width 2, inner width 2, one `Work`.
pub fn nested_parallel_app() -> AppDescription {
    let mut main = composite(0, "Main");

    let mut src = primitive(1, "Src");
    src.output_ports = vec![output_port(0, "Raw", vec![conn(2, 0, PortKind::Input)])];

    let mut outer = composite(2, "Outer");
    outer.input_ports = vec![composite_port(
        0,
        vec![conn(1, 0, PortKind::Output)],
        vec![conn(3, 0, PortKind::Input)],
    )];
    outer.output_ports = vec![composite_port(
        0,
        vec![conn(3, 0, PortKind::Output)],
        vec![conn(5, 0, PortKind::Input)],
    )];

    let mut inner = composite(3, "Inner");
    inner.input_ports = vec![composite_port(
        0,
        vec![conn(2, 0, PortKind::Input)],
        vec![conn(4, 0, PortKind::Input)],
    )];
    inner.output_ports = vec![composite_port(
        0,
        vec![conn(4, 0, PortKind::Output)],
        vec![conn(2, 0, PortKind::Output)],
    )];
    let mut work = primitive(4, "Work");
    work.input_ports = vec![input_port(0, vec![conn(3, 0, PortKind::Input)])];
    work.output_ports = vec![output_port(0, "Cooked", vec![conn(3, 0, PortKind::Output)])];
    inner.primitives = vec![work];
    outer.composites = vec![inner];

    let mut snk = primitive(5, "Snk");
    snk.input_ports = vec![input_port(0, vec![conn(2, 0, PortKind::Output)])];

    main.composites = vec![outer];
    main.primitives = vec![src, snk];

    let mut app = app("nested", main);
    app.parallel_regions = vec![
        ParallelRegionDescription {
            index: 0,
            oper_index: 3,
            width: 2,
            replicate_tags: Vec::new(),
        },
        ParallelRegionDescription {
            index: 1,
            oper_index: 2,
            width: 2,
            replicate_tags: Vec::new(),
        },
    ];
    app.pes = vec![pe(0, vec![1, 5]), pe(1, vec![4])];
    app
}

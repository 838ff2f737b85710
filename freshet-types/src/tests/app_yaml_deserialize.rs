use crate::app::{
    AppDescription, HostpoolMembership, ImportStreamDescription, PortKind,
};

#[test]
fn minimal_app() {
    let input = r#"
    name: wordcount
    main_composite:
      index: 0
      name: Main
      primitives:
      - index: 1
        name: Src
        kind: adapter::FileSource
        output_ports:
        - index: 0
          tuple_type_index: 0
          stream_name: Lines
          connections:
          - oper_index: 2
            port_index: 0
            port_kind: Input
      - index: 2
        name: Snk
        kind: adapter::FileSink
        input_ports:
        - index: 0
          tuple_type_index: 0
          connections:
          - oper_index: 1
            port_index: 0
            port_kind: Output
    pes:
    - index: 0
      operators: [1, 2]
  "#;
    let app: AppDescription = serde_yaml::from_str(input).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(app.name, "wordcount");
    assert_eq!(app.main_composite.primitives.len(), 2);
    let src = &app.main_composite.primitives[0];
    assert_eq!(src.output_ports[0].connections[0].port_kind, PortKind::Input);
    assert!(src.output_ports[0].single_threaded_on_output);
    assert_eq!(app.pes[0].operators, vec![1, 2]);
}

#[test]
fn parallel_region_and_hostpools() {
    let input = r#"
    name: scaled
    main_composite:
      index: 0
      name: Main
      composites:
      - index: 1
        name: Workers
        input_ports:
        - index: 0
          tuple_type_index: 3
    hostpools:
    - index: 0
      name: gpuPool
      size: 4
      membership: Exclusive
      tags: [gpu]
    parallel_regions:
    - index: 0
      oper_index: 1
      width: 3
      replicate_tags: [gpu]
  "#;
    let app: AppDescription = serde_yaml::from_str(input).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(app.parallel_regions[0].width, 3);
    assert_eq!(app.hostpools[0].membership, HostpoolMembership::Exclusive);
    assert_eq!(app.hostpools[0].tags, vec!["gpu"]);
}

#[test]
fn import_stream_variants() {
    let input = r#"
    name: importer
    main_composite:
      index: 0
      name: Main
      primitives:
      - index: 1
        name: In
        import:
          filter: "value > 10"
          stream: !PropertyBased
            subscription: "kind == \"sensor\""
        output_ports:
        - index: 0
          tuple_type_index: 0
  "#;
    let app: AppDescription = serde_yaml::from_str(input).unwrap_or_else(|e| panic!("{e}"));
    let import = app.main_composite.primitives[0].import.as_ref().unwrap();
    assert_eq!(import.filter, "value > 10");
    match &import.stream {
        ImportStreamDescription::PropertyBased { subscription } => {
            assert_eq!(subscription, "kind == \"sensor\"");
        }
        other => panic!("expected property-based import, got {other:?}"),
    }
}

#[test]
fn error_missing_main_composite() {
    let input = r#"
    name: broken
  "#;
    let err = serde_yaml::from_str::<AppDescription>(input)
        .err()
        .expect("deserialization should fail");
    assert!(err.to_string().contains("main_composite"));
}

#[test]
fn consistent_region_annotation_properties() {
    let input = r#"
    name: checkpointed
    main_composite:
      index: 0
      name: Main
      annotations:
      - tag: consistentRegion
        properties:
          index: "0"
          trigger: operatorDriven
          drainTimeout: "180.0"
          resetTimeout: "180.0"
  "#;
    let app: AppDescription = serde_yaml::from_str(input).unwrap_or_else(|e| panic!("{e}"));
    let annot = &app.main_composite.annotations[0];
    assert_eq!(annot.tag, "consistentRegion");
    assert_eq!(annot.property("trigger"), Some("operatorDriven"));
    assert_eq!(annot.property("drainTimeout"), Some("180.0"));
}

use std::sync::Arc;

use flowcore::builder::Scope;
use flowcore::dataflow::Dataflow;
use flowcore::item::Item;
use flowcore::planner;
use flowcore::render::render;
use flowcore::testing::{TestingSink, TestingSource};

/// Builds the canonical branch/map/merge/map/map pipeline, lowers it, and
/// checks the rendered shape: every compound step carries the primitive
/// substeps the planner expanded it into.
#[test]
fn map_compound_contains_a_flat_map_substep() {
    let source = TestingSource::new((0..10).map(Item::new).collect());
    let sink = TestingSink::new();
    let mut flow = Dataflow::new("basic").unwrap();

    {
        let mut scope = Scope::new(&mut flow);
        let inp = scope.input("inp", source).unwrap();
        let (evens, odds) = scope
            .branch("e_o", &inp, Arc::new(|item: &Item| item.downcast_ref::<i32>().unwrap() % 2 == 0))
            .unwrap();
        let evens = scope
            .map("halve", &evens, Arc::new(|item: Item| Item::new(item.downcast_ref::<i32>().unwrap() / 2)))
            .unwrap();
        let odds = scope
            .map("double", &odds, Arc::new(|item: Item| Item::new(item.downcast_ref::<i32>().unwrap() * 2)))
            .unwrap();
        let combo = scope.merge("merge", &[evens, odds]).unwrap();
        let combo = scope
            .map(
                "minus_one",
                &combo,
                Arc::new(|item: Item| Item::new(item.downcast_ref::<i32>().unwrap() - 1)),
            )
            .unwrap();
        let combo = scope
            .map(
                "stringy",
                &combo,
                Arc::new(|item: Item| Item::new(format!("<dance>{}</dance>", item.downcast_ref::<i32>().unwrap()))),
            )
            .unwrap();
        scope.output("out", &combo, Arc::new(sink.clone())).unwrap();
    }

    planner::lower(&mut flow).unwrap();
    let rendered = render(&flow);

    assert_eq!(rendered.flow_id, "basic");
    let halve = rendered
        .steps
        .iter()
        .find(|s| s.step_name == "halve")
        .expect("halve step present");
    assert_eq!(halve.op_type, "map");
    assert!(!halve.is_primitive);
    assert!(
        halve.substeps.iter().any(|s| s.op_type == "flat_map"),
        "map step should expand into a flat_map substep, got {:?}",
        halve.substeps.iter().map(|s| &s.op_type).collect::<Vec<_>>()
    );

    let e_o = rendered.steps.iter().find(|s| s.step_name == "e_o").unwrap();
    assert_eq!(e_o.op_type, "branch");
    assert_eq!(e_o.substeps.len(), 2, "branch expands to two flat_map substeps");
    assert!(e_o.substeps.iter().all(|s| s.op_type == "flat_map"));

    let merge = rendered.steps.iter().find(|s| s.step_name == "merge").unwrap();
    assert_eq!(merge.op_type, "merge");
    assert!(merge.substeps.iter().any(|s| s.op_type == "_noop"));

    // The primitive `output` step should resolve its upstream all the way
    // back to the `stringy` map's own `flat_map` primitive.
    let output = rendered.steps.iter().find(|s| s.step_name == "out").unwrap();
    let up = &output.inp_ports[0];
    assert_eq!(up.from_stream_ids.len(), 1);
    assert!(up.from_stream_ids[0].contains("stringy"));
}

use std::sync::Arc;

use flowcore::builder::Scope;
use flowcore::dataflow::Dataflow;
use flowcore::item::Item;
use flowcore::run;
use flowcore::testing::{TestingSink, TestingSource};

/// branch -> map -> merge -> map -> map, end to end, mirroring the
/// original basic pipeline example.
#[test]
fn branch_map_merge_map_map_end_to_end() {
    let source = TestingSource::new((0..10i32).map(Item::new).collect());
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

    run::run(flow, 1).unwrap();

    let mut out: Vec<String> = sink
        .captured()
        .into_iter()
        .map(|item| item.downcast_ref::<String>().unwrap().clone())
        .collect();
    out.sort();

    // evens 0,2,4,6,8 -> halve -> 0,1,2,3,4 -> minus_one -> -1,0,1,2,3
    // odds  1,3,5,7,9 -> double -> 2,6,10,14,18 -> minus_one -> 1,5,9,13,17
    let mut expected: Vec<String> = [-1, 0, 1, 2, 3, 1, 5, 9, 13, 17]
        .into_iter()
        .map(|n: i32| format!("<dance>{n}</dance>"))
        .collect();
    expected.sort();

    assert_eq!(out, expected);
}

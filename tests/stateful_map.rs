use std::sync::Arc;

use flowcore::builder::Scope;
use flowcore::dataflow::Dataflow;
use flowcore::item::{as_keyed, Item};
use flowcore::operators::StatefulMapResult;
use flowcore::run;
use flowcore::testing::{TestingSink, TestingSource};

#[test]
fn keeps_a_running_mean_with_a_three_item_horizon() {
    let inp: Vec<i64> = vec![2, 5, 8, 1, 3];
    let mut flow = Dataflow::new("test_df").unwrap();
    let source = TestingSource::new(inp.iter().map(|&n| Item::new(n)).collect());
    let sink = TestingSink::new();

    {
        let mut scope = Scope::new(&mut flow);
        let s = scope.input("inp", source).unwrap();
        let s = scope
            .key_on("key", &s, Arc::new(|_item: &Item| "ALL".to_string()))
            .unwrap();

        let build_state = Arc::new(|| Item::new(Vec::<i64>::new()));
        let mapper = Arc::new(|state: Option<Item>, new: Item| {
            let mut last_3 = state.unwrap().downcast_ref::<Vec<i64>>().unwrap().clone();
            let n = *new.downcast_ref::<i64>().unwrap();
            last_3.push(n);
            if last_3.len() > 3 {
                let keep = last_3.len() - 3;
                last_3.truncate(keep);
            }
            let avg = last_3.iter().sum::<i64>() as f64 / last_3.len() as f64;
            let result: StatefulMapResult = (Some(Item::new(last_3)), Some(Item::new(avg)));
            Item::new(result)
        });

        let s = scope.stateful_map("running_mean", &s, build_state, mapper).unwrap();
        scope.output("out", &s, Arc::new(sink.clone())).unwrap();
    }

    run::run(flow, 1).unwrap();

    let out: Vec<(String, f64)> = sink
        .captured()
        .into_iter()
        .map(|item| {
            let (k, v) = as_keyed(&item).unwrap();
            (k.clone(), *v.downcast_ref::<f64>().unwrap())
        })
        .collect();

    assert_eq!(
        out,
        vec![
            ("ALL".to_string(), 2.0),
            ("ALL".to_string(), 3.5),
            ("ALL".to_string(), 5.0),
            ("ALL".to_string(), 2.0),
            ("ALL".to_string(), 2.5),
        ]
    );
}

#[test]
fn mapper_returning_a_non_tuple_fails_the_worker() {
    let inp: Vec<i64> = vec![1, 4, 2, 9, 4, 3];
    let mut flow = Dataflow::new("test_df_bad").unwrap();
    let source = TestingSource::new(inp.iter().map(|&n| Item::new(n)).collect());
    let sink = TestingSink::new();

    {
        let mut scope = Scope::new(&mut flow);
        let s = scope.input("inp", source).unwrap();
        let s = scope
            .key_on("key", &s, Arc::new(|_item: &Item| "ALL".to_string()))
            .unwrap();
        let build_state = Arc::new(|| Item::new(()));
        let bad_mapper = Arc::new(|_state: Option<Item>, val: Item| val);
        let s = scope
            .stateful_map("bad_mapper", &s, build_state, bad_mapper)
            .unwrap();
        scope.output("out", &s, Arc::new(sink.clone())).unwrap();
    }

    let err = run::run(flow, 1).unwrap_err();
    assert!(
        err.to_string().contains("must be a 2-tuple"),
        "unexpected error message: {err}"
    );
}

#[test]
fn discard_fate_drops_a_keys_state_after_one_item() {
    let mut flow = Dataflow::new("test_discard").unwrap();
    let source = TestingSource::new(vec![Item::new(1i64), Item::new(2i64)]);
    let sink = TestingSink::new();

    {
        let mut scope = Scope::new(&mut flow);
        let s = scope.input("inp", source).unwrap();
        let s = scope
            .key_on("key", &s, Arc::new(|_item: &Item| "k".to_string()))
            .unwrap();
        let build_state = Arc::new(|| Item::new(()));
        let mapper = Arc::new(|state: Option<Item>, value: Item| {
            assert!(state.is_some(), "old state must be Some on every call");
            let result: StatefulMapResult = (None, Some(value));
            Item::new(result)
        });
        let s = scope.stateful_map("discarder", &s, build_state, mapper).unwrap();
        scope.output("out", &s, Arc::new(sink.clone())).unwrap();
    }

    run::run(flow, 1).unwrap();
    assert_eq!(sink.captured().len(), 2);
}

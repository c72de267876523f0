// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use snn_components::router::{DefaultAlgorithm, Route, Router};
use snn_components::sink::Sink;
use snn_components::source::Source;
use snn_components::connect_port;
use snn_engine::run_simulation;
use snn_engine::test_helpers::start_test;
use snn_engine::traits::Routable;
use snn_engine::types::SimError;

#[test]
fn route_by_destination() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();

    let values: Vec<i32> = vec![0, 1, 1, 2, 2, 2];
    let source = Source::new_and_register(
        &engine,
        &top,
        "source",
        Some(Box::new(values.into_iter())),
    );
    let router =
        Router::new_and_register(&engine, &top, "router", 3, Box::new(DefaultAlgorithm {}))
            .unwrap();

    let sinks: Vec<_> = (0..3)
        .map(|i| Sink::new_and_register(&engine, &top, format!("sink{i}").as_str()))
        .collect();

    connect_port!(source, tx => router, rx).unwrap();
    for (i, sink) in sinks.iter().enumerate() {
        connect_port!(router, tx, i => sink, rx).unwrap();
    }

    run_simulation!(engine);

    assert_eq!(sinks[0].num_sunk(), 1);
    assert_eq!(sinks[1].num_sunk(), 2);
    assert_eq!(sinks[2].num_sunk(), 3);
}

struct Modulo(usize);

impl<T> Route<T> for Modulo
where
    T: Routable,
{
    fn route(&self, obj: &T) -> Result<usize, SimError> {
        Ok(obj.destination() as usize % self.0)
    }
}

#[test]
fn route_with_custom_algorithm() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();

    let values: Vec<i32> = (0..8).collect();
    let source = Source::new_and_register(
        &engine,
        &top,
        "source",
        Some(Box::new(values.into_iter())),
    );
    let router =
        Router::new_and_register(&engine, &top, "router", 2, Box::new(Modulo(2))).unwrap();

    let even = Sink::new_and_register(&engine, &top, "even");
    let odd = Sink::new_and_register(&engine, &top, "odd");

    connect_port!(source, tx => router, rx).unwrap();
    connect_port!(router, tx, 0 => even, rx).unwrap();
    connect_port!(router, tx, 1 => odd, rx).unwrap();

    run_simulation!(engine);

    assert_eq!(even.num_sunk(), 4);
    assert_eq!(odd.num_sunk(), 4);
}

#[test]
fn invalid_egress_is_an_error() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();

    let values: Vec<i32> = vec![5];
    let source = Source::new_and_register(
        &engine,
        &top,
        "source",
        Some(Box::new(values.into_iter())),
    );
    let router =
        Router::new_and_register(&engine, &top, "router", 2, Box::new(DefaultAlgorithm {}))
            .unwrap();

    let sink0 = Sink::new_and_register(&engine, &top, "sink0");
    let sink1 = Sink::new_and_register(&engine, &top, "sink1");

    connect_port!(source, tx => router, rx).unwrap();
    connect_port!(router, tx, 0 => sink0, rx).unwrap();
    connect_port!(router, tx, 1 => sink1, rx).unwrap();

    assert!(engine.run().is_err());
}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use snn_components::sink::Sink;
use snn_components::source::Source;
use snn_components::{connect_port, option_box_repeat};
use snn_engine::run_simulation;
use snn_engine::test_helpers::start_test;

#[test]
fn repeat_all_sunk() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();

    let source = Source::new_and_register(&engine, &top, "source", option_box_repeat!(3 ; 10));
    let sink = Sink::new_and_register(&engine, &top, "sink");

    connect_port!(source, tx => sink, rx).unwrap();
    run_simulation!(engine);

    assert_eq!(sink.num_sunk(), 10);
}

#[test]
fn source_without_generator_sends_nothing() {
    let mut engine = start_test(file!());
    let top = engine.top().clone();

    let source: std::rc::Rc<Source<i32>> = Source::new_and_register(&engine, &top, "source", None);
    let sink = Sink::new_and_register(&engine, &top, "sink");

    connect_port!(source, tx => sink, rx).unwrap();
    run_simulation!(engine);

    assert_eq!(sink.num_sunk(), 0);
}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use snn_engine::sim_error;
use snn_engine::test_helpers::start_test;
use snn_engine::time::clock::Clock;
use snn_engine::traits::Runnable;
use snn_engine::types::SimResult;

struct Recorder {
    name: &'static str,
    clock: Clock,
    log: Rc<RefCell<Vec<String>>>,
    fail_setup: bool,
}

#[async_trait(?Send)]
impl Runnable for Recorder {
    fn setup(&self) -> SimResult {
        self.log.borrow_mut().push(format!("setup {}", self.name));
        if self.fail_setup {
            return sim_error!("{} refused setup", self.name);
        }
        Ok(())
    }

    async fn run(&self) -> SimResult {
        self.clock.wait_ticks(1).await;
        self.log.borrow_mut().push(format!("run {}", self.name));
        Ok(())
    }

    fn finish(&self) {
        self.log.borrow_mut().push(format!("finish {}", self.name));
    }
}

#[test]
fn lifecycle_order() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let log = Rc::new(RefCell::new(Vec::new()));

    for name in ["a", "b"] {
        engine.register(Rc::new(Recorder {
            name,
            clock: clock.clone(),
            log: log.clone(),
            fail_setup: false,
        }));
    }

    engine.run().unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["setup a", "setup b", "run a", "run b", "finish a", "finish b"]
    );
}

#[test]
fn setup_error_aborts_run() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let log = Rc::new(RefCell::new(Vec::new()));

    engine.register(Rc::new(Recorder {
        name: "bad",
        clock: clock.clone(),
        log: log.clone(),
        fail_setup: true,
    }));
    engine.register(Rc::new(Recorder {
        name: "never",
        clock: clock.clone(),
        log: log.clone(),
        fail_setup: false,
    }));

    let err = engine.run().unwrap_err();
    assert_eq!(format!("{err}"), "Error: bad refused setup");

    // The failing component stopped setup before anything ran or finished.
    assert_eq!(*log.borrow(), vec!["setup bad"]);
}

#[test]
fn task_error_stops_simulation() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();

    engine.spawn(async move {
        clock.wait_ticks(2).await;
        sim_error!("component broke at tick 2")
    });

    let err = engine.run().unwrap_err();
    assert_eq!(format!("{err}"), "Error: component broke at tick 2");
}

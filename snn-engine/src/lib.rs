// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The simulation engine.
//!
//! This library provides the core of the [engine](crate::engine) which
//! executes event driven asynchronous simulation components.
//!
//! Simulations can be run as purely event driven (where one event triggers
//! one or more others) or the use of clocks can be introduced to model time.
//! The combination of both is the most common: cycle-accurate components
//! loop on [`Clock::wait_ticks`](crate::time::clock::Clock::wait_ticks)
//! and exchange objects through [ports](crate::port) or explicit queues.
//!
//! The [engine](crate::engine::Engine) owns a registry of components and
//! drives them through their lifecycle: `setup()` (validation, fatal
//! configuration errors abort the run), `run()` (spawned in registration
//! order onto the single-threaded [executor](crate::executor)) and
//! `finish()` (statistics, called exactly once after the run stops).

pub mod engine;
pub mod events;
pub mod executor;
pub mod port;
pub mod test_helpers;
pub mod time;
pub mod traits;
pub mod types;

#[macro_export]
/// Spawn all component run() functions and then run the simulation.
macro_rules! run_simulation {
    ($engine:ident) => {
        $engine.run().unwrap();
    };
    ($engine:ident, $expect:expr) => {
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
}

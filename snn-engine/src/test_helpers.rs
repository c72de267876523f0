// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Helpers shared by engine and model tests.

use snn_track::test_helpers::create_tracker;

use crate::engine::Engine;

/// Create an engine whose trace output goes to a per-test file.
#[must_use]
pub fn start_test(full_filepath: &str) -> Engine {
    Engine::new(&create_tracker(full_filepath))
}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Helpers to build trackers for tests.

use std::fs;
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;

use crate::tracker::{EntityManager, TextTracker};
use crate::{Tracker, Writer};

/// Create a text tracker that writes to `traces/<test_file_stem>.log`.
///
/// Tests call this with `file!()` so each test file gets its own trace.
#[must_use]
pub fn create_tracker(full_filepath: &str) -> Tracker {
    // Place all trace files in one folder
    const FOLDER: &str = "traces";

    // Create that folder if it doesn't exist yet
    fs::create_dir_all(FOLDER).unwrap();

    let filename_only = Path::new(full_filepath)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap();

    let writer: Writer = Box::new(BufWriter::new(
        fs::File::create(format!("{FOLDER}/{filename_only}.log")).unwrap(),
    ));

    let default_log_level = log::Level::Trace;
    let entity_manager = EntityManager::new(default_log_level);
    let tracker: Tracker = Rc::new(TextTracker::new(entity_manager, writer));
    tracker
}

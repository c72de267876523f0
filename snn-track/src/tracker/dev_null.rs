// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use std::cell::RefCell;

use crate::tracker::Track;
use crate::{Id, ROOT};

/// A tracker that suppresses all track events.
///
/// Unique ids are still allocated so that a simulation behaves identically
/// with tracking disabled.
pub struct DevNullTracker {
    unique_id: RefCell<u64>,
}

impl DevNullTracker {
    /// Create a new [`DevNullTracker`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            unique_id: RefCell::new(ROOT.0 + 1),
        }
    }
}

impl Default for DevNullTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Track for DevNullTracker {
    fn unique_id(&self) -> Id {
        let mut guard = self.unique_id.borrow_mut();
        let id = *guard;
        *guard += 1;
        Id(id)
    }

    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        false
    }

    fn add_entity(&self, _id: Id, _entity_name: &str) {}

    fn enter(&self, _enter_into: Id, _enter_obj: Id) {}

    fn exit(&self, _exit_from: Id, _exit_obj: Id) {}

    fn create(&self, _created_by: Id, _created_obj: Id, _name: &str) {}

    fn destroy(&self, _destroyed_by: Id, _destroyed_obj: Id) {}

    fn connect(&self, _connect_from: Id, _connect_to: Id) {}

    fn log(&self, _msg_by: Id, _level: log::Level, _msg: std::fmt::Arguments) {}

    fn time(&self, _set_by: Id, _time_ns: f64) {}

    fn shutdown(&self) {}
}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use std::cell::RefCell;

use crate::tracker::{EntityManager, Track};
use crate::Id;

/// A tracker that records log messages in memory.
///
/// Tests use this to assert that particular messages were (or were not)
/// emitted during a simulation.
pub struct InMemoryTracker {
    entity_manager: EntityManager,
    messages: RefCell<Vec<(log::Level, String)>>,
}

impl InMemoryTracker {
    /// Create a new [`InMemoryTracker`] with an [`EntityManager`].
    #[must_use]
    pub fn new(entity_manager: EntityManager) -> Self {
        Self {
            entity_manager,
            messages: RefCell::new(Vec::new()),
        }
    }

    /// Number of log messages recorded so far.
    #[must_use]
    pub fn num_messages(&self) -> usize {
        self.messages.borrow().len()
    }

    /// Returns true if any recorded message contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .borrow()
            .iter()
            .any(|(_, msg)| msg.contains(needle))
    }

    /// Count the recorded messages at the given level.
    #[must_use]
    pub fn num_at_level(&self, level: log::Level) -> usize {
        self.messages
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }
}

impl Track for InMemoryTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_log_enabled_at_level(id, level)
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
    }

    fn enter(&self, _enter_into: Id, _enter_obj: Id) {}

    fn exit(&self, _exit_from: Id, _exit_obj: Id) {}

    fn create(&self, _created_by: Id, _created_obj: Id, _name: &str) {}

    fn destroy(&self, _destroyed_by: Id, _destroyed_obj: Id) {}

    fn connect(&self, _connect_from: Id, _connect_to: Id) {}

    fn log(&self, _msg_by: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.messages.borrow_mut().push((level, msg.to_string()));
    }

    fn time(&self, _set_by: Id, _time_ns: f64) {}

    fn shutdown(&self) {}
}

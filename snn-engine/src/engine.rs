// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The engine that owns the executor, clocks and the component registry.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use snn_track::entity::{toplevel, Entity};
use snn_track::tracker::stdout_tracker;
use snn_track::{trace, Tracker};

use crate::executor::{self, Executor, Spawner};
use crate::time::clock::Clock;
use crate::types::{Component, Eventable, SimResult};

/// Use a default clock frequency of 1GHz.
const DEFAULT_CLOCK_MHZ: f64 = 1000.0;

/// Holds the registered components and drives their lifecycle.
pub struct Registry {
    /// The entity used to trace registry activity.
    pub entity: Rc<Entity>,
    components: RefCell<Vec<Component>>,
    finished: RefCell<bool>,
}

impl Registry {
    fn new(parent: &Rc<Entity>) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "registry")),
            components: RefCell::new(Vec::new()),
            finished: RefCell::new(false),
        }
    }

    /// Register a component.
    pub fn register(&self, component: Component) {
        self.components.borrow_mut().push(component);
    }

    /// Run `setup()` on every component in registration order.
    ///
    /// The first error aborts: this is where fatal configuration problems
    /// surface before any simulated cycle runs.
    pub fn setup_components(&self) -> SimResult {
        let guard = self.components.borrow();
        trace!(self.entity ; "Setting up {} components", guard.len());
        for component in guard.iter() {
            component.setup()?;
        }
        Ok(())
    }

    /// Spawn every component's `run()` in registration order.
    pub fn spawn_components(&self, spawner: &Spawner) {
        let guard = self.components.borrow();
        trace!(self.entity ; "Spawning {} components", guard.len());
        for component in guard.iter() {
            let component = component.clone();
            spawner.spawn(async move { component.run().await });
        }
    }

    /// Run `finish()` exactly once on every component in registration
    /// order.
    pub fn finish_components(&self) {
        if *self.finished.borrow() {
            return;
        }
        *self.finished.borrow_mut() = true;
        for component in self.components.borrow().iter() {
            component.finish();
        }
    }
}

/// The engine owns the executor, the component registry and all clocks.
pub struct Engine {
    /// The executor driving all tasks.
    pub executor: Executor,
    spawner: Spawner,
    toplevel: Rc<Entity>,
    tracker: Tracker,
    registry: Registry,
}

impl Engine {
    /// Create a standalone engine.
    #[must_use]
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let (executor, spawner) = executor::new_executor_and_spawner(&toplevel);
        let registry = Registry::new(&toplevel);
        Self {
            executor,
            spawner,
            toplevel,
            tracker: tracker.clone(),
            registry,
        }
    }

    /// Register a component that will be run as the simulation starts
    pub fn register(&self, component: Component) {
        self.registry.register(component);
    }

    /// Run the simulation until it drains or a component fails.
    pub fn run(&mut self) -> SimResult {
        self.registry.setup_components()?;
        self.registry.spawn_components(&self.spawner);

        let finished = Rc::new(RefCell::new(false));
        let result = self.executor.run(&finished);
        self.registry.finish_components();
        result
    }

    /// Run the simulation until the given event fires.
    pub fn run_until<T: Default + Copy + 'static>(&mut self, event: Eventable<T>) -> SimResult {
        self.registry.setup_components()?;
        self.registry.spawn_components(&self.spawner);

        // Set the flag as soon as the event fires.
        let finished = Rc::new(RefCell::new(false));
        {
            let finished = finished.clone();
            self.spawner.spawn(async move {
                event.listen().await;
                *finished.borrow_mut() = true;
                Ok(())
            });
        }

        let result = self.executor.run(&finished);
        self.registry.finish_components();
        result
    }

    /// A handle that allows components to spawn their own tasks.
    #[must_use]
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// Spawn a raw future onto the executor.
    pub fn spawn(&self, future: impl Future<Output = SimResult> + 'static) {
        self.spawner.spawn(future);
    }

    /// The shared default clock.
    #[must_use]
    pub fn default_clock(&mut self) -> Clock {
        self.executor.get_clock(DEFAULT_CLOCK_MHZ)
    }

    /// Return a clock of the given MHz frequency.
    #[must_use]
    pub fn clock_mhz(&mut self, freq_mhz: f64) -> Clock {
        self.executor.get_clock(freq_mhz)
    }

    /// The current simulation time in `ns`.
    #[must_use]
    pub fn time_now_ns(&self) -> f64 {
        self.executor.time_now_ns()
    }

    /// The top-level entity.
    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    /// The tracker shared by all entities.
    #[must_use]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends track events to stdout.
///
/// This is provided to keep documentation examples simple with fewer
/// concepts to have to consider at once.
impl Default for Engine {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Info);
        Self::new(&tracker)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // The tracker can be using a buffered writer and so it needs to be
        // shut down cleanly to ensure that it is flushed properly.
        self.tracker.shutdown();
    }
}

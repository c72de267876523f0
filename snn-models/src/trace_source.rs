// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The spike-trace source.
//!
//! Reads the text trace format (one `<neuron_id> <timestamp_us>` record per
//! line, `#` comments), sorts by timestamp and replays each record as a
//! [`Spike`] at the matching tick.

use std::cell::{Cell, RefCell};
use std::fs;
use std::rc::Rc;

use async_trait::async_trait;
use snn_components::take_option;
use snn_engine::engine::Engine;
use snn_engine::port::{OutPort, PortStateResult};
use snn_engine::sim_error;
use snn_engine::time::clock::Clock;
use snn_engine::traits::Runnable;
use snn_engine::types::{SimError, SimResult};
use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::{debug, info, warn};

use crate::address::NeuronMap;
use crate::spike::Spike;

/// Trace-replay options.
#[derive(Clone, Debug)]
pub struct TraceSourceConfig {
    /// Path of the text trace file.
    pub path: String,
    /// Multiplier applied to every timestamp.
    pub time_scale: f64,
    /// Constant added to every neuron id.
    pub neuron_offset: u32,
    /// Stop loading after this many records.
    pub max_events: Option<usize>,
}

/// Replays a spike trace into the platform.
#[derive(EntityDisplay)]
pub struct TraceSource {
    /// The entity of this source in the simulation hierarchy.
    pub entity: Rc<Entity>,
    cfg: TraceSourceConfig,
    map: NeuronMap,
    clock: Clock,
    tx: RefCell<Option<OutPort<Spike>>>,

    /// `(tick, neuron)` events sorted by tick.
    events: RefCell<Vec<(u64, u32)>>,

    events_loaded: Cell<u64>,
    events_sent: Cell<u64>,
    lines_skipped: Cell<u64>,
    events_unmapped: Cell<u64>,
}

impl TraceSource {
    /// Create and register the source.
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Rc<Entity>,
        name: &str,
        cfg: TraceSourceConfig,
        map: NeuronMap,
    ) -> Rc<Self> {
        let entity = Rc::new(Entity::new(parent, name));
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Rc::new(Self {
            entity,
            cfg,
            map,
            clock: clock.clone(),
            tx: RefCell::new(Some(tx)),
            events: RefCell::new(Vec::new()),
            events_loaded: Cell::new(0),
            events_sent: Cell::new(0),
            lines_skipped: Cell::new(0),
            events_unmapped: Cell::new(0),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    /// The output port feeding the spike demultiplexer.
    pub fn connect_port_tx(&self, port_state: PortStateResult<Spike>) -> SimResult {
        self.tx.borrow_mut().as_mut().unwrap().connect(port_state)
    }

    /// Events actually replayed.
    #[must_use]
    pub fn events_sent(&self) -> u64 {
        self.events_sent.get()
    }

    /// Events parsed out of the trace file.
    #[must_use]
    pub fn events_loaded(&self) -> u64 {
        self.events_loaded.get()
    }

    /// Malformed lines skipped while parsing.
    #[must_use]
    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped.get()
    }

    fn load(&self) -> SimResult {
        let text = match fs::read_to_string(&self.cfg.path) {
            Ok(text) => text,
            Err(e) => {
                return sim_error!("{}: cannot read trace '{}': {e}", self.entity, self.cfg.path)
            }
        };

        let mut events = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(limit) = self.cfg.max_events {
                if events.len() >= limit {
                    break;
                }
            }

            let mut fields = line.split_whitespace();
            let parsed = match (fields.next(), fields.next()) {
                (Some(neuron), Some(timestamp)) => {
                    neuron.parse::<u32>().ok().zip(timestamp.parse::<u64>().ok())
                }
                _ => None,
            };
            let Some((neuron, timestamp)) = parsed else {
                warn!(self.entity ; "malformed trace line {}: '{line}'", line_no + 1);
                self.lines_skipped.set(self.lines_skipped.get() + 1);
                continue;
            };

            let tick = (timestamp as f64 * self.cfg.time_scale).round() as u64;
            events.push((tick, neuron + self.cfg.neuron_offset));
        }

        // File order is arbitrary; replay in time order.
        events.sort_by_key(|(tick, _)| *tick);
        self.events_loaded.set(events.len() as u64);
        debug!(self.entity ; "loaded {} events from '{}'", events.len(), self.cfg.path);
        *self.events.borrow_mut() = events;
        Ok(())
    }
}

#[async_trait(?Send)]
impl Runnable for TraceSource {
    fn setup(&self) -> SimResult {
        self.load()
    }

    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx);
        let events: Vec<(u64, u32)> = self.events.borrow_mut().drain(..).collect();

        for (tick, neuron) in events {
            let now = self.clock.tick_now().tick();
            if tick > now {
                self.clock.wait_ticks(tick - now).await;
            }

            let Some(tile) = self.map.tile_of(neuron) else {
                warn!(self.entity ; "neuron {neuron} is outside the population, skipped");
                self.events_unmapped.set(self.events_unmapped.get() + 1);
                continue;
            };
            let spike = Spike::new(&self.entity, neuron, neuron, tile, 1.0, tick);
            tx.put(spike)?.await;
            self.events_sent.set(self.events_sent.get() + 1);
        }
        Ok(())
    }

    fn finish(&self) {
        info!(self.entity ; "events_loaded={} events_sent={} lines_skipped={} events_unmapped={}",
            self.events_loaded.get(), self.events_sent.get(),
            self.lines_skipped.get(), self.events_unmapped.get());
    }
}

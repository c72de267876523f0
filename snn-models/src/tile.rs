// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The multi-core processing element: cores, on-tile ring, NIC, test
//! traffic and the load monitor.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use snn_engine::engine::Engine;
use snn_engine::executor::Spawner;
use snn_engine::port::{InPort, PortStateResult};
use snn_engine::sim_error;
use snn_engine::time::clock::Clock;
use snn_engine::traits::Runnable;
use snn_engine::types::{SimError, SimResult};
use snn_model_builder::EntityDisplay;
use snn_components::take_option;
use snn_track::entity::Entity;
use snn_track::{info, warn};

use crate::address::{NeuronMap, WeightMap};
use crate::core::{CoreConfig, SnnCore};
use crate::fanout::FanOut;
use crate::memory::SharedMemory;
use crate::mesh::MeshEndpoint;
use crate::neuron::NeuronState;
use crate::nic::Nic;
use crate::ring::{Ring, RingPayload};
use crate::spike::Spike;

/// The periodic test-traffic generator.
#[derive(Copy, Clone, Debug)]
pub struct TestTrafficConfig {
    /// The tile test spikes are addressed to.
    pub target_tile: u32,
    /// Cycles between bursts.
    pub period: u64,
    /// Spikes emitted per burst.
    pub spikes_per_burst: u32,
    /// Total cap; 0 means unlimited (bound the run with `stop_at`).
    pub max_spikes: u32,
    /// The weight carried on test spikes.
    pub weight: f32,
}

/// Tile-level configuration.
#[derive(Clone, Debug)]
pub struct TileConfig {
    /// This tile's id on the mesh.
    pub tile_id: u32,
    /// Virtual channels per ring direction.
    pub ring_vcs: u32,
    /// Credits per ring VC.
    pub ring_credits: u32,
    /// Spikes the ring retry queue holds before dropping.
    pub retry_queue_len: usize,
    /// NIC send queue bound in packets.
    pub nic_output_buf: usize,
    /// Cycles between load-monitor observations.
    pub monitor_period: u64,
    /// Utilization spread that counts as imbalance.
    pub imbalance_threshold: f64,
    /// EMA weight of the utilization monitor.
    pub util_alpha: f64,
    /// Cycles between ring deadlock-detector observations.
    pub deadlock_check_period: u64,
    /// The optional test-traffic generator.
    pub test_traffic: Option<TestTrafficConfig>,
}

/// One tile of the accelerator.
#[derive(EntityDisplay)]
pub struct Tile {
    /// The entity of this tile in the simulation hierarchy.
    pub entity: Rc<Entity>,
    cfg: TileConfig,
    map: NeuronMap,
    clock: Clock,
    spawner: Spawner,

    cores: RefCell<Vec<SnnCore>>,
    ring: Option<RefCell<Ring>>,
    nic: Option<RefCell<Nic>>,
    memory: Rc<SharedMemory>,

    spike_rx: RefCell<Option<InPort<Spike>>>,
    injected: Rc<RefCell<VecDeque<(u64, Spike)>>>,
    retry_queue: RefCell<VecDeque<(usize, Spike)>>,

    test_cycle_counter: Cell<u64>,
    test_spikes_sent: Cell<u32>,
    test_enabled: Cell<bool>,

    util_ema: RefCell<Vec<f64>>,

    spikes_dropped: Cell<u64>,
    packets_dropped: Cell<u64>,
    inter_core_messages: Cell<u64>,
    external_spikes_sent: Cell<u64>,
    external_spikes_received: Cell<u64>,
    load_imbalance_events: Cell<u64>,
}

impl Tile {
    /// Build a tile with its cores, ring and (when mesh-connected) NIC.
    #[expect(clippy::too_many_arguments)]
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Rc<Entity>,
        name: &str,
        cfg: TileConfig,
        core_cfgs: Vec<CoreConfig>,
        weights: WeightMap,
        map: NeuronMap,
        memory: &Rc<SharedMemory>,
        fanout: Rc<dyn FanOut>,
        endpoint: Option<MeshEndpoint>,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Rc::new(Entity::new(parent, name));

        let cores: Vec<SnnCore> = core_cfgs
            .into_iter()
            .map(|core_cfg| {
                SnnCore::new(&entity, core_cfg, weights, memory.connect(), fanout.clone())
            })
            .collect();
        let num_cores = cores.len();
        if num_cores == 0 {
            return sim_error!("{entity}: a tile needs at least one core");
        }

        // A single core bypasses the ring entirely.
        let ring = if num_cores > 1 {
            Some(RefCell::new(Ring::new(
                &entity,
                "ring",
                num_cores,
                cfg.ring_vcs,
                cfg.ring_credits,
            )?))
        } else {
            None
        };

        let nic = endpoint.map(|endpoint| {
            RefCell::new(Nic::new(&entity, cfg.tile_id, endpoint, cfg.nic_output_buf))
        });

        let spike_rx = InPort::new(&entity, "spike_in");

        let rc_self = Rc::new(Self {
            entity,
            util_ema: RefCell::new(vec![0.0; num_cores]),
            cfg,
            map,
            clock: clock.clone(),
            spawner: engine.spawner(),
            cores: RefCell::new(cores),
            ring,
            nic,
            memory: memory.clone(),
            spike_rx: RefCell::new(Some(spike_rx)),
            injected: Rc::new(RefCell::new(VecDeque::new())),
            retry_queue: RefCell::new(VecDeque::new()),
            test_cycle_counter: Cell::new(0),
            test_spikes_sent: Cell::new(0),
            test_enabled: Cell::new(true),
            spikes_dropped: Cell::new(0),
            packets_dropped: Cell::new(0),
            inter_core_messages: Cell::new(0),
            external_spikes_sent: Cell::new(0),
            external_spikes_received: Cell::new(0),
            load_imbalance_events: Cell::new(0),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    /// The injection port the spike demultiplexer connects to.
    pub fn port_spike_in(&self) -> PortStateResult<Spike> {
        self.spike_rx.borrow().as_ref().unwrap().state()
    }

    fn tick(&self, cycle: u64) -> SimResult {
        // Arrivals from the mesh first: the NIC unpacked them in an earlier
        // cycle's fabric tick.
        if let Some(nic) = &self.nic {
            let arrived = nic.borrow_mut().poll_receive(cycle);
            for spike in arrived {
                self.external_spikes_received
                    .set(self.external_spikes_received.get() + 1);
                self.dispatch_inbound(spike)?;
            }
        }

        // Then everything injected before this cycle.
        loop {
            let next = {
                let mut queue = self.injected.borrow_mut();
                if queue.front().is_some_and(|(stamp, _)| *stamp < cycle) {
                    queue.pop_front()
                } else {
                    None
                }
            };
            let Some((_, spike)) = next else { break };
            self.dispatch_inbound(spike)?;
        }

        // Ring ejections from previous cycles reach their cores now.
        if let Some(ring) = &self.ring {
            let mut ring = ring.borrow_mut();
            let mut cores = self.cores.borrow_mut();
            for node in 0..cores.len() {
                while let Some(message) = ring.recv(node) {
                    if let RingPayload::Spike(spike) = message.payload {
                        cores[node].deliver_spike(spike);
                    }
                }
            }
        }

        // Retry spikes the ring refused earlier.
        self.drain_retry_queue(cycle)?;

        // Step the cores and collect what they emitted.
        let mut emitted: Vec<(usize, Spike)> = Vec::new();
        {
            let mut cores = self.cores.borrow_mut();
            let mut out = Vec::new();
            for (idx, core) in cores.iter_mut().enumerate() {
                core.tick(cycle, &mut out)?;
                emitted.extend(out.drain(..).map(|spike| (idx, spike)));
            }
        }
        for (src_core, spike) in emitted {
            self.dispatch_from_core(src_core, spike, cycle)?;
        }

        if let Some(ring) = &self.ring {
            let mut ring = ring.borrow_mut();
            ring.tick(cycle);
            if self.cfg.deadlock_check_period > 0
                && cycle % self.cfg.deadlock_check_period == 0
            {
                ring.deadlock_suspected();
            }
        }

        if let Some(nic) = &self.nic {
            nic.borrow_mut().tick(cycle);
        }

        self.generate_test_traffic(cycle)?;

        if self.cfg.monitor_period > 0 && cycle > 0 && cycle % self.cfg.monitor_period == 0 {
            self.check_load_balance();
        }
        Ok(())
    }

    /// Dispatch a spike that entered at the tile boundary (mesh, trace
    /// source or test generator).
    fn dispatch_inbound(&self, spike: Spike) -> SimResult {
        if spike.destination_tile() == self.cfg.tile_id {
            match self.map.locate(spike.destination_neuron()) {
                Some(loc) if loc.tile == self.cfg.tile_id => {
                    // Boundary arrivals go straight to the owning core. A
                    // spike that came off the mesh for this tile is never
                    // re-sent to it, which rules out echo loops.
                    self.cores.borrow_mut()[loc.core].deliver_spike(spike);
                }
                _ => {
                    warn!(self.entity ; "{spike} does not map to this tile, dropped");
                    self.spikes_dropped.set(self.spikes_dropped.get() + 1);
                }
            }
            return Ok(());
        }

        // Headed somewhere else: relay through the NIC.
        self.forward_external(spike);
        Ok(())
    }

    /// Dispatch a spike emitted by one of this tile's cores.
    fn dispatch_from_core(&self, src_core: usize, spike: Spike, cycle: u64) -> SimResult {
        if spike.destination_tile() != self.cfg.tile_id {
            self.forward_external(spike);
            return Ok(());
        }

        let Some(loc) = self.map.locate(spike.destination_neuron()) else {
            warn!(self.entity ; "{spike} has no owner, dropped");
            self.spikes_dropped.set(self.spikes_dropped.get() + 1);
            return Ok(());
        };
        if loc.tile != self.cfg.tile_id {
            warn!(self.entity ; "{spike} addressed to tile {} but owned by tile {}, dropped",
                spike.destination_tile(), loc.tile);
            self.spikes_dropped.set(self.spikes_dropped.get() + 1);
            return Ok(());
        }

        if loc.core == src_core || self.ring.is_none() {
            self.cores.borrow_mut()[loc.core].deliver_spike(spike);
            return Ok(());
        }

        self.send_on_ring(src_core, loc.core, spike, cycle)
    }

    fn send_on_ring(
        &self,
        src_core: usize,
        dst_core: usize,
        spike: Spike,
        cycle: u64,
    ) -> SimResult {
        let ring = self.ring.as_ref().unwrap();
        if ring.borrow().can_accept(src_core, dst_core, 1) {
            let accepted = ring.borrow_mut().send(
                src_core,
                dst_core,
                1,
                RingPayload::Spike(spike),
                cycle,
            )?;
            debug_assert!(accepted);
            self.inter_core_messages
                .set(self.inter_core_messages.get() + 1);
            return Ok(());
        }

        // Backpressured: hold the spike and retry next cycle.
        let mut retry = self.retry_queue.borrow_mut();
        if retry.len() >= self.cfg.retry_queue_len {
            warn!(self.entity ; "retry queue full, dropping {spike}");
            self.packets_dropped.set(self.packets_dropped.get() + 1);
        } else {
            retry.push_back((src_core, spike));
        }
        Ok(())
    }

    fn drain_retry_queue(&self, cycle: u64) -> SimResult {
        let waiting: Vec<(usize, Spike)> = self.retry_queue.borrow_mut().drain(..).collect();
        for (src_core, spike) in waiting {
            let Some(loc) = self.map.locate(spike.destination_neuron()) else {
                self.spikes_dropped.set(self.spikes_dropped.get() + 1);
                continue;
            };
            self.send_on_ring(src_core, loc.core, spike, cycle)?;
        }
        Ok(())
    }

    fn forward_external(&self, spike: Spike) {
        match &self.nic {
            Some(nic) => {
                nic.borrow_mut().send(spike);
                self.external_spikes_sent
                    .set(self.external_spikes_sent.get() + 1);
            }
            None => {
                warn!(self.entity ; "no mesh connection for {spike}, dropped");
                self.spikes_dropped.set(self.spikes_dropped.get() + 1);
            }
        }
    }

    fn generate_test_traffic(&self, cycle: u64) -> SimResult {
        let Some(test) = self.cfg.test_traffic else {
            return Ok(());
        };
        if !self.test_enabled.get()
            || (test.max_spikes > 0 && self.test_spikes_sent.get() >= test.max_spikes)
        {
            return Ok(());
        }

        let counter = self.test_cycle_counter.get() + 1;
        if counter < test.period {
            self.test_cycle_counter.set(counter);
            return Ok(());
        }
        self.test_cycle_counter.set(0);

        let mut burst = test.spikes_per_burst;
        if test.max_spikes > 0 {
            burst = burst.min(test.max_spikes - self.test_spikes_sent.get());
        }
        let npt = self.map.neurons_per_tile() as u32;
        for i in 0..burst {
            let source = self.map.tile_base(self.cfg.tile_id) + (i % npt);
            let destination = self.map.tile_base(test.target_tile) + (i % npt);
            let spike = Spike::new(
                &self.entity,
                source,
                destination,
                test.target_tile,
                test.weight,
                cycle,
            );
            self.test_spikes_sent.set(self.test_spikes_sent.get() + 1);
            self.dispatch_inbound(spike)?;
        }
        Ok(())
    }

    fn check_load_balance(&self) {
        let mut cores = self.cores.borrow_mut();
        let mut ema = self.util_ema.borrow_mut();
        for (idx, core) in cores.iter_mut().enumerate() {
            let sample = core.take_window_utilization();
            ema[idx] = self.cfg.util_alpha * sample + (1.0 - self.cfg.util_alpha) * ema[idx];
        }

        let max = ema.iter().copied().fold(0.0f64, f64::max);
        let min = ema.iter().copied().fold(1.0f64, f64::min);
        if max - min > self.cfg.imbalance_threshold {
            // Observability only: there is no work migration.
            warn!(self.entity ; "core load imbalance: max={max:.2} min={min:.2}");
            self.load_imbalance_events
                .set(self.load_imbalance_events.get() + 1);
        }
    }

    fn has_work(&self) -> bool {
        if !self.injected.borrow().is_empty() || !self.retry_queue.borrow().is_empty() {
            return true;
        }
        if self.cores.borrow().iter().any(SnnCore::has_work) {
            return true;
        }
        if let Some(ring) = &self.ring {
            if ring.borrow().pending_messages() > 0 {
                return true;
            }
        }
        if let Some(nic) = &self.nic {
            if nic.borrow().pending() > 0 {
                return true;
            }
        }
        match self.cfg.test_traffic {
            Some(test) => {
                self.test_enabled.get()
                    && test.max_spikes > 0
                    && self.test_spikes_sent.get() < test.max_spikes
            }
            None => false,
        }
    }

    /// One core's statistics map.
    #[must_use]
    pub fn core_statistics(&self, core: usize) -> BTreeMap<String, u64> {
        self.cores.borrow()[core].statistics()
    }

    /// Inspect one neuron of one core.
    #[must_use]
    pub fn neuron(&self, core: usize, idx: usize) -> NeuronState {
        self.cores.borrow()[core].neuron(idx).clone()
    }

    /// The tile-level statistics map, including the ring and NIC.
    #[must_use]
    pub fn statistics(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        stats.insert("spikes_dropped".to_string(), self.spikes_dropped.get());
        stats.insert("packets_dropped".to_string(), self.packets_dropped.get());
        stats.insert(
            "inter_core_messages".to_string(),
            self.inter_core_messages.get(),
        );
        stats.insert(
            "external_spikes_sent".to_string(),
            self.external_spikes_sent.get(),
        );
        stats.insert(
            "external_spikes_received".to_string(),
            self.external_spikes_received.get(),
        );
        stats.insert(
            "load_imbalance_events".to_string(),
            self.load_imbalance_events.get(),
        );
        stats.insert(
            "test_spikes_sent".to_string(),
            u64::from(self.test_spikes_sent.get()),
        );
        if let Some(ring) = &self.ring {
            stats.extend(ring.borrow().statistics());
        }
        if let Some(nic) = &self.nic {
            // Both the retry queue and the NIC queue count overflow drops
            // under packets_dropped; add rather than overwrite.
            for (key, value) in nic.borrow().statistics() {
                *stats.entry(key).or_default() += value;
            }
        }
        stats
    }

    /// Aggregate of one statistic across all cores.
    #[must_use]
    pub fn core_stat_total(&self, key: &str) -> u64 {
        self.cores
            .borrow()
            .iter()
            .map(|core| core.statistics().get(key).copied().unwrap_or_default())
            .sum()
    }
}

#[async_trait(?Send)]
impl Runnable for Tile {
    fn setup(&self) -> SimResult {
        if let Some(test) = self.cfg.test_traffic {
            if test.period == 0 {
                return sim_error!("{}: test traffic needs a non-zero period", self.entity);
            }
            if test.target_tile == self.cfg.tile_id {
                // Sending test spikes to yourself would only echo; leave
                // this tile out of the test pattern.
                warn!(self.entity ; "test traffic targets its own tile, disabled here");
                self.test_enabled.set(false);
            }
        }
        for core in self.cores.borrow_mut().iter_mut() {
            core.preload(&self.memory)?;
        }
        Ok(())
    }

    async fn run(&self) -> SimResult {
        // Feed the injection port into the stamped queue. Tiles without a
        // connected source have nothing to listen to.
        let rx = take_option!(self.spike_rx);
        if rx.is_connected() {
            let injected = self.injected.clone();
            let clock = self.clock.clone();
            self.spawner.spawn(async move {
                loop {
                    let spike = rx.get()?.await;
                    injected
                        .borrow_mut()
                        .push_back((clock.tick_now().tick(), spike));
                    // Hold the simulation open until the tick that will
                    // process the queued spike.
                    clock.wait_ticks(1).await;
                }
            });
        }

        loop {
            if self.has_work() {
                self.clock.wait_ticks(1).await;
            } else {
                self.clock.wait_ticks_or_exit(1).await;
            }
            let cycle = self.clock.tick_now().tick();
            self.tick(cycle)
                .map_err(|e| SimError(format!("{} at cycle {cycle}: {}", self.entity, e.0)))?;
        }
    }

    fn finish(&self) {
        for (key, value) in self.statistics() {
            info!(self.entity ; "{key}={value}");
        }
        for core in 0..self.cores.borrow().len() {
            for (key, value) in self.core_statistics(core) {
                info!(self.entity ; "core{core}.{key}={value}");
            }
        }
    }
}

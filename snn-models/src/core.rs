// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The neuron-cluster core: spike intake, weight fetch and the LIF update.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use snn_engine::types::SimResult;
use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::{debug, trace, warn};

use crate::address::WeightMap;
use crate::fanout::FanOut;
use crate::memory::{FetchOrigin, MemoryClient, MemoryPort};
use crate::neuron::{LifParams, NeuronState};
use crate::spike::Spike;
use crate::weight_cache::{MergePolicy, MergeRange, WeightCache};

/// The optional weight-verification mode.
#[derive(Copy, Clone, Debug)]
pub struct VerifyConfig {
    /// Number of sample reads across the weight matrix.
    pub samples: u32,
    /// The value every sample is compared against.
    pub expected_weight: f32,
    /// Tolerance of the comparison.
    pub epsilon: f32,
}

/// Per-core configuration.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// The owning tile.
    pub tile: u32,
    /// Index of this core within its tile.
    pub core: usize,
    /// Neurons owned by this core (NPC).
    pub neurons_per_core: u32,
    /// First global neuron id owned by this core.
    pub global_base: u32,
    /// The LIF parameters.
    pub lif: LifParams,
    /// How weight-fetch misses are widened.
    pub merge: MergePolicy,
    /// Weight cache capacity; the cache flushes on overflow.
    pub max_cache_entries: usize,
    /// Cap on in-flight weight fetches.
    pub max_outstanding: usize,
    /// Use the event-carried weight instead of the memory path.
    pub use_event_weight: bool,
    /// Pre-populate the weight cache from memory during setup, so the
    /// first spikes do not pay the miss-discard penalty.
    pub preload_weights: bool,
    /// Cycles before verification sampling starts.
    pub warmup_cycles: u64,
    /// Weight verification, when enabled.
    pub verify: Option<VerifyConfig>,
}

/// A neuron-cluster core running the LIF update for its neurons.
#[derive(EntityDisplay)]
pub struct SnnCore {
    entity: Rc<Entity>,
    cfg: CoreConfig,
    weights: WeightMap,
    fanout: Rc<dyn FanOut>,

    neurons: Vec<NeuronState>,
    inbound: VecDeque<Spike>,
    cache: WeightCache,
    client: MemoryClient,

    spikes_received: u64,
    spikes_generated: u64,
    neurons_fired: u64,
    spikes_dropped: u64,
    merged_reads_rows: u64,
    merged_reads_cachelines: u64,

    verify_requested: u32,
    verify_completed: u32,
    verify_mismatches: u64,

    window_active: u64,
    window_total: u64,
}

impl SnnCore {
    /// Create a core owned by a tile.
    #[must_use]
    pub fn new(
        parent: &Rc<Entity>,
        cfg: CoreConfig,
        weights: WeightMap,
        memory: MemoryPort,
        fanout: Rc<dyn FanOut>,
    ) -> Self {
        let entity = Rc::new(Entity::new(parent, format!("core{}", cfg.core).as_str()));
        let neurons = (0..cfg.neurons_per_core)
            .map(|_| NeuronState::new(cfg.lif.v_rest))
            .collect();
        let cache = WeightCache::new(cfg.max_cache_entries);
        let client = MemoryClient::new(entity.clone(), memory, cfg.max_outstanding);
        Self {
            entity,
            cfg,
            weights,
            fanout,
            neurons,
            inbound: VecDeque::new(),
            cache,
            client,
            spikes_received: 0,
            spikes_generated: 0,
            neurons_fired: 0,
            spikes_dropped: 0,
            merged_reads_rows: 0,
            merged_reads_cachelines: 0,
            verify_requested: 0,
            verify_completed: 0,
            verify_mismatches: 0,
            window_active: 0,
            window_total: 0,
        }
    }

    /// Fill the weight cache from the backing memory, up to the cache
    /// capacity. Runs during setup when `preload_weights` is configured.
    pub fn preload(&mut self, memory: &crate::memory::SharedMemory) -> SimResult {
        if self.cfg.use_event_weight || !self.cfg.preload_weights {
            return Ok(());
        }
        let npc = self.cfg.neurons_per_core;
        let base = self.weights.core_block_base(self.cfg.tile, self.cfg.core);
        let bytes = memory.peek(base, self.weights.core_block_bytes())?;
        'rows: for pre in 0..npc {
            for post in 0..npc {
                if self.cache.len() >= self.cfg.max_cache_entries {
                    warn!(self.entity ; "weight preload stopped at cache capacity {}",
                        self.cfg.max_cache_entries);
                    break 'rows;
                }
                let offset = ((pre * npc + post) * 4) as usize;
                let value = f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
                self.cache.insert(pre, post, value);
            }
        }
        Ok(())
    }

    /// Enqueue one inbound spike; processing happens on the next tick.
    pub fn deliver_spike(&mut self, spike: Spike) {
        trace!(self.entity ; "deliver {spike}");
        self.inbound.push_back(spike);
        self.spikes_received += 1;
    }

    /// One simulated clock edge. Emitted spikes are appended to `out` and
    /// handed to the owning tile for dispatch.
    pub fn tick(&mut self, cycle: u64, out: &mut Vec<Spike>) -> SimResult {
        let mut active = false;

        // Memory replies arrive out of band; apply them before intake.
        for (fetch, values) in self.client.drain(cycle) {
            active = true;
            self.apply_fetch(&fetch.range, &fetch.origin, &values);
        }

        // Drain the inbound FIFO in arrival order.
        while let Some(spike) = self.inbound.pop_front() {
            active = true;
            self.process_spike(&spike, cycle)?;
        }

        self.verify_sample(cycle)?;

        // Leak every non-refractory neuron, then age the refractory
        // windows.
        for neuron in &mut self.neurons {
            if neuron.refractory_timer == 0 {
                neuron.v_mem = self.cfg.lif.leak(neuron.v_mem);
            } else {
                neuron.refractory_timer -= 1;
            }
        }

        // Fire whatever crossed threshold this cycle.
        for idx in 0..self.neurons.len() {
            if self.neurons[idx].v_mem >= self.cfg.lif.v_thresh
                && self.neurons[idx].refractory_timer == 0
            {
                active = true;
                self.fire(idx, cycle, out);
            }
        }

        self.window_total += 1;
        if active {
            self.window_active += 1;
        }
        Ok(())
    }

    fn apply_fetch(&mut self, range: &MergeRange, origin: &FetchOrigin, values: &[f32]) {
        match origin {
            FetchOrigin::CacheFill => {
                for (i, value) in values.iter().enumerate() {
                    let post = range.post_start + i as u32;
                    if post >= self.cfg.neurons_per_core {
                        break;
                    }
                    self.cache.insert(range.pre, post, *value);
                }
                debug!(self.entity ; "filled pre={} post=[{}, {})",
                    range.pre, range.post_start, range.post_start + values.len() as u32);
            }
            FetchOrigin::Verify { post } => {
                let index = (post - range.post_start) as usize;
                let value = values.get(index).copied().unwrap_or_default();
                self.verify_completed += 1;
                if let Some(verify) = self.cfg.verify {
                    if (value - verify.expected_weight).abs() > verify.epsilon {
                        self.verify_mismatches += 1;
                        warn!(self.entity ; "weight sample pre={} post={} is {value}, expected {}",
                            range.pre, post, verify.expected_weight);
                    }
                }
            }
        }
    }

    fn process_spike(&mut self, spike: &Spike, cycle: u64) -> SimResult {
        let dst = spike.destination_neuron();
        if dst < self.cfg.global_base
            || dst >= self.cfg.global_base + self.cfg.neurons_per_core
        {
            warn!(self.entity ; "{spike} does not target this core, dropped");
            self.spikes_dropped += 1;
            return Ok(());
        }
        let post_local = dst - self.cfg.global_base;

        if self.neurons[post_local as usize].refractory_timer > 0 {
            trace!(self.entity ; "neuron {post_local} refractory, input ignored");
            return Ok(());
        }

        if self.cfg.use_event_weight {
            self.integrate(post_local, spike.weight());
            return Ok(());
        }

        // The weight matrix is indexed by this core's own presynaptic rows;
        // remote sources fold onto a row modulo NPC.
        let pre_local = spike.source_neuron() % self.cfg.neurons_per_core;
        if let Some(weight) = self.cache.lookup(pre_local, post_local) {
            self.integrate(post_local, weight);
        } else {
            // Issue the merged fetch; the triggering spike is discarded and
            // later input to the range hits the warmed cache.
            let range = self
                .cfg
                .merge
                .range(pre_local, post_local, self.cfg.neurons_per_core);
            let addr =
                self.weights
                    .address(self.cfg.tile, self.cfg.core, pre_local, range.post_start);
            if self
                .client
                .fetch(addr, range, FetchOrigin::CacheFill, cycle)?
            {
                match self.cfg.merge {
                    MergePolicy::Row => self.merged_reads_rows += 1,
                    MergePolicy::Cacheline { .. } => self.merged_reads_cachelines += 1,
                }
            }
        }
        Ok(())
    }

    fn integrate(&mut self, post_local: u32, weight: f32) {
        let neuron = &mut self.neurons[post_local as usize];
        neuron.v_mem += weight;
        trace!(self.entity ; "neuron {post_local} v_mem={}", neuron.v_mem);
    }

    fn fire(&mut self, idx: usize, cycle: u64, out: &mut Vec<Spike>) {
        let neuron = &mut self.neurons[idx];
        neuron.v_mem = self.cfg.lif.v_reset;
        neuron.refractory_timer = self.cfg.lif.t_ref;
        neuron.last_spike_cycle = cycle;
        self.neurons_fired += 1;

        let source = self.cfg.global_base + idx as u32;
        debug!(self.entity ; "neuron {idx} fired at cycle {cycle}");

        for target in self.fanout.targets(self.cfg.tile, source) {
            self.spikes_generated += 1;
            out.push(Spike::new(
                &self.entity,
                source,
                target.neuron,
                target.tile,
                target.weight,
                cycle,
            ));
        }
    }

    fn verify_sample(&mut self, cycle: u64) -> SimResult {
        let Some(verify) = self.cfg.verify else {
            return Ok(());
        };
        if self.cfg.use_event_weight
            || cycle < self.cfg.warmup_cycles
            || self.verify_requested >= verify.samples
            || (self.verify_requested - self.verify_completed) as usize
                >= self.cfg.max_outstanding
        {
            return Ok(());
        }

        // Walk a fixed pattern across the matrix, one sample per cycle.
        let npc = self.cfg.neurons_per_core;
        let pre = (self.verify_requested * 7) % npc;
        let post = (self.verify_requested * 13) % npc;
        let range = MergeRange {
            pre,
            post_start: post,
            count: 1,
        };
        let addr = self.weights.address(self.cfg.tile, self.cfg.core, pre, post);
        self.client
            .fetch(addr, range, FetchOrigin::Verify { post }, cycle)?;
        self.verify_requested += 1;
        Ok(())
    }

    /// True while the core has queued input, in-flight fetches or pending
    /// verification samples.
    #[must_use]
    pub fn has_work(&self) -> bool {
        if !self.inbound.is_empty() || self.client.outstanding() > 0 {
            return true;
        }
        match &self.cfg.verify {
            Some(verify) if !self.cfg.use_event_weight => {
                self.verify_completed < verify.samples
            }
            _ => false,
        }
    }

    /// Activity over the monitor window and reset the window.
    pub fn take_window_utilization(&mut self) -> f64 {
        let sample = if self.window_total == 0 {
            0.0
        } else {
            self.window_active as f64 / self.window_total as f64
        };
        self.window_active = 0;
        self.window_total = 0;
        sample
    }

    /// Inspect one neuron (used by tests and the load monitor).
    #[must_use]
    pub fn neuron(&self, idx: usize) -> &NeuronState {
        &self.neurons[idx]
    }

    /// The statistics map emitted at finish.
    #[must_use]
    pub fn statistics(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        stats.insert("spikes_received".to_string(), self.spikes_received);
        stats.insert("spikes_generated".to_string(), self.spikes_generated);
        stats.insert("neurons_fired".to_string(), self.neurons_fired);
        stats.insert("spikes_dropped".to_string(), self.spikes_dropped);
        stats.insert("memory_requests".to_string(), self.client.requests_issued());
        stats.insert("weight_cache_hits".to_string(), self.cache.hits());
        stats.insert("weight_cache_misses".to_string(), self.cache.misses());
        stats.insert("merged_reads_rows".to_string(), self.merged_reads_rows);
        stats.insert(
            "merged_reads_cachelines".to_string(),
            self.merged_reads_cachelines,
        );
        if self.cfg.verify.is_some() {
            stats.insert(
                "weights_verified".to_string(),
                u64::from(self.verify_completed),
            );
            stats.insert("weight_mismatches".to_string(), self.verify_mismatches);
        }
        stats
    }
}

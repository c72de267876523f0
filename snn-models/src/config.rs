// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The simulation configuration surface.

use snn_engine::sim_error;
use snn_engine::types::{SimError, SimResult};

use crate::address::{NeuronMap, WeightMap};
use crate::core::VerifyConfig;
use crate::mesh::Topology;
use crate::neuron::LifParams;
use crate::tile::TestTrafficConfig;
use crate::trace_source::TraceSourceConfig;
use crate::weight_cache::MergePolicy;
use crate::weight_loader::{WeightLoaderConfig, WeightSource};

/// Largest legal core count per tile.
pub const MAX_CORES_PER_TILE: usize = 8;

/// Largest legal neuron count per core.
pub const MAX_NEURONS_PER_CORE: usize = 4096;

/// How firing neurons pick their targets.
#[derive(Clone, Debug)]
pub enum FanOutPolicy {
    /// The layered input/hidden/output bands over the tile grid.
    Layered,
    /// Every fire targets one fixed neuron.
    SingleTarget {
        /// Global id of the target neuron.
        neuron: u32,
    },
}

/// Everything the host configures.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Mesh width.
    pub width: usize,
    /// Mesh height.
    pub height: usize,
    /// Wrap both mesh dimensions.
    pub torus: bool,
    /// Cores per tile.
    pub cores_per_tile: usize,
    /// Neurons per core (NPC).
    pub neurons_per_core: usize,

    /// Firing threshold.
    pub v_thresh: f32,
    /// Post-fire membrane potential.
    pub v_reset: f32,
    /// Resting membrane potential.
    pub v_rest: f32,
    /// Membrane time constant in ms.
    pub tau_mem_ms: f32,
    /// Refractory window in cycles.
    pub t_ref: u32,

    /// Base address of the weight region.
    pub base_weight_addr: u64,
    /// Stride between tiles' weight regions; packed when absent.
    pub per_tile_stride: Option<u64>,
    /// Memory response delay in cycles.
    pub memory_delay: u64,

    /// Where the weights come from.
    pub weight_source: WeightSource,
    /// Pad value for short weight files.
    pub fill_value: f32,
    /// Warn on short weight files.
    pub validate_length: bool,

    /// The replayed spike trace, when present.
    pub spike_trace: Option<TraceSourceConfig>,
    /// Hard stop after this many cycles.
    pub stop_at: Option<u64>,

    /// Ring virtual channels per direction.
    pub ring_vcs: u32,
    /// Credits per ring VC.
    pub ring_credits: u32,
    /// Ring retry queue bound.
    pub retry_queue_len: usize,
    /// NIC send queue bound in packets.
    pub nic_output_buf: usize,

    /// Mesh virtual channels per port.
    pub mesh_vcs: usize,
    /// Credits per mesh VC.
    pub mesh_credits: u32,
    /// Route around congested mesh ports.
    pub adaptive_routing: bool,
    /// Utilization above which the adaptive router detours.
    pub congestion_threshold: f64,

    /// Fetch whole rows instead of cachelines on a miss.
    pub merge_rows: bool,
    /// Cacheline size for the cacheline merge.
    pub cache_line_bytes: u32,
    /// Weight cache bound.
    pub max_cache_entries: usize,
    /// In-flight weight fetch bound.
    pub max_outstanding: usize,
    /// Warm the caches from memory during setup.
    pub preload_weights: bool,
    /// Use event-carried weights instead of the memory path.
    pub use_event_weight: bool,

    /// Cycles before weight verification starts.
    pub warmup_cycles: u64,
    /// Weight verification, when enabled.
    pub verify: Option<VerifyConfig>,
    /// Test traffic, when enabled.
    pub test_traffic: Option<TestTrafficConfig>,
    /// The fan-out policy.
    pub fanout: FanOutPolicy,
    /// The weight carried on fan-out spikes.
    pub fanout_weight: f32,

    /// Cycles between load-monitor observations.
    pub monitor_period: u64,
    /// Utilization spread that counts as imbalance.
    pub imbalance_threshold: f64,
    /// EMA weight of the utilization monitor.
    pub util_alpha: f64,
    /// Cycles between ring deadlock observations.
    pub deadlock_check_period: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            torus: false,
            cores_per_tile: 4,
            neurons_per_core: 64,
            v_thresh: 1.0,
            v_reset: 0.0,
            v_rest: 0.0,
            tau_mem_ms: 20.0,
            t_ref: 2,
            base_weight_addr: 0,
            per_tile_stride: None,
            memory_delay: 4,
            weight_source: WeightSource::Fill,
            fill_value: 0.5,
            validate_length: true,
            spike_trace: None,
            stop_at: None,
            ring_vcs: 2,
            ring_credits: 8,
            retry_queue_len: 64,
            nic_output_buf: 16,
            mesh_vcs: 2,
            mesh_credits: 8,
            adaptive_routing: false,
            congestion_threshold: 0.75,
            merge_rows: false,
            cache_line_bytes: 64,
            max_cache_entries: 4096,
            max_outstanding: 16,
            preload_weights: false,
            use_event_weight: false,
            warmup_cycles: 0,
            verify: None,
            test_traffic: None,
            fanout: FanOutPolicy::Layered,
            fanout_weight: 0.0,
            monitor_period: 100,
            imbalance_threshold: 0.3,
            util_alpha: 0.1,
            deadlock_check_period: 100,
        }
    }
}

impl SimConfig {
    /// The fatal configuration checks run at setup.
    pub fn validate(&self) -> SimResult {
        if self.width == 0 || self.height == 0 {
            return sim_error!(
                "config: mesh shape {}x{} has no tiles",
                self.width,
                self.height
            );
        }
        if self.cores_per_tile == 0 || self.cores_per_tile > MAX_CORES_PER_TILE {
            return sim_error!(
                "config: cores_per_tile {} outside [1, {MAX_CORES_PER_TILE}]",
                self.cores_per_tile
            );
        }
        if self.neurons_per_core == 0 || self.neurons_per_core > MAX_NEURONS_PER_CORE {
            return sim_error!(
                "config: neurons_per_core {} outside [1, {MAX_NEURONS_PER_CORE}]",
                self.neurons_per_core
            );
        }
        if self.torus && self.mesh_vcs < 2 {
            return sim_error!("config: a torus needs >= 2 mesh VCs to stay deadlock free");
        }
        if self.ring_vcs == 0 || self.ring_credits == 0 {
            return sim_error!("config: the ring needs at least one VC and one credit");
        }
        if let Some(test) = &self.test_traffic {
            if test.target_tile as usize >= self.num_tiles() {
                return sim_error!(
                    "config: test traffic targets tile {} of {}",
                    test.target_tile,
                    self.num_tiles()
                );
            }
        }
        // Address-range overlap across cores and tiles.
        self.weight_map()?;
        // Parameter sanity of the LIF constants.
        self.lif()?;
        Ok(())
    }

    /// Number of tiles on the grid.
    #[must_use]
    pub fn num_tiles(&self) -> usize {
        self.width * self.height
    }

    /// The grid as a [`Topology`].
    #[must_use]
    pub fn topology(&self) -> Topology {
        if self.torus {
            Topology::Torus2D {
                width: self.width,
                height: self.height,
            }
        } else {
            Topology::Mesh2D {
                width: self.width,
                height: self.height,
            }
        }
    }

    /// The neuron id partitioning.
    #[must_use]
    pub fn neuron_map(&self) -> NeuronMap {
        NeuronMap::new(self.num_tiles(), self.cores_per_tile, self.neurons_per_core)
    }

    /// The weight address layout.
    pub fn weight_map(&self) -> Result<WeightMap, SimError> {
        let npc = self.neurons_per_core as u32;
        match self.per_tile_stride {
            Some(tile_stride) => {
                let core_stride = u64::from(npc) * u64::from(npc) * 4;
                WeightMap::new(
                    self.base_weight_addr,
                    tile_stride,
                    core_stride,
                    self.cores_per_tile,
                    npc,
                )
            }
            None => WeightMap::packed(self.base_weight_addr, self.cores_per_tile, npc),
        }
    }

    /// The LIF parameter set.
    pub fn lif(&self) -> Result<LifParams, SimError> {
        LifParams::new(
            self.v_thresh,
            self.v_reset,
            self.v_rest,
            self.tau_mem_ms,
            self.t_ref,
        )
    }

    /// The configured miss-merge policy.
    #[must_use]
    pub fn merge_policy(&self) -> MergePolicy {
        if self.merge_rows {
            MergePolicy::Row
        } else {
            MergePolicy::Cacheline {
                line_size_bytes: self.cache_line_bytes,
            }
        }
    }

    /// The loader options.
    #[must_use]
    pub fn weight_loader(&self) -> WeightLoaderConfig {
        WeightLoaderConfig {
            source: self.weight_source.clone(),
            fill_value: self.fill_value,
            validate_length: self.validate_length,
        }
    }
}

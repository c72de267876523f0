// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Neuron address space and the weight address map.
//!
//! The simulated population is partitioned contiguously by tile: tile `t`
//! owns neurons `[t*NPT, (t+1)*NPT)` where `NPT = cores_per_tile *
//! neurons_per_core`. Within a tile, core `c` owns `neurons_per_core`
//! consecutive neurons.

use snn_engine::sim_error;
use snn_engine::types::SimError;

/// Where a global neuron id lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NeuronLocation {
    /// The owning tile.
    pub tile: u32,
    /// The owning core within that tile.
    pub core: usize,
    /// The index within the owning core.
    pub local: u32,
}

/// The global neuron id partitioning.
#[derive(Copy, Clone, Debug)]
pub struct NeuronMap {
    num_tiles: usize,
    cores_per_tile: usize,
    neurons_per_core: usize,
}

impl NeuronMap {
    /// Build the partitioning for the whole simulated population.
    #[must_use]
    pub fn new(num_tiles: usize, cores_per_tile: usize, neurons_per_core: usize) -> Self {
        Self {
            num_tiles,
            cores_per_tile,
            neurons_per_core,
        }
    }

    #[must_use]
    pub fn num_tiles(&self) -> usize {
        self.num_tiles
    }

    #[must_use]
    pub fn cores_per_tile(&self) -> usize {
        self.cores_per_tile
    }

    #[must_use]
    pub fn neurons_per_core(&self) -> usize {
        self.neurons_per_core
    }

    /// Neurons owned by one tile.
    #[must_use]
    pub fn neurons_per_tile(&self) -> usize {
        self.cores_per_tile * self.neurons_per_core
    }

    /// The whole simulated population.
    #[must_use]
    pub fn total_neurons(&self) -> usize {
        self.num_tiles * self.neurons_per_tile()
    }

    /// First global id owned by `tile`.
    #[must_use]
    pub fn tile_base(&self, tile: u32) -> u32 {
        tile * self.neurons_per_tile() as u32
    }

    /// First global id owned by `core` of `tile`.
    #[must_use]
    pub fn core_base(&self, tile: u32, core: usize) -> u32 {
        self.tile_base(tile) + (core * self.neurons_per_core) as u32
    }

    /// Map a global id to its owning tile, core and core-local index.
    ///
    /// Returns `None` for ids outside the population: every delivered spike
    /// must map to exactly one tile and one core, anything else is dropped
    /// by the caller.
    #[must_use]
    pub fn locate(&self, global: u32) -> Option<NeuronLocation> {
        if global as usize >= self.total_neurons() {
            return None;
        }
        let npt = self.neurons_per_tile() as u32;
        let tile = global / npt;
        let local_in_tile = global - tile * npt;
        let core = (local_in_tile as usize) / self.neurons_per_core;
        let local = local_in_tile - (core * self.neurons_per_core) as u32;
        Some(NeuronLocation { tile, core, local })
    }

    /// The owning tile of a global id, if it is within the population.
    #[must_use]
    pub fn tile_of(&self, global: u32) -> Option<u32> {
        self.locate(global).map(|loc| loc.tile)
    }
}

/// The weight matrix address layout.
///
/// Each core owns an NPC x NPC block of f32 values, row-major by
/// presynaptic local index:
///
/// `addr(t, c, p, q) = base + t*tile_stride + c*core_stride + (p*NPC + q)*4`
#[derive(Copy, Clone, Debug)]
pub struct WeightMap {
    base_addr: u64,
    tile_stride: u64,
    core_stride: u64,
    neurons_per_core: u32,
}

/// Bytes of one f32 weight.
pub const WEIGHT_BYTES: u64 = 4;

impl WeightMap {
    /// Build the layout and validate that per-core and per-tile blocks do
    /// not overlap.
    pub fn new(
        base_addr: u64,
        tile_stride: u64,
        core_stride: u64,
        cores_per_tile: usize,
        neurons_per_core: u32,
    ) -> Result<Self, SimError> {
        let block = u64::from(neurons_per_core) * u64::from(neurons_per_core) * WEIGHT_BYTES;
        if core_stride < block {
            return sim_error!(
                "core stride {core_stride} overlaps the {block}-byte weight block"
            );
        }
        if tile_stride < core_stride * cores_per_tile as u64 {
            return sim_error!(
                "tile stride {tile_stride} overlaps {} cores of stride {core_stride}",
                cores_per_tile
            );
        }
        Ok(Self {
            base_addr,
            tile_stride,
            core_stride,
            neurons_per_core,
        })
    }

    /// The default strides: cores and tiles packed back to back.
    pub fn packed(
        base_addr: u64,
        cores_per_tile: usize,
        neurons_per_core: u32,
    ) -> Result<Self, SimError> {
        let core_stride =
            u64::from(neurons_per_core) * u64::from(neurons_per_core) * WEIGHT_BYTES;
        let tile_stride = core_stride * cores_per_tile as u64;
        Self::new(
            base_addr,
            tile_stride,
            core_stride,
            cores_per_tile,
            neurons_per_core,
        )
    }

    /// The base address of one core's weight block.
    #[must_use]
    pub fn core_block_base(&self, tile: u32, core: usize) -> u64 {
        self.base_addr + u64::from(tile) * self.tile_stride + core as u64 * self.core_stride
    }

    /// Bytes in one core's weight block.
    #[must_use]
    pub fn core_block_bytes(&self) -> usize {
        (u64::from(self.neurons_per_core) * u64::from(self.neurons_per_core) * WEIGHT_BYTES)
            as usize
    }

    /// The address of `w[pre_local, post_local]` for a core.
    #[must_use]
    pub fn address(&self, tile: u32, core: usize, pre_local: u32, post_local: u32) -> u64 {
        self.core_block_base(tile, core)
            + (u64::from(pre_local) * u64::from(self.neurons_per_core) + u64::from(post_local))
                * WEIGHT_BYTES
    }

    /// Total bytes of backing store needed for the given number of tiles.
    #[must_use]
    pub fn total_bytes(&self, num_tiles: usize) -> u64 {
        self.tile_stride * num_tiles as u64
    }

    /// The base of the whole weight region.
    #[must_use]
    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }
}

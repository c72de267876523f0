// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The weight-file loader.
//!
//! Weight files are raw little-endian IEEE-754 f32 values, row-major, no
//! header, NPC x NPC values per core. The loader pre-populates the shared
//! memory with untimed writes during setup, the only window in which they
//! are permitted.

use std::cell::Cell;
use std::fs;
use std::rc::Rc;

use async_trait::async_trait;
use snn_engine::engine::Engine;
use snn_engine::sim_error;
use snn_engine::traits::Runnable;
use snn_engine::types::{SimError, SimResult};
use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::{debug, info, warn};

use crate::address::{NeuronMap, WeightMap};
use crate::memory::SharedMemory;

/// Where the weights come from.
#[derive(Clone, Debug)]
pub enum WeightSource {
    /// One file concatenating all cores in global core-index order.
    SingleFile {
        /// Path of the file.
        path: String,
        /// Per-core blocks to skip at the start of the file.
        file_core_offset: usize,
    },
    /// One file per global core index; `{core}` and `{core:02d}` in the
    /// template are substituted.
    PerCoreFiles {
        /// The path template.
        template: String,
    },
    /// No file: every weight becomes the fill value.
    Fill,
}

/// Loader options.
#[derive(Clone, Debug)]
pub struct WeightLoaderConfig {
    /// Where the weights come from.
    pub source: WeightSource,
    /// The value used to pad short files (and for [`WeightSource::Fill`]).
    pub fill_value: f32,
    /// Warn when a file is shorter than expected.
    pub validate_length: bool,
}

/// Pre-populates the weight memory before the simulation runs.
#[derive(EntityDisplay)]
pub struct WeightLoader {
    /// The entity of this loader in the simulation hierarchy.
    pub entity: Rc<Entity>,
    cfg: WeightLoaderConfig,
    map: NeuronMap,
    weights: WeightMap,
    memory: Rc<SharedMemory>,

    floats_written: Cell<u64>,
}

impl WeightLoader {
    /// Create and register the loader.
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        cfg: WeightLoaderConfig,
        map: NeuronMap,
        weights: WeightMap,
        memory: &Rc<SharedMemory>,
    ) -> Rc<Self> {
        let entity = Rc::new(Entity::new(parent, name));
        let rc_self = Rc::new(Self {
            entity,
            cfg,
            map,
            weights,
            memory: memory.clone(),
            floats_written: Cell::new(0),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    fn read_floats(&self, path: &str) -> Result<Vec<f32>, SimError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return sim_error!("{}: cannot read weight file '{path}': {e}", self.entity)
            }
        };
        if bytes.len() % 4 != 0 {
            warn!(self.entity ; "'{path}' length {} is not a multiple of 4, tail ignored",
                bytes.len());
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect())
    }

    /// Write one core's block, padding with the fill value when the slice
    /// is short.
    fn write_core_block(
        &self,
        tile: u32,
        core: usize,
        floats: &[f32],
        warn_short: bool,
    ) -> SimResult {
        let per_core = self.floats_per_core();
        if warn_short && self.cfg.validate_length && floats.len() < per_core {
            warn!(self.entity ; "tile {tile} core {core}: {} of {per_core} weights, padding with {}",
                floats.len(), self.cfg.fill_value);
        }

        let mut bytes = Vec::with_capacity(per_core * 4);
        for idx in 0..per_core {
            let value = floats.get(idx).copied().unwrap_or(self.cfg.fill_value);
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        self.memory
            .write_untimed(self.weights.core_block_base(tile, core), &bytes)?;
        self.floats_written
            .set(self.floats_written.get() + per_core as u64);
        Ok(())
    }

    fn floats_per_core(&self) -> usize {
        let npc = self.map.neurons_per_core();
        npc * npc
    }

    fn substitute_core(template: &str, core: usize) -> String {
        template
            .replace("{core:02d}", format!("{core:02}").as_str())
            .replace("{core}", core.to_string().as_str())
    }

    fn load(&self) -> SimResult {
        let per_core = self.floats_per_core();
        let num_cores = self.map.cores_per_tile();

        match &self.cfg.source {
            WeightSource::SingleFile {
                path,
                file_core_offset,
            } => {
                let all = self.read_floats(path)?;
                for tile in 0..self.map.num_tiles() as u32 {
                    for core in 0..num_cores {
                        let global_core = tile as usize * num_cores + core;
                        let start = (file_core_offset + global_core) * per_core;
                        let end = (start + per_core).min(all.len());
                        let slice = all.get(start..end).unwrap_or(&[]);
                        self.write_core_block(tile, core, slice, true)?;
                    }
                }
                debug!(self.entity ; "loaded single file '{path}'");
            }
            WeightSource::PerCoreFiles { template } => {
                for tile in 0..self.map.num_tiles() as u32 {
                    for core in 0..num_cores {
                        let global_core = tile as usize * num_cores + core;
                        let path = Self::substitute_core(template, global_core);
                        let floats = self.read_floats(&path)?;
                        self.write_core_block(tile, core, &floats, true)?;
                    }
                }
                debug!(self.entity ; "loaded per-core files '{template}'");
            }
            WeightSource::Fill => {
                for tile in 0..self.map.num_tiles() as u32 {
                    for core in 0..num_cores {
                        self.write_core_block(tile, core, &[], false)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Runnable for WeightLoader {
    fn setup(&self) -> SimResult {
        self.load()
    }

    fn finish(&self) {
        info!(self.entity ; "floats_written={}", self.floats_written.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitution() {
        assert_eq!(
            WeightLoader::substitute_core("weights_{core}.bin", 3),
            "weights_3.bin"
        );
        assert_eq!(
            WeightLoader::substitute_core("weights_{core:02d}.bin", 3),
            "weights_03.bin"
        );
        assert_eq!(
            WeightLoader::substitute_core("weights_{core:02d}.bin", 12),
            "weights_12.bin"
        );
    }
}

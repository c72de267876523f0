// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The connection pattern from a firing neuron to its output targets.
//!
//! The pattern is an external policy chosen by configuration: the core
//! hands every fire to a [`FanOut`] object and emits one spike per target.

use crate::address::NeuronMap;

/// One output connection of a firing neuron.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FanOutTarget {
    /// Global id of the postsynaptic neuron.
    pub neuron: u32,
    /// The tile addressed by the output spike.
    pub tile: u32,
    /// The weight carried on the spike (only consumed when the
    /// event-carried weight path is configured).
    pub weight: f32,
}

/// The mapping from a firing neuron to its output destinations.
pub trait FanOut {
    /// The targets of a fire of `source_neuron` (global id) on
    /// `source_tile`.
    fn targets(&self, source_tile: u32, source_neuron: u32) -> Vec<FanOutTarget>;
}

/// A layered input/hidden/output topology over the tile grid.
///
/// The first quarter of the tiles (at least one) form the input band, the
/// last quarter the output band and the rest the hidden band. Input tiles
/// project into the hidden band, hidden tiles project into the output band
/// and output tiles do not emit. On a 4x4 mesh this reproduces the
/// 4-input / 8-hidden / 4-output layering the address space was designed
/// around.
///
/// On meshes too small to carry three bands the projected tile can fall
/// outside the grid; such spikes are dropped (and counted) at dispatch.
pub struct LayeredFanOut {
    map: NeuronMap,
    num_input: u32,
    num_hidden: u32,
    num_output: u32,
    weight: f32,
}

impl LayeredFanOut {
    /// Partition `map`'s tiles into the three bands.
    #[must_use]
    pub fn new(map: NeuronMap, weight: f32) -> Self {
        let num_tiles = map.num_tiles() as u32;
        let num_input = (num_tiles / 4).max(1);
        let num_output = (num_tiles / 4).max(1);
        let num_hidden = num_tiles.saturating_sub(num_input + num_output);
        Self {
            map,
            num_input,
            num_hidden,
            num_output,
            weight,
        }
    }

    fn band_of(&self, tile: u32) -> Band {
        if tile < self.num_input {
            Band::Input
        } else if tile < self.num_input + self.num_hidden {
            Band::Hidden
        } else {
            Band::Output
        }
    }
}

enum Band {
    Input,
    Hidden,
    Output,
}

impl FanOut for LayeredFanOut {
    fn targets(&self, source_tile: u32, source_neuron: u32) -> Vec<FanOutTarget> {
        let npt = self.map.neurons_per_tile() as u32;
        let local = source_neuron - self.map.tile_base(source_tile);

        match self.band_of(source_tile) {
            Band::Input => {
                // Spread each input tile's neurons across the hidden band.
                let spread = self.num_hidden.max(1);
                let hidden_tile = self.num_input + (source_tile + local) % spread;
                let neuron = hidden_tile * npt + local % npt;
                vec![FanOutTarget {
                    neuron,
                    tile: hidden_tile,
                    weight: self.weight,
                }]
            }
            Band::Hidden => {
                // Group consecutive hidden tiles onto one output tile.
                let hidden_index = source_tile - self.num_input;
                let per_output = self.num_hidden.div_ceil(self.num_output).max(1);
                let output_tile = self.num_input + self.num_hidden + hidden_index / per_output;
                let neuron = output_tile * npt + local % npt;
                vec![FanOutTarget {
                    neuron,
                    tile: output_tile,
                    weight: self.weight,
                }]
            }
            // The output band terminates the network.
            Band::Output => Vec::new(),
        }
    }
}

/// Every fire maps to one fixed target.
pub struct SingleTargetFanOut {
    /// Global id of the target neuron.
    pub neuron: u32,
    /// The tile owning the target neuron.
    pub tile: u32,
    /// The weight carried on the spike.
    pub weight: f32,
}

impl FanOut for SingleTargetFanOut {
    fn targets(&self, _source_tile: u32, _source_neuron: u32) -> Vec<FanOutTarget> {
        vec![FanOutTarget {
            neuron: self.neuron,
            tile: self.tile,
            weight: self.weight,
        }]
    }
}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Leaky integrate-and-fire neuron state.

use snn_engine::sim_error;
use snn_engine::types::SimError;

/// Per-neuron mutable state, owned by exactly one core.
#[derive(Clone, Debug)]
pub struct NeuronState {
    /// Membrane potential.
    pub v_mem: f32,
    /// Refractory cycles remaining; input is ignored while non-zero.
    pub refractory_timer: u32,
    /// Cycle of the most recent fire.
    pub last_spike_cycle: u64,
}

impl NeuronState {
    /// A neuron at rest.
    #[must_use]
    pub fn new(v_rest: f32) -> Self {
        Self {
            v_mem: v_rest,
            refractory_timer: 0,
            last_spike_cycle: 0,
        }
    }
}

/// The LIF parameters shared by all neurons of a core.
#[derive(Clone, Debug)]
pub struct LifParams {
    /// Membrane potential threshold at which a neuron fires.
    pub v_thresh: f32,
    /// Membrane potential after a fire.
    pub v_reset: f32,
    /// Resting membrane potential that the leak decays towards.
    pub v_rest: f32,
    /// Membrane time constant in ms.
    pub tau_mem_ms: f32,
    /// Refractory window in cycles.
    pub t_ref: u32,

    /// Precomputed `exp(-dt/tau)` for the 1ms-per-tick time step.
    leak_factor: f32,
}

impl LifParams {
    /// Build the parameter set, precomputing the leak factor.
    pub fn new(
        v_thresh: f32,
        v_reset: f32,
        v_rest: f32,
        tau_mem_ms: f32,
        t_ref: u32,
    ) -> Result<Self, SimError> {
        if !(tau_mem_ms > 0.0) {
            return sim_error!("tau_mem must be positive, got {tau_mem_ms}");
        }
        let dt_ms = 1.0f32;
        Ok(Self {
            v_thresh,
            v_reset,
            v_rest,
            tau_mem_ms,
            t_ref,
            leak_factor: (-dt_ms / tau_mem_ms).exp(),
        })
    }

    /// The precomputed per-tick leak factor.
    #[must_use]
    pub fn leak_factor(&self) -> f32 {
        self.leak_factor
    }

    /// Exponential decay of the membrane potential over one tick:
    /// `v(t+dt) = v_rest + (v(t) - v_rest) * exp(-dt/tau)`.
    #[must_use]
    pub fn leak(&self, v_mem: f32) -> f32 {
        self.v_rest + (v_mem - self.v_rest) * self.leak_factor
    }
}

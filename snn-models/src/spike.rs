// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The spike value type exchanged between cores, rings and the mesh.

use std::fmt::Display;
use std::rc::Rc;

use snn_engine::sim_error;
use snn_engine::traits::{Routable, SimObject, TotalBytes};
use snn_engine::types::SimError;
use snn_track::entity::Entity;
use snn_track::id::Unique;
use snn_track::{create_id, Id};

/// A spike is dropped once it has taken this many network hops.
pub const MAX_HOPS: u32 = 10;

/// Number of bytes of a [`Spike`] on the wire.
pub const SPIKE_WIRE_BYTES: usize = 28;

/// One spike travelling from a source neuron to a destination neuron.
///
/// A spike is immutable once created apart from its hop count, which the
/// mesh updates as the spike is forwarded. Ownership transfers on every
/// enqueue or send; a spike is owned by exactly one component at a time.
#[derive(Clone, Debug)]
pub struct Spike {
    id: Id,
    source_neuron: u32,
    destination_neuron: u32,
    destination_tile: u32,
    weight: f32,
    timestamp: u64,
    hop_count: u32,
}

impl Spike {
    /// Create a new spike with a zero hop count.
    #[must_use]
    pub fn new(
        created_by: &Rc<Entity>,
        source_neuron: u32,
        destination_neuron: u32,
        destination_tile: u32,
        weight: f32,
        timestamp: u64,
    ) -> Self {
        Self {
            id: create_id!(created_by),
            source_neuron,
            destination_neuron,
            destination_tile,
            weight,
            timestamp,
            hop_count: 0,
        }
    }

    #[must_use]
    pub fn source_neuron(&self) -> u32 {
        self.source_neuron
    }

    #[must_use]
    pub fn destination_neuron(&self) -> u32 {
        self.destination_neuron
    }

    #[must_use]
    pub fn destination_tile(&self) -> u32 {
        self.destination_tile
    }

    #[must_use]
    pub fn weight(&self) -> f32 {
        self.weight
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn hop_count(&self) -> u32 {
        self.hop_count
    }

    /// Overwrite the hop count, used when a spike is rebuilt from a packet.
    pub fn set_hop_count(&mut self, hops: u32) {
        self.hop_count = hops;
    }

    /// True once the spike has exceeded its hop budget.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.hop_count >= MAX_HOPS
    }

    /// Serialize all six fields as little-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SPIKE_WIRE_BYTES] {
        let mut bytes = [0u8; SPIKE_WIRE_BYTES];
        bytes[0..4].copy_from_slice(&self.source_neuron.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.destination_neuron.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.destination_tile.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.weight.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.hop_count.to_le_bytes());
        bytes
    }

    /// Rebuild a spike from its wire form.
    pub fn from_bytes(created_by: &Rc<Entity>, bytes: &[u8]) -> Result<Self, SimError> {
        if bytes.len() < SPIKE_WIRE_BYTES {
            return sim_error!(
                "spike payload too short: {} of {} bytes",
                bytes.len(),
                SPIKE_WIRE_BYTES
            );
        }
        Ok(Self {
            id: create_id!(created_by),
            source_neuron: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            destination_neuron: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            destination_tile: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            weight: f32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            timestamp: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            hop_count: u32::from_le_bytes(bytes[24..28].try_into().unwrap()),
        })
    }
}

impl Display for Spike {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "spike {}->{} (tile {})",
            self.source_neuron, self.destination_neuron, self.destination_tile
        )
    }
}

impl TotalBytes for Spike {
    fn total_bytes(&self) -> usize {
        SPIKE_WIRE_BYTES
    }
}

impl Routable for Spike {
    fn destination(&self) -> u64 {
        u64::from(self.destination_tile)
    }
}

impl Unique for Spike {
    fn id(&self) -> Id {
        self.id
    }
}

impl SimObject for Spike {}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The tile's mesh endpoint: packetization and the credit-gated send
//! queue.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::{trace, warn};

use crate::mesh::{MeshEndpoint, MeshPacket, MESH_PACKET_BYTES};
use crate::spike::Spike;

/// The virtual network spikes travel on.
const SPIKE_VN: usize = 0;

/// The NIC between a tile and the mesh.
#[derive(EntityDisplay)]
pub struct Nic {
    entity: Rc<Entity>,
    tile_id: u32,
    endpoint: MeshEndpoint,

    send_queue: VecDeque<Spike>,
    output_buf_packets: usize,

    spikes_sent: u64,
    spikes_received: u64,
    packets_sent: u64,
    packets_received: u64,
    packets_dropped: u64,
}

impl Nic {
    /// Create the NIC for `tile_id` over its mesh endpoint.
    #[must_use]
    pub fn new(
        parent: &Rc<Entity>,
        tile_id: u32,
        endpoint: MeshEndpoint,
        output_buf_packets: usize,
    ) -> Self {
        let entity = Rc::new(Entity::new(parent, "nic"));
        Self {
            entity,
            tile_id,
            endpoint,
            send_queue: VecDeque::new(),
            output_buf_packets,
            spikes_sent: 0,
            spikes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            packets_dropped: 0,
        }
    }

    /// Queue a spike for the mesh; overflow drops the spike.
    pub fn send(&mut self, spike: Spike) {
        if self.send_queue.len() >= self.output_buf_packets {
            warn!(self.entity ; "send queue full, dropping {spike}");
            self.packets_dropped += 1;
            return;
        }
        self.send_queue.push_back(spike);
    }

    /// Drain the send queue while the mesh grants credit.
    pub fn tick(&mut self, cycle: u64) {
        while !self.send_queue.is_empty()
            && self.endpoint.space_to_send(SPIKE_VN, MESH_PACKET_BYTES)
        {
            let spike = self.send_queue.pop_front().unwrap();
            trace!(self.entity ; "packetize {spike}");
            let packet = MeshPacket {
                src_tile: self.tile_id,
                dst_tile: spike.destination_tile(),
                vn: SPIKE_VN,
                size_bytes: MESH_PACKET_BYTES,
                hops: spike.hop_count(),
                payload: spike.to_bytes().to_vec(),
            };
            self.endpoint.send(packet, cycle);
            self.packets_sent += 1;
            self.spikes_sent += 1;
        }
    }

    /// Unpack every packet the mesh has delivered before `now`.
    pub fn poll_receive(&mut self, now: u64) -> Vec<Spike> {
        let mut spikes = Vec::new();
        while let Some(packet) = self.endpoint.recv(now) {
            self.packets_received += 1;
            match Spike::from_bytes(&self.entity, &packet.payload) {
                Ok(mut spike) => {
                    spike.set_hop_count(packet.hops);
                    self.spikes_received += 1;
                    spikes.push(spike);
                }
                Err(e) => {
                    warn!(self.entity ; "undecodable packet from tile {}: {e}", packet.src_tile);
                    self.packets_dropped += 1;
                }
            }
        }
        spikes
    }

    /// Work still queued on either side of the endpoint.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.send_queue.len() + self.endpoint.pending_inbound()
    }

    /// The statistics map emitted at finish.
    #[must_use]
    pub fn statistics(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        stats.insert("spikes_sent".to_string(), self.spikes_sent);
        stats.insert("spikes_received".to_string(), self.spikes_received);
        stats.insert("packets_sent".to_string(), self.packets_sent);
        stats.insert("packets_received".to_string(), self.packets_received);
        stats.insert("packets_dropped".to_string(), self.packets_dropped);
        stats.insert(
            "send_buffer_occupancy".to_string(),
            self.send_queue.len() as u64,
        );
        stats
    }
}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The mesh router array and its endpoints.
//!
//! Each router has five input ports (one per [`MeshPort`]) with per-VC
//! buffers under credit flow control, and forwards at most one packet per
//! output port per tick. Endpoints inject through their router's `Local`
//! input port and drain delivered packets from a stamped inbound queue, so
//! tiles observe deliveries in the cycle after they happen regardless of
//! task order.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use snn_engine::engine::Engine;
use snn_engine::sim_error;
use snn_engine::time::clock::Clock;
use snn_engine::traits::Runnable;
use snn_engine::types::{SimError, SimResult};
use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::{info, trace};

use crate::mesh::{MeshPort, Topology};
use crate::spike::MAX_HOPS;

/// Fixed size of one mesh packet on the wire.
pub const MESH_PACKET_BYTES: usize = 64;

/// One packet crossing the mesh, carrying a serialized spike.
#[derive(Clone, Debug)]
pub struct MeshPacket {
    /// The injecting tile.
    pub src_tile: u32,
    /// The tile whose endpoint receives the packet.
    pub dst_tile: u32,
    /// The virtual network / VC index the packet travels on.
    pub vn: usize,
    /// Wire size; always [`MESH_PACKET_BYTES`].
    pub size_bytes: usize,
    /// Router-to-router hops taken so far.
    pub hops: u32,
    /// The serialized spike.
    pub payload: Vec<u8>,
}

/// Mesh configuration.
#[derive(Clone, Debug)]
pub struct MeshConfig {
    /// The grid shape.
    pub topology: Topology,
    /// Virtual channels per input port.
    pub num_vcs: usize,
    /// Buffer slots (credits) per VC.
    pub credits_per_vc: u32,
    /// Route around congested ports when possible.
    pub adaptive: bool,
    /// Output-port utilization above which the adaptive router looks for an
    /// alternative productive direction.
    pub congestion_threshold: f64,
}

/// Utilization EMA weight, matching the tile load monitor.
const UTIL_EMA_ALPHA: f64 = 0.1;

struct InFlight {
    packet: MeshPacket,
    moved_cycle: u64,
}

struct MeshVc {
    buffer: VecDeque<InFlight>,
    credits: u32,
    max_credits: u32,
}

impl MeshVc {
    fn new(max_credits: u32) -> Self {
        Self {
            buffer: VecDeque::new(),
            credits: max_credits,
            max_credits,
        }
    }

    fn has_space(&self) -> bool {
        self.credits > 0
    }

    fn push(&mut self, entry: InFlight) {
        self.credits -= 1;
        self.buffer.push_back(entry);
    }

    fn pop(&mut self) -> InFlight {
        let entry = self.buffer.pop_front().unwrap();
        self.credits += 1;
        entry
    }
}

struct RouterNode {
    /// Input VC buffers, indexed by [`MeshPort::index`] then VC.
    inputs: Vec<Vec<MeshVc>>,
    /// Output-port utilization EMA, indexed by [`MeshPort::index`].
    out_utilization: [f64; 5],
}

impl RouterNode {
    fn new(num_vcs: usize, credits_per_vc: u32) -> Self {
        let inputs = (0..MeshPort::ALL.len())
            .map(|_| (0..num_vcs).map(|_| MeshVc::new(credits_per_vc)).collect())
            .collect();
        Self {
            inputs,
            out_utilization: [0.0; 5],
        }
    }
}

struct EndpointQueue {
    inbound: VecDeque<(u64, MeshPacket)>,
}

struct FabricState {
    config: MeshConfig,
    routers: Vec<RouterNode>,
    endpoints: Vec<EndpointQueue>,
    /// Round-robin input-port cursor per router and output port.
    rr_cursors: Vec<[usize; 5]>,

    packets_forwarded: u64,
    packets_delivered: u64,
    spikes_dropped: u64,
}

impl FabricState {
    /// Packets in flight, including delivered ones the tiles have not yet
    /// drained: the fabric stays live until they are picked up.
    fn has_work(&self) -> bool {
        self.routers.iter().any(|router| {
            router
                .inputs
                .iter()
                .any(|port| port.iter().any(|vc| !vc.buffer.is_empty()))
        }) || self
            .endpoints
            .iter()
            .any(|endpoint| !endpoint.inbound.is_empty())
    }

    /// The output port a packet at `router` takes, possibly detouring
    /// around congestion but never off a minimal path.
    fn select_port(&self, router: usize, dst: usize) -> MeshPort {
        let default = self.config.topology.route(router, dst);
        if !self.config.adaptive || default == MeshPort::Local {
            return default;
        }
        let node = &self.routers[router];
        if node.out_utilization[default.index()] <= self.config.congestion_threshold {
            return default;
        }
        self.config
            .topology
            .productive_ports(router, dst)
            .into_iter()
            .min_by(|a, b| {
                node.out_utilization[a.index()]
                    .partial_cmp(&node.out_utilization[b.index()])
                    .unwrap()
            })
            .unwrap_or(default)
    }
}

/// The mesh router fabric.
#[derive(EntityDisplay)]
pub struct MeshFabric {
    /// The entity of this fabric in the simulation hierarchy.
    pub entity: Rc<Entity>,
    clock: Clock,
    state: Rc<RefCell<FabricState>>,
}

impl MeshFabric {
    /// Create and register the fabric.
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Rc<Entity>,
        name: &str,
        config: MeshConfig,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Rc::new(Entity::new(parent, name));
        if config.num_vcs == 0 || config.credits_per_vc == 0 {
            return sim_error!("{entity}: needs at least one VC and one credit");
        }
        if matches!(config.topology, Topology::Torus2D { .. }) && config.num_vcs < 2 {
            return sim_error!("{entity}: a torus needs >= 2 VCs to stay deadlock free");
        }

        let num_nodes = config.topology.num_tiles();
        let routers = (0..num_nodes)
            .map(|_| RouterNode::new(config.num_vcs, config.credits_per_vc))
            .collect();
        let endpoints = (0..num_nodes)
            .map(|_| EndpointQueue {
                inbound: VecDeque::new(),
            })
            .collect();
        let state = FabricState {
            config,
            routers,
            endpoints,
            rr_cursors: vec![[0; 5]; num_nodes],
            packets_forwarded: 0,
            packets_delivered: 0,
            spikes_dropped: 0,
        };

        let rc_self = Rc::new(Self {
            entity,
            clock: clock.clone(),
            state: Rc::new(RefCell::new(state)),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    /// The endpoint handle for one tile's NIC.
    #[must_use]
    pub fn endpoint(&self, node: usize) -> MeshEndpoint {
        MeshEndpoint {
            state: self.state.clone(),
            node,
        }
    }

    /// Advance every router by one cycle.
    fn tick(&self, cycle: u64) {
        let mut state = self.state.borrow_mut();
        let num_routers = state.routers.len();

        for router in 0..num_routers {
            for out_port in MeshPort::ALL {
                self.tick_output_port(&mut state, router, out_port, cycle);
            }
        }
    }

    /// Grant one input VC to `out_port` and move its head packet.
    fn tick_output_port(
        &self,
        state: &mut FabricState,
        router: usize,
        out_port: MeshPort,
        cycle: u64,
    ) {
        let num_ports = MeshPort::ALL.len();
        let num_vcs = state.config.num_vcs;
        let cursor = state.rr_cursors[router][out_port.index()];

        // Find the granted (input port, vc): round-robin over input ports,
        // VCs in index order, only heads that routed to this output port
        // and can actually move.
        let mut grant = None;
        'search: for offset in 0..num_ports {
            let in_port = (cursor + offset) % num_ports;
            for vc in 0..num_vcs {
                let Some(head) = state.routers[router].inputs[in_port][vc].buffer.front() else {
                    continue;
                };
                if head.moved_cycle >= cycle {
                    continue;
                }
                let dst = head.packet.dst_tile as usize;
                if state.select_port(router, dst) != out_port {
                    continue;
                }
                if out_port != MeshPort::Local {
                    // Only grant when the downstream VC has a credit.
                    let next = state
                        .config
                        .topology
                        .neighbor(router, out_port)
                        .expect("XY routing never leaves the grid");
                    let arrival = out_port.opposite().index();
                    let vn = self.downstream_vn(state, router, out_port, &head.packet);
                    if !state.routers[next].inputs[arrival][vn].has_space() {
                        continue;
                    }
                }
                grant = Some((in_port, vc));
                break 'search;
            }
        }
        let Some((in_port, vc)) = grant else {
            // Idle port: decay its utilization.
            let util = &mut state.routers[router].out_utilization[out_port.index()];
            *util *= 1.0 - UTIL_EMA_ALPHA;
            return;
        };

        state.rr_cursors[router][out_port.index()] = (in_port + 1) % num_ports;
        let mut entry = state.routers[router].inputs[in_port][vc].pop();
        entry.moved_cycle = cycle;

        if out_port == MeshPort::Local {
            trace!(self.entity ; "deliver {}->{} at router {router}",
                entry.packet.src_tile, entry.packet.dst_tile);
            state.packets_delivered += 1;
            state.endpoints[router].inbound.push_back((cycle, entry.packet));
        } else {
            entry.packet.hops += 1;
            if entry.packet.hops >= MAX_HOPS {
                // Expired in flight; low-verbosity log only.
                trace!(self.entity ; "packet {}->{} expired after {} hops",
                    entry.packet.src_tile, entry.packet.dst_tile, entry.packet.hops);
                state.spikes_dropped += 1;
            } else {
                let next = state
                    .config
                    .topology
                    .neighbor(router, out_port)
                    .expect("XY routing never leaves the grid");
                let arrival = out_port.opposite().index();
                let vn = self.downstream_vn(state, router, out_port, &entry.packet);
                entry.packet.vn = vn;
                state.packets_forwarded += 1;
                state.routers[next].inputs[arrival][vn].push(entry);
            }
        }

        let util = &mut state.routers[router].out_utilization[out_port.index()];
        *util = UTIL_EMA_ALPHA + (1.0 - UTIL_EMA_ALPHA) * *util;
    }

    /// The VC a packet uses on the next hop: its own, or the escape VC
    /// when crossing the torus dateline.
    fn downstream_vn(
        &self,
        state: &FabricState,
        router: usize,
        out_port: MeshPort,
        packet: &MeshPacket,
    ) -> usize {
        if state.config.topology.is_wrap_hop(router, out_port) {
            1
        } else {
            packet.vn.min(state.config.num_vcs - 1)
        }
    }

    /// The aggregate statistics map.
    #[must_use]
    pub fn statistics(&self) -> BTreeMap<String, u64> {
        let state = self.state.borrow();
        let mut stats = BTreeMap::new();
        stats.insert("packets_forwarded".to_string(), state.packets_forwarded);
        stats.insert("packets_delivered".to_string(), state.packets_delivered);
        stats.insert("spikes_dropped".to_string(), state.spikes_dropped);
        stats
    }
}

#[async_trait(?Send)]
impl Runnable for MeshFabric {
    async fn run(&self) -> SimResult {
        loop {
            if self.state.borrow().has_work() {
                self.clock.wait_ticks(1).await;
            } else {
                self.clock.wait_ticks_or_exit(1).await;
            }
            self.tick(self.clock.tick_now().tick());
        }
    }

    fn finish(&self) {
        for (key, value) in self.statistics() {
            info!(self.entity ; "{key}={value}");
        }
    }
}

/// One tile's window onto the fabric.
#[derive(Clone)]
pub struct MeshEndpoint {
    state: Rc<RefCell<FabricState>>,
    node: usize,
}

impl MeshEndpoint {
    /// True when the local injection VC for `vn` has a free slot for a
    /// packet of `size_bytes`.
    #[must_use]
    pub fn space_to_send(&self, vn: usize, size_bytes: usize) -> bool {
        if size_bytes > MESH_PACKET_BYTES {
            return false;
        }
        let state = self.state.borrow();
        state.routers[self.node].inputs[MeshPort::Local.index()]
            .get(vn)
            .is_some_and(MeshVc::has_space)
    }

    /// Inject a packet; returns false when there is no credit.
    pub fn send(&self, packet: MeshPacket, cycle: u64) -> bool {
        let mut state = self.state.borrow_mut();
        let vn = packet.vn;
        let vc = &mut state.routers[self.node].inputs[MeshPort::Local.index()][vn];
        if !vc.has_space() {
            return false;
        }
        vc.push(InFlight {
            packet,
            moved_cycle: cycle,
        });
        true
    }

    /// Take one delivered packet, if any arrived before the current cycle.
    pub fn recv(&self, now: u64) -> Option<MeshPacket> {
        let mut state = self.state.borrow_mut();
        let inbound = &mut state.endpoints[self.node].inbound;
        if inbound.front().is_some_and(|(delivered, _)| *delivered < now) {
            inbound.pop_front().map(|(_, packet)| packet)
        } else {
            None
        }
    }

    /// Packets delivered but not yet drained.
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        self.state.borrow().endpoints[self.node].inbound.len()
    }
}

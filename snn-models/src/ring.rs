// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The on-tile bidirectional ring with virtual channels and credit flow
//! control.
//!
//! The ring owns an arena of nodes; neighbours are integer indices. Each
//! node carries per-direction virtual channels (VC id doubles as its
//! priority, 0 highest) with a credit counter tracking its own free slots:
//! `buffer.len() + credits == max_credits` at all times.
//!
//! A message never moves in the cycle it arrived, so an uncongested message
//! reaches its destination ejection queue in exactly `hops(src, dst, dir)`
//! cycles, independent of the node iteration order.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use snn_engine::sim_error;
use snn_engine::types::SimError;
use snn_model_builder::EntityDisplay;
use snn_track::entity::Entity;
use snn_track::{trace, warn};

use crate::memory::RequestId;
use crate::spike::Spike;

/// The direction a message takes around the ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RingDirection {
    /// Towards `next_cw`.
    Clockwise,
    /// Towards `next_ccw`.
    CounterClockwise,
    /// The destination is the local node.
    Local,
}

/// What a ring message carries.
#[derive(Clone, Debug)]
pub enum RingPayload {
    /// A spike crossing cores.
    Spike(Spike),
    /// A memory request forwarded on behalf of a core.
    MemRequest(RequestId),
    /// A memory response on its way back.
    MemResponse(RequestId),
    /// Control traffic.
    Control,
}

/// One message in flight on the ring.
#[derive(Clone, Debug)]
pub struct RingMessage {
    /// The injecting node.
    pub src_node: usize,
    /// The node whose ejection queue the message is headed for.
    pub dst_node: usize,
    /// Message priority, 0 highest.
    pub priority: u32,
    /// The cycle the message entered the ring.
    pub cycle_injected: u64,
    /// The payload.
    pub payload: RingPayload,

    /// The cycle of the last hop; a message never moves twice per cycle.
    moved_cycle: u64,
}

/// The activity state of one virtual channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum VcState {
    /// Empty.
    #[default]
    Idle,
    /// Holding or moving data.
    Active,
    /// Head of line could not move last cycle.
    Blocked,
}

/// One virtual channel: a FIFO plus the credit counter for its own slots.
#[derive(Debug)]
pub struct VirtualChannel {
    priority: u32,
    buffer: VecDeque<RingMessage>,
    credits: u32,
    max_credits: u32,
    state: VcState,
}

impl VirtualChannel {
    fn new(priority: u32, max_credits: u32) -> Self {
        Self {
            priority,
            buffer: VecDeque::new(),
            credits: max_credits,
            max_credits,
            state: VcState::Idle,
        }
    }

    /// A free slot is available downstream of the sender.
    #[must_use]
    pub fn has_space(&self) -> bool {
        self.credits > 0
    }

    /// The VC holds at least one message.
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// The current credit count.
    #[must_use]
    pub fn credits(&self) -> u32 {
        self.credits
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.buffer.len()
    }

    fn push(&mut self, message: RingMessage) {
        self.credits -= 1;
        self.buffer.push_back(message);
        self.state = VcState::Active;
    }

    fn pop(&mut self) -> RingMessage {
        let message = self.buffer.pop_front().unwrap();
        // The freed slot immediately becomes a credit again.
        self.credits += 1;
        if self.buffer.is_empty() {
            self.state = VcState::Idle;
        }
        message
    }
}

/// One node of the ring arena.
struct RingNode {
    next_cw: usize,
    prev_cw: usize,
    next_ccw: usize,
    prev_ccw: usize,

    cw_vcs: Vec<VirtualChannel>,
    ccw_vcs: Vec<VirtualChannel>,
    local_vcs: Vec<VirtualChannel>,

    ejection: VecDeque<RingMessage>,

    messages_injected: u64,
    messages_ejected: u64,
    messages_forwarded: u64,
}

impl RingNode {
    fn new(num_vcs: u32, credits_per_vc: u32) -> Self {
        let build = |_| {
            (0..num_vcs)
                .map(|vc| VirtualChannel::new(vc, credits_per_vc))
                .collect()
        };
        Self {
            next_cw: 0,
            prev_cw: 0,
            next_ccw: 0,
            prev_ccw: 0,
            cw_vcs: build(0),
            ccw_vcs: build(1),
            local_vcs: build(2),
            ejection: VecDeque::new(),
            messages_injected: 0,
            messages_ejected: 0,
            messages_forwarded: 0,
        }
    }

    fn vcs(&self, direction: RingDirection) -> &Vec<VirtualChannel> {
        match direction {
            RingDirection::Clockwise => &self.cw_vcs,
            RingDirection::CounterClockwise => &self.ccw_vcs,
            RingDirection::Local => &self.local_vcs,
        }
    }

    fn vcs_mut(&mut self, direction: RingDirection) -> &mut Vec<VirtualChannel> {
        match direction {
            RingDirection::Clockwise => &mut self.cw_vcs,
            RingDirection::CounterClockwise => &mut self.ccw_vcs,
            RingDirection::Local => &mut self.local_vcs,
        }
    }

    /// Prefer an exact priority match, then any VC with a free slot.
    fn select_vc(&self, direction: RingDirection, priority: u32) -> Option<usize> {
        let vcs = self.vcs(direction);
        vcs.iter()
            .position(|vc| vc.priority == priority && vc.has_space())
            .or_else(|| vcs.iter().position(VirtualChannel::has_space))
    }
}

/// The bidirectional on-tile ring.
#[derive(EntityDisplay)]
pub struct Ring {
    /// The entity of this ring in the simulation hierarchy.
    pub entity: Rc<Entity>,
    nodes: Vec<RingNode>,

    /// Memoised `(src, dst) -> direction` lookup.
    route_table: Vec<RingDirection>,

    /// Round-robin cursors per node and direction for equal-priority VC
    /// arbitration.
    rr_cursors: Vec<[usize; 2]>,

    /// Per-direction all-blocked observation from the previous check.
    blocked_last: [bool; 2],
    deadlock_warnings: u64,
}

const TICK_DIRECTIONS: [RingDirection; 2] =
    [RingDirection::Clockwise, RingDirection::CounterClockwise];

impl Ring {
    /// Build a closed ring of `num_nodes` nodes.
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        num_nodes: usize,
        num_vcs: u32,
        credits_per_vc: u32,
    ) -> Result<Self, SimError> {
        if num_nodes < 2 {
            return sim_error!("a ring needs at least 2 nodes, got {num_nodes}");
        }
        if num_vcs < 1 || credits_per_vc < 1 {
            return sim_error!(
                "a ring needs at least one VC and one credit, got {num_vcs}/{credits_per_vc}"
            );
        }
        let entity = Rc::new(Entity::new(parent, name));

        let mut nodes: Vec<RingNode> = (0..num_nodes)
            .map(|_| RingNode::new(num_vcs, credits_per_vc))
            .collect();
        for (i, node) in nodes.iter_mut().enumerate() {
            node.next_cw = (i + 1) % num_nodes;
            node.prev_cw = (i + num_nodes - 1) % num_nodes;
            node.next_ccw = (i + num_nodes - 1) % num_nodes;
            node.prev_ccw = (i + 1) % num_nodes;
        }

        let mut route_table = Vec::with_capacity(num_nodes * num_nodes);
        for src in 0..num_nodes {
            for dst in 0..num_nodes {
                route_table.push(Self::compute_route(src, dst, num_nodes));
            }
        }

        let ring = Self {
            entity,
            nodes,
            route_table,
            rr_cursors: vec![[0, 0]; num_nodes],
            blocked_last: [false, false],
            deadlock_warnings: 0,
        };
        debug_assert!(ring.verify_topology());
        Ok(ring)
    }

    fn compute_route(src: usize, dst: usize, num_nodes: usize) -> RingDirection {
        if src == dst {
            return RingDirection::Local;
        }
        let hops_cw = (dst + num_nodes - src) % num_nodes;
        let hops_ccw = (src + num_nodes - dst) % num_nodes;
        // Ties go clockwise.
        if hops_cw <= hops_ccw {
            RingDirection::Clockwise
        } else {
            RingDirection::CounterClockwise
        }
    }

    /// The memoised direction decision for `(src, dst)`.
    #[must_use]
    pub fn select_route(&self, src: usize, dst: usize) -> RingDirection {
        self.route_table[src * self.nodes.len() + dst]
    }

    /// Hop count between two nodes in the given direction.
    #[must_use]
    pub fn hops(&self, src: usize, dst: usize, direction: RingDirection) -> usize {
        let n = self.nodes.len();
        match direction {
            RingDirection::Clockwise => (dst + n - src) % n,
            RingDirection::CounterClockwise => (src + n - dst) % n,
            RingDirection::Local => 0,
        }
    }

    /// Inject a message at `src` towards `dst`.
    ///
    /// Fails with an error if `src == dst` (local delivery is the caller's
    /// job) or an id is invalid. Returns `Ok(false)` when no VC has a free
    /// slot: the caller holds the message and retries.
    pub fn send(
        &mut self,
        src: usize,
        dst: usize,
        priority: u32,
        payload: RingPayload,
        cycle: u64,
    ) -> Result<bool, SimError> {
        let num_nodes = self.nodes.len();
        if src >= num_nodes || dst >= num_nodes {
            return sim_error!("{}: invalid ring nodes {src}->{dst}", self.entity);
        }
        if src == dst {
            return sim_error!("{}: node {src} sent to itself", self.entity);
        }

        let direction = self.select_route(src, dst);
        let node = &mut self.nodes[src];
        let Some(vc_idx) = node.select_vc(direction, priority) else {
            trace!(self.entity ; "no {direction:?} VC free at node {src}");
            return Ok(false);
        };

        node.vcs_mut(direction)[vc_idx].push(RingMessage {
            src_node: src,
            dst_node: dst,
            priority,
            cycle_injected: cycle,
            payload,
            moved_cycle: cycle,
        });
        node.messages_injected += 1;
        trace!(self.entity ; "inject {src}->{dst} {direction:?} vc{vc_idx}");
        Ok(true)
    }

    /// True when an injection at `src` towards `dst` would find a VC with
    /// a free slot.
    #[must_use]
    pub fn can_accept(&self, src: usize, dst: usize, priority: u32) -> bool {
        if src >= self.nodes.len() || dst >= self.nodes.len() || src == dst {
            return false;
        }
        let direction = self.select_route(src, dst);
        self.nodes[src].select_vc(direction, priority).is_some()
    }

    /// Remove one message from a node's ejection queue, FIFO.
    pub fn recv(&mut self, node_id: usize) -> Option<RingMessage> {
        self.nodes[node_id].ejection.pop_front()
    }

    /// True while the ejection queue of `node_id` holds messages.
    #[must_use]
    pub fn has_traffic_for(&self, node_id: usize) -> bool {
        !self.nodes[node_id].ejection.is_empty()
    }

    /// Advance every node by one cycle: VC arbitration, one forward per
    /// output port, credit return.
    pub fn tick(&mut self, cycle: u64) {
        for node_id in 0..self.nodes.len() {
            for direction in TICK_DIRECTIONS {
                self.tick_direction(node_id, direction, cycle);
            }
        }
    }

    fn tick_direction(&mut self, node_id: usize, direction: RingDirection, cycle: u64) {
        let Some(vc_idx) = self.arbitrate(node_id, direction, cycle) else {
            return;
        };

        let (dst_node, priority) = {
            let head = self.nodes[node_id].vcs(direction)[vc_idx]
                .buffer
                .front()
                .unwrap();
            (head.dst_node, head.priority)
        };

        if dst_node == node_id {
            // Already home; eject without consuming the output port.
            let message = self.nodes[node_id].vcs_mut(direction)[vc_idx].pop();
            self.nodes[node_id].ejection.push_back(message);
            self.nodes[node_id].messages_ejected += 1;
            return;
        }

        // Re-evaluate the direction relative to this node.
        let out_direction = self.select_route(node_id, dst_node);
        let next = match out_direction {
            RingDirection::Clockwise => self.nodes[node_id].next_cw,
            RingDirection::CounterClockwise => self.nodes[node_id].next_ccw,
            RingDirection::Local => unreachable!("non-local message routed locally"),
        };

        if next == dst_node {
            // Final hop: straight into the destination's ejection queue.
            let mut message = self.nodes[node_id].vcs_mut(direction)[vc_idx].pop();
            message.moved_cycle = cycle;
            self.nodes[node_id].messages_forwarded += 1;
            self.nodes[next].ejection.push_back(message);
            self.nodes[next].messages_ejected += 1;
            return;
        }

        // Forward one hop if the downstream VC has a free slot.
        let Some(next_vc) = self.nodes[next].select_vc(out_direction, priority) else {
            self.nodes[node_id].vcs_mut(direction)[vc_idx].state = VcState::Blocked;
            return;
        };
        let mut message = self.nodes[node_id].vcs_mut(direction)[vc_idx].pop();
        message.moved_cycle = cycle;
        self.nodes[node_id].messages_forwarded += 1;
        self.nodes[next].vcs_mut(out_direction)[next_vc].push(message);
    }

    /// Pick the VC to serve: lowest priority value wins, equal priorities
    /// rotate round-robin from the last grant. VCs whose head arrived this
    /// cycle are not eligible.
    fn arbitrate(&mut self, node_id: usize, direction: RingDirection, cycle: u64) -> Option<usize> {
        let vcs = self.nodes[node_id].vcs(direction);
        let movable = |vc: &VirtualChannel| {
            vc.buffer
                .front()
                .is_some_and(|head| head.moved_cycle < cycle)
        };

        let best_priority = vcs
            .iter()
            .filter(|vc| movable(vc))
            .map(|vc| vc.priority)
            .min()?;

        let dir_idx = usize::from(direction == RingDirection::CounterClockwise);
        let cursor = self.rr_cursors[node_id][dir_idx];
        let num_vcs = vcs.len();
        for offset in 0..num_vcs {
            let idx = (cursor + offset) % num_vcs;
            if vcs[idx].priority == best_priority && movable(&vcs[idx]) {
                self.rr_cursors[node_id][dir_idx] = (idx + 1) % num_vcs;
                return Some(idx);
            }
        }
        None
    }

    /// Messages buffered anywhere on the ring, including ejection queues.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| {
                node.cw_vcs
                    .iter()
                    .chain(&node.ccw_vcs)
                    .chain(&node.local_vcs)
                    .map(VirtualChannel::occupancy)
                    .sum::<usize>()
                    + node.ejection.len()
            })
            .sum()
    }

    /// Check ring closure: `next_cw.prev_cw == self` for every node, and
    /// the same in the other direction.
    #[must_use]
    pub fn verify_topology(&self) -> bool {
        self.nodes.iter().enumerate().all(|(i, node)| {
            self.nodes[node.next_cw].prev_cw == i
                && self.nodes[node.prev_cw].next_cw == i
                && self.nodes[node.next_ccw].prev_ccw == i
                && self.nodes[node.prev_ccw].next_ccw == i
        })
    }

    /// Credit conservation: `buffer.len() + credits == max_credits` on
    /// every VC.
    #[must_use]
    pub fn credit_invariant_holds(&self) -> bool {
        self.nodes.iter().all(|node| {
            node.cw_vcs
                .iter()
                .chain(&node.ccw_vcs)
                .chain(&node.local_vcs)
                .all(|vc| vc.occupancy() as u32 + vc.credits == vc.max_credits)
        })
    }

    /// One observation of the deadlock detector.
    ///
    /// Reports true when, for two consecutive observations, every VC of one
    /// direction held data with zero credit downstream. There is no
    /// automatic recovery: a stuck ring is a configuration error.
    pub fn deadlock_suspected(&mut self) -> bool {
        let mut suspected = false;
        for (dir_idx, direction) in TICK_DIRECTIONS.into_iter().enumerate() {
            let all_blocked = self.nodes.iter().all(|node| {
                let next = match direction {
                    RingDirection::Clockwise => node.next_cw,
                    _ => node.next_ccw,
                };
                node.vcs(direction).iter().enumerate().all(|(vc_idx, vc)| {
                    vc.has_data() && self.nodes[next].vcs(direction)[vc_idx].credits == 0
                })
            });
            if all_blocked && self.blocked_last[dir_idx] {
                warn!(self.entity ; "suspected deadlock on the {direction:?} direction");
                self.deadlock_warnings += 1;
                suspected = true;
            }
            self.blocked_last[dir_idx] = all_blocked;
        }
        suspected
    }

    /// Per-node counters: `(injected, ejected, forwarded)`.
    #[must_use]
    pub fn node_statistics(&self, node_id: usize) -> (u64, u64, u64) {
        let node = &self.nodes[node_id];
        (
            node.messages_injected,
            node.messages_ejected,
            node.messages_forwarded,
        )
    }

    /// The aggregate statistics map.
    #[must_use]
    pub fn statistics(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        stats.insert(
            "ring_messages_injected".to_string(),
            self.nodes.iter().map(|n| n.messages_injected).sum(),
        );
        stats.insert(
            "ring_messages_ejected".to_string(),
            self.nodes.iter().map(|n| n.messages_ejected).sum(),
        );
        stats.insert(
            "ring_messages_forwarded".to_string(),
            self.nodes.iter().map(|n| n.messages_forwarded).sum(),
        );
        stats.insert("ring_deadlock_warnings".to_string(), self.deadlock_warnings);
        stats
    }
}

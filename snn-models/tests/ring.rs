// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use std::rc::Rc;

use snn_models::ring::{Ring, RingDirection, RingPayload};
use snn_models::spike::Spike;
use snn_track::entity::{toplevel, Entity};
use snn_track::tracker::dev_null_tracker;

fn test_ring(num_nodes: usize, num_vcs: u32, credits: u32) -> (Ring, Rc<Entity>) {
    let tracker = dev_null_tracker();
    let top = toplevel(&tracker, "top");
    let ring = Ring::new(&top, "ring", num_nodes, num_vcs, credits).unwrap();
    (ring, top)
}

fn spike(top: &Rc<Entity>, dst_neuron: u32) -> RingPayload {
    RingPayload::Spike(Spike::new(top, 0, dst_neuron, 0, 0.5, 0))
}

#[test]
fn rejects_degenerate_rings() {
    let tracker = dev_null_tracker();
    let top = toplevel(&tracker, "top");
    assert!(Ring::new(&top, "ring", 1, 2, 8).is_err());
    assert!(Ring::new(&top, "ring", 4, 0, 8).is_err());
    assert!(Ring::new(&top, "ring", 4, 2, 0).is_err());
}

#[test]
fn topology_is_closed() {
    for num_nodes in [2, 3, 4, 8] {
        let (ring, _top) = test_ring(num_nodes, 2, 8);
        assert!(ring.verify_topology());
    }
}

#[test]
fn route_selection_prefers_short_way() {
    let (ring, _top) = test_ring(8, 2, 8);

    assert_eq!(ring.select_route(0, 1), RingDirection::Clockwise);
    assert_eq!(ring.select_route(0, 7), RingDirection::CounterClockwise);
    assert_eq!(ring.select_route(0, 3), RingDirection::Clockwise);
    assert_eq!(ring.select_route(0, 5), RingDirection::CounterClockwise);
    assert_eq!(ring.select_route(3, 3), RingDirection::Local);

    // Equidistant destinations tie clockwise.
    assert_eq!(ring.select_route(0, 4), RingDirection::Clockwise);
    assert_eq!(ring.select_route(5, 1), RingDirection::Clockwise);
}

#[test]
fn two_node_ring_ties_clockwise() {
    // K=2: one hop either way; the tie-break must be stable.
    let (ring, _top) = test_ring(2, 1, 4);
    assert_eq!(ring.select_route(0, 1), RingDirection::Clockwise);
    assert_eq!(ring.select_route(1, 0), RingDirection::Clockwise);
    assert_eq!(ring.hops(0, 1, RingDirection::Clockwise), 1);
    assert_eq!(ring.hops(1, 0, RingDirection::Clockwise), 1);
}

#[test]
fn hops_match_directions() {
    let (ring, _top) = test_ring(6, 2, 8);
    assert_eq!(ring.hops(0, 2, RingDirection::Clockwise), 2);
    assert_eq!(ring.hops(0, 2, RingDirection::CounterClockwise), 4);
    assert_eq!(ring.hops(2, 0, RingDirection::CounterClockwise), 2);
    assert_eq!(ring.hops(4, 4, RingDirection::Local), 0);
}

#[test]
fn send_to_self_is_an_error() {
    let (mut ring, top) = test_ring(4, 2, 8);
    assert!(ring.send(2, 2, 1, spike(&top, 0), 0).is_err());
    assert!(ring.send(9, 0, 1, spike(&top, 0), 0).is_err());
}

#[test]
fn uncongested_delivery_takes_exactly_hops_cycles() {
    let (mut ring, top) = test_ring(4, 2, 8);

    // Two clockwise hops from node 0 to node 2, injected at cycle 10.
    assert!(ring.send(0, 2, 1, spike(&top, 42), 10).unwrap());

    ring.tick(11);
    assert!(!ring.has_traffic_for(2), "one hop taken, not home yet");
    ring.tick(12);
    assert!(ring.has_traffic_for(2), "exactly hops cycles after injection");

    let message = ring.recv(2).unwrap();
    assert_eq!(message.src_node, 0);
    assert_eq!(message.dst_node, 2);
    assert_eq!(message.cycle_injected, 10);
    assert!(ring.recv(2).is_none());
    assert!(ring.credit_invariant_holds());
}

#[test]
fn single_hop_delivers_next_cycle() {
    let (mut ring, top) = test_ring(4, 2, 8);
    assert!(ring.send(0, 1, 1, spike(&top, 7), 5).unwrap());

    ring.tick(6);
    assert!(ring.has_traffic_for(1));
}

#[test]
fn backpressure_with_single_credit() {
    // Two cores, one VC with one credit: three back-to-back messages
    // deliver at c+1, c+3 and c+5 with no drops and no duplicates.
    let (mut ring, top) = test_ring(2, 1, 1);
    let c = 10;

    assert!(ring.send(0, 1, 0, spike(&top, 1), c).unwrap());
    assert!(!ring.send(0, 1, 0, spike(&top, 2), c).unwrap());
    assert!(!ring.can_accept(0, 1, 0));

    let mut deliveries = Vec::new();
    let mut pending = vec![spike(&top, 2), spike(&top, 3)];
    for cycle in c + 1..c + 8 {
        // The tile retries held messages in its dispatch phase, before the
        // ring tick.
        if !pending.is_empty() && ring.can_accept(0, 1, 0) {
            let payload = pending.remove(0);
            assert!(ring.send(0, 1, 0, payload, cycle).unwrap());
        }
        ring.tick(cycle);
        while let Some(message) = ring.recv(1) {
            deliveries.push((cycle, message.cycle_injected));
        }
        assert!(ring.credit_invariant_holds());
    }

    assert_eq!(
        deliveries,
        vec![(c + 1, c), (c + 3, c + 2), (c + 5, c + 4)]
    );
    assert_eq!(ring.pending_messages(), 0);

    // Conservation: everything injected was ejected exactly once.
    let (injected0, _, _) = ring.node_statistics(0);
    let (_, ejected1, _) = ring.node_statistics(1);
    assert_eq!(injected0, 3);
    assert_eq!(ejected1, 3);
}

#[test]
fn priority_zero_wins_arbitration() {
    let (mut ring, top) = test_ring(4, 2, 8);

    // Fill VC1 first, then VC0; the higher-priority (lower number) VC is
    // served first.
    assert!(ring.send(0, 2, 1, spike(&top, 1), 10).unwrap());
    assert!(ring.send(0, 2, 0, spike(&top, 2), 10).unwrap());

    ring.tick(11);
    ring.tick(12);
    let first = ring.recv(2).unwrap();
    assert_eq!(first.priority, 0);

    ring.tick(13);
    let second = ring.recv(2).unwrap();
    assert_eq!(second.priority, 1);
}

#[test]
fn control_and_memory_messages_route_too() {
    let (mut ring, _top) = test_ring(3, 2, 8);

    assert!(ring.send(0, 1, 0, RingPayload::Control, 0).unwrap());
    assert!(ring.send(1, 2, 1, RingPayload::MemRequest(7), 0).unwrap());
    assert!(ring.send(2, 0, 1, RingPayload::MemResponse(7), 0).unwrap());

    ring.tick(1);
    assert!(matches!(
        ring.recv(1).unwrap().payload,
        RingPayload::Control
    ));
    assert!(matches!(
        ring.recv(2).unwrap().payload,
        RingPayload::MemRequest(7)
    ));
    assert!(matches!(
        ring.recv(0).unwrap().payload,
        RingPayload::MemResponse(7)
    ));
}

#[test]
fn deadlock_detector_flags_cyclic_wait() {
    // Four nodes, one VC, one credit. Four clockwise messages, each two
    // hops from home, fill every clockwise VC: nothing can move.
    let (mut ring, top) = test_ring(4, 1, 1);

    assert!(ring.send(0, 2, 0, spike(&top, 0), 0).unwrap());
    assert!(ring.send(1, 3, 0, spike(&top, 1), 0).unwrap());
    assert!(ring.send(2, 0, 0, spike(&top, 2), 0).unwrap());
    assert!(ring.send(3, 1, 0, spike(&top, 3), 0).unwrap());

    ring.tick(1);
    ring.tick(2);
    assert_eq!(ring.pending_messages(), 4, "nothing moved");

    // The detector needs two consecutive blocked observations.
    assert!(!ring.deadlock_suspected());
    assert!(ring.deadlock_suspected());
    assert!(ring.credit_invariant_holds());
}

#[test]
fn no_deadlock_warning_on_healthy_ring() {
    let (mut ring, top) = test_ring(4, 2, 8);
    assert!(ring.send(0, 2, 1, spike(&top, 0), 0).unwrap());

    assert!(!ring.deadlock_suspected());
    ring.tick(1);
    assert!(!ring.deadlock_suspected());
    ring.tick(2);
    assert!(!ring.deadlock_suspected());
}

// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use std::cell::RefCell;
use std::rc::Rc;

use snn_engine::run_simulation;
use snn_engine::sim_error;
use snn_engine::test_helpers::start_test;
use snn_models::mesh::{MeshConfig, MeshFabric, MeshPacket, Topology, MESH_PACKET_BYTES};
use snn_models::spike::Spike;
use snn_track::entity::Entity;

fn mesh_config(topology: Topology) -> MeshConfig {
    MeshConfig {
        topology,
        num_vcs: 2,
        credits_per_vc: 8,
        adaptive: false,
        congestion_threshold: 0.75,
    }
}

fn packet(top: &Rc<Entity>, src_tile: u32, dst_tile: u32) -> MeshPacket {
    let spike = Spike::new(top, src_tile, dst_tile, dst_tile, 0.5, 0);
    MeshPacket {
        src_tile,
        dst_tile,
        vn: 0,
        size_bytes: MESH_PACKET_BYTES,
        hops: 0,
        payload: spike.to_bytes().to_vec(),
    }
}

/// Drive packets through a fabric and collect what one endpoint receives.
fn run_fabric(
    config: MeshConfig,
    destinations: Vec<u32>,
    receiver: usize,
    max_cycles: u64,
) -> (Vec<MeshPacket>, std::collections::BTreeMap<String, u64>) {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let top = engine.top().clone();

    let fabric = MeshFabric::new_and_register(&engine, &clock, &top, "mesh", config).unwrap();
    let source = fabric.endpoint(0);
    let sink = fabric.endpoint(receiver);

    let received = Rc::new(RefCell::new(Vec::new()));
    let expect = destinations
        .iter()
        .filter(|dst| **dst as usize == receiver)
        .count();

    {
        let received = received.clone();
        let top = top.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            clock.wait_ticks(1).await;
            for dst in destinations {
                assert!(source.space_to_send(0, MESH_PACKET_BYTES));
                assert!(source.send(packet(&top, 0, dst), clock.tick_now().tick()));
            }

            for _ in 0..max_cycles {
                clock.wait_ticks(1).await;
                let now = clock.tick_now().tick();
                while let Some(delivered) = sink.recv(now) {
                    received.borrow_mut().push(delivered);
                }
                if received.borrow().len() >= expect {
                    return Ok(());
                }
            }
            if received.borrow().len() < expect {
                return sim_error!("only {} of {expect} packets arrived", received.borrow().len());
            }
            Ok(())
        });
    }

    run_simulation!(engine);

    let stats = fabric.statistics();
    let received = received.borrow().clone();
    (received, stats)
}

#[test]
fn single_hop_delivery() {
    let topology = Topology::Mesh2D {
        width: 2,
        height: 1,
    };
    let (received, stats) = run_fabric(mesh_config(topology), vec![1], 1, 20);

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].hops, 1);
    assert_eq!(stats["packets_delivered"], 1);
    assert_eq!(stats["packets_forwarded"], 1);
    assert_eq!(stats["spikes_dropped"], 0);
}

#[test]
fn corner_broadcast_hop_counts() {
    // From tile 0 of a 4x4 mesh the XY hop counts to tiles 3, 12 and 15
    // are 3, 3 and 6.
    let topology = Topology::Mesh2D {
        width: 4,
        height: 4,
    };

    for (dst, expected_hops) in [(3u32, 3u32), (12, 3), (15, 6)] {
        let (received, stats) =
            run_fabric(mesh_config(topology), vec![dst], dst as usize, 40);
        assert_eq!(received.len(), 1, "packet for tile {dst}");
        assert_eq!(received[0].hops, expected_hops);
        assert_eq!(stats["spikes_dropped"], 0);
    }
}

#[test]
fn torus_wrap_is_one_hop() {
    let topology = Topology::Torus2D {
        width: 4,
        height: 1,
    };
    let (received, stats) = run_fabric(mesh_config(topology), vec![3], 3, 20);

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].hops, 1);
    // The wrap hop moved the packet onto the escape VC.
    assert_eq!(received[0].vn, 1);
    assert_eq!(stats["spikes_dropped"], 0);
}

#[test]
fn expired_packet_is_dropped() {
    // Eleven hops needed, ten allowed: the spike dies in flight and the
    // simulation carries on.
    let topology = Topology::Mesh2D {
        width: 12,
        height: 1,
    };
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let top = engine.top().clone();

    let fabric =
        MeshFabric::new_and_register(&engine, &clock, &top, "mesh", mesh_config(topology))
            .unwrap();
    let source = fabric.endpoint(0);
    let sink = fabric.endpoint(11);

    {
        let top = top.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            clock.wait_ticks(1).await;
            assert!(source.send(packet(&top, 0, 11), 1));
            for _ in 0..30 {
                clock.wait_ticks(1).await;
                assert!(sink.recv(clock.tick_now().tick()).is_none());
            }
            Ok(())
        });
    }

    run_simulation!(engine);

    let stats = fabric.statistics();
    assert_eq!(stats["spikes_dropped"], 1);
    assert_eq!(stats["packets_delivered"], 0);
}

#[test]
fn adaptive_routing_stays_minimal() {
    // With the congestion threshold at zero every grant prefers the least
    // loaded productive port, but the path length never grows.
    let topology = Topology::Mesh2D {
        width: 4,
        height: 4,
    };
    let config = MeshConfig {
        topology,
        num_vcs: 2,
        credits_per_vc: 8,
        adaptive: true,
        congestion_threshold: 0.0,
    };
    let (received, stats) = run_fabric(config, vec![15, 15, 15], 15, 60);

    assert_eq!(received.len(), 3);
    for delivered in &received {
        assert_eq!(delivered.hops, 6);
    }
    assert_eq!(stats["spikes_dropped"], 0);
}

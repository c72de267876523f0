// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! End-to-end platform scenarios.

use std::fs;
use std::io::Write;

use snn_engine::test_helpers::start_test;
use snn_models::config::{FanOutPolicy, SimConfig};
use snn_models::platform::{run_platform, Platform};
use snn_models::tile::TestTrafficConfig;
use snn_models::trace_source::TraceSourceConfig;
use snn_models::weight_loader::WeightSource;
use tempfile::TempDir;

fn write_trace(dir: &TempDir, contents: &str) -> String {
    let path = dir.path().join("trace.txt");
    fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn write_weights(dir: &TempDir, values: &[f32]) -> String {
    let path = dir.path().join("weights.bin");
    let mut file = fs::File::create(&path).unwrap();
    for value in values {
        file.write_all(&value.to_le_bytes()).unwrap();
    }
    path.to_str().unwrap().to_string()
}

fn trace_config(path: String) -> TraceSourceConfig {
    TraceSourceConfig {
        path,
        time_scale: 1.0,
        neuron_offset: 0,
        max_events: None,
    }
}

/// Single tile, single core, single spike: the weight file drives one
/// integration and one fire at cycle 6.
#[test]
fn single_tile_single_spike() {
    let dir = TempDir::new().unwrap();
    let trace = write_trace(&dir, "0 5\n");

    // w[0,0] = 0.6 in a 4x4 matrix.
    let mut weights = vec![0.0f32; 16];
    weights[0] = 0.6;
    let weight_file = write_weights(&dir, &weights);

    let config = SimConfig {
        width: 1,
        height: 1,
        cores_per_tile: 1,
        neurons_per_core: 4,
        v_thresh: 0.5,
        v_reset: 0.0,
        v_rest: 0.0,
        tau_mem_ms: 20.0,
        t_ref: 2,
        weight_source: WeightSource::SingleFile {
            path: weight_file,
            file_core_offset: 0,
        },
        spike_trace: Some(trace_config(trace)),
        preload_weights: true,
        fanout: FanOutPolicy::SingleTarget { neuron: 0 },
        fanout_weight: 0.0,
        ..SimConfig::default()
    };

    let mut engine = start_test(file!());
    let platform = Platform::build(&mut engine, &config).unwrap();
    run_platform(&mut engine, &config).unwrap();

    let tile = &platform.tiles[0];
    let stats = tile.core_statistics(0);
    assert_eq!(stats["neurons_fired"], 1);
    assert_eq!(stats["spikes_generated"], 1);
    // The trace spike plus the self-targeted output spike.
    assert_eq!(stats["spikes_received"], 2);
    assert_eq!(stats["spikes_dropped"], 0);
    assert_eq!(tile.statistics()["spikes_dropped"], 0);

    // Delivered at cycle 5, integrated and fired at cycle 6.
    assert_eq!(tile.neuron(0, 0).last_spike_cycle, 6);

    // One trace event replayed; the loader wrote the 4x4 matrix.
    assert_eq!(platform.source.as_ref().unwrap().events_sent(), 1);
    assert_eq!(platform.memory.bytes_written(), 64);
}

/// Two tiles on a 2x1 mesh: one fire on tile 0 crosses the mesh in one
/// hop and triggers tile 1.
#[test]
fn two_tiles_one_packet() {
    let dir = TempDir::new().unwrap();
    let trace = write_trace(&dir, "0 5\n");

    let config = SimConfig {
        width: 2,
        height: 1,
        cores_per_tile: 1,
        neurons_per_core: 4,
        v_thresh: 0.5,
        t_ref: 2,
        spike_trace: Some(trace_config(trace)),
        use_event_weight: true,
        // Tile 0 fires towards tile 1 neuron 0 (global id 4).
        fanout: FanOutPolicy::SingleTarget { neuron: 4 },
        fanout_weight: 0.9,
        ..SimConfig::default()
    };

    let mut engine = start_test(file!());
    let platform = Platform::build(&mut engine, &config).unwrap();
    run_platform(&mut engine, &config).unwrap();

    let tile0 = &platform.tiles[0];
    let tile1 = &platform.tiles[1];

    assert_eq!(tile0.statistics()["external_spikes_sent"], 1);
    assert_eq!(tile0.statistics()["packets_sent"], 1);
    assert_eq!(tile1.statistics()["external_spikes_received"], 1);
    assert_eq!(tile1.statistics()["packets_received"], 1);

    assert_eq!(platform.fabric_stat("packets_forwarded"), 1);
    assert_eq!(platform.fabric_stat("packets_delivered"), 1);
    assert_eq!(platform.fabric_stat("spikes_dropped"), 0);

    // Both cores fired once; tile 1's fire happened at cycle 9 after the
    // one-hop crossing.
    assert_eq!(tile0.core_statistics(0)["neurons_fired"], 1);
    assert_eq!(tile1.core_statistics(0)["neurons_fired"], 1);
    assert_eq!(tile1.neuron(0, 0).last_spike_cycle, 9);
}

/// Ring backpressure inside one tile: three fires on core 0 all reach
/// core 1 through a single-credit ring with no drops and no duplicates.
#[test]
fn ring_backpressure_between_cores() {
    let dir = TempDir::new().unwrap();
    // Three different neurons of core 0 fire.
    let trace = write_trace(&dir, "0 5\n1 5\n2 5\n");

    let config = SimConfig {
        width: 1,
        height: 1,
        cores_per_tile: 2,
        neurons_per_core: 4,
        v_thresh: 0.5,
        t_ref: 2,
        ring_vcs: 1,
        ring_credits: 1,
        spike_trace: Some(trace_config(trace)),
        use_event_weight: true,
        // Core 1 owns global neuron 4.
        fanout: FanOutPolicy::SingleTarget { neuron: 4 },
        fanout_weight: 0.1,
        ..SimConfig::default()
    };

    let mut engine = start_test(file!());
    let platform = Platform::build(&mut engine, &config).unwrap();
    run_platform(&mut engine, &config).unwrap();

    let tile = &platform.tiles[0];
    let stats = tile.statistics();
    assert_eq!(tile.core_statistics(0)["neurons_fired"], 3);
    assert_eq!(stats["inter_core_messages"], 3);
    assert_eq!(stats["ring_messages_injected"], 3);
    assert_eq!(stats["ring_messages_ejected"], 3);
    assert_eq!(stats["packets_dropped"], 0);
    assert_eq!(stats["spikes_dropped"], 0);
    assert_eq!(tile.core_statistics(1)["spikes_received"], 3);
}

fn test_traffic_config() -> SimConfig {
    SimConfig {
        width: 2,
        height: 1,
        cores_per_tile: 2,
        neurons_per_core: 4,
        // High threshold: traffic integrates but never fires.
        v_thresh: 10.0,
        use_event_weight: true,
        test_traffic: Some(TestTrafficConfig {
            target_tile: 1,
            period: 5,
            spikes_per_burst: 2,
            max_spikes: 8,
            weight: 0.2,
        }),
        fanout: FanOutPolicy::SingleTarget { neuron: 0 },
        fanout_weight: 0.0,
        ..SimConfig::default()
    }
}

/// Spike conservation: everything the generator sent is accounted for at
/// the receiving cores, with nothing dropped and nothing in flight.
#[test]
fn test_traffic_is_conserved() {
    let config = test_traffic_config();

    let mut engine = start_test(file!());
    let platform = Platform::build(&mut engine, &config).unwrap();
    run_platform(&mut engine, &config).unwrap();

    let tile0 = &platform.tiles[0];
    let tile1 = &platform.tiles[1];

    // Tile 1's generator targets itself and is disabled at setup.
    assert_eq!(tile0.statistics()["test_spikes_sent"], 8);
    assert_eq!(tile1.statistics()["test_spikes_sent"], 0);

    assert_eq!(tile0.statistics()["external_spikes_sent"], 8);
    assert_eq!(tile1.statistics()["external_spikes_received"], 8);
    assert_eq!(platform.fabric_stat("packets_delivered"), 8);

    // sent == received + dropped, with zero drops and zero fires here.
    assert_eq!(platform.total_core_stat("spikes_received"), 8);
    assert_eq!(platform.total_core_stat("neurons_fired"), 0);
    assert_eq!(platform.total_tile_stat("spikes_dropped"), 0);
    assert_eq!(platform.total_tile_stat("packets_dropped"), 0);
    assert_eq!(platform.fabric_stat("spikes_dropped"), 0);
}

/// Determinism: two runs with identical configuration produce identical
/// statistics, key for key.
#[test]
fn identical_runs_replay_identically() {
    let dir = TempDir::new().unwrap();
    let trace = write_trace(&dir, "0 5\n3 9\n1 5\n6 40\n");

    let run = || {
        let config = SimConfig {
            spike_trace: Some(trace_config(trace.clone())),
            ..test_traffic_config()
        };
        let mut engine = start_test(file!());
        let platform = Platform::build(&mut engine, &config).unwrap();
        run_platform(&mut engine, &config).unwrap();

        let mut all = Vec::new();
        for (tile_id, tile) in platform.tiles.iter().enumerate() {
            for (key, value) in tile.statistics() {
                all.push((format!("tile{tile_id}.{key}"), value));
            }
            for core in 0..2 {
                for (key, value) in tile.core_statistics(core) {
                    all.push((format!("tile{tile_id}.core{core}.{key}"), value));
                }
            }
        }
        if let Some(fabric) = &platform.fabric {
            for (key, value) in fabric.statistics() {
                all.push((format!("mesh.{key}"), value));
            }
        }
        all
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
    // And the runs actually did something.
    assert!(first.iter().any(|(key, value)| key.ends_with("spikes_received") && *value > 0));
}

/// The layered fan-out on a single tile projects off the grid; the spike
/// is dropped and counted, the simulation completes cleanly.
#[test]
fn layered_fanout_off_grid_is_dropped() {
    let dir = TempDir::new().unwrap();
    let trace = write_trace(&dir, "0 5\n");

    let config = SimConfig {
        width: 1,
        height: 1,
        cores_per_tile: 1,
        neurons_per_core: 4,
        v_thresh: 0.5,
        spike_trace: Some(trace_config(trace)),
        use_event_weight: true,
        fanout: FanOutPolicy::Layered,
        fanout_weight: 0.5,
        ..SimConfig::default()
    };

    let mut engine = start_test(file!());
    let platform = Platform::build(&mut engine, &config).unwrap();
    run_platform(&mut engine, &config).unwrap();

    let tile = &platform.tiles[0];
    assert_eq!(tile.core_statistics(0)["neurons_fired"], 1);
    assert_eq!(tile.core_statistics(0)["spikes_generated"], 1);
    // The generated spike targeted a tile that does not exist.
    assert_eq!(tile.statistics()["spikes_dropped"], 1);
}

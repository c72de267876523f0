// Copyright (c) 2025 The snn-sim authors. All rights reserved.

use std::fs;
use std::io::Write;

use snn_engine::test_helpers::start_test;
use snn_engine::traits::Runnable;
use snn_models::address::{NeuronMap, WeightMap};
use snn_models::memory::{MemoryConfig, SharedMemory};
use snn_models::trace_source::{TraceSource, TraceSourceConfig};
use snn_models::weight_loader::{WeightLoader, WeightLoaderConfig, WeightSource};
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> String {
    let path = dir.path().join(name);
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
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

fn build_source(cfg: TraceSourceConfig) -> (snn_engine::engine::Engine, std::rc::Rc<TraceSource>) {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();
    let top = engine.top().clone();
    let source =
        TraceSource::new_and_register(&engine, &clock, &top, "source", cfg, NeuronMap::new(4, 1, 4));
    (engine, source)
}

#[test]
fn trace_parses_comments_and_bad_lines() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "trace.txt",
        b"# a comment\n0 5\nnot a record\n3 1\n\n7 9 trailing junk\n",
    );

    let (_engine, source) = build_source(trace_config(path));
    source.setup().unwrap();

    assert_eq!(source.events_loaded(), 3);
    assert_eq!(source.lines_skipped(), 1);
}

#[test]
fn trace_applies_scale_offset_and_limit() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "trace.txt", b"0 10\n1 20\n2 30\n3 40\n");

    let cfg = TraceSourceConfig {
        path,
        time_scale: 2.0,
        neuron_offset: 4,
        max_events: Some(3),
    };
    let (_engine, source) = build_source(cfg);
    source.setup().unwrap();

    assert_eq!(source.events_loaded(), 3);
}

#[test]
fn missing_trace_is_fatal() {
    let (_engine, source) = build_source(trace_config("/does/not/exist.txt".to_string()));
    assert!(source.setup().is_err());
}

const NPC: u32 = 4;

fn loader_fixture(
    cfg: WeightLoaderConfig,
    num_tiles: usize,
    cores_per_tile: usize,
) -> (
    snn_engine::engine::Engine,
    std::rc::Rc<SharedMemory>,
    std::rc::Rc<WeightLoader>,
    WeightMap,
) {
    let engine = start_test(file!());
    let top = engine.top().clone();

    let map = NeuronMap::new(num_tiles, cores_per_tile, NPC as usize);
    let weights = WeightMap::packed(0, cores_per_tile, NPC).unwrap();
    let memory = SharedMemory::new_and_register(
        &engine,
        &top,
        "memory",
        MemoryConfig {
            base_address: 0,
            capacity_bytes: weights.total_bytes(num_tiles) as usize,
            delay_ticks: 1,
        },
    )
    .unwrap();
    let loader =
        WeightLoader::new_and_register(&engine, &top, "loader", cfg, map, weights, &memory);
    (engine, memory, loader, weights)
}

fn floats_le(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[test]
fn single_file_round_trips_through_memory() {
    // Two cores of 4x4 weights in one file; reading the matrix back gives
    // the file's float sequence.
    let per_core = (NPC * NPC) as usize;
    let values: Vec<f32> = (0..2 * per_core).map(|i| i as f32 * 0.125).collect();

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "weights.bin", &floats_le(&values));

    let cfg = WeightLoaderConfig {
        source: WeightSource::SingleFile {
            path,
            file_core_offset: 0,
        },
        fill_value: 0.0,
        validate_length: true,
    };
    let (_engine, memory, loader, weights) = loader_fixture(cfg, 1, 2);
    loader.setup().unwrap();

    for core in 0..2usize {
        for pre in 0..NPC {
            for post in 0..NPC {
                let addr = weights.address(0, core, pre, post);
                let bytes = memory.peek(addr, 4).unwrap();
                let value = f32::from_le_bytes(bytes.try_into().unwrap());
                let index = core * per_core + (pre * NPC + post) as usize;
                assert_eq!(value, values[index]);
            }
        }
    }
}

#[test]
fn file_core_offset_skips_blocks() {
    let per_core = (NPC * NPC) as usize;
    let values: Vec<f32> = (0..2 * per_core).map(|i| i as f32).collect();

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "weights.bin", &floats_le(&values));

    let cfg = WeightLoaderConfig {
        source: WeightSource::SingleFile {
            path,
            file_core_offset: 1,
        },
        fill_value: -1.0,
        validate_length: false,
    };
    let (_engine, memory, loader, weights) = loader_fixture(cfg, 1, 1);
    loader.setup().unwrap();

    // The single core took the second block of the file.
    let bytes = memory.peek(weights.address(0, 0, 0, 0), 4).unwrap();
    assert_eq!(f32::from_le_bytes(bytes.try_into().unwrap()), per_core as f32);
}

#[test]
fn short_file_pads_with_fill_value() {
    // Only four floats for a 16-float core.
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "weights.bin", &floats_le(&[1.0, 2.0, 3.0, 4.0]));

    let cfg = WeightLoaderConfig {
        source: WeightSource::SingleFile {
            path,
            file_core_offset: 0,
        },
        fill_value: 0.75,
        validate_length: true,
    };
    let (_engine, memory, loader, weights) = loader_fixture(cfg, 1, 1);
    loader.setup().unwrap();

    let first = memory.peek(weights.address(0, 0, 0, 0), 4).unwrap();
    assert_eq!(f32::from_le_bytes(first.try_into().unwrap()), 1.0);
    let padded = memory.peek(weights.address(0, 0, 2, 1), 4).unwrap();
    assert_eq!(f32::from_le_bytes(padded.try_into().unwrap()), 0.75);
}

#[test]
fn per_core_template_files() {
    let per_core = (NPC * NPC) as usize;
    let dir = TempDir::new().unwrap();
    for core in 0..2usize {
        let values: Vec<f32> = (0..per_core).map(|i| (core * 100 + i) as f32).collect();
        write_file(&dir, &format!("w_{core:02}.bin"), &floats_le(&values));
    }
    let template = dir
        .path()
        .join("w_{core:02d}.bin")
        .to_str()
        .unwrap()
        .to_string();

    let cfg = WeightLoaderConfig {
        source: WeightSource::PerCoreFiles { template },
        fill_value: 0.0,
        validate_length: true,
    };
    let (_engine, memory, loader, weights) = loader_fixture(cfg, 2, 1);
    loader.setup().unwrap();

    // Tile 1's core is global core 1 and took the second file.
    let bytes = memory.peek(weights.address(1, 0, 0, 0), 4).unwrap();
    assert_eq!(f32::from_le_bytes(bytes.try_into().unwrap()), 100.0);
}

#[test]
fn missing_weight_file_is_fatal() {
    let cfg = WeightLoaderConfig {
        source: WeightSource::SingleFile {
            path: "/does/not/exist.bin".to_string(),
            file_core_offset: 0,
        },
        fill_value: 0.0,
        validate_length: true,
    };
    let (_engine, _memory, loader, _weights) = loader_fixture(cfg, 1, 1);
    assert!(loader.setup().is_err());
}

#[test]
fn fill_source_writes_everywhere() {
    let cfg = WeightLoaderConfig {
        source: WeightSource::Fill,
        fill_value: 0.5,
        validate_length: true,
    };
    let (_engine, memory, loader, weights) = loader_fixture(cfg, 2, 2);
    loader.setup().unwrap();

    for tile in 0..2 {
        for core in 0..2 {
            let bytes = memory
                .peek(weights.address(tile, core, NPC - 1, NPC - 1), 4)
                .unwrap();
            assert_eq!(f32::from_le_bytes(bytes.try_into().unwrap()), 0.5);
        }
    }
}

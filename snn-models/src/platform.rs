// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Builds and wires the whole simulated accelerator.

use std::rc::Rc;

use snn_components::connect_port;
use snn_components::router::{DefaultAlgorithm, Router};
use snn_engine::engine::Engine;
use snn_engine::events::once::Once;
use snn_engine::sim_error;
use snn_engine::time::clock::Clock;
use snn_engine::types::{SimError, SimResult};
use snn_track::info;

use crate::config::{FanOutPolicy, SimConfig};
use crate::core::CoreConfig;
use crate::fanout::{FanOut, LayeredFanOut, SingleTargetFanOut};
use crate::memory::{MemoryConfig, SharedMemory};
use crate::mesh::{MeshConfig, MeshFabric};
use crate::spike::Spike;
use crate::tile::{Tile, TileConfig};
use crate::trace_source::TraceSource;
use crate::weight_loader::WeightLoader;

/// The built accelerator.
pub struct Platform {
    /// All tiles in id order.
    pub tiles: Vec<Rc<Tile>>,
    /// The mesh fabric; absent on a 1x1 grid.
    pub fabric: Option<Rc<MeshFabric>>,
    /// The shared weight memory.
    pub memory: Rc<SharedMemory>,
    /// The trace source, when a trace is configured.
    pub source: Option<Rc<TraceSource>>,
    /// The demultiplexer between the source and the tiles.
    pub spike_mux: Option<Rc<Router<Spike>>>,
    /// The weight loader.
    pub loader: Rc<WeightLoader>,
}

impl Platform {
    /// Build every component and connect them.
    ///
    /// Registration order is fixed (memory, loader, fabric, tiles, source,
    /// mux) so two runs with the same configuration replay identically.
    pub fn build(engine: &mut Engine, config: &SimConfig) -> Result<Platform, SimError> {
        config.validate()?;

        let clock = engine.default_clock();
        let top = engine.top().clone();

        let map = config.neuron_map();
        let weights = config.weight_map()?;
        let lif = config.lif()?;
        let num_tiles = map.num_tiles();

        let memory = SharedMemory::new_and_register(
            engine,
            &top,
            "memory",
            MemoryConfig {
                base_address: weights.base_addr(),
                capacity_bytes: weights.total_bytes(num_tiles) as usize,
                delay_ticks: config.memory_delay,
            },
        )?;

        let loader = WeightLoader::new_and_register(
            engine,
            &top,
            "weight_loader",
            config.weight_loader(),
            map,
            weights,
            &memory,
        );

        let fanout: Rc<dyn FanOut> = match config.fanout {
            FanOutPolicy::Layered => Rc::new(LayeredFanOut::new(map, config.fanout_weight)),
            FanOutPolicy::SingleTarget { neuron } => {
                let Some(tile) = map.tile_of(neuron) else {
                    return sim_error!("config: fan-out target {neuron} outside the population");
                };
                Rc::new(SingleTargetFanOut {
                    neuron,
                    tile,
                    weight: config.fanout_weight,
                })
            }
        };

        let fabric = if num_tiles > 1 {
            Some(MeshFabric::new_and_register(
                engine,
                &clock,
                &top,
                "mesh",
                MeshConfig {
                    topology: config.topology(),
                    num_vcs: config.mesh_vcs,
                    credits_per_vc: config.mesh_credits,
                    adaptive: config.adaptive_routing,
                    congestion_threshold: config.congestion_threshold,
                },
            )?)
        } else {
            None
        };

        let mut tiles = Vec::with_capacity(num_tiles);
        for tile_id in 0..num_tiles as u32 {
            let core_cfgs: Vec<CoreConfig> = (0..config.cores_per_tile)
                .map(|core| CoreConfig {
                    tile: tile_id,
                    core,
                    neurons_per_core: config.neurons_per_core as u32,
                    global_base: map.core_base(tile_id, core),
                    lif: lif.clone(),
                    merge: config.merge_policy(),
                    max_cache_entries: config.max_cache_entries,
                    max_outstanding: config.max_outstanding,
                    use_event_weight: config.use_event_weight,
                    preload_weights: config.preload_weights,
                    warmup_cycles: config.warmup_cycles,
                    verify: config.verify,
                })
                .collect();

            let tile_cfg = TileConfig {
                tile_id,
                ring_vcs: config.ring_vcs,
                ring_credits: config.ring_credits,
                retry_queue_len: config.retry_queue_len,
                nic_output_buf: config.nic_output_buf,
                monitor_period: config.monitor_period,
                imbalance_threshold: config.imbalance_threshold,
                util_alpha: config.util_alpha,
                deadlock_check_period: config.deadlock_check_period,
                test_traffic: config.test_traffic,
            };

            let endpoint = fabric
                .as_ref()
                .map(|fabric| fabric.endpoint(tile_id as usize));
            tiles.push(Tile::new_and_register(
                engine,
                &clock,
                &top,
                format!("tile{tile_id}").as_str(),
                tile_cfg,
                core_cfgs,
                weights,
                map,
                &memory,
                fanout.clone(),
                endpoint,
            )?);
        }

        let (source, spike_mux) = match &config.spike_trace {
            Some(trace_cfg) => {
                let source = TraceSource::new_and_register(
                    engine,
                    &clock,
                    &top,
                    "spike_source",
                    trace_cfg.clone(),
                    map,
                );
                let spike_mux = Router::new_and_register(
                    engine,
                    &top,
                    "spike_mux",
                    num_tiles,
                    Box::new(DefaultAlgorithm {}),
                )?;
                connect_port!(source, tx => spike_mux, rx)?;
                for (tile_id, tile) in tiles.iter().enumerate() {
                    connect_port!(spike_mux, tx, tile_id => tile, spike_in)?;
                }
                (Some(source), Some(spike_mux))
            }
            None => (None, None),
        };

        let top_entity = engine.top().clone();
        info!(top_entity ; "platform built: {}x{} tiles, {} cores each, {} neurons per core",
            config.width, config.height, config.cores_per_tile, config.neurons_per_core);

        Ok(Platform {
            tiles,
            fabric,
            memory,
            source,
            spike_mux,
            loader,
        })
    }

    /// Aggregate of one per-core statistic across every tile.
    #[must_use]
    pub fn total_core_stat(&self, key: &str) -> u64 {
        self.tiles
            .iter()
            .map(|tile| tile.core_stat_total(key))
            .sum()
    }

    /// Aggregate of one tile statistic across every tile.
    #[must_use]
    pub fn total_tile_stat(&self, key: &str) -> u64 {
        self.tiles
            .iter()
            .map(|tile| tile.statistics().get(key).copied().unwrap_or_default())
            .sum()
    }

    /// One fabric statistic, zero without a mesh.
    #[must_use]
    pub fn fabric_stat(&self, key: &str) -> u64 {
        self.fabric
            .as_ref()
            .and_then(|fabric| fabric.statistics().get(key).copied())
            .unwrap_or_default()
    }
}

/// Install an event that fires after `stop_at` cycles, for
/// [`Engine::run_until`].
#[must_use]
pub fn stop_event_at(engine: &Engine, clock: &Clock, stop_at: u64) -> Once<()> {
    let once = Once::default();
    {
        let once = once.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            clock.wait_ticks(stop_at).await;
            once.notify()
        });
    }
    once
}

/// Run a built platform, honouring `stop_at`.
pub fn run_platform(engine: &mut Engine, config: &SimConfig) -> SimResult {
    match config.stop_at {
        Some(stop_at) => {
            let clock = engine.default_clock();
            let stop = stop_event_at(engine, &clock, stop_at);
            engine.run_until(Box::new(stop))
        }
        None => engine.run(),
    }
}

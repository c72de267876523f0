// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! Simulate a mesh of spiking-neural-network tiles.
//!
//! The host configuration arrives on the command line; everything else is
//! built by [`snn_models::platform`].

use std::rc::Rc;

use clap::Parser;
use indicatif::ProgressBar;
use snn_engine::engine::Engine;
use snn_engine::executor::Spawner;
use snn_engine::sim_error;
use snn_engine::time::clock::Clock;
use snn_engine::types::SimError;
use snn_models::config::{FanOutPolicy, SimConfig};
use snn_models::core::VerifyConfig;
use snn_models::platform::{run_platform, Platform};
use snn_models::tile::{TestTrafficConfig, Tile};
use snn_models::trace_source::TraceSourceConfig;
use snn_models::weight_loader::WeightSource;
use snn_track::tracker::{dev_null_tracker, EntityManager, TextTracker};
use snn_track::{info, Tracker};

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Tiled SNN accelerator simulator")]
struct Cli {
    /// Enable logging to the console.
    #[arg(long, default_value = "false")]
    stdout: bool,

    /// Level of log message to display.
    #[arg(
        long,
        default_value = "Info",
        value_parser = |s: &str| s.parse::<log::Level>().map_err(|e| e.to_string())
    )]
    stdout_level: log::Level,

    /// Set a regular expression for which entities should have logging
    /// level set to `--stdout-level`. Others will have level set to
    /// `Error`.
    #[arg(long, default_value = "")]
    stdout_filter_regex: String,

    /// The mesh shape as WxH, e.g. 4x4.
    #[arg(long, default_value = "4x4")]
    mesh_shape: String,

    /// Wrap both mesh dimensions into a torus.
    #[arg(long, default_value = "false")]
    torus: bool,

    /// Number of cores in each tile.
    #[arg(long, default_value = "4")]
    cores_per_tile: usize,

    /// Number of neurons in each core.
    #[arg(long, default_value = "64")]
    neurons_per_core: usize,

    /// Membrane potential threshold.
    #[arg(long, default_value = "1.0")]
    v_thresh: f32,

    /// Membrane potential after a fire.
    #[arg(long, default_value = "0.0")]
    v_reset: f32,

    /// Resting membrane potential.
    #[arg(long, default_value = "0.0")]
    v_rest: f32,

    /// Membrane time constant in ms.
    #[arg(long, default_value = "20.0")]
    tau_mem: f32,

    /// Refractory window in cycles.
    #[arg(long, default_value = "2")]
    t_ref: u32,

    /// Base address of the weight region.
    #[arg(long, default_value = "0")]
    base_weight_addr: u64,

    /// Stride between tiles' weight regions (packed layout when omitted).
    #[arg(long)]
    per_tile_stride: Option<u64>,

    /// Memory response delay in cycles.
    #[arg(long, default_value = "4")]
    memory_delay: u64,

    /// Single weight file concatenating all cores.
    #[arg(long)]
    weight_file: Option<String>,

    /// Per-core weight file template with `{core}` or `{core:02d}`.
    #[arg(long)]
    weight_file_template: Option<String>,

    /// Per-core blocks to skip at the start of a single weight file.
    #[arg(long, default_value = "0")]
    file_core_offset: usize,

    /// Weight used when no file is given and to pad short files.
    #[arg(long, default_value = "0.5")]
    fill_value: f32,

    /// The spike trace to replay.
    #[arg(long)]
    spike_trace: Option<String>,

    /// Multiplier applied to trace timestamps.
    #[arg(long, default_value = "1.0")]
    time_scale: f64,

    /// Constant added to trace neuron ids.
    #[arg(long, default_value = "0")]
    neuron_offset: u32,

    /// Stop loading the trace after this many records.
    #[arg(long)]
    max_events: Option<usize>,

    /// Stop the simulation after this many cycles.
    #[arg(long)]
    stop_at: Option<u64>,

    /// Ring virtual channels per direction.
    #[arg(long, default_value = "2")]
    ring_vcs: u32,

    /// Credits per ring VC.
    #[arg(long, default_value = "8")]
    ring_credits: u32,

    /// Mesh virtual channels per port.
    #[arg(long, default_value = "2")]
    mesh_vcs: usize,

    /// Credits per mesh VC.
    #[arg(long, default_value = "8")]
    mesh_credits: u32,

    /// NIC send queue bound in packets.
    #[arg(long, default_value = "16")]
    nic_output_buf: usize,

    /// Route around congested mesh ports.
    #[arg(long, default_value = "false")]
    adaptive_routing: bool,

    /// Fetch whole weight rows instead of cachelines on a miss.
    #[arg(long, default_value = "false")]
    merge_rows: bool,

    /// Cacheline size in bytes for the cacheline merge.
    #[arg(long, default_value = "64")]
    cache_line_bytes: u32,

    /// Warm the weight caches from memory before the run.
    #[arg(long, default_value = "false")]
    preload_weights: bool,

    /// Use event-carried weights instead of the memory path.
    #[arg(long, default_value = "false")]
    use_event_weight: bool,

    /// Enable the per-tile test-traffic generator.
    #[arg(long, default_value = "false")]
    test_traffic: bool,

    /// The tile test spikes are addressed to.
    #[arg(long, default_value = "0")]
    test_target_tile: u32,

    /// Cycles between test bursts.
    #[arg(long, default_value = "100")]
    test_period: u64,

    /// Spikes per test burst.
    #[arg(long, default_value = "4")]
    test_spikes_per_burst: u32,

    /// Total test spikes per tile; 0 is unlimited.
    #[arg(long, default_value = "64")]
    test_max_spikes: u32,

    /// The weight carried on test spikes.
    #[arg(long, default_value = "0.2")]
    test_weight: f32,

    /// Verify this many weight samples per core against the fill value.
    #[arg(long)]
    verify_weights: Option<u32>,

    /// Cycles before weight verification starts.
    #[arg(long, default_value = "100")]
    warmup_cycles: u64,

    /// Show a progress bar over delivered spikes.
    #[arg(long)]
    progress: bool,

    /// Number of ticks between progress bar updates.
    #[arg(long, default_value = "1000")]
    progress_ticks: u64,
}

fn parse_mesh_shape(shape: &str) -> Result<(usize, usize), SimError> {
    let mut parts = shape.split('x');
    let parsed = match (parts.next(), parts.next(), parts.next()) {
        (Some(width), Some(height), None) => {
            width.parse::<usize>().ok().zip(height.parse::<usize>().ok())
        }
        _ => None,
    };
    match parsed {
        Some(shape) => Ok(shape),
        None => sim_error!("cannot parse mesh shape '{shape}', expected WxH"),
    }
}

fn build_tracker(args: &Cli) -> Tracker {
    if !args.stdout {
        return dev_null_tracker();
    }
    let mut manager = EntityManager::new(args.stdout_level);
    if !args.stdout_filter_regex.is_empty() {
        manager = EntityManager::new(log::Level::Error);
        manager
            .add_entity_level_filter(&args.stdout_filter_regex, args.stdout_level)
            .unwrap_or_else(|e| panic!("{}", e.0));
    }
    let writer = Box::new(std::io::BufWriter::new(std::io::stdout()));
    Rc::new(TextTracker::new(manager, writer))
}

fn build_config(args: &Cli) -> Result<SimConfig, SimError> {
    let (width, height) = parse_mesh_shape(&args.mesh_shape)?;
    if width == 0 || height == 0 {
        return sim_error!("mesh shape {width}x{height} has no tiles");
    }

    let weight_source = if let Some(path) = &args.weight_file {
        WeightSource::SingleFile {
            path: path.clone(),
            file_core_offset: args.file_core_offset,
        }
    } else if let Some(template) = &args.weight_file_template {
        WeightSource::PerCoreFiles {
            template: template.clone(),
        }
    } else {
        WeightSource::Fill
    };

    let spike_trace = args.spike_trace.as_ref().map(|path| TraceSourceConfig {
        path: path.clone(),
        time_scale: args.time_scale,
        neuron_offset: args.neuron_offset,
        max_events: args.max_events,
    });

    let test_traffic = args.test_traffic.then_some(TestTrafficConfig {
        target_tile: args.test_target_tile,
        period: args.test_period,
        spikes_per_burst: args.test_spikes_per_burst,
        max_spikes: args.test_max_spikes,
        weight: args.test_weight,
    });

    let verify = args.verify_weights.map(|samples| VerifyConfig {
        samples,
        expected_weight: args.fill_value,
        epsilon: 1e-6,
    });

    // Small grids cannot carry the three layered bands; fall back to a
    // fixed next-tile pattern.
    let num_tiles = width * height;
    let fanout = if num_tiles >= 4 {
        FanOutPolicy::Layered
    } else {
        let npt = (args.cores_per_tile * args.neurons_per_core) as u32;
        FanOutPolicy::SingleTarget {
            neuron: (num_tiles as u32 - 1) * npt,
        }
    };

    Ok(SimConfig {
        width,
        height,
        torus: args.torus,
        cores_per_tile: args.cores_per_tile,
        neurons_per_core: args.neurons_per_core,
        v_thresh: args.v_thresh,
        v_reset: args.v_reset,
        v_rest: args.v_rest,
        tau_mem_ms: args.tau_mem,
        t_ref: args.t_ref,
        base_weight_addr: args.base_weight_addr,
        per_tile_stride: args.per_tile_stride,
        memory_delay: args.memory_delay,
        weight_source,
        fill_value: args.fill_value,
        validate_length: true,
        spike_trace,
        stop_at: args.stop_at,
        ring_vcs: args.ring_vcs,
        ring_credits: args.ring_credits,
        nic_output_buf: args.nic_output_buf,
        mesh_vcs: args.mesh_vcs,
        mesh_credits: args.mesh_credits,
        adaptive_routing: args.adaptive_routing,
        merge_rows: args.merge_rows,
        cache_line_bytes: args.cache_line_bytes,
        preload_weights: args.preload_weights,
        use_event_weight: args.use_event_weight,
        warmup_cycles: args.warmup_cycles,
        verify,
        test_traffic,
        fanout,
        // On the memory path the weight on fan-out spikes is unused.
        fanout_weight: if args.use_event_weight {
            args.fill_value
        } else {
            0.0
        },
        ..SimConfig::default()
    })
}

/// Spawn a background task updating the progress bar with the number of
/// spikes the cores have received so far.
fn start_progress(
    spawner: &Spawner,
    clock: Clock,
    progress_ticks: u64,
    tiles: Vec<Rc<Tile>>,
    progress_bar: ProgressBar,
) {
    spawner.spawn(async move {
        let mut seen = 0;
        loop {
            // Use the `or_exit` wait so this task never holds the
            // simulation open on its own.
            clock.wait_ticks_or_exit(progress_ticks).await;
            let delivered: u64 = tiles
                .iter()
                .map(|tile| tile.core_stat_total("spikes_received"))
                .sum();
            progress_bar.inc(delivered - seen);
            seen = delivered;
        }
    });
}

fn main() -> Result<(), SimError> {
    let args = Cli::parse();

    let tracker = build_tracker(&args);
    let mut engine = Engine::new(&tracker);
    let clock = engine.default_clock();
    let spawner = engine.spawner();

    let config = build_config(&args)?;
    let platform = Platform::build(&mut engine, &config)?;

    let progress_bar = ProgressBar::new_spinner();
    if args.progress {
        start_progress(
            &spawner,
            clock.clone(),
            args.progress_ticks,
            platform.tiles.clone(),
            progress_bar.clone(),
        );
    }

    run_platform(&mut engine, &config)?;

    if args.progress {
        progress_bar.finish();
    }

    let top = engine.top().clone();
    info!(top ; "simulation complete at {:.2}ns", clock.time_now_ns());
    info!(top ; "spikes received by cores: {}",
        platform.total_core_stat("spikes_received"));
    info!(top ; "neurons fired: {}", platform.total_core_stat("neurons_fired"));
    info!(top ; "spikes dropped: {}",
        platform.total_tile_stat("spikes_dropped") + platform.fabric_stat("spikes_dropped"));
    Ok(())
}

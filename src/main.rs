//! VizFlow-RS headless runner
//!
//! Builds a demo pipeline (synthetic trajectory → scale → time attribute →
//! smoothing → scene), evaluates a frame range and reports per-frame status,
//! cache contents and task activity.

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use vizflow_rs::{
    concurrent::TaskEvent,
    config::{AnimationSettings, EngineConfig},
    data::{DataBuffer, DataObject, DataRef},
    dataset::Dataset,
    graph::{PropertyValue, TargetId},
    pipeline::{
        modifiers::{SCALE_BUFFER_CLASS, SMOOTHING_CLASS, TIME_ATTRIBUTE_CLASS},
        node::SOURCE_CLASS,
        DataSource, PipelineFlowState, PipelineNode,
    },
    types::{TimeInterval, TimePoint},
};

#[derive(Parser, Debug)]
#[command(name = "vizflow", version, about = "Evaluate a demo pipeline over a frame range")]
struct Cli {
    /// Engine configuration file (.toml or .json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// First frame to evaluate (defaults to the configured animation range).
    #[arg(long)]
    first: Option<i64>,

    /// Last frame to evaluate (inclusive).
    #[arg(long)]
    last: Option<i64>,

    /// Number of particles in the synthetic trajectory.
    #[arg(long, default_value_t = 1000)]
    particles: usize,

    /// Scale factor applied to the particle positions.
    #[arg(long, default_value_t = 2.0)]
    scale: f64,

    /// Keep every evaluated frame in the caches.
    #[arg(long, default_value_t = false)]
    trajectory_caching: bool,

    /// Override the worker thread count (0 = one per core).
    #[arg(long)]
    threads: Option<usize>,

    /// Write the effective configuration to this path and exit.
    #[arg(long)]
    save_config: Option<PathBuf>,
}

/// Particle positions on a sine wave, shifted by the frame time.
fn synthetic_frame(particles: usize, time: TimePoint) -> anyhow::Result<PipelineFlowState> {
    let values = (0..particles)
        .map(|i| ((i as f64) * 0.1 + time as f64 * 0.05).sin())
        .collect();
    let buffer = DataBuffer::from_values(1, values).context("Building positions")?;
    let mut root = DataObject::collection();
    root.add_child(DataRef::new(DataObject::buffer("Position", buffer)))?;
    let mut state = PipelineFlowState::from_collection(root);
    state.set_validity(TimeInterval::instant(time));
    Ok(state)
}

fn build_pipeline(dataset: &mut Dataset, cli: &Cli) -> anyhow::Result<(Vec<TargetId>, TargetId)> {
    let particles = cli.particles;
    let source = dataset.create_object(SOURCE_CLASS)?;
    dataset.set_source_data(
        source,
        DataSource::asynchronous(move |request| synthetic_frame(particles, request.time)),
    )?;

    let mut stages = vec![source];
    let mut upstream = source;
    for class_name in [SCALE_BUFFER_CLASS, TIME_ATTRIBUTE_CLASS, SMOOTHING_CLASS] {
        let modifier = dataset.create_object(class_name)?;
        if class_name == SCALE_BUFFER_CLASS {
            dataset.set_property(modifier, "factor", PropertyValue::Float(cli.scale))?;
        }
        upstream = dataset.apply_modifier(upstream, modifier)?;
        stages.push(upstream);
    }
    let scene = dataset.create_scene_node(upstream)?;
    stages.push(scene);
    Ok((stages, scene))
}

fn report_caches(dataset: &Dataset, stages: &[TargetId]) {
    for &stage in stages {
        if let Some(node) = dataset.graph().get::<PipelineNode>(stage) {
            tracing::info!(
                "  {:<20} {:?}, {} entries {:?}",
                node.title(),
                node.cache().status(),
                node.cache().len(),
                node.cache().intervals()
            );
        }
    }
}

fn report_tasks(dataset: &Dataset) {
    let events = dataset.task_manager().drain_events();
    let started = events
        .iter()
        .filter(|e| matches!(e, TaskEvent::Started { .. }))
        .count();
    let canceled = events
        .iter()
        .filter(|e| matches!(e, TaskEvent::Finished { canceled: true, .. }))
        .count();
    tracing::info!(
        "Tasks: {} started since last report, {} canceled, {} total",
        started,
        canceled,
        dataset.task_manager().tasks_started()
    );
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Loading configuration from {:?}", path))?,
        None => EngineConfig::load_or_default(),
    };
    if cli.trajectory_caching {
        config.cache.trajectory_caching = true;
    }
    if let Some(threads) = cli.threads {
        config.executor.worker_threads = threads;
    }
    if let Some(path) = &cli.save_config {
        config.save(path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let _guard = vizflow_rs::logging::init(&config.logging);
    tracing::info!("Starting VizFlow-RS headless runner");

    let animation = AnimationSettings {
        first_frame: cli.first.unwrap_or(config.animation.first_frame),
        last_frame: cli.last.unwrap_or(config.animation.last_frame.max(9)),
        ..config.animation.clone()
    };
    let mut dataset = Dataset::new(config)?;
    let (stages, scene) = build_pipeline(&mut dataset, &cli)?;

    tracing::info!(
        "Evaluating {} frames ({} particles)",
        animation.frame_count(),
        cli.particles
    );
    for pass in 1..=2 {
        for time in animation.frame_times() {
            let state = dataset.evaluate_blocking(scene, time)?;
            let timestep = state
                .data()
                .and_then(|root| root.find("Timestep"))
                .and_then(|attribute| attribute.as_attribute())
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".into());
            tracing::info!(
                "Pass {} frame {:>4}: {} (timestep {}, valid {})",
                pass,
                animation.time_to_frame(time),
                state.status(),
                timestep,
                state.validity()
            );
        }
        report_caches(&dataset, &stages);
        report_tasks(&dataset);
    }

    tracing::info!("Shutting down...");
    Ok(())
}

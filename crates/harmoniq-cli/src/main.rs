mod scene;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use harmoniq_router::{
    AudioBackend, BackendConfig, CycleMetrics, Engine, EngineConfig, EngineContext,
    ManualBackend, NodeId, Notification, RegionPayload,
};
use tracing_subscriber::EnvFilter;

use crate::scene::SceneSpec;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Graph(args) => execute_graph(args),
        Commands::Render(args) => execute_render(args),
        Commands::Run(args) => execute_run(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Drive the Harmoniq routing engine from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution layers and feedback connections of a scene.
    Graph(SceneArgs),
    /// Run a scene offline for a number of cycles, optionally recording the
    /// master bus.
    Render(RenderArgs),
    /// Run a scene on an audio backend in real time.
    Run(RunArgs),
}

#[derive(Args)]
struct SceneArgs {
    /// Scene description (JSON). A built-in demo scene is used when omitted.
    #[arg(long)]
    scene: Option<PathBuf>,
    /// Engine configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the worker count.
    #[arg(long)]
    workers: Option<usize>,
    /// Override the largest block size.
    #[arg(long)]
    block: Option<usize>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    scene: SceneArgs,
    /// Cycles to run.
    #[arg(long, default_value_t = 1000)]
    cycles: u32,
    /// Record the master bus while rendering.
    #[arg(long)]
    record: bool,
    /// Loop the given range of frames, as START:END.
    #[arg(long, value_parser = parse_range)]
    loop_range: Option<(u64, u64)>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    scene: SceneArgs,
    /// How long to run, in seconds.
    #[arg(long, default_value_t = 5.0)]
    seconds: f32,
}

fn parse_range(value: &str) -> Result<(u64, u64), String> {
    let (start, end) = value
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {value}"))?;
    let start = start.parse().map_err(|err| format!("bad start: {err}"))?;
    let end = end.parse().map_err(|err| format!("bad end: {err}"))?;
    Ok((start, end))
}

impl SceneArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_path(path)
                .with_context(|| format!("failed to load engine config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(block) = self.block {
            config.max_block = block;
        }
        config.validate()?;
        Ok(config)
    }

    fn scene_spec(&self) -> Result<SceneSpec> {
        match &self.scene {
            Some(path) => SceneSpec::load(path),
            None => Ok(SceneSpec::demo()),
        }
    }

    fn build(&self) -> Result<(Arc<EngineContext>, scene::Scene)> {
        let context = Arc::new(EngineContext::new(self.engine_config()?)?);
        let scene = scene::build(&context, &self.scene_spec()?)?;
        Ok((context, scene))
    }
}

fn execute_graph(args: SceneArgs) -> Result<()> {
    let (context, scene) = args.build()?;
    let graph = context.graph();
    let names: HashMap<NodeId, String> = graph
        .nodes()
        .map(|node| (node.id(), node.name().to_owned()))
        .collect();

    println!(
        "graph generation {} ({} nodes, {} tracks)",
        graph.generation(),
        graph.len(),
        scene.tracks.len()
    );
    for (index, layer) in context.execution_layers().iter().enumerate() {
        let members: Vec<String> = layer
            .iter()
            .map(|id| match names.get(id) {
                Some(name) => format!("{name} ({id})"),
                None => id.to_string(),
            })
            .collect();
        println!("  layer {index}: {}", members.join(", "));
    }
    let feedback: Vec<String> = graph
        .feedback_connections()
        .map(|id| id.to_string())
        .collect();
    if feedback.is_empty() {
        println!("  no feedback connections");
    } else {
        println!("  feedback connections: {}", feedback.join(", "));
    }
    if let Some(id) = scene.feedback {
        println!("  scene return {id} is feedback: {}", context.is_feedback(id));
    }
    Ok(())
}

fn execute_render(args: RenderArgs) -> Result<()> {
    let (context, scene) = args.scene.build()?;
    let block = context.config().max_block;
    let mut router = context.create_router()?;
    let mut backend = ManualBackend::new();
    backend.init(BackendConfig::new(context.config().sample_rate, block).with_channels(0, 2))?;
    backend.on_cycle(Box::new(move |inputs, outputs, frames| {
        router.process_io(inputs, outputs, frames);
    }));
    backend.activate()?;

    if let Some((start, end)) = args.loop_range {
        context.set_loop(start, end, true)?;
    }
    if args.record {
        context.arm_recording(&[scene.master_output()])?;
    }
    context.play()?;
    if args.record {
        context.record()?;
    }

    let started = Instant::now();
    let mut peak = 0.0f32;
    let mut sum_squares = 0.0f64;
    let mut samples = 0u64;
    let mut notifications = Vec::new();
    let mut regions = Vec::new();
    for cycle in 0..args.cycles {
        backend.cycle()?;
        for channel in 0..2 {
            let Some(output) = backend.output(channel) else {
                continue;
            };
            for &sample in output {
                peak = peak.max(sample.abs());
                sum_squares += f64::from(sample) * f64::from(sample);
            }
            samples += output.len() as u64;
        }
        if cycle % 64 == 63 {
            notifications.extend(context.service());
            regions.extend(context.drain_recordings());
        }
    }
    context.stop()?;
    backend.cycle()?;
    backend.deactivate()?;
    notifications.extend(context.service());
    regions.extend(context.drain_recordings());
    let elapsed = started.elapsed();

    let rms = if samples == 0 {
        0.0
    } else {
        (sum_squares / samples as f64).sqrt()
    };
    let frames = u64::from(args.cycles) * block as u64;
    let rendered = frames as f64 / f64::from(context.config().sample_rate);
    println!(
        "rendered {frames} frames ({rendered:.2}s of audio) in {:.3}s, {:.1}x real time",
        elapsed.as_secs_f64(),
        rendered / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  peak {peak:.4}, rms {rms:.4}");
    print_metrics(&context.metrics());
    print_notifications(&notifications);

    for region in regions {
        let kind = match &region.payload {
            RegionPayload::Audio(_) => "audio",
            RegionPayload::Midi(_) => "midi",
            RegionPayload::Control(_) => "control",
        };
        println!(
            "  recorded {kind} region {:?} on {}: start {}, {} frames, take {}",
            region.id, region.port, region.start, region.length, region.take
        );
    }
    Ok(())
}

fn execute_run(args: RunArgs) -> Result<()> {
    let (context, _scene) = args.scene.build()?;
    let config = context.config();
    let stream = BackendConfig::new(config.sample_rate, config.max_block.min(256));

    let engine = Engine::start(Arc::clone(&context), preferred_backend(), stream)?;
    println!("running on the {} backend", engine.backend_name());
    context.play()?;

    let deadline = Instant::now() + Duration::from_secs_f32(args.seconds.max(0.0));
    let mut notifications = Vec::new();
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
        notifications.extend(context.service());
    }
    context.stop()?;
    engine.shutdown()?;

    print_metrics(&context.metrics());
    print_notifications(&notifications);
    Ok(())
}

#[cfg(feature = "native")]
fn preferred_backend() -> Box<dyn AudioBackend> {
    Box::new(harmoniq_router::backend::CpalBackend::new())
}

#[cfg(not(feature = "native"))]
fn preferred_backend() -> Box<dyn AudioBackend> {
    Box::new(harmoniq_router::DummyBackend::new())
}

fn print_metrics(metrics: &CycleMetrics) {
    println!(
        "  cycles {}, xruns {}, faults {}, max block {:.1}us, dropped recording frames {}, dropped events {}",
        metrics.cycles,
        metrics.xruns,
        metrics.faults,
        metrics.max_block_ns as f64 / 1_000.0,
        metrics.dropped_recording_frames,
        metrics.dropped_events
    );
}

fn print_notifications(notifications: &[Notification]) {
    for notification in notifications {
        match notification {
            Notification::NodeFaulted { node, name, reason } => {
                println!("  node {name} ({node}) faulted: {}", reason.as_str());
            }
            Notification::Xrun { count } => println!("  xrun (total {count})"),
            Notification::RecordingOverflow { port, frames } => {
                println!("  recording overflow on {port}: {frames} frames dropped");
            }
            Notification::TransportRejected { state, request } => {
                println!("  transport refused {request} while {}", state.as_str());
            }
            Notification::BufferSizeMismatch { expected, got } => {
                println!("  backend delivered {got} frames, expected at most {expected}");
            }
        }
    }
}

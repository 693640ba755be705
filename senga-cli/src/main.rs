//! senga CLI entrypoint.
//!
//! ```bash
//! senga enhance --input frame.png --output out.png --preset old-anime
//! senga enhance --input frame.png --output out.png --backend cpu --cpu-mode fixed-preset --json
//! senga classify --input frame.png --locator https://example.com/ep1.mp4 --json
//! senga presets --json
//! senga run --frames ./stills --output-dir ./enhanced --fps 24
//! senga probe --json
//! ```

mod frames;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use senga_core::backend::FilterBackend;
use senga_core::error::{EngineError, Result};
use senga_core::frame::Frame;
use senga_core::settings::{EnhancementSettings, Preset, SettingsPatch};
use senga_core::source::{SourceId, VideoSource};
use senga_filters::{BackendSelection, CpuMode, DeviceKind, GpuFilter, open_device};
use senga_models::{ModelSlot, StageChain, StageGate};
use senga_pipeline::session::SurfaceFactory;
use senga_pipeline::{EngineConfig, EnhancementSession, classify};

use crate::frames::{DirectorySurface, ImageSequenceSource, StillSampler, load_frame, save_frame};

#[derive(Parser, Debug)]
#[command(
    name = "senga",
    version,
    about = "Real-time enhancement for animated video",
    arg_required_else_help = true,
    after_help = "Examples:\n  senga presets\n  senga enhance --input in.png --output out.png --preset high-quality\n  senga classify --input in.png --page-text \"Simulcast on Crunchyroll\" --json\n  senga run --frames ./stills --output-dir ./enhanced --fps 24 --json\n  senga probe --json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enhance one still through the filter backend and model stages.
    Enhance(EnhanceArgs),
    /// Report whether a still looks like animated content.
    Classify(ClassifyArgs),
    /// List the settings presets.
    Presets(PresetsArgs),
    /// Play a directory of stills through a frame processor.
    Run(RunArgs),
    /// Report which fragment devices can build the enhancement program.
    Probe(ProbeArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// GPU path when it builds, else CPU.
    Auto,
    /// GPU path only; fail if it does not build.
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CpuModeArg {
    FixedPreset,
    SettingsDriven,
}

impl From<CpuModeArg> for CpuMode {
    fn from(arg: CpuModeArg) -> Self {
        match arg {
            CpuModeArg::FixedPreset => CpuMode::FixedPreset,
            CpuModeArg::SettingsDriven => CpuMode::SettingsDriven,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct TuningArgs {
    /// Preset applied before `--settings` (default, old-anime, low-quality, high-quality).
    #[arg(short = 'p', long = "preset")]
    preset: Option<Preset>,

    /// JSON file with a partial settings object, e.g. {"sharpness":1.2}.
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// Engine config JSON.  Flags below override it.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[arg(short = 'b', long = "backend", value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Fragment device for the GPU path (auto, cuda, reference).
    #[arg(short = 'd', long = "device")]
    device: Option<DeviceKind>,

    #[arg(long = "cpu-mode", value_enum)]
    cpu_mode: Option<CpuModeArg>,

    /// Seed for the CPU near-black offset.
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Directory with `<stage>.onnx` model assets.
    #[arg(short = 'm', long = "models")]
    models: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct EnhanceArgs {
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    #[command(flatten)]
    tuning: TuningArgs,

    /// Seconds since playback start; seeds the dither.
    #[arg(long = "time", default_value_t = 0.0)]
    time: f32,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct ClassifyArgs {
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Media URL or path checked for keywords.
    #[arg(long = "locator", default_value = "")]
    locator: String,

    /// Page text checked for keywords.
    #[arg(long = "page-text", default_value = "")]
    page_text: String,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct PresetsArgs {
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Directory of png/jpg stills, played in name order.
    #[arg(short = 'f', long = "frames")]
    frames: PathBuf,

    #[arg(short = 'o', long = "output-dir")]
    output_dir: PathBuf,

    #[command(flatten)]
    tuning: TuningArgs,

    /// Tick rate; overrides `refresh_hz` from the config.
    #[arg(long = "fps")]
    fps: Option<f64>,

    /// Page text for classification.
    #[arg(long = "page-text", default_value = "")]
    page_text: String,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

const JSON_SCHEMA_VERSION: u32 = 1;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Enhance(args) if args.json => Some("enhance"),
        Commands::Classify(args) if args.json => Some("classify"),
        Commands::Presets(args) if args.json => Some("presets"),
        Commands::Run(args) if args.json => Some("run"),
        Commands::Probe(args) if args.json => Some("probe"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Enhance(args) => build_runtime().and_then(|rt| rt.block_on(run_enhance(args))),
        Commands::Classify(args) => run_classify(args),
        Commands::Presets(args) => run_presets(args),
        Commands::Run(args) => build_runtime().and_then(|rt| rt.block_on(run_sequence(args))),
        Commands::Probe(args) => run_probe(args),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if let Some(command) = json_error_command {
                println!("{}", command_error_json(command, &err));
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

// ─── Shared setup ────────────────────────────────────────────────────────────

/// Config and initial settings from the tuning flags.
fn resolve_engine(tuning: &TuningArgs) -> Result<(EngineConfig, EnhancementSettings)> {
    let mut config = match &tuning.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    config.prefer_gpu = tuning.backend != BackendArg::Cpu;
    if let Some(device) = tuning.device {
        config.device = device;
    }
    if let Some(mode) = tuning.cpu_mode {
        config.cpu_mode = mode.into();
    }
    if tuning.seed.is_some() {
        config.cpu_seed = tuning.seed;
    }
    if tuning.models.is_some() {
        config.asset_dir = tuning.models.clone();
    }
    config.validate()?;

    let mut settings = tuning.preset.map(Preset::settings).unwrap_or_default();
    if let Some(path) = &tuning.settings {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!(
                "Failed to read settings from {}: {err}",
                path.display()
            ))
        })?;
        let parsed = SettingsPatch::from_json_str(&raw)?;
        for skipped in &parsed.skipped {
            warn!(key = %skipped.key, reason = ?skipped.reason, "Ignoring settings key");
        }
        settings = settings.merged(&parsed.patch);
    }
    Ok((config, settings))
}

/// Select a backend, enforcing `--backend gpu`.
fn select_for(tuning: &TuningArgs, config: &EngineConfig) -> Result<BackendSelection> {
    let selection = config.backend_selection();
    if tuning.backend == BackendArg::Gpu
        && let Some(fault) = selection.init_fault
    {
        return Err(fault);
    }
    Ok(selection)
}

/// Load every configured stage up front; unavailable stages are skipped.
async fn load_stages(config: &EngineConfig) -> StageChain {
    let mut chain = StageChain::new();
    let Some(loader) = config.stage_loader() else {
        return chain;
    };
    for name in &config.model_stages {
        match loader.load(name).await {
            Ok(stage) => chain.push(ModelSlot::loaded(stage), StageGate::for_stage(name)),
            Err(err) => warn!(
                stage = %name,
                error = %err,
                code = err.error_code(),
                "Model stage unavailable; continuing without it"
            ),
        }
    }
    chain
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn run_enhance(args: EnhanceArgs) -> Result<()> {
    let (config, settings) = resolve_engine(&args.tuning)?;
    let input = load_frame(&args.input)?;
    let BackendSelection {
        mut backend,
        init_fault,
    } = select_for(&args.tuning, &config)?;
    let mut stages = load_stages(&config).await;

    let started = Instant::now();
    let output = if settings.enabled {
        let mut rendered = Frame::new(0, 0);
        backend.render(&input, &settings, args.time, &mut rendered)?;
        stages.apply(&rendered, &settings)?.unwrap_or(rendered)
    } else {
        input.clone()
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    backend.release();
    stages.release();
    save_frame(&output, &args.output)?;

    info!(
        backend = %backend.kind(),
        device = backend.name(),
        width = output.width(),
        height = output.height(),
        elapsed_ms,
        "Enhanced still"
    );
    if args.json {
        println!(
            "{}",
            ok_json(
                "enhance",
                json!({
                    "input": args.input.display().to_string(),
                    "output": args.output.display().to_string(),
                    "width": output.width(),
                    "height": output.height(),
                    "backend": backend.kind(),
                    "backend_name": backend.name(),
                    "backend_fault": init_fault.map(|e| e.to_string()),
                    "stages": stages.states(),
                    "settings": settings,
                    "elapsed_ms": elapsed_ms,
                }),
            )
        );
    } else {
        println!("enhance: ok");
        println!("backend={} ({})", backend.kind(), backend.name());
        if let Some(fault) = init_fault {
            println!("gpu_fault={fault}");
        }
        println!("output={} {}x{}", args.output.display(), output.width(), output.height());
    }
    Ok(())
}

fn run_classify(args: ClassifyArgs) -> Result<()> {
    let frame = load_frame(&args.input)?;
    let mut sampler = StillSampler(Some(frame));
    let result = classify(&args.locator, &args.page_text, &mut sampler);
    if args.json {
        println!("{}", ok_json("classify", json!({ "result": result })));
    } else {
        println!("animated={}", result.is_animated);
        println!("reason={:?}", result.reason);
        if let Some(stats) = result.stats {
            println!("edge_count={} flat_count={}", stats.edge_count, stats.flat_count);
        }
    }
    Ok(())
}

fn run_presets(args: PresetsArgs) -> Result<()> {
    if args.json {
        let presets: Vec<Value> = Preset::ALL
            .into_iter()
            .map(|p| json!({ "name": p.name(), "settings": p.settings() }))
            .collect();
        println!("{}", ok_json("presets", json!({ "presets": presets })));
    } else {
        for preset in Preset::ALL {
            let s = preset.settings();
            println!(
                "{:<12} sharpness={} edge={} noise={} upscaling={} gamma={} color={} deband={}",
                preset.name(),
                s.sharpness,
                s.edge_enhance,
                s.noise_reduction,
                s.upscaling,
                s.gamma,
                s.color_boost,
                s.debanding
            );
        }
    }
    Ok(())
}

async fn run_sequence(args: RunArgs) -> Result<()> {
    let (mut config, settings) = resolve_engine(&args.tuning)?;
    if let Some(fps) = args.fps {
        config.refresh_hz = fps;
        config.validate()?;
    }
    // Probe the backend once so `--backend gpu` fails before any output.
    drop(select_for(&args.tuning, &config)?);
    std::fs::create_dir_all(&args.output_dir)?;

    let id = SourceId(1);
    let source = ImageSequenceSource::open(id, &args.frames)?;
    let total = source.len() as u64;
    let first = load_frame(&frames::list_frames(&args.frames)?[0])?;
    let classification = classify(source.locator(), &args.page_text, &mut StillSampler(Some(first)));

    let written = Arc::new(AtomicU64::new(0));
    let surfaces: SurfaceFactory = {
        let dir = args.output_dir.clone();
        let written = Arc::clone(&written);
        Arc::new(move |_| Box::new(DirectorySurface::new(dir.clone(), Arc::clone(&written))))
    };
    let mut session = EnhancementSession::new(config.session_deps(surfaces), settings);

    let attached = !config.require_animated || classification.is_animated;
    let mut backend = None;
    let mut metrics = None;
    if attached {
        session.attach(Box::new(source));
        if let Some(processor) = session.processor(id) {
            let status = processor.status();
            backend = Some((status.backend, status.backend_name));
            metrics = Some(processor.metrics());
        }
    } else {
        info!("Frames not classified as animated; nothing to enhance");
    }

    let started = Instant::now();
    let mut ticks = config.interval_ticks()?.with_limit(if attached { total } else { 0 });
    let (events_tx, mut events) = mpsc::channel(1);
    drop(events_tx);
    session.run(&mut ticks, &mut events, &CancellationToken::new()).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let snapshot = metrics.map(|m| m.snapshot()).unwrap_or_default();
    let frames_written = written.load(Ordering::Relaxed);
    if args.json {
        println!(
            "{}",
            ok_json(
                "run",
                json!({
                    "frames_in": total,
                    "frames_written": frames_written,
                    "attached": attached,
                    "classification": classification,
                    "backend": backend.as_ref().map(|(kind, _)| kind),
                    "backend_name": backend.as_ref().map(|(_, name)| name),
                    "metrics": snapshot,
                    "elapsed_ms": elapsed_ms,
                }),
            )
        );
    } else {
        println!("run: ok");
        println!("frames_in={total} frames_written={frames_written}");
        println!("animated={} reason={:?}", classification.is_animated, classification.reason);
        if let Some((kind, name)) = &backend {
            println!("backend={kind} ({name})");
        }
        println!(
            "cycle_faults={} avg_render_us={}",
            snapshot.cycle_faults, snapshot.avg_render_us
        );
    }
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let mut rows = Vec::new();
    for kind in [DeviceKind::Reference, DeviceKind::Cuda] {
        let built = open_device(kind).and_then(GpuFilter::new);
        rows.push(match built {
            Ok(filter) => json!({
                "device": kind.to_string(),
                "name": filter.name(),
                "ok": true,
                "error": null,
            }),
            Err(err) => json!({
                "device": kind.to_string(),
                "ok": false,
                "error": err.to_string(),
            }),
        });
    }
    let cuda_devices = cuda_device_count();

    if args.json {
        println!(
            "{}",
            ok_json(
                "probe",
                json!({
                    "features": {
                        "cuda": cfg!(feature = "cuda"),
                        "onnx": cfg!(feature = "onnx"),
                    },
                    "cuda_devices": cuda_devices,
                    "devices": rows,
                }),
            )
        );
    } else {
        println!("probe: ok");
        println!(
            "features: cuda={} onnx={}",
            cfg!(feature = "cuda"),
            cfg!(feature = "onnx")
        );
        println!("cuda_devices={cuda_devices}");
        for row in &rows {
            println!(
                "device={} status={}{}",
                row["device"].as_str().unwrap_or("?"),
                if row["ok"].as_bool() == Some(true) { "ok" } else { "error" },
                row["error"]
                    .as_str()
                    .map(|e| format!(" error={e}"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

#[cfg(feature = "cuda")]
fn cuda_device_count() -> usize {
    senga_filters::cuda::device_count().unwrap_or(0)
}

#[cfg(not(feature = "cuda"))]
fn cuda_device_count() -> usize {
    0
}

// ─── JSON ────────────────────────────────────────────────────────────────────

fn ok_json(command: &str, body: Value) -> String {
    let mut out = json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": true,
    });
    if let (Some(header), Value::Object(fields)) = (out.as_object_mut(), body) {
        header.extend(fields);
    }
    out.to_string()
}

fn command_error_json(command: &str, err: &EngineError) -> String {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": err.to_string(),
        "code": err.error_code(),
    })
    .to_string()
}

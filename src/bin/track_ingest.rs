//! track_ingest - Decode a video into a frame store.
//!
//! Frames are optionally matted, resized and center-cropped to a square,
//! JPEG encoded and committed in chunks under sequential frame keys. An
//! existing store is left alone unless `--remove-buffer` or `--resume` is given.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use track_data_engine::ingest::{FileConfig, FileSource, IngestionPipeline, ResumePolicy};
use track_data_engine::matting::{BackendRegistry, StubBackend};
use track_data_engine::{DataEngine, Device, EngineConfig, VideoSource};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "track_ingest", about = "Decode a video into a frame store")]
struct Args {
    /// Video file, or a data directory holding video.mp4
    #[arg(long, value_name = "PATH")]
    data: Option<PathBuf>,

    /// Compute device: cpu, mps, cuda, cuda:N or a GPU index
    #[arg(short, long, value_name = "DEVICE")]
    device: Option<String>,

    /// Write a sampled visualization clip next to the store
    #[arg(short, long)]
    visualization: bool,

    /// Delete an existing frame store and rebuild it
    #[arg(short, long, conflicts_with = "resume")]
    remove_buffer: bool,

    /// Continue an interrupted store, inserting only missing frames
    #[arg(long)]
    resume: bool,

    /// Config file (JSON, or TOML by extension)
    #[arg(long, value_name = "PATH", env = "TRACK_CONFIG")]
    config: Option<PathBuf>,

    /// ONNX matting model; enables background removal
    #[arg(long, value_name = "PATH")]
    matting_model: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::load()?,
    };
    if let Some(data) = &args.data {
        apply_data_arg(&mut cfg, data);
    }
    if let Some(device) = &args.device {
        cfg.device = device
            .parse::<Device>()
            .map_err(|e| anyhow!("--device: {}", e))?;
    }

    let policy = if args.remove_buffer {
        ResumePolicy::Rebuild
    } else if args.resume {
        ResumePolicy::Resume
    } else {
        ResumePolicy::SkipExisting
    };

    let mut engine = DataEngine::from_config(&cfg);
    log::info!("{}", engine);
    if policy == ResumePolicy::SkipExisting && engine.has_frame_store() {
        println!(
            "track_ingest: frame store already present at {}, nothing to do",
            engine.registry().store_path().display()
        );
        return Ok(());
    }

    let video_path = cfg.resolved_video_path();
    let mut source = {
        let _stage = ui.stage("Open video");
        FileSource::new(FileConfig::new(video_path.to_string_lossy()))?
    };
    let metadata = source.metadata().clone();

    let backends = {
        let _stage = ui.stage("Select device");
        matting_backends(args.matting_model.as_deref(), metadata.width, metadata.height)?
    };
    let backend = backends.backend_for_device(cfg.device)?;
    log::info!("device {} ready", cfg.device);

    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupted.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let settings = cfg.ingest_settings(policy, args.matting_model.is_some(), args.visualization);
    let bar = ui.frames(metadata.frame_count);
    let progress_bar = bar.clone();
    let mut pipeline = IngestionPipeline::new(settings)
        .with_matting(backend)
        .with_interrupt(interrupted)
        .with_progress(move |p| progress_bar.set_position(p.frames_seen));

    let result = {
        let _stage = ui.stage("Ingest frames");
        engine.build_frame_store(&mut source, &mut pipeline)
    };
    bar.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            log::error!("ingestion {}", pipeline.state());
            return Err(e.into());
        }
    };
    println!(
        "track_ingest: {} frames seen, {} written, {} already present, {} commits",
        report.frames_seen, report.frames_written, report.frames_skipped, report.commits
    );
    if report.visualization_frames > 0 {
        println!(
            "track_ingest: visualization clip holds {} frames",
            report.visualization_frames
        );
    }
    Ok(())
}

/// `--data` may name the video itself or the directory holding it.
fn apply_data_arg(cfg: &mut EngineConfig, data: &Path) {
    if data.is_dir() {
        cfg.data_root = data.to_path_buf();
        return;
    }
    cfg.data_root = data
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if let Some(name) = data.file_name() {
        cfg.video_path = PathBuf::from(name);
    }
    if let Some(stem) = data.file_stem() {
        cfg.output_dir = PathBuf::from(stem);
    }
}

fn matting_backends(model: Option<&Path>, width: u32, height: u32) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    if let Some(model) = model {
        #[cfg(feature = "backend-tract")]
        {
            let backend = track_data_engine::matting::TractBackend::new(model, width, height)?;
            registry.register(backend);
            registry.set_default("tract")?;
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            let _ = (width, height);
            return Err(anyhow!(
                "--matting-model {} requires the backend-tract feature",
                model.display()
            ));
        }
    }
    Ok(registry)
}

//! # HEARTH Demo
//!
//! Headless run of the frame scheduler with the task pool attached.
//!
//! ## Usage
//!
//! ```bash
//! hearth_demo --config demo.toml --frames 600
//! RUST_LOG=hearth_core=debug hearth_demo
//! ```

mod config;
mod scene;
mod systems;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use hearth_core::{FrameScheduler, SystemMode};
use hearth_tasks::TaskScheduler;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{DemoConfig, DemoError};
use crate::systems::{CensusTotals, OrbitMonitor, SparkCensus};

struct Args {
    config: Option<PathBuf>,
    frames: Option<u64>,
}

fn parse_args() -> Result<Option<Args>, DemoError> {
    let mut args = Args {
        config: None,
        frames: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or_else(|| DemoError::Usage("--config needs a path".into()))?;
                args.config = Some(PathBuf::from(path));
            }
            "--frames" | "-f" => {
                let value = iter.next().ok_or_else(|| DemoError::Usage("--frames needs a number".into()))?;
                let frames = value
                    .parse()
                    .map_err(|_| DemoError::Usage(format!("invalid frame count `{value}`")))?;
                args.frames = Some(frames);
            }
            "--help" | "-h" => {
                println!("Usage: hearth_demo [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>    TOML config file");
                println!("  -f, --frames <NUM>     Frames to run (overrides the config)");
                println!("  -h, --help             Show this help");
                return Ok(None);
            }
            other => return Err(DemoError::Usage(format!("unknown argument `{other}`"))),
        }
    }
    Ok(Some(args))
}

fn run(args: Args) -> Result<(), DemoError> {
    let mut config = match &args.config {
        Some(path) => DemoConfig::load(path)?,
        None => DemoConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.frames = frames;
    }
    info!(frames = config.frames, orbiters = config.orbiters, "starting demo");

    let pool = Arc::new(TaskScheduler::new(&config.tasks)?);
    let totals = Arc::new(CensusTotals::default());

    let mut engine = FrameScheduler::new(config.engine.clone())?;
    engine.add_system(OrbitMonitor, SystemMode::Synchronous)?;
    engine.add_system(
        SparkCensus::new(Arc::clone(&pool), Arc::clone(&totals), 60),
        SystemMode::Concurrent,
    )?;

    let hub = scene::build_hub(engine.ids(), config.orbiters);
    engine.commands().add_entity(hub)?;

    let ran = engine.run_frames(config.frames)?;

    // Renderer-side view of the last published frame.
    let published = {
        let frozen = engine.frozen_transforms();
        let snapshot = frozen.read_handle();
        (snapshot.frame(), snapshot.len())
    };

    let entities = engine.scene().len();
    drop(engine);
    pool.shutdown();

    info!(
        frames = ran,
        entities,
        published_frame = published.0,
        published_transforms = published.1,
        peak_sparks = totals.peak.load(Ordering::Relaxed),
        reports = totals.reports.load(Ordering::Relaxed),
        tasks = ?pool.stats(),
        "demo finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = parse_args().and_then(|args| args.map_or(Ok(()), run));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}

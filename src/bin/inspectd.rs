//! inspectd - kit completeness inspection station
//!
//! This daemon:
//! 1. Loads configuration and prepares the storage directories
//! 2. Loads the detector and opens the camera (both fatal on failure)
//! 3. Runs acquisition and inference on background threads
//! 4. Reads operator commands from stdin and renders status on stdout
//! 5. Saves a photo, a completeness record and an audit row per accepted kit

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use kit_inspector::detect::build_backend;
use kit_inspector::{
    logging, open_camera, CaptureService, CompletenessTracker, FrameQueue, FsCaptureStore,
    LatestFrame, OperatorCommand, Pipeline, SharedSettings, Station, StationConfig,
    TerminalPresenter,
};

#[path = "../ui.rs"]
mod ui;

use ui::{Ui, UiMode};

const EVENT_CAPACITY: usize = 16;
const LOG_MIRROR_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "inspectd", version, about = "Kit completeness inspection station")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Overrides INSPECT_CONFIG.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// UI mode for stderr progress
    #[arg(long, env = "INSPECT_UI", value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
    /// Do not read operator commands from stdin; Ctrl-C quits.
    #[arg(long)]
    no_stdin: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    let cfg = {
        let stage = ui.stage("Load configuration");
        let cfg = StationConfig::load_from(args.config.as_deref())?;
        stage.finish(format!("{} required objects", cfg.required_objects.len()));
        cfg
    };

    let (log_tx, log_rx) = crossbeam_channel::bounded(LOG_MIRROR_CAPACITY);
    let log_path = logging::init(&cfg.log_dir(), Some(log_tx))?;
    log::info!("inspectd {} starting", env!("CARGO_PKG_VERSION"));
    log::info!("diagnostic log: {}", log_path.display());

    let required = cfg.required_set()?;
    log::info!("required objects: {}", required.names().join(", "));

    let store = {
        let stage = ui.stage("Prepare storage");
        let store = FsCaptureStore::open(cfg.storage())?
            .with_output_size(cfg.output.width, cfg.output.height)?
            .with_jpeg_quality(cfg.output.jpeg_quality)?;
        stage.finish(cfg.base_dir.display().to_string());
        store
    };

    let backend = {
        let stage = ui.stage("Load model");
        let backend = build_backend(&cfg.model, &required)?;
        stage.finish(format!(
            "{} backend, {} classes",
            backend.name(),
            backend.class_names().len()
        ));
        backend
    };

    let source = {
        let stage = ui.stage("Open camera");
        let source = open_camera(&cfg.camera)?;
        stage.finish(source.describe());
        source
    };

    let tracker = Arc::new(CompletenessTracker::new(required));
    let settings = SharedSettings::new(cfg.detection.clone())?;
    let latest = LatestFrame::new();
    let queue = FrameQueue::new(cfg.queue_capacity)?;
    let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);

    let pipeline = {
        let stage = ui.stage("Start pipeline");
        let pipeline = Pipeline::new(queue, latest.clone(), tracker.clone(), settings.clone())
            .with_retry(cfg.retry.clone())?
            .with_pop_timeout(cfg.pop_timeout)
            .spawn(source, backend, event_tx)?;
        stage.finish("");
        pipeline
    };

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let quit_tx = cmd_tx.clone();
    ctrlc::set_handler(move || {
        let _ = quit_tx.send(OperatorCommand::Quit);
    })
    .context("failed to install Ctrl-C handler")?;
    if !args.no_stdin {
        spawn_command_reader(cmd_tx)?;
    }

    let mut presenter = TerminalPresenter::new(std::io::stdout());
    if let Some(path) = &cfg.ui.live_view_path {
        log::info!("live view: {}", path.display());
        presenter = presenter.with_live_view(path.clone(), cfg.ui.live_view_interval);
    }

    let capture = CaptureService::new(tracker.clone(), latest, Box::new(store));
    let mut station = Station::new(capture, tracker, settings, presenter);
    station.attach(pipeline);
    station.handle(OperatorCommand::Help)?;

    let result = station.run(cmd_rx, event_rx, log_rx);
    match &result {
        Ok(()) => log::info!("inspectd stopped"),
        Err(err) => log::error!("inspectd stopped: {:#}", err),
    }
    result
}

/// Forward parsed stdin lines to the station. Parse errors are printed and
/// the line is skipped.
fn spawn_command_reader(commands: Sender<OperatorCommand>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        log::warn!("stdin read failed: {}", err);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<OperatorCommand>() {
                    Ok(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Err(err) => eprintln!("error: {:#}", err),
                }
            }
            log::info!("stdin closed; press Ctrl-C to quit");
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

//! inspect_demo - end-to-end synthetic run of the inspection station
//!
//! Drives a synthetic camera and the scripted detector through a short
//! scenario: an incomplete kit is rejected, the missing part appears, the kit
//! is saved directly, then saved again through preview and confirm.

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kit_inspector::{
    CameraConfig, CaptureService, ClassNames, Completeness, CompletenessTracker, FrameQueue,
    FsCaptureStore, LatestFrame, OperatorCommand, Pipeline, PipelineEvent, RequiredObjectSet,
    ScriptHandle, ScriptedBackend, SharedSettings, Station, StatusUpdate, StorageLayout,
    TerminalPresenter,
};

#[path = "../ui.rs"]
mod ui;

use ui::{Ui, UiMode};

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "inspect_demo", version, about = "Synthetic inspection station run")]
struct Args {
    /// Output directory for photos, records and the audit log.
    #[arg(long, default_value = "demo_out")]
    out: PathBuf,
    /// Frames per second for the synthetic camera.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// UI mode for stderr progress
    #[arg(long, env = "INSPECT_UI", value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());
    fs::create_dir_all(&args.out)?;

    let required = RequiredObjectSet::new(["A", "B", "C"])?;
    let classes = ClassNames::new(vec!["A".into(), "B".into(), "C".into(), "X".into()])?;
    let (backend, script) = ScriptedBackend::new(classes);

    let tracker = Arc::new(CompletenessTracker::new(required));
    let settings = SharedSettings::new(Default::default())?;
    let latest = LatestFrame::new();
    let (event_tx, event_rx) = crossbeam_channel::bounded(64);

    let source = kit_inspector::open_camera(&CameraConfig {
        device: "stub://demo".to_string(),
        target_fps: args.fps,
        ..CameraConfig::default()
    })?;
    let pipeline = Pipeline::new(
        FrameQueue::new(kit_inspector::DEFAULT_QUEUE_CAPACITY)?,
        latest.clone(),
        tracker.clone(),
        settings.clone(),
    )
    .spawn(source, Box::new(backend), event_tx)?;

    let store = FsCaptureStore::open(StorageLayout::under(&args.out))?;
    let capture = CaptureService::new(tracker.clone(), latest, Box::new(store));
    let mut station = Station::new(
        capture,
        tracker,
        settings,
        TerminalPresenter::new(std::io::stdout()),
    );
    station.attach(pipeline);

    {
        let stage = ui.stage("Pass 1: A and B visible");
        script.set_steady(vec![
            script.detection("A", 0.9)?,
            script.detection("B", 0.8)?,
        ])?;
        let update = wait_for(&event_rx, |u| u.detections.len() == 2)?;
        station.handle(OperatorCommand::Submit)?;
        stage.finish(update.completeness.to_string());
    }

    {
        let stage = ui.stage("Pass 2: C appears");
        set_complete(&script)?;
        let update = wait_for(&event_rx, |u| u.completeness == Completeness::Complete)?;
        station.handle(OperatorCommand::Submit)?;
        stage.finish(update.completeness.to_string());
    }

    {
        let stage = ui.stage("Preview and confirm");
        station.handle(OperatorCommand::Preview)?;
        station.handle(OperatorCommand::Confirm)?;
        stage.finish("");
    }

    {
        let stage = ui.stage("Extra part blocks capture");
        let mut extra = complete_set(&script)?;
        extra.push(script.detection("X", 0.7)?);
        script.set_steady(extra)?;
        wait_for(&event_rx, |u| u.detections.len() == 4)?;
        station.handle(OperatorCommand::Submit)?;
        stage.finish("");
    }

    station.handle(OperatorCommand::Status)?;
    station.shutdown()?;

    let layout = StorageLayout::under(&args.out);
    println!();
    println!("audit log ({}):", layout.audit_log.display());
    print!("{}", fs::read_to_string(&layout.audit_log)?);
    Ok(())
}

fn complete_set(script: &ScriptHandle) -> Result<Vec<kit_inspector::RawDetection>> {
    Ok(vec![
        script.detection("A", 0.9)?,
        script.detection("B", 0.8)?,
        script.detection("C", 0.95)?,
    ])
}

fn set_complete(script: &ScriptHandle) -> Result<()> {
    script.set_steady(complete_set(script)?)
}

/// Wait for a status update matching `pred`.
fn wait_for<F>(events: &Receiver<PipelineEvent>, pred: F) -> Result<StatusUpdate>
where
    F: Fn(&StatusUpdate) -> bool,
{
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(anyhow!("timed out waiting for pipeline status"));
        }
        match events.recv_timeout(remaining) {
            Ok(PipelineEvent::Status(update)) if pred(&update) => return Ok(update),
            Ok(PipelineEvent::Status(_)) => {}
            Ok(PipelineEvent::AcquisitionEnded(exit)) => {
                return Err(anyhow!("camera stopped: {:?}", exit))
            }
            Err(_) => return Err(anyhow!("timed out waiting for pipeline status")),
        }
    }
}

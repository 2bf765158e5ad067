//! Operator side of the station.
//!
//! `Station` turns operator commands into capture, settings and presentation
//! actions, and forwards pipeline events and mirrored log lines to the
//! presenter. Rejections and storage failures are reported to the operator
//! and never end the session; a failed camera does.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{select, Receiver};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use crate::capture::{audit_rows, CaptureService, SubmitOutcome};
use crate::command::{OperatorCommand, HELP};
use crate::pipeline::{AcquisitionExit, PipelineEvent, PipelineHandle, PipelineStats};
use crate::present::{Notice, Presenter, StatusReport};
use crate::settings::SharedSettings;
use crate::tracker::CompletenessTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

type Opener = Box<dyn Fn(&Path) -> Result<()> + Send>;

pub struct Station<P: Presenter> {
    capture: CaptureService,
    tracker: Arc<CompletenessTracker>,
    settings: SharedSettings,
    presenter: P,
    pipeline: Option<PipelineHandle>,
    opener: Opener,
    fullscreen: bool,
}

impl<P: Presenter> Station<P> {
    pub fn new(
        capture: CaptureService,
        tracker: Arc<CompletenessTracker>,
        settings: SharedSettings,
        presenter: P,
    ) -> Self {
        Self {
            capture,
            tracker,
            settings,
            presenter,
            pipeline: None,
            opener: Box::new(open_with_platform),
            fullscreen: false,
        }
    }

    /// Take ownership of the running pipeline; it is stopped when the
    /// station finishes.
    pub fn attach(&mut self, pipeline: PipelineHandle) {
        self.pipeline = Some(pipeline);
    }

    /// Replace the program used to open the records file.
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Path) -> Result<()> + Send + 'static,
    {
        self.opener = Box::new(opener);
        self
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn capture(&self) -> &CaptureService {
        &self.capture
    }

    /// Execute one operator command.
    pub fn handle(&mut self, command: OperatorCommand) -> Result<Flow> {
        log::debug!("operator command: {}", command);
        match command {
            OperatorCommand::Submit => {
                let outcome = self.capture.submit();
                self.report_outcome(outcome)?;
            }
            OperatorCommand::Preview => match self.capture.begin_preview() {
                Ok(Some(ticket)) => self.presenter.show_capture(&ticket.path)?,
                Ok(None) => self
                    .presenter
                    .notify(&Notice::warning("No frame", "the camera has not delivered a frame yet"))?,
                Err(err) => {
                    log::error!("preview capture failed: {:#}", err);
                    self.presenter
                        .notify(&Notice::error("Preview failed", format!("{:#}", err)))?;
                }
            },
            OperatorCommand::Confirm => {
                if self.capture.pending_preview().is_none() {
                    self.presenter
                        .notify(&Notice::warning("Nothing to confirm", "no preview is pending"))?;
                } else {
                    let outcome = self.capture.confirm_preview();
                    self.report_outcome(outcome)?;
                }
            }
            OperatorCommand::Cancel => match self.capture.cancel_preview() {
                Ok(true) => self
                    .presenter
                    .notify(&Notice::info("Cancelled", "preview discarded"))?,
                Ok(false) => self
                    .presenter
                    .notify(&Notice::warning("Nothing to cancel", "no preview is pending"))?,
                Err(err) => {
                    log::error!("failed to discard preview: {:#}", err);
                    self.presenter
                        .notify(&Notice::error("Cancel failed", format!("{:#}", err)))?;
                }
            },
            OperatorCommand::OpenRecords => {
                let path = self.capture.store().layout().audit_log.clone();
                if let Err(err) = (self.opener)(&path) {
                    log::error!("failed to open records file: {:#}", err);
                    self.presenter
                        .notify(&Notice::error("Open records failed", format!("{:#}", err)))?;
                }
            }
            OperatorCommand::SetConfidence(value) => {
                match self.settings.set_confidence_threshold(value) {
                    Ok(settings) => {
                        log::info!(
                            "confidence threshold set to {:.2}",
                            settings.confidence_threshold
                        );
                        self.presenter.notify(&Notice::info(
                            "Settings",
                            format!("confidence threshold {:.2}", settings.confidence_threshold),
                        ))?;
                    }
                    Err(err) => {
                        log::warn!("confidence threshold rejected: {:#}", err);
                        self.presenter
                            .notify(&Notice::warning("Invalid value", format!("{:#}", err)))?;
                    }
                }
            }
            OperatorCommand::SetTracking(enabled) => {
                let settings = self.settings.set_tracking(enabled)?;
                let state = if settings.tracking_enabled { "enabled" } else { "disabled" };
                log::info!("object tracking {}", state);
                self.presenter
                    .notify(&Notice::info("Settings", format!("tracking {}", state)))?;
            }
            OperatorCommand::ToggleFullscreen => {
                self.fullscreen = !self.fullscreen;
                self.presenter.set_fullscreen(self.fullscreen)?;
            }
            OperatorCommand::Status => {
                let report = self.status_report()?;
                self.presenter.show_report(&report)?;
            }
            OperatorCommand::Help => self.presenter.notify(&Notice::info("Help", HELP))?,
            OperatorCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Serve commands, pipeline events and log lines until quit.
    ///
    /// Returns an error when the camera acquisition fails for good.
    pub fn run(
        mut self,
        commands: Receiver<OperatorCommand>,
        events: Receiver<PipelineEvent>,
        logs: Receiver<String>,
    ) -> Result<()> {
        let never_events = crossbeam_channel::never();
        let never_logs = crossbeam_channel::never();
        let mut events_open = true;
        let mut logs_open = true;
        let result = loop {
            let events_rx = if events_open { &events } else { &never_events };
            let logs_rx = if logs_open { &logs } else { &never_logs };
            select! {
                recv(commands) -> command => match command {
                    Ok(command) => match self.handle(command) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break Ok(()),
                        Err(err) => break Err(err),
                    },
                    Err(_) => break Ok(()),
                },
                recv(events_rx) -> event => match event {
                    Ok(PipelineEvent::Status(update)) => {
                        if let Err(err) = self.presenter.on_status(&update) {
                            break Err(err);
                        }
                    }
                    Ok(PipelineEvent::AcquisitionEnded(AcquisitionExit::Failed { attempts, last_error })) => {
                        let message = format!("camera failed after {} attempts: {}", attempts, last_error);
                        // Best effort: the session ends either way.
                        let _ = self.presenter.notify(&Notice::error("Camera error", message.clone()));
                        break Err(anyhow!(message));
                    }
                    Ok(PipelineEvent::AcquisitionEnded(AcquisitionExit::Stopped)) => {}
                    Err(_) => events_open = false,
                },
                recv(logs_rx) -> line => match line {
                    Ok(line) => {
                        if let Err(err) = self.presenter.on_log_line(&line) {
                            break Err(err);
                        }
                    }
                    Err(_) => logs_open = false,
                },
            }
        };
        let shutdown = self.shutdown();
        result.and(shutdown)
    }

    /// Discard any pending preview and stop the pipeline.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Err(err) = self.capture.cancel_preview() {
            log::warn!("pending preview not removed: {:#}", err);
        }
        if let Some(pipeline) = self.pipeline.take() {
            let exit = pipeline.stop()?;
            log::info!("station stopped, acquisition exit: {:?}", exit);
        }
        Ok(())
    }

    fn report_outcome(&mut self, outcome: Result<SubmitOutcome>) -> Result<()> {
        match outcome {
            Ok(SubmitOutcome::Saved(receipt)) => self.presenter.notify(&Notice::info(
                "Saved",
                format!(
                    "{} saved to {}",
                    receipt.set_id,
                    receipt.image_path.display()
                ),
            )),
            Ok(SubmitOutcome::Rejected(rejection)) => self
                .presenter
                .notify(&Notice::warning("Not saved", rejection.to_string())),
            Err(err) => {
                log::error!("failed to save capture: {:#}", err);
                self.presenter
                    .notify(&Notice::error("Save failed", format!("{:#}", err)))
            }
        }
    }

    fn status_report(&self) -> Result<StatusReport> {
        let snapshot = self.tracker.snapshot()?;
        let audit_log = &self.capture.store().layout().audit_log;
        let submissions = match audit_rows(audit_log) {
            Ok(rows) => rows,
            Err(err) => {
                log::warn!("could not count submissions: {:#}", err);
                0
            }
        };
        Ok(StatusReport {
            completeness: self.tracker.status(&snapshot),
            detections: self.tracker.detections()?,
            settings: self.settings.snapshot()?,
            pipeline: self
                .pipeline
                .as_ref()
                .map_or_else(PipelineStats::default, PipelineHandle::stats),
            submissions,
            pending_preview: self.capture.pending_preview().map(|t| t.path.clone()),
        })
    }
}

/// Open `path` with the desktop's default application.
pub fn open_with_platform(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("records file {} does not exist", path.display()));
    }
    let mut command = if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else if cfg!(target_os = "macos") {
        Command::new("open")
    } else {
        Command::new("xdg-open")
    };
    command
        .arg(path)
        .spawn()
        .with_context(|| format!("failed to launch opener for {}", path.display()))?;
    log::info!("opened records file {}", path.display());
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FsCaptureStore, StorageLayout};
    use crate::detect::{BoundingBox, Detection};
    use crate::frame::{Frame, LatestFrame};
    use crate::pipeline::StatusUpdate;
    use crate::settings::DetectionSettings;
    use crate::tracker::RequiredObjectSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        notices: Vec<Notice>,
        captures: usize,
        reports: usize,
        fullscreen: bool,
        /// Outlives the station once `run` consumes it.
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn record(&self, entry: String) -> Result<()> {
            self.journal
                .lock()
                .map_err(|_| anyhow!("journal lock poisoned"))?
                .push(entry);
            Ok(())
        }
    }

    impl Presenter for Recorder {
        fn on_status(&mut self, _update: &StatusUpdate) -> Result<()> {
            Ok(())
        }
        fn on_log_line(&mut self, line: &str) -> Result<()> {
            self.record(format!("log: {}", line))
        }
        fn notify(&mut self, notice: &Notice) -> Result<()> {
            self.notices.push(notice.clone());
            self.record(format!("notice: {}", notice.title))
        }
        fn show_capture(&mut self, _path: &Path) -> Result<()> {
            self.captures += 1;
            Ok(())
        }
        fn show_report(&mut self, _report: &StatusReport) -> Result<()> {
            self.reports += 1;
            Ok(())
        }
        fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
            self.fullscreen = fullscreen;
            Ok(())
        }
    }

    fn station(dir: &Path) -> Result<(Station<Recorder>, Arc<CompletenessTracker>, LatestFrame)> {
        let tracker = Arc::new(CompletenessTracker::new(RequiredObjectSet::new(["A", "B"])?));
        let latest = LatestFrame::new();
        let store = FsCaptureStore::open(StorageLayout::under(dir))?;
        let capture = CaptureService::new(tracker.clone(), latest.clone(), Box::new(store));
        let settings = SharedSettings::new(DetectionSettings::default())?;
        let station = Station::new(capture, tracker.clone(), settings, Recorder::default());
        Ok((station, tracker, latest))
    }

    fn det(name: &str) -> Detection {
        Detection {
            name: name.into(),
            confidence: 0.9,
            bbox: BoundingBox::new(0, 0, 20, 20),
            area: 400,
        }
    }

    fn last_title(station: &Station<Recorder>) -> String {
        station
            .presenter()
            .notices
            .last()
            .map(|n| n.title.clone())
            .unwrap_or_default()
    }

    #[test]
    fn submit_reports_rejection_then_success() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (mut station, tracker, latest) = station(dir.path())?;
        latest.publish(Frame::from_rgb(vec![0u8; 8 * 8 * 3], 8, 8, 1)?);

        tracker.update(vec![det("A")])?;
        assert_eq!(station.handle(OperatorCommand::Submit)?, Flow::Continue);
        assert_eq!(last_title(&station), "Not saved");

        tracker.update(vec![det("A"), det("B")])?;
        station.handle(OperatorCommand::Submit)?;
        assert_eq!(last_title(&station), "Saved");
        Ok(())
    }

    #[test]
    fn invalid_threshold_is_reported_not_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (mut station, _, _) = station(dir.path())?;
        assert_eq!(station.handle(OperatorCommand::SetConfidence(2.0))?, Flow::Continue);
        assert_eq!(last_title(&station), "Invalid value");
        station.handle(OperatorCommand::SetConfidence(0.5))?;
        assert_eq!(station.settings.snapshot()?.confidence_threshold, 0.5);
        Ok(())
    }

    #[test]
    fn open_records_uses_the_audit_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (station, _, _) = station(dir.path())?;
        let opened = Arc::new(Mutex::new(Vec::new()));
        let seen = opened.clone();
        let mut station = station.with_opener(move |path| {
            seen.lock().map_err(|_| anyhow!("poisoned"))?.push(path.to_path_buf());
            Ok(())
        });
        station.handle(OperatorCommand::OpenRecords)?;
        let opened = opened.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(opened.as_slice(), &[dir.path().join("detection_logs/detection_log.csv")]);
        Ok(())
    }

    #[test]
    fn missing_records_file_is_an_error() {
        assert!(open_with_platform(Path::new("/nonexistent/detection_log.csv")).is_err());
    }

    fn journal_of(station: &Station<Recorder>) -> Arc<Mutex<Vec<String>>> {
        station.presenter().journal.clone()
    }

    fn entries(journal: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[test]
    fn camera_failure_ends_the_session_with_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (mut station, _, latest) = station(dir.path())?;
        latest.publish(Frame::from_rgb(vec![0u8; 8 * 8 * 3], 8, 8, 1)?);
        station.handle(OperatorCommand::Preview)?;
        let preview = station
            .capture()
            .pending_preview()
            .map(|t| t.path.clone())
            .expect("preview pending");
        let journal = journal_of(&station);

        let (_cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (_log_tx, log_rx) = crossbeam_channel::unbounded();
        event_tx.send(PipelineEvent::AcquisitionEnded(AcquisitionExit::Failed {
            attempts: 5,
            last_error: "device unplugged".into(),
        }))?;

        let err = station.run(cmd_rx, event_rx, log_rx).unwrap_err();
        assert!(err.to_string().contains("camera failed after 5 attempts"));
        assert!(entries(&journal).contains(&"notice: Camera error".to_string()));
        // Shutdown ran and discarded the pending preview.
        assert!(!preview.exists());
        Ok(())
    }

    #[test]
    fn quit_command_ends_run_after_log_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (station, _, _) = station(dir.path())?;
        let journal = journal_of(&station);

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (_event_tx, event_rx) = crossbeam_channel::unbounded();
        let (log_tx, log_rx) = crossbeam_channel::unbounded();
        let runner = std::thread::spawn(move || station.run(cmd_rx, event_rx, log_rx));

        log_tx.send("inference started".to_string())?;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !entries(&journal).contains(&"log: inference started".to_string()) {
            assert!(std::time::Instant::now() < deadline, "log line never presented");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        cmd_tx.send(OperatorCommand::Quit)?;
        runner.join().map_err(|_| anyhow!("station thread panicked"))??;
        Ok(())
    }

    #[test]
    fn closed_command_channel_ends_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (station, _, _) = station(dir.path())?;

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<OperatorCommand>();
        let (_event_tx, event_rx) = crossbeam_channel::unbounded();
        let (_log_tx, log_rx) = crossbeam_channel::unbounded::<String>();
        drop(cmd_tx);
        station.run(cmd_rx, event_rx, log_rx)?;
        Ok(())
    }

    #[test]
    fn quit_and_fullscreen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (mut station, _, _) = station(dir.path())?;
        station.handle(OperatorCommand::ToggleFullscreen)?;
        assert!(station.presenter().fullscreen);
        station.handle(OperatorCommand::Status)?;
        assert_eq!(station.presenter().reports, 1);
        assert_eq!(station.handle(OperatorCommand::Quit)?, Flow::Quit);
        Ok(())
    }
}

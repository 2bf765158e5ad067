//! Presentation layer.
//!
//! The station pushes status, notices and log lines into a `Presenter`. The
//! terminal implementation prints transitions to a writer and can keep an
//! annotated JPEG of the latest frame on disk for a kiosk browser or image
//! viewer to display.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::annotate::draw_detections;
use crate::detect::Detection;
use crate::pipeline::{PipelineStats, StatusUpdate};
use crate::settings::DetectionSettings;
use crate::tracker::Completeness;

const RECENT_LOG_LINES: usize = 8;
const LIVE_VIEW_QUALITY: u8 = 80;
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message for the operator, shown prominently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, message)
    }

    fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Full status for the `status` command.
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub completeness: Completeness,
    pub detections: Vec<Detection>,
    pub settings: DetectionSettings,
    pub pipeline: PipelineStats,
    pub submissions: usize,
    pub pending_preview: Option<PathBuf>,
}

pub trait Presenter {
    /// Called after every inference pass that reached the station.
    fn on_status(&mut self, update: &StatusUpdate) -> Result<()>;

    /// One formatted diagnostic log line.
    fn on_log_line(&mut self, line: &str) -> Result<()>;

    fn notify(&mut self, notice: &Notice) -> Result<()>;

    /// Show a captured preview image awaiting confirmation.
    fn show_capture(&mut self, path: &Path) -> Result<()>;

    fn show_report(&mut self, report: &StatusReport) -> Result<()>;

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()>;
}

// ----------------------------------------------------------------------------
// TerminalPresenter
// ----------------------------------------------------------------------------

struct LiveView {
    path: PathBuf,
    interval: Duration,
    last_written: Option<Instant>,
}

pub struct TerminalPresenter<W: Write> {
    out: W,
    last_status: Option<(Completeness, BTreeSet<String>)>,
    recent_logs: VecDeque<String>,
    live_view: Option<LiveView>,
    fullscreen: bool,
}

impl<W: Write> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_status: None,
            recent_logs: VecDeque::with_capacity(RECENT_LOG_LINES),
            live_view: None,
            fullscreen: false,
        }
    }

    /// Also keep an annotated JPEG of the latest frame at `path`, rewritten
    /// at most once per `interval`.
    pub fn with_live_view(mut self, path: PathBuf, interval: Duration) -> Self {
        self.live_view = Some(LiveView {
            path,
            interval,
            last_written: None,
        });
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_live_view(&mut self, update: &StatusUpdate) -> Result<()> {
        let Some(view) = self.live_view.as_mut() else {
            return Ok(());
        };
        if view
            .last_written
            .is_some_and(|at| at.elapsed() < view.interval)
        {
            return Ok(());
        }
        view.last_written = Some(Instant::now());

        let image = draw_detections(&update.frame, &update.detections)?;
        let tmp = view.path.with_extension("jpg.tmp");
        {
            let file = fs::File::create(&tmp)
                .with_context(|| format!("failed to create live view {}", tmp.display()))?;
            let mut writer = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, LIVE_VIEW_QUALITY)
                .encode_image(&image)
                .context("failed to encode live view")?;
            writer.flush().context("failed to flush live view")?;
        }
        fs::rename(&tmp, &view.path)
            .with_context(|| format!("failed to publish live view {}", view.path.display()))?;
        Ok(())
    }

    fn print_status(&mut self, completeness: &Completeness, detections: &[Detection]) -> Result<()> {
        if self.fullscreen {
            write!(self.out, "{}", CLEAR_SCREEN)?;
        }
        let tag = if completeness.is_complete() { "OK" } else { "NG" };
        writeln!(self.out, "[{}] {}", tag, completeness)?;
        for det in detections {
            writeln!(self.out, "  {:<16} {:.2}", det.name, det.confidence)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Presenter for TerminalPresenter<W> {
    fn on_status(&mut self, update: &StatusUpdate) -> Result<()> {
        if let Err(err) = self.write_live_view(update) {
            log::warn!("live view not updated: {:#}", err);
        }
        let names: BTreeSet<String> = update.detections.iter().map(|d| d.name.clone()).collect();
        let changed = self
            .last_status
            .as_ref()
            .map_or(true, |(status, seen)| *status != update.completeness || *seen != names);
        if changed {
            self.print_status(&update.completeness, &update.detections)?;
            self.last_status = Some((update.completeness.clone(), names));
        }
        Ok(())
    }

    fn on_log_line(&mut self, line: &str) -> Result<()> {
        if self.recent_logs.len() == RECENT_LOG_LINES {
            self.recent_logs.pop_front();
        }
        self.recent_logs.push_back(line.trim_end().to_string());
        Ok(())
    }

    fn notify(&mut self, notice: &Notice) -> Result<()> {
        let marker = match notice.level {
            NoticeLevel::Info => "i",
            NoticeLevel::Warning => "!",
            NoticeLevel::Error => "x",
        };
        writeln!(self.out, "[{}] {}: {}", marker, notice.title, notice.message)?;
        self.out.flush()?;
        Ok(())
    }

    fn show_capture(&mut self, path: &Path) -> Result<()> {
        writeln!(self.out, "preview saved to {}", path.display())?;
        writeln!(self.out, "type 'confirm' to save or 'cancel' to discard")?;
        self.out.flush()?;
        Ok(())
    }

    fn show_report(&mut self, report: &StatusReport) -> Result<()> {
        self.print_status(&report.completeness, &report.detections)?;
        let s = &report.settings;
        writeln!(
            self.out,
            "settings: confidence > {:.2}, nms {:.2}, min area {}, tracking {}",
            s.confidence_threshold,
            s.nms_threshold,
            s.min_detection_area,
            if s.tracking_enabled { "on" } else { "off" }
        )?;
        let p = &report.pipeline;
        writeln!(
            self.out,
            "pipeline: {} frames, {} dropped, {} passes, {} read failures",
            p.frames_captured, p.frames_dropped, p.inference_passes, p.read_failures
        )?;
        writeln!(self.out, "submissions logged: {}", report.submissions)?;
        if let Some(path) = &report.pending_preview {
            writeln!(self.out, "preview pending: {}", path.display())?;
        }
        if !self.recent_logs.is_empty() {
            writeln!(self.out, "recent log:")?;
            for line in &self.recent_logs {
                writeln!(self.out, "  {}", line)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        self.fullscreen = fullscreen;
        // Force a redraw on the next status.
        self.last_status = None;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::frame::Frame;

    fn update(names: &[&str], completeness: Completeness) -> StatusUpdate {
        StatusUpdate {
            sequence: 1,
            completeness,
            detections: names
                .iter()
                .map(|n| Detection {
                    name: n.to_string(),
                    confidence: 0.9,
                    bbox: BoundingBox::new(1, 1, 6, 6),
                    area: 25,
                })
                .collect(),
            frame: Frame::from_rgb(vec![0u8; 16 * 9 * 3], 16, 9, 1).unwrap(),
        }
    }

    fn printed(presenter: TerminalPresenter<Vec<u8>>) -> String {
        String::from_utf8(presenter.into_inner()).unwrap()
    }

    #[test]
    fn prints_only_on_change() -> Result<()> {
        let mut presenter = TerminalPresenter::new(Vec::new());
        let missing = Completeness::Incomplete {
            missing: vec!["B".into()],
        };
        presenter.on_status(&update(&["A"], missing.clone()))?;
        presenter.on_status(&update(&["A"], missing))?;
        presenter.on_status(&update(&["A", "B"], Completeness::Complete))?;
        let text = printed(presenter);
        assert_eq!(text.matches("[NG] NG (missing: B)").count(), 1);
        assert_eq!(text.matches("[OK] COMPLETE").count(), 1);
        Ok(())
    }

    #[test]
    fn live_view_is_written() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("live.jpg");
        let mut presenter =
            TerminalPresenter::new(Vec::new()).with_live_view(path.clone(), Duration::ZERO);
        presenter.on_status(&update(&["A"], Completeness::Complete))?;
        let saved = image::open(&path)?;
        assert_eq!((saved.width(), saved.height()), (16, 9));
        Ok(())
    }

    #[test]
    fn report_includes_recent_log_lines() -> Result<()> {
        let mut presenter = TerminalPresenter::new(Vec::new());
        for i in 0..12 {
            presenter.on_log_line(&format!("line {}\n", i))?;
        }
        presenter.show_report(&StatusReport {
            completeness: Completeness::Complete,
            detections: Vec::new(),
            settings: DetectionSettings::default(),
            pipeline: PipelineStats::default(),
            submissions: 3,
            pending_preview: None,
        })?;
        let text = printed(presenter);
        assert!(text.contains("submissions logged: 3"));
        assert!(text.contains("line 11"));
        assert!(!text.contains("line 3\n"));
        Ok(())
    }
}

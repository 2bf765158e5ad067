use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::record::{set_id_for, CaptureRecord, FILE_TIMESTAMP_FORMAT};
use super::store::{CaptureStore, PREVIEW_PREFIX};
use crate::frame::{Frame, LatestFrame};
use crate::tracker::{CompletenessTracker, ObjectSnapshot};

/// Why a submit did not persist anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The tracked set is not exactly the required set.
    Incomplete {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    /// No frame has been captured yet.
    NoFrame,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Incomplete {
                missing,
                unexpected,
            } => {
                let mut parts = Vec::new();
                if !missing.is_empty() {
                    parts.push(format!("missing: {}", missing.join(", ")));
                }
                if !unexpected.is_empty() {
                    parts.push(format!("unexpected: {}", unexpected.join(", ")));
                }
                write!(f, "objects incomplete ({})", parts.join("; "))
            }
            Rejection::NoFrame => write!(f, "no camera frame available yet"),
        }
    }
}

/// What a successful submit wrote.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureReceipt {
    pub set_id: String,
    pub captured_at: DateTime<Local>,
    pub image_path: PathBuf,
    pub record_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    Saved(CaptureReceipt),
    Rejected(Rejection),
}

/// A preview image awaiting operator confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewTicket {
    pub path: PathBuf,
    pub frame_sequence: u64,
}

enum ImageSource<'a> {
    Frame(&'a Frame),
    Pending(&'a Path),
}

/// Direct and preview submit state machines.
///
/// Direct: validate, then write photo, record and audit row.
/// Preview: write the photo to the pending directory; on confirm re-validate
/// against the live tracker and promote it; on cancel delete it.
///
/// Within one submit, a failed write removes the artifacts already written by
/// that submit before the error is returned.
pub struct CaptureService {
    tracker: Arc<CompletenessTracker>,
    latest: LatestFrame,
    store: Box<dyn CaptureStore>,
    pending: Option<PreviewTicket>,
}

impl CaptureService {
    pub fn new(
        tracker: Arc<CompletenessTracker>,
        latest: LatestFrame,
        store: Box<dyn CaptureStore>,
    ) -> Self {
        Self {
            tracker,
            latest,
            store,
            pending: None,
        }
    }

    pub fn store(&self) -> &dyn CaptureStore {
        self.store.as_ref()
    }

    pub fn pending_preview(&self) -> Option<&PreviewTicket> {
        self.pending.as_ref()
    }

    /// Direct submit.
    pub fn submit(&mut self) -> Result<SubmitOutcome> {
        let snapshot = match self.validate()? {
            Ok(snapshot) => snapshot,
            Err(rejection) => {
                log::warn!("submit rejected: {}", rejection);
                return Ok(SubmitOutcome::Rejected(rejection));
            }
        };
        let Some(frame) = self.latest.latest() else {
            log::warn!("submit rejected: {}", Rejection::NoFrame);
            return Ok(SubmitOutcome::Rejected(Rejection::NoFrame));
        };
        let receipt = self.persist(ImageSource::Frame(&frame), &snapshot)?;
        Ok(SubmitOutcome::Saved(receipt))
    }

    /// Capture the latest frame to the pending directory for review.
    ///
    /// Any preview already awaiting confirmation is discarded first.
    pub fn begin_preview(&mut self) -> Result<Option<PreviewTicket>> {
        if self.pending.is_some() {
            self.cancel_preview()?;
        }
        let Some(frame) = self.latest.latest() else {
            log::warn!("preview skipped: {}", Rejection::NoFrame);
            return Ok(None);
        };
        let stamp = frame.captured_at.format(FILE_TIMESTAMP_FORMAT).to_string();
        let path = self.unused_path(
            &self.store.layout().pending_dir,
            PREVIEW_PREFIX,
            &stamp,
            "jpg",
        );
        self.store.write_image(&frame, &path)?;
        log::info!("preview captured: {}", path.display());
        let ticket = PreviewTicket {
            path,
            frame_sequence: frame.sequence,
        };
        self.pending = Some(ticket.clone());
        Ok(Some(ticket))
    }

    /// Confirm the pending preview.
    ///
    /// Completeness is checked again against the live tracker. A rejection
    /// or a failed save leaves the preview pending.
    pub fn confirm_preview(&mut self) -> Result<SubmitOutcome> {
        let ticket = self
            .pending
            .clone()
            .ok_or_else(|| anyhow!("no preview awaiting confirmation"))?;
        let snapshot = match self.validate()? {
            Ok(snapshot) => snapshot,
            Err(rejection) => {
                log::warn!("preview confirmation rejected: {}", rejection);
                return Ok(SubmitOutcome::Rejected(rejection));
            }
        };
        // The ticket stays pending until the save lands, so a failed promote
        // can still be cancelled.
        let receipt = self.persist(ImageSource::Pending(&ticket.path), &snapshot)?;
        self.pending = None;
        Ok(SubmitOutcome::Saved(receipt))
    }

    /// Discard the pending preview, if any. Returns whether one was pending.
    pub fn cancel_preview(&mut self) -> Result<bool> {
        let Some(ticket) = self.pending.take() else {
            return Ok(false);
        };
        if ticket.path.exists() {
            self.store.remove(&ticket.path)?;
        }
        log::info!("preview cancelled: {}", ticket.path.display());
        Ok(true)
    }

    fn validate(&self) -> Result<std::result::Result<ObjectSnapshot, Rejection>> {
        let snapshot = self.tracker.snapshot()?;
        let required = self.tracker.required();
        if required.matches_exactly(&snapshot) {
            Ok(Ok(snapshot))
        } else {
            Ok(Err(Rejection::Incomplete {
                missing: required.missing_from(&snapshot),
                unexpected: required.unexpected_in(&snapshot),
            }))
        }
    }

    fn persist(&self, source: ImageSource<'_>, snapshot: &ObjectSnapshot) -> Result<CaptureReceipt> {
        let captured_at = Local::now();
        let layout = self.store.layout();
        let stamp = self.unique_stamp(&captured_at);
        let image_path = layout.photo_dir.join(format!("detected_{}.jpg", stamp));

        match source {
            ImageSource::Frame(frame) => self.store.write_image(frame, &image_path)?,
            ImageSource::Pending(pending) => self.store.promote_image(pending, &image_path)?,
        }
        let mut written = vec![image_path.clone()];

        let record = CaptureRecord::new(
            set_id_for(&stamp),
            captured_at,
            self.tracker.required(),
            snapshot,
            image_path.clone(),
        );
        let record_path = match self.store.write_record(&record) {
            Ok(path) => path,
            Err(err) => {
                self.roll_back(&written);
                return Err(err);
            }
        };
        written.push(record_path.clone());

        if let Err(err) = self.store.append_audit(&record) {
            self.roll_back(&written);
            return Err(err);
        }

        log::info!("photo and data saved: {}", image_path.display());
        Ok(CaptureReceipt {
            set_id: record.set_id,
            captured_at,
            image_path,
            record_path,
        })
    }

    fn roll_back(&self, written: &[PathBuf]) {
        for path in written.iter().rev() {
            match self.store.remove(path) {
                Ok(()) => log::warn!("rolled back {}", path.display()),
                Err(err) => log::error!("rollback failed: {:#}", err),
            }
        }
    }

    /// Timestamp stem not yet used by any photo or record file.
    fn unique_stamp(&self, captured_at: &DateTime<Local>) -> String {
        let layout = self.store.layout();
        let base = captured_at.format(FILE_TIMESTAMP_FORMAT).to_string();
        let taken = |stamp: &str| {
            layout.photo_dir.join(format!("detected_{}.jpg", stamp)).exists()
                || layout
                    .records_dir
                    .join(format!("{}.csv", set_id_for(stamp)))
                    .exists()
        };
        if !taken(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{}_{}", base, n))
            .find(|stamp| !taken(stamp))
            .unwrap_or(base)
    }

    fn unused_path(&self, dir: &Path, prefix: &str, stamp: &str, ext: &str) -> PathBuf {
        let first = dir.join(format!("{}{}.{}", prefix, stamp, ext));
        if !first.exists() {
            return first;
        }
        (2..)
            .map(|n| dir.join(format!("{}{}_{}.{}", prefix, stamp, n, ext)))
            .find(|path| !path.exists())
            .unwrap_or(first)
    }
}

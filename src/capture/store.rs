use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::record::{audit_row, CaptureRecord, AUDIT_HEADER};
use crate::frame::Frame;

/// Canonical width of saved photos.
pub const OUTPUT_WIDTH: u32 = 640;
/// Canonical height of saved photos.
pub const OUTPUT_HEIGHT: u32 = 360;

const DEFAULT_JPEG_QUALITY: u8 = 90;
pub(crate) const PREVIEW_PREFIX: &str = "preview_";

/// Where captures, records and logs live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageLayout {
    pub photo_dir: PathBuf,
    pub records_dir: PathBuf,
    pub reports_dir: PathBuf,
    /// Holds preview images awaiting confirmation.
    pub pending_dir: PathBuf,
    pub audit_log: PathBuf,
}

impl StorageLayout {
    /// Default layout under a base directory.
    pub fn under(base: &Path) -> Self {
        let records_dir = base.join("detection_logs");
        Self {
            photo_dir: base.join("captured_photos"),
            audit_log: records_dir.join("detection_log.csv"),
            records_dir,
            reports_dir: base.join("reports"),
            pending_dir: base.join("pending"),
        }
    }

    fn directories(&self) -> [&Path; 4] {
        [
            &self.photo_dir,
            &self.records_dir,
            &self.reports_dir,
            &self.pending_dir,
        ]
    }
}

/// Persistence operations used by the capture service.
///
/// Every method reports failures with the path involved; the service decides
/// what to roll back.
pub trait CaptureStore: Send {
    fn layout(&self) -> &StorageLayout;

    /// Encode `frame` as a JPEG at `path`, normalized to the canonical size.
    fn write_image(&self, frame: &Frame, path: &Path) -> Result<()>;

    /// Move a pending image into its final location.
    fn promote_image(&self, pending: &Path, dest: &Path) -> Result<()>;

    /// Write the per-set record file. Returns its path.
    fn write_record(&self, record: &CaptureRecord) -> Result<PathBuf>;

    /// Append one row to the audit log.
    fn append_audit(&self, record: &CaptureRecord) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;
}

/// Filesystem-backed `CaptureStore`.
pub struct FsCaptureStore {
    layout: StorageLayout,
    output_width: u32,
    output_height: u32,
    jpeg_quality: u8,
}

impl FsCaptureStore {
    /// Create the directories and the audit log header if missing.
    pub fn open(layout: StorageLayout) -> Result<Self> {
        for dir in layout.directories() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
            log::info!("storage directory ready: {}", dir.display());
        }
        if !layout.audit_log.exists() {
            fs::write(&layout.audit_log, format!("{}\n", AUDIT_HEADER)).with_context(|| {
                format!("failed to create audit log {}", layout.audit_log.display())
            })?;
            log::info!("created audit log {}", layout.audit_log.display());
        }
        sweep_stale_previews(&layout.pending_dir)?;
        Ok(Self {
            layout,
            output_width: OUTPUT_WIDTH,
            output_height: OUTPUT_HEIGHT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        })
    }

    pub fn with_output_size(mut self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("output size must be non-zero, got {}x{}", width, height));
        }
        self.output_width = width;
        self.output_height = height;
        Ok(self)
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100, got {}", quality));
        }
        self.jpeg_quality = quality;
        Ok(self)
    }
}

impl CaptureStore for FsCaptureStore {
    fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn write_image(&self, frame: &Frame, path: &Path) -> Result<()> {
        let mut image = frame.to_image()?;
        if image.dimensions() != (self.output_width, self.output_height) {
            image = imageops::resize(
                &image,
                self.output_width,
                self.output_height,
                FilterType::Triangle,
            );
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("failed to create image {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
            .encode_image(&image)
            .with_context(|| format!("failed to encode image {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to write image {}", path.display()))?;
        log::info!(
            "photo saved at {}x{}: {}",
            self.output_width,
            self.output_height,
            path.display()
        );
        Ok(())
    }

    fn promote_image(&self, pending: &Path, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(anyhow!("refusing to overwrite {}", dest.display()));
        }
        if fs::rename(pending, dest).is_err() {
            // Rename fails across filesystems; fall back to copy + remove.
            fs::copy(pending, dest).with_context(|| {
                format!("failed to move {} to {}", pending.display(), dest.display())
            })?;
            fs::remove_file(pending)
                .with_context(|| format!("failed to remove {}", pending.display()))?;
        }
        log::info!("photo promoted: {}", dest.display());
        Ok(())
    }

    fn write_record(&self, record: &CaptureRecord) -> Result<PathBuf> {
        let path = self.layout.records_dir.join(format!("{}.csv", record.set_id));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create record {}", path.display()))?;
        file.write_all(record.to_csv().as_bytes())
            .with_context(|| format!("failed to write record {}", path.display()))?;
        log::info!("completeness record saved to {}", path.display());
        Ok(path)
    }

    fn append_audit(&self, record: &CaptureRecord) -> Result<()> {
        let path = &self.layout.audit_log;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        let row = audit_row(&record.captured_at, &record.present_names());
        file.write_all(row.as_bytes())
            .with_context(|| format!("failed to append audit log {}", path.display()))?;
        log::info!("submission recorded in {}", path.display());
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))
    }
}

/// Remove previews left unconfirmed by an earlier run.
fn sweep_stale_previews(pending_dir: &Path) -> Result<usize> {
    let entries = fs::read_dir(pending_dir)
        .with_context(|| format!("failed to list {}", pending_dir.display()))?;
    let mut removed = 0;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", pending_dir.display()))?
            .path();
        let is_preview = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(PREVIEW_PREFIX) && name.ends_with(".jpg"));
        if !is_preview {
            continue;
        }
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove stale preview {}", path.display()))?;
        log::warn!("removed stale preview {}", path.display());
        removed += 1;
    }
    Ok(removed)
}

/// Read back the number of data rows in an audit log (header excluded).
pub(crate) fn audit_rows(path: &Path) -> Result<usize> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read audit log {}", path.display()))?;
    Ok(raw.lines().skip(1).filter(|l| !l.trim().is_empty()).count())
}

//! Camera frame sources.
//!
//! - `stub://<name>`: synthetic test pattern (tests, demos)
//! - `still:<path>`: replays one image file at the configured rate
//! - anything else: a V4L2 device node (feature: ingest-v4l2)
//!
//! Sources are opened once at startup. `open_camera` connects before
//! returning, so a missing device is reported immediately and never retried.
//! Transient read failures are retried by the acquisition loop.

pub mod file;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub use file::StillImageSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A camera the acquisition thread reads from.
pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Block until the next frame is available.
    fn read(&mut self) -> Result<Frame>;

    /// Release the underlying device. Calling it again is a no-op.
    fn release(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Capture device settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device path (`/dev/video0`), `stub://<name>` or `still:<path>`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Target frame rate. Zero disables pacing for synthetic sources.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 360,
            target_fps: 30,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "camera resolution must be non-zero, got {}x{}",
                self.width,
                self.height
            ));
        }
        Ok(())
    }
}

/// Counters reported by every source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub device: String,
    pub frames_read: u64,
    pub read_failures: u64,
}

/// Open and connect the source named by `config.device`.
pub fn open_camera(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    config.validate()?;
    if config.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    if let Some(path) = config.device.strip_prefix("still:") {
        return Ok(Box::new(StillImageSource::open(path, config.clone())?));
    }
    open_device(config)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    let mut source = V4l2Source::new(config.clone());
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "camera device {} requires the ingest-v4l2 feature",
        config.device
    ))
}

/// Sleeps between frames to hold a target rate.
#[derive(Debug)]
pub(crate) struct Pacer {
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        let interval = (target_fps > 0).then(|| Duration::from_secs(1) / target_fps);
        Self {
            interval,
            next_due: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        // Do not try to catch up after a stall.
        let base = self.next_due.map_or(now, |due| due.max(now));
        self.next_due = Some(base + interval);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_device_opens_synthetic_source() -> Result<()> {
        let config = CameraConfig {
            device: "stub://bench".to_string(),
            target_fps: 0,
            ..CameraConfig::default()
        };
        let mut source = open_camera(&config)?;
        let frame = source.read()?;
        assert_eq!((frame.width, frame.height), (640, 360));
        assert_eq!(source.stats().frames_read, 1);
        Ok(())
    }

    #[test]
    fn missing_still_image_fails_at_open() {
        let config = CameraConfig {
            device: "still:/nonexistent/kit.jpg".to_string(),
            ..CameraConfig::default()
        };
        assert!(open_camera(&config).is_err());
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let config = CameraConfig {
            device: "stub://x".to_string(),
            width: 0,
            ..CameraConfig::default()
        };
        assert!(open_camera(&config).is_err());
    }

    #[test]
    fn pacer_without_rate_never_sleeps() {
        let mut pacer = Pacer::new(0);
        let start = Instant::now();
        for _ in 0..100 {
            pacer.wait();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}

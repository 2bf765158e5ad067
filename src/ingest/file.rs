//! Still-image frame source.
//!
//! `StillImageSource` decodes one local JPEG/PNG at open time and hands out
//! the same picture on every read, paced to the configured rate. Useful for
//! checking a model against a photographed kit without a camera attached.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::{CameraConfig, FrameSource, Pacer, SourceStats};
use crate::frame::Frame;

pub struct StillImageSource {
    path: PathBuf,
    image: Option<RgbImage>,
    pacer: Pacer,
    frame_count: u64,
}

impl StillImageSource {
    pub fn open<P: AsRef<Path>>(path: P, config: CameraConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(anyhow!("still image source needs a file path"));
        }
        let image = image::open(&path)
            .with_context(|| format!("failed to open still image {}", path.display()))?
            .to_rgb8();
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self {
            path,
            image: Some(image),
            pacer: Pacer::new(config.target_fps),
            frame_count: 0,
        })
    }
}

impl FrameSource for StillImageSource {
    fn describe(&self) -> String {
        format!("still image {}", self.path.display())
    }

    fn read(&mut self) -> Result<Frame> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("still image {} has been released", self.path.display()))?
            .clone();
        self.pacer.wait();
        self.frame_count += 1;
        Ok(Frame::from_image(image, self.frame_count))
    }

    fn release(&mut self) {
        if self.image.take().is_some() {
            log::info!("StillImageSource: released {}", self.path.display());
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            device: self.path.display().to_string(),
            frames_read: self.frame_count,
            read_failures: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_the_decoded_image() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("kit.png");
        RgbImage::from_pixel(8, 4, image::Rgb([10, 20, 30])).save(&path)?;

        let config = CameraConfig {
            device: format!("still:{}", path.display()),
            target_fps: 0,
            ..CameraConfig::default()
        };
        let mut source = StillImageSource::open(&path, config)?;
        let first = source.read()?;
        let second = source.read()?;
        assert_eq!((first.width, first.height), (8, 4));
        assert_eq!(&first.pixels()[..3], &[10, 20, 30]);
        assert_eq!(second.sequence, 2);

        source.release();
        assert!(source.read().is_err());
        Ok(())
    }
}

//! Synthetic frame source for `stub://` devices.

use anyhow::{anyhow, Result};
use rand::Rng;

use super::{CameraConfig, FrameSource, Pacer, SourceStats};
use crate::frame::Frame;

/// Generates a noisy moving gradient at the configured resolution and rate.
pub struct SyntheticSource {
    config: CameraConfig,
    pacer: Pacer,
    frame_count: u64,
    released: bool,
}

impl SyntheticSource {
    pub fn new(config: CameraConfig) -> Self {
        log::info!("SyntheticSource: connected to {}", config.device);
        Self {
            pacer: Pacer::new(config.target_fps),
            config,
            frame_count: 0,
            released: false,
        }
    }

    fn pattern(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let shift = self.frame_count as usize;
        let mut rng = rand::thread_rng();
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = (i % w, i / w);
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift) % 256) as u8;
            // Sensor noise.
            px[2] = 96 + rng.gen_range(0..8);
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "{} (synthetic {}x{})",
            self.config.device, self.config.width, self.config.height
        )
    }

    fn read(&mut self) -> Result<Frame> {
        if self.released {
            return Err(anyhow!("{} has been released", self.config.device));
        }
        self.pacer.wait();
        self.frame_count += 1;
        Frame::from_rgb(
            self.pattern(),
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::info!("SyntheticSource: released {}", self.config.device);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            device: self.config.device.clone(),
            frames_read: self.frame_count,
            read_failures: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 32,
            height: 18,
            target_fps: 0,
        }
    }

    #[test]
    fn frames_are_sequenced_and_vary() -> Result<()> {
        let mut source = SyntheticSource::new(config());
        let a = source.read()?;
        let b = source.read()?;
        assert_eq!((a.sequence, b.sequence), (1, 2));
        assert_eq!(a.pixels().len(), 32 * 18 * 3);
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn read_after_release_fails() {
        let mut source = SyntheticSource::new(config());
        source.release();
        source.release();
        assert!(source.read().is_err());
    }
}

//! V4L2 frame source.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates RGB3, YUYV or
//! MJPG at the requested resolution and rate, and normalizes every buffer to
//! packed RGB24 before handing it out.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraConfig, FrameSource, SourceStats};
use crate::frame::Frame;

/// Formats tried in order of preference.
const PREFERRED_FOURCC: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Source {
    config: CameraConfig,
    state: Option<DeviceState>,
    format: PixelFormat,
    frame_count: u64,
    read_failures: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            read_failures: 0,
        }
    }

    /// Open the device and start streaming.
    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("failed to open camera {}", self.config.device))?;

        let mut negotiated = None;
        for fourcc in PREFERRED_FOURCC {
            let mut format = device
                .format()
                .with_context(|| format!("failed to read format of {}", self.config.device))?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(active) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(&active.fourcc.repr) {
                        negotiated = Some((active, pixel_format));
                        break;
                    }
                }
                Err(err) => log::warn!(
                    "V4l2Source: {} rejected {}: {}",
                    self.config.device,
                    String::from_utf8_lossy(fourcc),
                    err
                ),
            }
        }
        let (format, pixel_format) = negotiated.ok_or_else(|| {
            anyhow!(
                "camera {} supports none of RGB3, YUYV, MJPG",
                self.config.device
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.format = pixel_format;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("failed to start camera stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!(
            "{} ({}x{} {:?})",
            self.config.device, self.active_width, self.active_height, self.format
        )
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} is not connected", self.config.device))?;
        let decoded = state.with_stream_mut(|stream| -> Result<(Vec<u8>, u32, u32)> {
            let (buf, meta) = stream.next().context("failed to read camera frame")?;
            let used = match meta.bytesused as usize {
                0 => buf.len(),
                n => n.min(buf.len()),
            };
            normalize_to_rgb(&buf[..used], width, height, format)
        });
        let (pixels, width, height) = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                self.read_failures += 1;
                return Err(err);
            }
        };

        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height, self.frame_count)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.device);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            device: self.config.device.clone(),
            frames_read: self.frame_count,
            read_failures: self.read_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_fails_to_connect() {
        let mut source = V4l2Source::new(CameraConfig {
            device: "/dev/video-does-not-exist".to_string(),
            ..CameraConfig::default()
        });
        assert!(source.connect().is_err());
        assert!(source.read().is_err());
    }
}

//! Run-time detection tunables.
//!
//! The operator thread mutates settings; the inference thread reads one
//! snapshot per pass. Settings are swapped wholesale under a lock together
//! with a version counter, so a pass never observes a half-applied change.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MIN_DETECTION_AREA: i64 = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Detections must score strictly above this to be accepted.
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes of one class are merged.
    pub nms_threshold: f32,
    /// Detections must cover strictly more pixels than this.
    pub min_detection_area: i64,
    /// Recorded and logged only; has no effect on detection.
    pub tracking_enabled: bool,
    /// Recorded only.
    pub alert_mode: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            min_detection_area: DEFAULT_MIN_DETECTION_AREA,
            tracking_enabled: false,
            alert_mode: false,
        }
    }
}

impl DetectionSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within 0.0..=1.0, got {}",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(anyhow!(
                "nms threshold must be within 0.0..=1.0, got {}",
                self.nms_threshold
            ));
        }
        if self.min_detection_area < 0 {
            return Err(anyhow!("minimum detection area must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Versioned {
    version: u64,
    settings: DetectionSettings,
}

/// Process-wide settings cell shared by the operator and inference threads.
#[derive(Clone, Debug)]
pub struct SharedSettings {
    inner: Arc<RwLock<Versioned>>,
}

impl SharedSettings {
    pub fn new(settings: DetectionSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Versioned {
                version: 0,
                settings,
            })),
        })
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Result<DetectionSettings> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.settings.clone())
    }

    pub fn version(&self) -> Result<u64> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok(guard.version)
    }

    /// Version and settings read under one lock.
    pub fn versioned_snapshot(&self) -> Result<(u64, DetectionSettings)> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        Ok((guard.version, guard.settings.clone()))
    }

    /// Apply `change` to a copy, validate it, then swap it in.
    ///
    /// Returns the new settings. On validation failure nothing changes.
    pub fn update<F>(&self, change: F) -> Result<DetectionSettings>
    where
        F: FnOnce(&mut DetectionSettings),
    {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        let mut next = guard.settings.clone();
        change(&mut next);
        next.validate()?;
        guard.settings = next.clone();
        guard.version += 1;
        Ok(next)
    }

    pub fn set_confidence_threshold(&self, value: f32) -> Result<DetectionSettings> {
        self.update(|s| s.confidence_threshold = value)
    }

    pub fn set_tracking(&self, enabled: bool) -> Result<DetectionSettings> {
        self.update(|s| s.tracking_enabled = enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let s = DetectionSettings::default();
        assert_eq!(s.confidence_threshold, 0.3);
        assert_eq!(s.nms_threshold, 0.5);
        assert_eq!(s.min_detection_area, 100);
        assert!(!s.tracking_enabled);
    }

    #[test]
    fn update_bumps_version() -> Result<()> {
        let shared = SharedSettings::new(DetectionSettings::default())?;
        assert_eq!(shared.version()?, 0);
        let next = shared.set_confidence_threshold(0.55)?;
        assert_eq!(next.confidence_threshold, 0.55);
        assert_eq!(shared.snapshot()?.confidence_threshold, 0.55);
        assert_eq!(shared.version()?, 1);
        shared.set_tracking(true)?;
        assert!(shared.snapshot()?.tracking_enabled);
        assert_eq!(shared.version()?, 2);
        Ok(())
    }

    #[test]
    fn out_of_range_threshold_is_rejected_without_change() -> Result<()> {
        let shared = SharedSettings::new(DetectionSettings::default())?;
        assert!(shared.set_confidence_threshold(1.5).is_err());
        assert!(shared.set_confidence_threshold(-0.1).is_err());
        assert_eq!(shared.snapshot()?.confidence_threshold, 0.3);
        assert_eq!(shared.version()?, 0);
        Ok(())
    }

    #[test]
    fn versioned_snapshot_pairs_version_with_settings() -> Result<()> {
        let shared = SharedSettings::new(DetectionSettings::default())?;
        let (v0, first) = shared.versioned_snapshot()?;
        shared.set_confidence_threshold(0.7)?;
        let (v1, second) = shared.versioned_snapshot()?;
        assert!(v1 > v0);
        assert_eq!(first.confidence_threshold, 0.3);
        assert_eq!(second.confidence_threshold, 0.7);
        assert_eq!(v1, shared.version()?);
        Ok(())
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() -> Result<()> {
        let shared = SharedSettings::new(DetectionSettings::default())?;
        let taken = shared.snapshot()?;
        shared.set_confidence_threshold(0.9)?;
        assert_eq!(taken.confidence_threshold, 0.3);
        Ok(())
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceBackend;
use crate::detect::labels::ClassNames;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;
use crate::settings::DetectionSettings;

/// Backend that replays scripted detections instead of running a model.
///
/// Queued passes are returned one per `infer` call; once the queue is empty
/// the steady pass is repeated. A `ScriptHandle` lets another thread change
/// the script while the pipeline is running.
pub struct ScriptedBackend {
    classes: ClassNames,
    script: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<Vec<RawDetection>>,
    steady: Vec<RawDetection>,
    calls: u64,
}

/// Shared handle for feeding a running `ScriptedBackend`.
#[derive(Clone)]
pub struct ScriptHandle {
    classes: ClassNames,
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new(classes: ClassNames) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        let handle = ScriptHandle {
            classes: classes.clone(),
            script: script.clone(),
        };
        (Self { classes, script }, handle)
    }
}

impl ScriptHandle {
    /// Queue a pass to be returned by the next unconsumed `infer` call.
    pub fn push_pass(&self, detections: Vec<RawDetection>) -> Result<()> {
        self.lock()?.queued.push_back(detections);
        Ok(())
    }

    /// Replace the pass repeated when nothing is queued.
    pub fn set_steady(&self, detections: Vec<RawDetection>) -> Result<()> {
        self.lock()?.steady = detections;
        Ok(())
    }

    /// Number of `infer` calls served so far.
    pub fn calls(&self) -> Result<u64> {
        Ok(self.lock()?.calls)
    }

    /// Build a raw detection for a class name with a 100x100 box.
    pub fn detection(&self, name: &str, confidence: f32) -> Result<RawDetection> {
        self.detection_in(name, confidence, BoundingBox::new(10, 10, 110, 110))
    }

    pub fn detection_in(
        &self,
        name: &str,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Result<RawDetection> {
        let class_id = self
            .classes
            .id_of(name)
            .ok_or_else(|| anyhow!("class '{}' is not in the class table", name))?;
        Ok(RawDetection {
            class_id,
            confidence,
            bbox,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Script>> {
        self.script
            .lock()
            .map_err(|_| anyhow!("scripted backend lock poisoned"))
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn class_names(&self) -> &ClassNames {
        &self.classes
    }

    fn infer(&mut self, _frame: &Frame, _settings: &DetectionSettings) -> Result<Vec<RawDetection>> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| anyhow!("scripted backend lock poisoned"))?;
        script.calls += 1;
        match script.queued.pop_front() {
            Some(pass) => Ok(pass),
            None => Ok(script.steady.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 12], 2, 2, 0).unwrap()
    }

    #[test]
    fn queued_passes_then_steady() -> Result<()> {
        let classes = ClassNames::new(vec!["A".into(), "B".into()])?;
        let (mut backend, handle) = ScriptedBackend::new(classes);
        let settings = DetectionSettings::default();

        handle.set_steady(vec![handle.detection("B", 0.7)?])?;
        handle.push_pass(vec![handle.detection("A", 0.9)?])?;

        let first = backend.infer(&frame(), &settings)?;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].class_id, 0);

        for _ in 0..2 {
            let steady = backend.infer(&frame(), &settings)?;
            assert_eq!(steady[0].class_id, 1);
        }
        assert_eq!(handle.calls()?, 3);
        Ok(())
    }

    #[test]
    fn unknown_class_name_is_an_error() -> Result<()> {
        let classes = ClassNames::new(vec!["A".into()])?;
        let (_backend, handle) = ScriptedBackend::new(classes);
        assert!(handle.detection("Z", 0.9).is_err());
        Ok(())
    }
}

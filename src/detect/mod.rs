//! Detector backends and the per-frame detection filter.
//!
//! Backends turn a frame into raw `(class_id, confidence, bbox)` tuples. The
//! filter resolves class ids through the model's class table and applies the
//! confidence and minimum-area thresholds of the current settings snapshot.

mod backend;
mod backends;
mod filter;
mod labels;
mod nms;
mod result;

use anyhow::{anyhow, Result};

pub use backend::InferenceBackend;
pub use backends::{ScriptHandle, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractYoloBackend;
pub use filter::filter_detections;
pub use labels::ClassNames;
pub use nms::non_max_suppression;
pub use result::{BoundingBox, Detection, RawDetection};

use crate::config::ModelSettings;
use crate::tracker::RequiredObjectSet;

/// Build the backend named in the model settings.
///
/// `scripted` reports the configured steady set on every pass, for dry runs
/// of the kiosk without a model. `tract` loads an ONNX YOLO export.
pub fn build_backend(
    model: &ModelSettings,
    required: &RequiredObjectSet,
) -> Result<Box<dyn InferenceBackend>> {
    match model.backend.as_str() {
        "scripted" => {
            let classes = match &model.labels_path {
                Some(path) => ClassNames::from_file(path)?,
                None => ClassNames::new(required.names().to_vec())?,
            };
            let present = model
                .scripted_present
                .clone()
                .unwrap_or_else(|| required.names().to_vec());
            let (backend, handle) = ScriptedBackend::new(classes);
            let steady = present
                .iter()
                .map(|name| handle.detection(name, 0.9))
                .collect::<Result<Vec<_>>>()?;
            handle.set_steady(steady)?;
            Ok(Box::new(backend))
        }
        "tract" => build_tract(model),
        other => Err(anyhow!("unknown inference backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(model: &ModelSettings) -> Result<Box<dyn InferenceBackend>> {
    let model_path = model
        .path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires model.path"))?;
    let labels_path = model
        .labels_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires model.labels_path"))?;
    let classes = ClassNames::from_file(labels_path)?;
    let backend = TractYoloBackend::load(model_path, classes, model.input_size)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_model: &ModelSettings) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow!(
        "tract inference requires the backend-tract feature"
    ))
}

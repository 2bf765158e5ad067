#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::labels::ClassNames;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;
use crate::settings::DetectionSettings;

/// Candidates below this class score are discarded before NMS.
const SCORE_FLOOR: f32 = 0.05;

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// Expects a single `[1, 3, S, S]` float input and a `[1, 4 + classes, N]`
/// output of centre-format boxes followed by per-class scores. Frames are
/// stretched to the input size and boxes scaled back to frame pixels.
pub struct TractYoloBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    classes: ClassNames,
    input_size: u32,
}

impl TractYoloBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P, classes: ClassNames, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded model {} ({} classes, input {}x{})",
            model_path.display(),
            classes.len(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            classes,
            input_size,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = frame.to_image()?;
        let resized = imageops::resize(&image, self.input_size, self.input_size, FilterType::Triangle);
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, N]")?;

        let channels = view.shape()[1];
        let candidates = view.shape()[2];
        if channels != 4 + self.classes.len() {
            return Err(anyhow!(
                "model output has {} channels, class table expects {}",
                channels,
                4 + self.classes.len()
            ));
        }

        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for i in 0..candidates {
            let (class_id, score) = (0..self.classes.len())
                .map(|c| (c, view[(0, 4 + c, i)]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < SCORE_FLOOR {
                continue;
            }
            let (cx, cy, w, h) = (view[(0, 0, i)], view[(0, 1, i)], view[(0, 2, i)], view[(0, 3, i)]);
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * sx).round() as i32,
                ((cy - h / 2.0) * sy).round() as i32,
                ((cx + w / 2.0) * sx).round() as i32,
                ((cy + h / 2.0) * sy).round() as i32,
            )
            .clamp_to(frame.width, frame.height);
            detections.push(RawDetection {
                class_id,
                confidence: score.min(1.0),
                bbox,
            });
        }
        Ok(detections)
    }
}

impl InferenceBackend for TractYoloBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> &ClassNames {
        &self.classes
    }

    fn infer(&mut self, frame: &Frame, settings: &DetectionSettings) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let candidates = self.decode(outputs, frame)?;
        Ok(non_max_suppression(candidates, settings.nms_threshold))
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.input_size;
        let blank = Frame::from_rgb(vec![0u8; (size * size * 3) as usize], size, size, 0)?;
        self.infer(&blank, &DetectionSettings::default())?;
        Ok(())
    }
}

use anyhow::Result;

use crate::detect::labels::ClassNames;
use crate::detect::result::RawDetection;
use crate::frame::Frame;
use crate::settings::DetectionSettings;

/// Inference backend trait.
///
/// One backend instance is owned by the inference thread, so at most one
/// inference is in flight at a time. Backends are stateless across frames as
/// far as the pipeline is concerned.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// The id → name table shipped with the model.
    fn class_names(&self) -> &ClassNames;

    /// Run detection on a frame.
    ///
    /// `settings` is the snapshot taken for this pass; backends read only the
    /// knobs that apply before filtering (e.g. the NMS threshold).
    fn infer(&mut self, frame: &Frame, settings: &DetectionSettings) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Kit completeness inspection station.
//!
//! A camera feed is scored continuously against a fixed checklist of required
//! parts. When every required part is visible at once, the operator can capture
//! a timestamped photo together with a per-set completeness record.
//!
//! # Architecture
//!
//! Three threads cooperate through two primitives only:
//!
//! 1. **Acquisition** reads the camera and offers frames to a bounded queue
//!    that drops when full (freshness over completeness of the stream).
//! 2. **Inference** pops frames, runs the detector backend, filters the raw
//!    detections and replaces the tracker contents with the accepted set.
//! 3. **Operator** renders status, adjusts settings and triggers capture.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `LatestFrame` slot and the drop-when-full `FrameQueue`
//! - `ingest`: frame sources (synthetic, still image, V4L2 devices)
//! - `detect`: inference backends, class table, NMS and the detection filter
//! - `settings`: run-time detection tunables behind a versioned lock
//! - `tracker`: required-object set and the completeness tracker
//! - `capture`: submit/preview state machine and the filesystem record store
//! - `pipeline`: thread lifecycle, retry policy and pipeline events
//! - `station`: operator command handling on top of the pipeline
//! - `config`, `logging`, `present`, `command`, `annotate`: ambient plumbing

pub mod annotate;
pub mod capture;
pub mod command;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod present;
pub mod settings;
pub mod station;
pub mod tracker;

pub use capture::{
    CaptureReceipt, CaptureRecord, CaptureService, CaptureStore, FsCaptureStore, PreviewTicket,
    Rejection, StorageLayout, SubmitOutcome,
};
pub use command::OperatorCommand;
pub use config::StationConfig;
pub use detect::{
    filter_detections, BoundingBox, ClassNames, Detection, InferenceBackend, RawDetection,
    ScriptHandle, ScriptedBackend,
};
pub use frame::{Frame, FrameQueue, LatestFrame, DEFAULT_POP_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
pub use ingest::{open_camera, CameraConfig, FrameSource, SourceStats};
pub use pipeline::{
    AcquisitionExit, Pipeline, PipelineEvent, PipelineHandle, PipelineStats, RetryPolicy,
    StatusUpdate,
};
pub use present::{Notice, NoticeLevel, Presenter, StatusReport, TerminalPresenter};
pub use settings::{DetectionSettings, SharedSettings};
pub use station::{Flow, Station};
pub use tracker::{Completeness, CompletenessTracker, ObjectSnapshot, RequiredObjectSet};

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{StorageLayout, OUTPUT_HEIGHT, OUTPUT_WIDTH};
use crate::frame::{DEFAULT_POP_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
use crate::ingest::CameraConfig;
use crate::pipeline::RetryPolicy;
use crate::settings::DetectionSettings;
use crate::tracker::RequiredObjectSet;

const DEFAULT_BASE_DIR: &str = ".";
const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "models/kit.onnx";
const DEFAULT_LABELS_PATH: &str = "models/kit.labels";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_LIVE_VIEW_INTERVAL_MS: u64 = 500;
const KNOWN_BACKENDS: [&str; 2] = ["tract", "scripted"];

/// The reference kit checklist.
pub const DEFAULT_REQUIRED_OBJECTS: [&str; 9] = [
    "Accessories Set",
    "Barcode",
    "Silica",
    "Strap",
    "Lower",
    "Mouthpiece",
    "Barrel",
    "Bell",
    "Upper",
];

#[derive(Debug, Deserialize, Default)]
struct StationConfigFile {
    base_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    required_objects: Option<Vec<String>>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionSettings>,
    queue: Option<QueueConfigFile>,
    retry: Option<RetryPolicy>,
    output: Option<OutputConfigFile>,
    ui: Option<UiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    scripted_present: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    capacity: Option<usize>,
    pop_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct UiConfigFile {
    live_view_path: Option<PathBuf>,
    live_view_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub base_dir: PathBuf,
    log_dir: Option<PathBuf>,
    pub required_objects: Vec<String>,
    pub camera: CameraConfig,
    pub model: ModelSettings,
    pub detection: DetectionSettings,
    pub queue_capacity: usize,
    pub pop_timeout: Duration,
    pub retry: RetryPolicy,
    pub output: OutputSettings,
    pub ui: UiSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// `tract` or `scripted`.
    pub backend: String,
    pub path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    /// Names the scripted backend reports on every pass.
    pub scripted_present: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiSettings {
    pub live_view_path: Option<PathBuf>,
    pub live_view_interval: Duration,
}

impl StationConfig {
    /// Load from `INSPECT_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, but an explicit path takes precedence over `INSPECT_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("INSPECT_CONFIG").ok().map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StationConfigFile) -> Result<Self> {
        let camera_defaults = CameraConfig::default();
        let camera = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera.device.unwrap_or(camera_defaults.device),
            width: camera.width.unwrap_or(camera_defaults.width),
            height: camera.height.unwrap_or(camera_defaults.height),
            target_fps: camera.target_fps.unwrap_or(camera_defaults.target_fps),
        };

        let model = file.model.unwrap_or_default();
        let model = ModelSettings {
            backend: model.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            path: model.path,
            labels_path: model.labels_path,
            input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            scripted_present: model.scripted_present,
        };

        let queue = file.queue.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let ui = file.ui.unwrap_or_default();

        Ok(Self {
            base_dir: file
                .base_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR)),
            log_dir: file.log_dir,
            required_objects: file.required_objects.unwrap_or_else(|| {
                DEFAULT_REQUIRED_OBJECTS
                    .iter()
                    .map(|name| name.to_string())
                    .collect()
            }),
            camera,
            model,
            detection: file.detection.unwrap_or_default(),
            queue_capacity: queue.capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            pop_timeout: queue
                .pop_timeout_ms
                .map_or(DEFAULT_POP_TIMEOUT, Duration::from_millis),
            retry: file.retry.unwrap_or_default(),
            output: OutputSettings {
                width: output.width.unwrap_or(OUTPUT_WIDTH),
                height: output.height.unwrap_or(OUTPUT_HEIGHT),
                jpeg_quality: output.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            ui: UiSettings {
                live_view_path: ui.live_view_path,
                live_view_interval: Duration::from_millis(
                    ui.live_view_interval_ms
                        .unwrap_or(DEFAULT_LIVE_VIEW_INTERVAL_MS),
                ),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("INSPECT_BASE_DIR") {
            if !dir.trim().is_empty() {
                self.base_dir = PathBuf::from(dir);
            }
        }
        if let Ok(device) = std::env::var("INSPECT_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(backend) = std::env::var("INSPECT_MODEL_BACKEND") {
            if !backend.trim().is_empty() {
                self.model.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("INSPECT_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("INSPECT_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.model.labels_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(objects) = std::env::var("INSPECT_REQUIRED_OBJECTS") {
            let parsed = split_csv(&objects);
            if !parsed.is_empty() {
                self.required_objects = parsed;
            }
        }
        if let Ok(threshold) = std::env::var("INSPECT_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("INSPECT_CONFIDENCE_THRESHOLD must be a number between 0.0 and 1.0")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.camera.validate()?;
        self.detection.validate()?;
        self.retry.validate()?;
        // Normalizes names and rejects an empty checklist.
        self.required_objects = self.required_set()?.names().to_vec();

        if !KNOWN_BACKENDS.contains(&self.model.backend.as_str()) {
            return Err(anyhow!(
                "unknown model backend '{}' (expected one of: {})",
                self.model.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        // Only the ONNX backend needs model files; scripted runs fall back
        // to the checklist as their class table.
        if self.model.backend == "tract" {
            self.model
                .path
                .get_or_insert_with(|| PathBuf::from(DEFAULT_MODEL_PATH));
            self.model
                .labels_path
                .get_or_insert_with(|| PathBuf::from(DEFAULT_LABELS_PATH));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if self.pop_timeout.is_zero() {
            return Err(anyhow!("queue pop timeout must be greater than zero"));
        }
        if self.output.width == 0 || self.output.height == 0 {
            return Err(anyhow!("output resolution must be non-zero"));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        Ok(())
    }

    pub fn required_set(&self) -> Result<RequiredObjectSet> {
        RequiredObjectSet::new(self.required_objects.iter().cloned())
    }

    pub fn storage(&self) -> StorageLayout {
        StorageLayout::under(&self.base_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("logs"))
    }
}

fn read_config_file(path: &Path) -> Result<StationConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

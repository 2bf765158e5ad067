use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use kit_inspector::config::StationConfig;
use kit_inspector::detect::build_backend;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "INSPECT_CONFIG",
        "INSPECT_BASE_DIR",
        "INSPECT_CAMERA_DEVICE",
        "INSPECT_MODEL_BACKEND",
        "INSPECT_MODEL_PATH",
        "INSPECT_LABELS_PATH",
        "INSPECT_REQUIRED_OBJECTS",
        "INSPECT_CONFIDENCE_THRESHOLD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "base_dir": "/srv/inspection",
        "required_objects": ["Bell", "Barrel", "Upper"],
        "camera": {
            "device": "/dev/video2",
            "width": 1280,
            "height": 720,
            "target_fps": 15
        },
        "model": {
            "backend": "scripted",
            "labels_path": "/srv/models/kit.labels"
        },
        "detection": {
            "confidence_threshold": 0.4,
            "min_detection_area": 250
        },
        "queue": { "capacity": 32, "pop_timeout_ms": 250 },
        "retry": { "max_attempts": 3, "initial_backoff_ms": 50, "max_backoff_ms": 400 },
        "output": { "jpeg_quality": 75 },
        "ui": { "live_view_path": "/run/inspect/live.jpg" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("INSPECT_CONFIG", file.path());
    std::env::set_var("INSPECT_CAMERA_DEVICE", "stub://bench");
    std::env::set_var("INSPECT_CONFIDENCE_THRESHOLD", "0.55");

    let cfg = StationConfig::load().expect("load config");

    assert_eq!(cfg.base_dir, PathBuf::from("/srv/inspection"));
    assert_eq!(cfg.required_objects, vec!["Bell", "Barrel", "Upper"]);
    assert_eq!(cfg.camera.device, "stub://bench");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.model.backend, "scripted");
    assert_eq!(
        cfg.model.labels_path,
        Some(PathBuf::from("/srv/models/kit.labels"))
    );
    assert_eq!(cfg.detection.confidence_threshold, 0.55);
    assert_eq!(cfg.detection.min_detection_area, 250);
    assert_eq!(cfg.detection.nms_threshold, 0.5);
    assert_eq!(cfg.queue_capacity, 32);
    assert_eq!(cfg.pop_timeout, Duration::from_millis(250));
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!((cfg.output.width, cfg.output.height), (640, 360));
    assert_eq!(cfg.output.jpeg_quality, 75);
    assert_eq!(
        cfg.ui.live_view_path,
        Some(PathBuf::from("/run/inspect/live.jpg"))
    );
    assert_eq!(
        cfg.storage().audit_log,
        PathBuf::from("/srv/inspection/detection_logs/detection_log.csv")
    );
    assert_eq!(cfg.log_dir(), PathBuf::from("/srv/inspection/logs"));

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("station.toml");
    std::fs::write(
        &path,
        r#"
base_dir = "/data/kits"
required_objects = ["A", "B"]

[camera]
device = "stub://toml"

[model]
backend = "scripted"
"#,
    )
    .expect("write config");

    let cfg = StationConfig::load_from(Some(&path)).expect("load config");
    assert_eq!(cfg.base_dir, PathBuf::from("/data/kits"));
    assert_eq!(cfg.required_objects, vec!["A", "B"]);
    assert_eq!(cfg.camera.device, "stub://toml");
    assert_eq!(cfg.camera.target_fps, 30);

    clear_env();
}

#[test]
fn required_objects_env_override_is_split_and_trimmed() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("INSPECT_REQUIRED_OBJECTS", " Strap, Silica ,,Barcode ");
    std::env::set_var("INSPECT_BASE_DIR", "/tmp/station");

    let cfg = StationConfig::load().expect("load config");
    assert_eq!(cfg.required_objects, vec!["Strap", "Silica", "Barcode"]);
    assert_eq!(cfg.base_dir, PathBuf::from("/tmp/station"));

    clear_env();
}

#[test]
fn scripted_backend_builds_without_model_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("dry_run.json");
    std::fs::write(
        &path,
        r#"{ "required_objects": ["Bell", "Barrel"], "model": { "backend": "scripted" } }"#,
    )
    .expect("write config");

    let cfg = StationConfig::load_from(Some(&path)).expect("load config");
    assert_eq!(cfg.model.labels_path, None);
    assert_eq!(cfg.model.path, None);

    let required = cfg.required_set().expect("required set");
    let backend = build_backend(&cfg.model, &required).expect("scripted backend");
    assert_eq!(backend.name(), "scripted");
    assert_eq!(backend.class_names().names(), ["Bell", "Barrel"]);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("INSPECT_CONFIDENCE_THRESHOLD", "1.5");
    assert!(StationConfig::load().is_err());

    std::env::set_var("INSPECT_CONFIDENCE_THRESHOLD", "high");
    assert!(StationConfig::load().is_err());
    clear_env();

    std::env::set_var("INSPECT_MODEL_BACKEND", "opencv");
    assert!(StationConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "required_objects": [] }"#).expect("write");
    std::env::set_var("INSPECT_CONFIG", file.path());
    assert!(StationConfig::load().is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "queue": { "capacity": 0 } }"#).expect("write");
    std::env::set_var("INSPECT_CONFIG", file.path());
    assert!(StationConfig::load().is_err());

    std::env::set_var("INSPECT_CONFIG", "/nonexistent/inspect.json");
    assert!(StationConfig::load().is_err());

    clear_env();
}

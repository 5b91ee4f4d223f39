use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use chairwatch::config::{ChairwatchConfig, DetectorKind};
use chairwatch::detect::ScoreLayout;
use chairwatch::session::DispatchMode;
use chairwatch::ObjectClass;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CHAIRWATCH_CONFIG",
        "CHAIRWATCH_API_BASE_URL",
        "CHAIRWATCH_CONFIDENCE_THRESHOLD",
        "CHAIRWATCH_NMS_THRESHOLD",
        "CHAIRWATCH_DEBOUNCE_MS",
        "CHAIRWATCH_POLL_INTERVAL_MS",
        "CHAIRWATCH_RECONNECT_DELAY_MS",
        "CHAIRWATCH_DETECTOR",
        "CHAIRWATCH_MODEL_PATH",
        "CHAIRWATCH_LABELS_PATH",
        "CHAIRWATCH_SCORE_LAYOUT",
        "CHAIRWATCH_SESSION_DISPATCH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ChairwatchConfig::load(None).expect("load defaults");
    assert_eq!(cfg.api.base_url, "http://localhost:3001/api/sessions");
    assert_eq!(cfg.debounce, Duration::from_secs(3));
    assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    assert_eq!(cfg.session.dispatch, DispatchMode::Queued);
}

#[test]
fn loads_json_file_from_env_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": {"base_url": "http://sessions.local:8080/api/sessions", "timeout_ms": 1500},
        "detection": {"target_class": "person", "confidence_threshold": 0.65, "nms_threshold": 0.3},
        "occupancy": {"debounce_ms": 4000},
        "loop": {"poll_interval_ms": 250},
        "stream": {"reconnect_delay_ms": 2000, "width": 320, "height": 240},
        "detector": {"backend": "stub", "model_path": "/opt/models/yolo.onnx", "score_layout": "conditioned"},
        "session": {"dispatch": "queued", "max_attempts": 5}
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("CHAIRWATCH_CONFIG", file.path());
    std::env::set_var("CHAIRWATCH_DEBOUNCE_MS", "1500");
    std::env::set_var("CHAIRWATCH_SESSION_DISPATCH", "inline");
    std::env::set_var("CHAIRWATCH_SCORE_LAYOUT", "objectness");

    let cfg = ChairwatchConfig::load(None).expect("load config");

    assert_eq!(cfg.api.base_url, "http://sessions.local:8080/api/sessions");
    assert_eq!(cfg.api.timeout, Duration::from_millis(1500));
    assert_eq!(cfg.detection.target_class, ObjectClass::Person);
    assert_eq!(cfg.detection.confidence_threshold, 0.65);
    assert_eq!(cfg.detection.nms_threshold, 0.3);
    assert_eq!(cfg.debounce, Duration::from_millis(1500));
    assert_eq!(cfg.poll_interval, Duration::from_millis(250));
    assert_eq!(cfg.stream.reconnect_delay, Duration::from_secs(2));
    assert_eq!(cfg.stream.width, 320);
    assert_eq!(cfg.stream.height, 240);
    assert_eq!(cfg.detector.backend, DetectorKind::Stub);
    assert_eq!(
        cfg.detector.model_path,
        std::path::PathBuf::from("/opt/models/yolo.onnx")
    );
    assert_eq!(cfg.detector.score_layout, ScoreLayout::Objectness);
    assert_eq!(cfg.session.dispatch, DispatchMode::Inline);
    assert_eq!(cfg.session.retry.max_attempts, 5);

    clear_env();
}

#[test]
fn explicit_toml_path_wins_over_env_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut ignored = NamedTempFile::new().expect("temp config");
    ignored
        .write_all(br#"{"loop": {"poll_interval_ms": 900}}"#)
        .expect("write config");
    std::env::set_var("CHAIRWATCH_CONFIG", ignored.path());

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp toml");
    file.write_all(
        br#"
[loop]
poll_interval_ms = 100

[session]
max_attempts = 2
initial_backoff_ms = 100
max_backoff_ms = 400
"#,
    )
    .expect("write toml");

    let cfg = ChairwatchConfig::load(Some(file.path())).expect("load toml");
    assert_eq!(cfg.poll_interval, Duration::from_millis(100));
    assert_eq!(cfg.session.retry.max_attempts, 2);
    assert_eq!(cfg.session.retry.initial_backoff, Duration::from_millis(100));
    assert_eq!(cfg.session.retry.max_backoff, Duration::from_millis(400));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CHAIRWATCH_CONFIDENCE_THRESHOLD", "1.2");
    assert!(ChairwatchConfig::load(None).is_err());
    clear_env();

    std::env::set_var("CHAIRWATCH_POLL_INTERVAL_MS", "soon");
    assert!(ChairwatchConfig::load(None).is_err());
    clear_env();

    std::env::set_var("CHAIRWATCH_API_BASE_URL", "ftp://sessions");
    assert!(ChairwatchConfig::load(None).is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{not json").expect("write config");
    assert!(ChairwatchConfig::load(Some(file.path())).is_err());

    assert!(ChairwatchConfig::load(Some(std::path::Path::new(
        "/nonexistent/chairwatch.json"
    )))
    .is_err());

    clear_env();
}

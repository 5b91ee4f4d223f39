use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::aggregate::{AggregatorConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD};
use crate::detect::{ObjectClass, ScoreLayout};
use crate::ingest::stream::DEFAULT_READ_TIMEOUT;
use crate::ingest::{StreamConfig, DEFAULT_RECONNECT_DELAY};
use crate::occupancy::DEFAULT_DEBOUNCE;
use crate::session::{
    parse_base_url, DispatchMode, RetryPolicy, DEFAULT_API_BASE_URL, DEFAULT_API_TIMEOUT,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_MODEL_PATH: &str = "models/yolov3-tiny.onnx";
const DEFAULT_LABELS_PATH: &str = "models/coco.names";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 416;

pub const CONFIG_ENV: &str = "CHAIRWATCH_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct ChairwatchConfigFile {
    api: Option<ApiConfigFile>,
    detection: Option<DetectionConfigFile>,
    occupancy: Option<OccupancyConfigFile>,
    #[serde(rename = "loop")]
    polling: Option<LoopConfigFile>,
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    session: Option<SessionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    target_class: Option<String>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OccupancyConfigFile {
    debounce_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    reconnect_delay_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    score_layout: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    dispatch: Option<String>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    Tract,
}

impl DetectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::Stub => "stub",
            DetectorKind::Tract => "tract",
        }
    }
}

impl Default for DetectorKind {
    fn default() -> Self {
        if cfg!(feature = "backend-tract") {
            DetectorKind::Tract
        } else {
            DetectorKind::Stub
        }
    }
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected stub or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChairwatchConfig {
    pub api: ApiSettings,
    pub detection: AggregatorConfig,
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub reconnect_delay: Duration,
    pub read_timeout: Duration,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub input_size: u32,
    pub score_layout: ScoreLayout,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub dispatch: DispatchMode,
    pub retry: RetryPolicy,
}

impl Default for ChairwatchConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings {
                base_url: DEFAULT_API_BASE_URL.to_string(),
                timeout: DEFAULT_API_TIMEOUT,
            },
            detection: AggregatorConfig::default(),
            debounce: DEFAULT_DEBOUNCE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream: StreamSettings {
                reconnect_delay: DEFAULT_RECONNECT_DELAY,
                read_timeout: DEFAULT_READ_TIMEOUT,
                width: DEFAULT_FRAME_WIDTH,
                height: DEFAULT_FRAME_HEIGHT,
            },
            detector: DetectorSettings {
                backend: DetectorKind::default(),
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                labels_path: PathBuf::from(DEFAULT_LABELS_PATH),
                input_size: DEFAULT_MODEL_INPUT_SIZE,
                score_layout: ScoreLayout::default(),
            },
            session: SessionSettings {
                dispatch: DispatchMode::Queued,
                retry: RetryPolicy::default(),
            },
        }
    }
}

impl ChairwatchConfig {
    /// Defaults, then the config file (`path` or `CHAIRWATCH_CONFIG`), then the
    /// environment. Command-line overrides are applied by the caller, which must call
    /// `validate` again afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ChairwatchConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let api = file.api.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let session = file.session.unwrap_or_default();

        let target_class = match detection.target_class.as_deref() {
            Some(class) => class.parse::<ObjectClass>()?,
            None => defaults.detection.target_class,
        };
        let detector_backend = match detector.backend.as_deref() {
            Some(backend) => backend.parse()?,
            None => defaults.detector.backend,
        };
        let score_layout = match detector.score_layout.as_deref() {
            Some(layout) => layout.parse()?,
            None => defaults.detector.score_layout,
        };
        let dispatch = match session.dispatch.as_deref() {
            Some(mode) => mode.parse()?,
            None => defaults.session.dispatch,
        };

        Ok(Self {
            api: ApiSettings {
                base_url: api.base_url.unwrap_or(defaults.api.base_url),
                timeout: api
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.api.timeout),
            },
            detection: AggregatorConfig {
                target_class,
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                nms_threshold: detection.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            },
            debounce: file
                .occupancy
                .and_then(|occupancy| occupancy.debounce_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            poll_interval: file
                .polling
                .and_then(|polling| polling.poll_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            stream: StreamSettings {
                reconnect_delay: stream
                    .reconnect_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.stream.reconnect_delay),
                read_timeout: stream
                    .read_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.stream.read_timeout),
                width: stream.width.unwrap_or(defaults.stream.width),
                height: stream.height.unwrap_or(defaults.stream.height),
            },
            detector: DetectorSettings {
                backend: detector_backend,
                model_path: detector.model_path.unwrap_or(defaults.detector.model_path),
                labels_path: detector
                    .labels_path
                    .unwrap_or(defaults.detector.labels_path),
                input_size: detector.input_size.unwrap_or(defaults.detector.input_size),
                score_layout,
            },
            session: SessionSettings {
                dispatch,
                retry: RetryPolicy {
                    max_attempts: session
                        .max_attempts
                        .unwrap_or(defaults.session.retry.max_attempts),
                    initial_backoff: session
                        .initial_backoff_ms
                        .map(Duration::from_millis)
                        .unwrap_or(defaults.session.retry.initial_backoff),
                    max_backoff: session
                        .max_backoff_ms
                        .map(Duration::from_millis)
                        .unwrap_or(defaults.session.retry.max_backoff),
                },
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("CHAIRWATCH_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(value) = env_value("CHAIRWATCH_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = value.parse().map_err(|_| {
                anyhow!("CHAIRWATCH_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Some(value) = env_value("CHAIRWATCH_NMS_THRESHOLD") {
            self.detection.nms_threshold = value.parse().map_err(|_| {
                anyhow!("CHAIRWATCH_NMS_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Some(value) = env_value("CHAIRWATCH_DEBOUNCE_MS") {
            self.debounce = parse_millis("CHAIRWATCH_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = env_value("CHAIRWATCH_POLL_INTERVAL_MS") {
            self.poll_interval = parse_millis("CHAIRWATCH_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = env_value("CHAIRWATCH_RECONNECT_DELAY_MS") {
            self.stream.reconnect_delay = parse_millis("CHAIRWATCH_RECONNECT_DELAY_MS", &value)?;
        }
        if let Some(value) = env_value("CHAIRWATCH_DETECTOR") {
            self.detector.backend = value.parse()?;
        }
        if let Some(path) = env_value("CHAIRWATCH_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_value("CHAIRWATCH_LABELS_PATH") {
            self.detector.labels_path = PathBuf::from(path);
        }
        if let Some(value) = env_value("CHAIRWATCH_SCORE_LAYOUT") {
            self.detector.score_layout = value.parse()?;
        }
        if let Some(value) = env_value("CHAIRWATCH_SESSION_DISPATCH") {
            self.session.dispatch = value.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_unit_interval("confidence threshold", self.detection.confidence_threshold)?;
        check_unit_interval("nms threshold", self.detection.nms_threshold)?;
        if self.debounce.is_zero() {
            return Err(anyhow!("debounce must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.api.timeout.is_zero() {
            return Err(anyhow!("api timeout must be greater than zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream width and height must be greater than zero"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        if self.session.retry.max_attempts == 0 {
            return Err(anyhow!("session max attempts must be greater than zero"));
        }
        if self.session.retry.initial_backoff > self.session.retry.max_backoff {
            return Err(anyhow!(
                "session initial backoff must not exceed the max backoff"
            ));
        }
        parse_base_url(&self.api.base_url)?;
        Ok(())
    }

    pub fn stream_config(&self, url: &str) -> StreamConfig {
        StreamConfig {
            url: url.to_string(),
            width: self.stream.width,
            height: self.stream.height,
            read_timeout: self.stream.read_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ChairwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let millis: u64 = value
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
    Ok(Duration::from_millis(millis))
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ChairwatchConfig::default();
        assert_eq!(cfg.api.base_url, "http://localhost:3001/api/sessions");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.detection.target_class, ObjectClass::Person);
        assert_eq!(cfg.detection.confidence_threshold, 0.5);
        assert_eq!(cfg.detection.nms_threshold, 0.4);
        assert_eq!(cfg.debounce, Duration::from_secs(3));
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.stream.reconnect_delay, Duration::from_secs(5));
        assert_eq!(cfg.detector.input_size, 416);
        assert_eq!(cfg.detector.score_layout, ScoreLayout::Conditioned);
        assert_eq!(cfg.session.dispatch, DispatchMode::Queued);
        assert_eq!(cfg.session.retry.max_attempts, 3);
        cfg.validate().unwrap();
    }

    #[test]
    fn toml_and_json_files_share_keys() {
        let toml_cfg: ChairwatchConfigFile = toml::from_str(
            r#"
            [detection]
            confidence_threshold = 0.6

            [loop]
            poll_interval_ms = 250

            [session]
            dispatch = "inline"
            "#,
        )
        .unwrap();
        let json_cfg: ChairwatchConfigFile = serde_json::from_str(
            r#"{
                "detection": {"confidence_threshold": 0.6},
                "loop": {"poll_interval_ms": 250},
                "session": {"dispatch": "inline"}
            }"#,
        )
        .unwrap();

        for file in [toml_cfg, json_cfg] {
            let cfg = ChairwatchConfig::from_file(file).unwrap();
            assert_eq!(cfg.detection.confidence_threshold, 0.6);
            assert_eq!(cfg.poll_interval, Duration::from_millis(250));
            assert_eq!(cfg.session.dispatch, DispatchMode::Inline);
            assert_eq!(cfg.debounce, DEFAULT_DEBOUNCE);
        }
    }

    #[test]
    fn rejects_unknown_enum_values() {
        let file: ChairwatchConfigFile =
            serde_json::from_str(r#"{"detector": {"backend": "opencv"}}"#).unwrap();
        assert!(ChairwatchConfig::from_file(file).is_err());

        let file: ChairwatchConfigFile =
            serde_json::from_str(r#"{"detection": {"target_class": "chair"}}"#).unwrap();
        assert!(ChairwatchConfig::from_file(file).is_err());

        let file: ChairwatchConfigFile =
            serde_json::from_str(r#"{"detector": {"score_layout": "softmax"}}"#).unwrap();
        assert!(ChairwatchConfig::from_file(file).is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_settings() {
        let mut cfg = ChairwatchConfig::default();
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ChairwatchConfig::default();
        cfg.poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = ChairwatchConfig::default();
        cfg.session.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ChairwatchConfig::default();
        cfg.api.base_url = "ftp://sessions".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stream_config_carries_frame_settings() {
        let cfg = ChairwatchConfig::default();
        let stream = cfg.stream_config("stub://lobby");
        assert_eq!(stream.url, "stub://lobby");
        assert_eq!(stream.width, 640);
        assert_eq!(stream.height, 480);
    }
}

//! chairwatch - chair occupancy watcher
//!
//! This daemon:
//! 1. Opens the video stream and loads the person detector
//! 2. Samples frames at a fixed cadence and finds people in each configured zone
//! 3. Debounces per-zone presence into session start/end requests
//! 4. Reports those requests to the session-tracking service
//!
//! Usage: `chairwatch <STREAM> <ZONES_JSON>`. Exits 1 on bad arguments, bad zones,
//! model load failure or an unreachable stream; otherwise runs until Ctrl-C.

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chairwatch::config::{ChairwatchConfig, DetectorKind};
use chairwatch::detect::{DetectorBackend, LabelMap, StubBackend};
use chairwatch::orchestrator::DEFAULT_HEALTH_INTERVAL;
use chairwatch::session::{DispatchMode, HttpSessionClient, SessionClient, SessionDispatcher};
use chairwatch::{
    parse_zones, DetectionAggregator, LoopSettings, Orchestrator, ReconnectingSource,
    ShutdownSignal, StartupError, StreamSource, ZoneMatcher,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch a video stream and report per-chair occupancy sessions"
)]
struct Args {
    /// Stream locator (rtsp://..., http://..., file:// URI or file path, or stub://name).
    stream: String,

    /// JSON array of zones: [{"id": 1, "x": 0, "y": 0, "width": 100, "height": 100}, ...]
    zones: String,

    /// Optional JSON or TOML config file.
    #[arg(long, env = "CHAIRWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Session API base URL; calls go to {base}/{zone}/start and {base}/{zone}/end.
    #[arg(long, env = "CHAIRWATCH_API_BASE_URL")]
    api_base_url: Option<String>,

    #[arg(long, env = "CHAIRWATCH_CONFIDENCE_THRESHOLD")]
    confidence_threshold: Option<f32>,

    #[arg(long, env = "CHAIRWATCH_NMS_THRESHOLD")]
    nms_threshold: Option<f32>,

    /// How long presence or absence must persist before a session changes.
    #[arg(long, env = "CHAIRWATCH_DEBOUNCE_MS")]
    debounce_ms: Option<u64>,

    #[arg(long, env = "CHAIRWATCH_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    #[arg(long, env = "CHAIRWATCH_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: Option<u64>,

    /// Detector backend: stub or tract.
    #[arg(long, env = "CHAIRWATCH_DETECTOR")]
    detector: Option<DetectorKind>,

    #[arg(long, env = "CHAIRWATCH_MODEL_PATH")]
    model_path: Option<PathBuf>,

    #[arg(long, env = "CHAIRWATCH_LABELS_PATH")]
    labels_path: Option<PathBuf>,

    /// Session dispatch: queued (per-zone background queues) or inline.
    #[arg(long, env = "CHAIRWATCH_SESSION_DISPATCH")]
    session_dispatch: Option<DispatchMode>,
}

impl Args {
    fn apply(&self, cfg: &mut ChairwatchConfig) {
        if let Some(url) = &self.api_base_url {
            cfg.api.base_url = url.clone();
        }
        if let Some(threshold) = self.confidence_threshold {
            cfg.detection.confidence_threshold = threshold;
        }
        if let Some(threshold) = self.nms_threshold {
            cfg.detection.nms_threshold = threshold;
        }
        if let Some(ms) = self.debounce_ms {
            cfg.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.reconnect_delay_ms {
            cfg.stream.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(kind) = self.detector {
            cfg.detector.backend = kind;
        }
        if let Some(path) = &self.model_path {
            cfg.detector.model_path = path.clone();
        }
        if let Some(path) = &self.labels_path {
            cfg.detector.labels_path = path.clone();
        }
        if let Some(mode) = self.session_dispatch {
            cfg.session.dispatch = mode;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                let _ = err.print();
                std::process::exit(1);
            }
        },
    };

    let mut cfg = ChairwatchConfig::load(args.config.as_deref())
        .map_err(|e| StartupError::Config(format!("{:#}", e)))?;
    args.apply(&mut cfg);
    cfg.validate()
        .map_err(|e| StartupError::Config(format!("{:#}", e)))?;

    let zones = parse_zones(&args.zones).map_err(|e| StartupError::Config(format!("{:#}", e)))?;
    let matcher = ZoneMatcher::new(zones).map_err(|e| StartupError::Config(format!("{:#}", e)))?;
    let zone_ids: Vec<_> = matcher.zones().iter().map(|zone| zone.id.clone()).collect();

    log::info!(
        "chairwatch {} starting: stream={} zones={} detector={} dispatch={:?}",
        env!("CARGO_PKG_VERSION"),
        args.stream,
        zone_ids.len(),
        cfg.detector.backend.as_str(),
        cfg.session.dispatch
    );

    let (detector, labels) = load_detector(&cfg)?;
    log::info!(
        "detector {} ready with {} class labels",
        detector.name(),
        labels.len()
    );

    let source = StreamSource::new(cfg.stream_config(&args.stream))
        .map_err(|e| StartupError::Stream(format!("{:#}", e)))?;
    let source = ReconnectingSource::open(source, cfg.stream.reconnect_delay)?;
    log::info!("stream opened: {}", source.describe());

    let client: Arc<dyn SessionClient> = Arc::new(
        HttpSessionClient::new(&cfg.api.base_url, cfg.api.timeout)
            .map_err(|e| StartupError::Config(format!("{:#}", e)))?,
    );
    log::info!("reporting sessions to {}", cfg.api.base_url);

    let shutdown = ShutdownSignal::new();
    shutdown.install_ctrlc_handler()?;

    let dispatcher = match cfg.session.dispatch {
        DispatchMode::Inline => SessionDispatcher::inline(client),
        DispatchMode::Queued => SessionDispatcher::queued(
            client,
            &zone_ids,
            cfg.session.retry,
            shutdown.clone(),
        )?,
    };

    let mut orchestrator = Orchestrator::new(
        source,
        detector,
        labels,
        DetectionAggregator::new(cfg.detection),
        matcher,
        dispatcher,
        LoopSettings {
            poll_interval: cfg.poll_interval,
            debounce: cfg.debounce,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        },
    );
    let stats = orchestrator.run(&shutdown);
    log::info!(
        "chairwatch stopped after {} frames ({} session calls submitted)",
        stats.frames_processed,
        stats.events_submitted
    );
    Ok(())
}

fn load_detector(
    cfg: &ChairwatchConfig,
) -> Result<(Box<dyn DetectorBackend>, LabelMap), StartupError> {
    match cfg.detector.backend {
        DetectorKind::Stub => {
            log::warn!("using the stub detector; no people will be detected");
            Ok((Box::new(StubBackend::new()), LabelMap::coco()))
        }
        DetectorKind::Tract => load_tract(cfg),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(
    cfg: &ChairwatchConfig,
) -> Result<(Box<dyn DetectorBackend>, LabelMap), StartupError> {
    use chairwatch::detect::TractBackend;

    let model_error = |e: anyhow::Error| StartupError::ModelLoad(format!("{:#}", e));
    let labels = LabelMap::load(&cfg.detector.labels_path).map_err(model_error)?;
    let mut backend = TractBackend::new(&cfg.detector.model_path, cfg.detector.input_size)
        .map_err(model_error)?
        .with_score_floor(cfg.detection.confidence_threshold)
        .with_score_layout(cfg.detector.score_layout);
    backend.warm_up().map_err(model_error)?;
    log::info!(
        "loaded model {} ({} scores)",
        cfg.detector.model_path.display(),
        cfg.detector.score_layout.as_str()
    );
    Ok((Box::new(backend), labels))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(
    _cfg: &ChairwatchConfig,
) -> Result<(Box<dyn DetectorBackend>, LabelMap), StartupError> {
    Err(StartupError::ModelLoad(
        "the tract detector requires building with --features backend-tract".to_string(),
    ))
}

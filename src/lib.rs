//! Chair occupancy watcher
//!
//! This crate watches a video feed, decides whether each configured rectangular zone
//! ("chair") holds a person, and reports sustained occupancy changes to a
//! session-tracking service that opens and closes usage sessions per zone.
//!
//! # Pipeline
//!
//! 1. **Frame source** (`ingest`): pulls decoded frames, reconnecting on read failure.
//! 2. **Detector** (`detect`): frame to raw candidate boxes with class and confidence.
//! 3. **Aggregation** (`aggregate`): target-class filter plus non-max suppression.
//! 4. **Zone matching** (`zones`): each box goes to the first zone it overlaps.
//! 5. **Occupancy** (`occupancy`): debounced per-zone state machine emitting
//!    start/end requests.
//! 6. **Sessions** (`session`): idempotent start/end calls, inline or through
//!    per-zone queues.
//! 7. **Orchestrator** (`orchestrator`): the polling loop tying it together.
//!
//! Raw pixels stay inside `Frame` and are only visible to the detector call. Nothing
//! about individuals is tracked across frames.

pub mod aggregate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod occupancy;
pub mod orchestrator;
pub mod session;
pub mod shutdown;
pub mod zones;

pub use aggregate::{AggregatorConfig, DetectionAggregator};
pub use config::{ChairwatchConfig, DetectorKind};
pub use detect::{
    BoundingBox, Detection, DetectorBackend, LabelMap, ObjectClass, RawDetection, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use error::StartupError;
pub use frame::Frame;
pub use ingest::{FrameSource, ReconnectingSource, StreamConfig, StreamSource};
pub use occupancy::{OccupancyEvent, OccupancyTracker, ZoneState};
pub use orchestrator::{LoopSettings, Orchestrator, OrchestratorStats};
pub use session::{
    DispatchMode, HttpSessionClient, SessionAck, SessionAction, SessionClient,
    SessionDispatcher, SessionError, SessionOutcome,
};
pub use shutdown::ShutdownSignal;
pub use zones::{parse_zones, Zone, ZoneId, ZoneMatcher, ZonePresence};

//! The polling loop.
//!
//! Each iteration: apply finished session calls, read one frame, detect, aggregate,
//! match boxes to zones, step every zone in configured order, hand emitted requests to
//! the dispatcher, then sleep the poll interval. Cancellation is checked at the top of
//! the loop and interrupts both the frame read and the sleep.

use std::time::{Duration, Instant};

use crate::aggregate::DetectionAggregator;
use crate::detect::{DetectorBackend, LabelMap};
use crate::frame::Frame;
use crate::ingest::{FrameSource, ReconnectingSource};
use crate::occupancy::{OccupancyEvent, OccupancyTracker};
use crate::session::{SessionAck, SessionAction, SessionDispatcher, SubmitStatus};
use crate::shutdown::ShutdownSignal;
use crate::zones::{ZoneId, ZoneMatcher};

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub health_interval: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Frames delivered by the source, including ones later skipped.
    pub frames_read: u64,
    pub read_failures: u64,
    pub frames_processed: u64,
    /// Frames dropped because the detector failed on them.
    pub frames_skipped: u64,
    pub reconnects: u64,
    pub events_submitted: u64,
    pub session_failures: u64,
}

pub struct Orchestrator<S, D> {
    source: ReconnectingSource<S>,
    detector: D,
    labels: LabelMap,
    aggregator: DetectionAggregator,
    matcher: ZoneMatcher,
    tracker: OccupancyTracker,
    dispatcher: SessionDispatcher,
    settings: LoopSettings,
    stats: OrchestratorStats,
}

impl<S: FrameSource, D: DetectorBackend> Orchestrator<S, D> {
    pub fn new(
        source: ReconnectingSource<S>,
        detector: D,
        labels: LabelMap,
        aggregator: DetectionAggregator,
        matcher: ZoneMatcher,
        dispatcher: SessionDispatcher,
        settings: LoopSettings,
    ) -> Self {
        let tracker = OccupancyTracker::new(
            matcher.zones().iter().map(|zone| zone.id.clone()),
            settings.debounce,
        );
        Self {
            source,
            detector,
            labels,
            aggregator,
            matcher,
            tracker,
            dispatcher,
            settings,
            stats: OrchestratorStats::default(),
        }
    }

    /// Run until `shutdown` is triggered. Session calls still queued are completed
    /// before returning; open sessions are left open.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> OrchestratorStats {
        log::info!(
            "watching {} zone(s) on {}",
            self.matcher.zones().len(),
            self.source.describe()
        );
        let mut last_health_log = Instant::now();

        loop {
            if shutdown.is_triggered() {
                break;
            }
            self.apply_acks();

            let Some(frame) = self.source.read(shutdown) else {
                break;
            };
            self.process_frame(&frame, Instant::now());

            if last_health_log.elapsed() >= self.settings.health_interval {
                self.log_health();
                last_health_log = Instant::now();
            }

            if shutdown.sleep(self.settings.poll_interval) {
                break;
            }
        }

        log::info!(
            "shutting down; waiting for {} pending session call(s)",
            self.dispatcher.in_flight()
        );
        self.dispatcher.shutdown();
        self.apply_acks();
        self.log_health();
        self.stats()
    }

    /// Run one frame through the pipeline at time `now`. Returns the requests emitted
    /// by the zone state machines, in zone order.
    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> Vec<(ZoneId, OccupancyEvent)> {
        let raw = match frame.run_detector(&mut self.detector) {
            Ok(raw) => raw,
            Err(err) => {
                self.stats.frames_skipped += 1;
                log::warn!("detector failed on frame {}: {:#}", frame.sequence, err);
                return Vec::new();
            }
        };
        self.stats.frames_processed += 1;

        let detections = self.labels.resolve_all(&raw);
        let people = self.aggregator.aggregate(&detections);
        let presence = self.matcher.match_boxes(&people);
        log::debug!(
            "frame {}: {} raw, {} kept, {} zone(s) occupied",
            frame.sequence,
            raw.len(),
            people.len(),
            presence.occupied_count()
        );

        let events = self.tracker.step_all(&presence, now);
        for (zone, event) in &events {
            let action = match event {
                OccupancyEvent::StartRequested => SessionAction::Start,
                OccupancyEvent::EndRequested => SessionAction::End,
                OccupancyEvent::None => continue,
            };
            if self.dispatcher.submit(zone, action) == SubmitStatus::Accepted {
                self.stats.events_submitted += 1;
                log::debug!("zone {}: {} requested", zone, action);
            }
        }
        self.apply_acks();
        events
    }

    /// Apply every finished session call to its zone. Returns the number applied.
    pub fn apply_acks(&mut self) -> usize {
        let acks = self.dispatcher.drain_acks();
        let applied = acks.len();
        for ack in acks {
            self.apply_ack(ack);
        }
        applied
    }

    fn apply_ack(&mut self, ack: SessionAck) {
        match ack.result {
            Ok(outcome) => {
                if outcome.session_active() {
                    self.tracker.confirm_started(&ack.zone);
                    log::info!("session started for zone {} ({:?})", ack.zone, outcome);
                } else {
                    self.tracker.confirm_ended(&ack.zone);
                    log::info!("session ended for zone {} ({:?})", ack.zone, outcome);
                }
            }
            Err(err) => {
                self.stats.session_failures += 1;
                log::error!("{}", err);
            }
        }
    }

    fn log_health(&self) {
        let stats = self.stats();
        log::info!(
            "health read={} read_failures={} frames={} skipped={} reconnects={} submitted={} failed={} active_sessions={}",
            stats.frames_read,
            stats.read_failures,
            stats.frames_processed,
            stats.frames_skipped,
            stats.reconnects,
            stats.events_submitted,
            stats.session_failures,
            self.tracker.active_sessions()
        );
    }

    pub fn stats(&self) -> OrchestratorStats {
        let source = self.source.stats();
        OrchestratorStats {
            frames_read: source.frames_read,
            read_failures: source.read_failures,
            reconnects: source.reconnects,
            ..self.stats
        }
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &SessionDispatcher {
        &self.dispatcher
    }
}

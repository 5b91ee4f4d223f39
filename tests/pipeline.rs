use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chairwatch::detect::{BoundingBox, LabelMap, RawDetection, StubBackend};
use chairwatch::orchestrator::DEFAULT_HEALTH_INTERVAL;
use chairwatch::session::{
    RetryPolicy, SessionAction, SessionClient, SessionDispatcher, SessionError, SessionOutcome,
};
use chairwatch::{
    AggregatorConfig, DetectionAggregator, Frame, LoopSettings, OccupancyEvent, Orchestrator,
    ReconnectingSource, ShutdownSignal, StreamConfig, StreamSource, Zone, ZoneId, ZoneMatcher,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const TICK: Duration = Duration::from_millis(500);

/// Records every call; answers from `replies` first, then with plain success.
#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<(ZoneId, SessionAction)>>,
    replies: Mutex<VecDeque<Result<SessionOutcome, SessionError>>>,
}

impl RecordingClient {
    fn with_replies(replies: Vec<Result<SessionOutcome, SessionError>>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        })
    }

    fn calls(&self) -> Vec<(ZoneId, SessionAction)> {
        self.calls.lock().unwrap().clone()
    }

    fn reply(&self, zone: &ZoneId, action: SessionAction) -> Result<SessionOutcome, SessionError> {
        self.calls.lock().unwrap().push((zone.clone(), action));
        self.replies.lock().unwrap().pop_front().unwrap_or(Ok(match action {
            SessionAction::Start => SessionOutcome::Started,
            SessionAction::End => SessionOutcome::Ended,
        }))
    }
}

impl SessionClient for RecordingClient {
    fn start(&self, zone: &ZoneId) -> Result<SessionOutcome, SessionError> {
        self.reply(zone, SessionAction::Start)
    }

    fn end(&self, zone: &ZoneId) -> Result<SessionOutcome, SessionError> {
        self.reply(zone, SessionAction::End)
    }
}

fn person(x: f32, y: f32, confidence: f32) -> RawDetection {
    RawDetection {
        class_id: 0,
        confidence,
        bbox: BoundingBox::new(x, y, 30.0, 60.0),
    }
}

fn zones() -> ZoneMatcher {
    ZoneMatcher::new(vec![
        Zone::new("1", 0.0, 0.0, 100.0, 100.0),
        Zone::new("2", 150.0, 0.0, 100.0, 100.0),
    ])
    .unwrap()
}

fn source(url: &str) -> ReconnectingSource<StreamSource> {
    let stream = StreamSource::new(StreamConfig {
        url: url.to_string(),
        width: WIDTH,
        height: HEIGHT,
        ..StreamConfig::default()
    })
    .unwrap();
    ReconnectingSource::open(stream, Duration::from_millis(1)).unwrap()
}

fn orchestrator(
    detector: StubBackend,
    dispatcher: SessionDispatcher,
    debounce: Duration,
) -> Orchestrator<StreamSource, StubBackend> {
    Orchestrator::new(
        source("stub://pipeline"),
        detector,
        LabelMap::coco(),
        DetectionAggregator::new(AggregatorConfig::default()),
        zones(),
        dispatcher,
        LoopSettings {
            poll_interval: Duration::from_millis(5),
            debounce,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        },
    )
}

fn blank_frame(sequence: u64) -> Frame {
    Frame::new(vec![0u8; (WIDTH * HEIGHT * 3) as usize], WIDTH, HEIGHT, sequence).unwrap()
}

/// Feed `frames` frames at `TICK` spacing; returns (frame index, zone, event) for each
/// emitted request.
fn drive(
    orchestrator: &mut Orchestrator<StreamSource, StubBackend>,
    frames: u64,
) -> Vec<(u64, ZoneId, OccupancyEvent)> {
    let t0 = Instant::now();
    let mut emitted = Vec::new();
    for i in 0..frames {
        let now = t0 + TICK * i as u32;
        for (zone, event) in orchestrator.process_frame(&blank_frame(i + 1), now) {
            emitted.push((i, zone, event));
        }
    }
    emitted
}

fn script(pattern: &[bool]) -> StubBackend {
    StubBackend::scripted(
        pattern
            .iter()
            .map(|&present| {
                if present {
                    vec![person(10.0, 10.0, 0.9)]
                } else {
                    Vec::new()
                }
            })
            .collect(),
    )
}

#[test]
fn sustained_presence_then_absence_opens_and_closes_one_session() {
    let client = RecordingClient::with_replies(vec![]);
    let mut pattern = vec![true; 9];
    pattern.extend(vec![false; 9]);
    let mut orch = orchestrator(
        script(&pattern),
        SessionDispatcher::inline(client.clone()),
        Duration::from_secs(3),
    );

    let emitted = drive(&mut orch, 18);

    let zone = ZoneId::from("1");
    assert_eq!(
        emitted,
        vec![
            (7, zone.clone(), OccupancyEvent::StartRequested),
            (16, zone.clone(), OccupancyEvent::EndRequested),
        ]
    );
    assert_eq!(
        client.calls(),
        vec![
            (zone.clone(), SessionAction::Start),
            (zone.clone(), SessionAction::End),
        ]
    );
    assert!(!orch.tracker().state(&zone).unwrap().session_active);
}

#[test]
fn single_missed_frame_restarts_the_debounce_window() {
    let client = RecordingClient::with_replies(vec![]);
    let mut pattern = vec![true; 6];
    pattern.push(false);
    pattern.extend(vec![true; 9]);
    let mut orch = orchestrator(
        script(&pattern),
        SessionDispatcher::inline(client.clone()),
        Duration::from_secs(3),
    );

    let emitted = drive(&mut orch, 16);

    assert_eq!(
        emitted,
        vec![(14, ZoneId::from("1"), OccupancyEvent::StartRequested)]
    );
    assert_eq!(client.calls().len(), 1);
}

#[test]
fn failed_start_is_retried_on_following_frames() {
    let zone = ZoneId::from("1");
    let failure = |status| {
        Err(SessionError::UnexpectedStatus {
            action: SessionAction::Start,
            zone: ZoneId::from("1"),
            status,
        })
    };
    let client = RecordingClient::with_replies(vec![failure(500), failure(503)]);
    let mut orch = orchestrator(
        script(&[true]),
        SessionDispatcher::inline(client.clone()),
        Duration::from_secs(3),
    );

    let emitted = drive(&mut orch, 12);

    let frames: Vec<u64> = emitted.iter().map(|(i, _, _)| *i).collect();
    assert_eq!(frames, vec![7, 8, 9]);
    assert_eq!(client.calls().len(), 3);
    assert!(orch.tracker().state(&zone).unwrap().session_active);
    assert_eq!(orch.stats().session_failures, 2);
}

#[test]
fn already_active_and_not_active_replies_count_as_success() {
    let client = RecordingClient::with_replies(vec![
        Ok(SessionOutcome::AlreadyActive),
        Ok(SessionOutcome::NotActive),
    ]);
    let mut pattern = vec![true; 9];
    pattern.extend(vec![false; 9]);
    let mut orch = orchestrator(
        script(&pattern),
        SessionDispatcher::inline(client.clone()),
        Duration::from_secs(3),
    );

    let emitted = drive(&mut orch, 18);

    assert_eq!(emitted.len(), 2);
    assert_eq!(client.calls().len(), 2);
    assert_eq!(orch.stats().session_failures, 0);
    assert!(!orch
        .tracker()
        .state(&ZoneId::from("1"))
        .unwrap()
        .session_active);
}

#[test]
fn detections_outside_every_zone_change_nothing() {
    let client = RecordingClient::with_replies(vec![]);
    let detector = StubBackend::constant(vec![person(400.0, 300.0, 0.95)]);
    let mut orch = orchestrator(
        detector,
        SessionDispatcher::inline(client.clone()),
        Duration::from_secs(3),
    );

    let emitted = drive(&mut orch, 12);

    assert!(emitted.is_empty());
    assert!(client.calls().is_empty());
    for id in ["1", "2"] {
        let state = orch.tracker().state(&ZoneId::from(id)).unwrap();
        assert!(!state.occupied_now);
        assert_eq!(state.presence_started_at, None);
    }
}

#[test]
fn duplicate_boxes_and_low_confidence_do_not_leak_into_other_zones() {
    let client = RecordingClient::with_replies(vec![]);
    // Two overlapping boxes on zone 1, one weak detection on zone 2.
    let detector = StubBackend::constant(vec![
        person(10.0, 10.0, 0.9),
        person(12.0, 10.0, 0.8),
        person(160.0, 10.0, 0.4),
    ]);
    let mut orch = orchestrator(
        detector,
        SessionDispatcher::inline(client.clone()),
        Duration::from_secs(3),
    );

    drive(&mut orch, 10);

    assert_eq!(client.calls(), vec![(ZoneId::from("1"), SessionAction::Start)]);
    assert!(!orch.tracker().state(&ZoneId::from("2")).unwrap().occupied_now);
}

#[test]
fn run_loop_reconnects_and_reports_through_queued_dispatch() {
    let client = RecordingClient::with_replies(vec![]);
    let shutdown = ShutdownSignal::new();
    let zone_ids = vec![ZoneId::from("1"), ZoneId::from("2")];
    let dispatcher = SessionDispatcher::queued(
        client.clone(),
        &zone_ids,
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        shutdown.clone(),
    )
    .unwrap();

    let mut orch = Orchestrator::new(
        source("stub://pipeline?fail_after=3"),
        StubBackend::constant(vec![person(10.0, 10.0, 0.9)]),
        LabelMap::coco(),
        DetectionAggregator::new(AggregatorConfig::default()),
        zones(),
        dispatcher,
        LoopSettings {
            poll_interval: Duration::from_millis(5),
            debounce: Duration::from_millis(20),
            health_interval: Duration::from_millis(50),
        },
    );

    let remote = shutdown.clone();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(400));
        remote.trigger();
    });
    let stats = orch.run(&shutdown);
    stopper.join().unwrap();

    assert!(stats.frames_processed > 3);
    assert!(stats.frames_read >= stats.frames_processed);
    assert!(stats.read_failures >= 1);
    assert!(stats.reconnects >= 1);
    assert_eq!(client.calls(), vec![(ZoneId::from("1"), SessionAction::Start)]);
    assert!(orch
        .tracker()
        .state(&ZoneId::from("1"))
        .unwrap()
        .session_active);
    assert_eq!(orch.dispatcher().in_flight(), 0);
}

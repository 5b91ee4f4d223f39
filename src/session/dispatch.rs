//! Hand-off of session requests from the polling loop to the session service.
//!
//! `Inline` calls the service synchronously inside `submit`, once per request.
//! `Queued` runs one worker thread per zone behind a single-slot queue; each worker
//! retries a failed call with exponential backoff, so a stalled call only delays its own
//! zone.
//!
//! Either way the result comes back as a `SessionAck` that the loop applies to the zone
//! state. At most one request per zone is outstanding.

use anyhow::{anyhow, Result};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::client::{SessionAction, SessionClient, SessionError, SessionOutcome};
use crate::shutdown::ShutdownSignal;
use crate::zones::ZoneId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    Inline,
    Queued,
}

impl FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DispatchMode::Inline),
            "queued" => Ok(DispatchMode::Queued),
            other => Err(anyhow!(
                "unknown session dispatch mode '{}'; expected inline or queued",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Final result of one submitted request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionAck {
    pub zone: ZoneId,
    pub action: SessionAction,
    pub result: Result<SessionOutcome, SessionError>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    AlreadyInFlight,
    Unavailable,
}

struct Worker {
    tx: SyncSender<SessionAction>,
    handle: JoinHandle<()>,
}

enum Backend {
    Inline {
        ready: VecDeque<SessionAck>,
    },
    Queued {
        workers: HashMap<ZoneId, Worker>,
        acks: Receiver<SessionAck>,
    },
}

pub struct SessionDispatcher {
    client: Arc<dyn SessionClient>,
    backend: Backend,
    in_flight: HashMap<ZoneId, SessionAction>,
}

impl SessionDispatcher {
    /// Synchronous dispatch: one call per request, inside `submit`.
    pub fn inline(client: Arc<dyn SessionClient>) -> Self {
        Self {
            client,
            backend: Backend::Inline {
                ready: VecDeque::new(),
            },
            in_flight: HashMap::new(),
        }
    }

    /// One worker thread per zone. Each queue holds a single request: a zone never
    /// has more than one outstanding.
    pub fn queued(
        client: Arc<dyn SessionClient>,
        zones: &[ZoneId],
        retry: RetryPolicy,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let (ack_tx, ack_rx) = mpsc::channel();
        let mut workers = HashMap::new();
        for zone in zones {
            let (tx, rx) = mpsc::sync_channel(1);
            let worker_client = client.clone();
            let worker_zone = zone.clone();
            let worker_acks = ack_tx.clone();
            let worker_shutdown = shutdown.clone();
            let handle = std::thread::Builder::new()
                .name(format!("session-{}", zone))
                .spawn(move || {
                    run_worker(
                        worker_client,
                        worker_zone,
                        rx,
                        worker_acks,
                        retry,
                        worker_shutdown,
                    )
                })
                .map_err(|e| anyhow!("failed to spawn session worker for zone {}: {}", zone, e))?;
            workers.insert(zone.clone(), Worker { tx, handle });
        }
        Ok(Self {
            client,
            backend: Backend::Queued {
                workers,
                acks: ack_rx,
            },
            in_flight: HashMap::new(),
        })
    }

    /// Hand a request off. Ignored while another request for the zone is outstanding.
    pub fn submit(&mut self, zone: &ZoneId, action: SessionAction) -> SubmitStatus {
        if self.in_flight.contains_key(zone) {
            return SubmitStatus::AlreadyInFlight;
        }
        match &mut self.backend {
            Backend::Inline { ready } => {
                let result = self.client.call(action, zone);
                ready.push_back(SessionAck {
                    zone: zone.clone(),
                    action,
                    result,
                });
            }
            Backend::Queued { workers, .. } => {
                let Some(worker) = workers.get(zone) else {
                    log::error!("no session worker for zone {}", zone);
                    return SubmitStatus::Unavailable;
                };
                // The slot is free: the worker took the previous request before acking it.
                if worker.tx.send(action).is_err() {
                    log::error!("session worker for zone {} has stopped", zone);
                    return SubmitStatus::Unavailable;
                }
            }
        }
        self.in_flight.insert(zone.clone(), action);
        SubmitStatus::Accepted
    }

    /// Acks that have completed since the last call. Never blocks.
    pub fn drain_acks(&mut self) -> Vec<SessionAck> {
        let acks: Vec<SessionAck> = match &mut self.backend {
            Backend::Inline { ready } => ready.drain(..).collect(),
            Backend::Queued { acks, .. } => acks.try_iter().collect(),
        };
        for ack in &acks {
            self.in_flight.remove(&ack.zone);
        }
        acks
    }

    /// Wait up to `timeout` for the next ack.
    pub fn wait_for_ack(&mut self, timeout: Duration) -> Option<SessionAck> {
        let ack = match &mut self.backend {
            Backend::Inline { ready } => ready.pop_front(),
            Backend::Queued { acks, .. } => acks.recv_timeout(timeout).ok(),
        }?;
        self.in_flight.remove(&ack.zone);
        Some(ack)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, zone: &ZoneId) -> bool {
        self.in_flight.contains_key(zone)
    }

    /// Close the queues and join the workers. Requests still queued are completed first.
    pub fn shutdown(&mut self) {
        if let Backend::Queued { workers, .. } = &mut self.backend {
            for (zone, worker) in workers.drain() {
                drop(worker.tx);
                if worker.handle.join().is_err() {
                    log::error!("session worker for zone {} panicked", zone);
                }
            }
        }
    }
}

impl Drop for SessionDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    client: Arc<dyn SessionClient>,
    zone: ZoneId,
    requests: Receiver<SessionAction>,
    acks: Sender<SessionAck>,
    retry: RetryPolicy,
    shutdown: ShutdownSignal,
) {
    for action in requests {
        let result = call_with_retry(client.as_ref(), &zone, action, retry, &shutdown);
        let ack = SessionAck {
            zone: zone.clone(),
            action,
            result,
        };
        if acks.send(ack).is_err() {
            break;
        }
    }
}

fn call_with_retry(
    client: &dyn SessionClient,
    zone: &ZoneId,
    action: SessionAction,
    retry: RetryPolicy,
    shutdown: &ShutdownSignal,
) -> Result<SessionOutcome, SessionError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.call(action, zone) {
            Ok(outcome) => return Ok(outcome),
            Err(err) if attempt < max_attempts => {
                let delay = retry.backoff_after(attempt);
                log::warn!(
                    "{} (attempt {}/{}); retrying in {:?}",
                    err,
                    attempt,
                    max_attempts,
                    delay
                );
                if shutdown.sleep(delay) {
                    return Err(err);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

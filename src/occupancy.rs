//! Debounced occupancy state machine.
//!
//! One `ZoneState` per zone turns the noisy per-frame presence signal into session
//! start/end requests. A request is emitted on every frame where its condition holds;
//! `session_active` only changes when the caller confirms the session call succeeded.
//!
//! Any opposite edge resets the running timer: presence has to be seen on every sampled
//! frame for the whole debounce window before a start is requested (and likewise for
//! absence before an end).

use std::time::{Duration, Instant};

use crate::zones::{ZoneId, ZonePresence};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// Occupancy state of one zone.
///
/// At most one of `presence_started_at` / `absence_started_at` is set; it marks the most
/// recent presence or absence edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZoneState {
    pub occupied_now: bool,
    pub presence_started_at: Option<Instant>,
    pub absence_started_at: Option<Instant>,
    pub session_active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OccupancyEvent {
    None,
    StartRequested,
    EndRequested,
}

impl ZoneState {
    /// Advance by one frame.
    pub fn step(
        mut self,
        present: bool,
        now: Instant,
        debounce: Duration,
    ) -> (Self, OccupancyEvent) {
        if present && !self.occupied_now {
            self.presence_started_at = Some(now);
            self.absence_started_at = None;
        } else if !present && self.occupied_now {
            self.absence_started_at = Some(now);
            self.presence_started_at = None;
        }
        self.occupied_now = present;

        let held_longer_than = |since: Option<Instant>| {
            since.is_some_and(|t| now.saturating_duration_since(t) > debounce)
        };

        let event = if !self.session_active && held_longer_than(self.presence_started_at) {
            OccupancyEvent::StartRequested
        } else if self.session_active && held_longer_than(self.absence_started_at) {
            OccupancyEvent::EndRequested
        } else {
            OccupancyEvent::None
        };
        (self, event)
    }

    /// The session start call succeeded (or a session was already active).
    pub fn confirm_started(&mut self) {
        self.session_active = true;
    }

    /// The session end call succeeded (or no session was active).
    pub fn confirm_ended(&mut self) {
        self.session_active = false;
    }
}

/// Exclusively owned per-zone states, in configured zone order.
#[derive(Clone, Debug)]
pub struct OccupancyTracker {
    debounce: Duration,
    zones: Vec<(ZoneId, ZoneState)>,
}

impl OccupancyTracker {
    pub fn new<I>(zone_ids: I, debounce: Duration) -> Self
    where
        I: IntoIterator<Item = ZoneId>,
    {
        Self {
            debounce,
            zones: zone_ids
                .into_iter()
                .map(|id| (id, ZoneState::default()))
                .collect(),
        }
    }

    pub fn state(&self, id: &ZoneId) -> Option<&ZoneState> {
        self.zones
            .iter()
            .find(|(zone_id, _)| zone_id == id)
            .map(|(_, state)| state)
    }

    fn state_mut(&mut self, id: &ZoneId) -> Option<&mut ZoneState> {
        self.zones
            .iter_mut()
            .find(|(zone_id, _)| zone_id == id)
            .map(|(_, state)| state)
    }

    /// Step one zone. Unknown zone ids are ignored.
    pub fn step_zone(&mut self, id: &ZoneId, present: bool, now: Instant) -> OccupancyEvent {
        let debounce = self.debounce;
        match self.state_mut(id) {
            Some(state) => {
                let (next, event) = state.step(present, now, debounce);
                *state = next;
                event
            }
            None => OccupancyEvent::None,
        }
    }

    /// Step every zone for one frame; returns the emitted requests in zone order.
    pub fn step_all(
        &mut self,
        presence: &ZonePresence,
        now: Instant,
    ) -> Vec<(ZoneId, OccupancyEvent)> {
        let debounce = self.debounce;
        let mut events = Vec::new();
        for (id, state) in self.zones.iter_mut() {
            let present = presence.get(id).unwrap_or(false);
            let (next, event) = state.step(present, now, debounce);
            *state = next;
            if event != OccupancyEvent::None {
                events.push((id.clone(), event));
            }
        }
        events
    }

    pub fn confirm_started(&mut self, id: &ZoneId) -> bool {
        match self.state_mut(id) {
            Some(state) => {
                state.confirm_started();
                true
            }
            None => false,
        }
    }

    pub fn confirm_ended(&mut self, id: &ZoneId) -> bool {
        match self.state_mut(id) {
            Some(state) => {
                state.confirm_ended();
                true
            }
            None => false,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.zones
            .iter()
            .filter(|(_, state)| state.session_active)
            .count()
    }
}

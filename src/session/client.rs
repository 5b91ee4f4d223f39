use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::zones::ZoneId;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api/sessions";
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionAction {
    Start,
    End,
}

impl SessionAction {
    fn path_segment(self) -> &'static str {
        match self {
            SessionAction::Start => "start",
            SessionAction::End => "end",
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Successful session call results. The second variant of each pair is the idempotent
/// no-op reported by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Started,
    AlreadyActive,
    Ended,
    NotActive,
}

impl SessionOutcome {
    /// Map a response status to an outcome; `None` means the call failed.
    pub fn from_status(action: SessionAction, status: u16) -> Option<Self> {
        match (action, status) {
            (SessionAction::Start, 201) => Some(SessionOutcome::Started),
            (SessionAction::Start, 400) => Some(SessionOutcome::AlreadyActive),
            (SessionAction::End, 200) => Some(SessionOutcome::Ended),
            (SessionAction::End, 404) => Some(SessionOutcome::NotActive),
            _ => None,
        }
    }

    /// Whether a session is open for the zone after this outcome.
    pub fn session_active(self) -> bool {
        matches!(self, SessionOutcome::Started | SessionOutcome::AlreadyActive)
    }
}

/// Failed session call. Never fatal: the zone state is left unchanged and the call is
/// retried on a later qualifying frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{action} session for zone {zone} failed with status {status}")]
    UnexpectedStatus {
        action: SessionAction,
        zone: ZoneId,
        status: u16,
    },

    #[error("{action} session for zone {zone} failed: {message}")]
    Transport {
        action: SessionAction,
        zone: ZoneId,
        message: String,
    },
}

/// Session-tracking service with idempotent start/end per zone.
pub trait SessionClient: Send + Sync {
    fn start(&self, zone: &ZoneId) -> Result<SessionOutcome, SessionError>;

    fn end(&self, zone: &ZoneId) -> Result<SessionOutcome, SessionError>;

    fn call(&self, action: SessionAction, zone: &ZoneId) -> Result<SessionOutcome, SessionError> {
        match action {
            SessionAction::Start => self.start(zone),
            SessionAction::End => self.end(zone),
        }
    }
}

/// `POST {base}/{zone}/start` and `POST {base}/{zone}/end` over HTTP.
pub struct HttpSessionClient {
    agent: ureq::Agent,
    base: Url,
}

impl HttpSessionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = parse_base_url(base_url)?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { agent, base })
    }

    pub fn endpoint(&self, zone: &ZoneId, action: SessionAction) -> Url {
        let mut url = self.base.clone();
        // parse_base_url rejects cannot-be-a-base URLs
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(zone.as_str())
                .push(action.path_segment());
        }
        url
    }

    fn post(&self, action: SessionAction, zone: &ZoneId) -> Result<SessionOutcome, SessionError> {
        let url = self.endpoint(zone, action);
        let status = match self.agent.post(url.as_str()).call() {
            Ok(response) => response.status(),
            Err(ureq::Error::Status(code, _)) => code,
            Err(ureq::Error::Transport(transport)) => {
                return Err(SessionError::Transport {
                    action,
                    zone: zone.clone(),
                    message: transport.to_string(),
                })
            }
        };
        SessionOutcome::from_status(action, status).ok_or_else(|| SessionError::UnexpectedStatus {
            action,
            zone: zone.clone(),
            status,
        })
    }
}

impl SessionClient for HttpSessionClient {
    fn start(&self, zone: &ZoneId) -> Result<SessionOutcome, SessionError> {
        self.post(SessionAction::Start, zone)
    }

    fn end(&self, zone: &ZoneId) -> Result<SessionOutcome, SessionError> {
        self.post(SessionAction::End, zone)
    }
}

pub fn parse_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url.trim())
        .with_context(|| format!("invalid session api url '{}'", base_url))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "session api url must be http(s), got '{}'",
            url.scheme()
        ));
    }
    if url.cannot_be_a_base() {
        return Err(anyhow!("session api url '{}' cannot take a path", base_url));
    }
    Ok(url)
}

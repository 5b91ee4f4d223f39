//! Session-tracking service integration.
//!
//! `client` speaks the idempotent start/end protocol; `dispatch` decides where and when
//! those calls run relative to the polling loop.

pub mod client;
pub mod dispatch;

pub use client::{
    parse_base_url, HttpSessionClient, SessionAction, SessionClient, SessionError,
    SessionOutcome, DEFAULT_API_BASE_URL, DEFAULT_API_TIMEOUT,
};
pub use dispatch::{
    DispatchMode, RetryPolicy, SessionAck, SessionDispatcher, SubmitStatus,
};

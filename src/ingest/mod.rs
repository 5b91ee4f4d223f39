//! Frame ingestion sources.
//!
//! This module provides the sources that feed the occupancy pipeline:
//! - Synthetic `stub://` streams (testing, dry runs)
//! - HTTP MJPEG/JPEG snapshot streams (feature: ingest-http)
//! - RTSP and anything else GStreamer can decode (feature: rtsp-gstreamer)
//!
//! `ReconnectingSource` wraps any `FrameSource` with the run-loop policy: a read failure
//! is logged, followed by a fixed delay, a release and a reopen. It never gives up once
//! the first connection succeeded.
//!
//! Sources MUST NOT store decoded frames to disk or log pixel content.

#[cfg(feature = "ingest-http")]
pub mod http;
pub mod reconnect;
pub mod stream;

use anyhow::Result;

use crate::frame::Frame;

#[cfg(feature = "ingest-http")]
pub use http::HttpSource;
pub use reconnect::{ReconnectingSource, SourceStats, DEFAULT_RECONNECT_DELAY};
pub use stream::{StreamConfig, StreamSource};

/// A blocking source of decoded frames.
pub trait FrameSource: Send {
    /// Open the underlying stream.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is decoded.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the underlying stream. Safe to call when not connected.
    fn disconnect(&mut self);

    /// Human-readable locator for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

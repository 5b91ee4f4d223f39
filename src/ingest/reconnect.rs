use std::time::Duration;

use super::FrameSource;
use crate::error::StartupError;
use crate::frame::Frame;
use crate::shutdown::ShutdownSignal;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Counters for the health log line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_read: u64,
    pub read_failures: u64,
    pub reconnects: u64,
}

/// Frame source with the run-loop retry policy.
///
/// The first connection happens in `open` and its failure is fatal. Afterwards every
/// failed read waits `reconnect_delay`, releases the stream and reopens it, with no
/// retry limit and no backoff growth.
pub struct ReconnectingSource<S> {
    source: S,
    reconnect_delay: Duration,
    stats: SourceStats,
}

impl<S: FrameSource> ReconnectingSource<S> {
    pub fn open(mut source: S, reconnect_delay: Duration) -> Result<Self, StartupError> {
        source.connect().map_err(|err| {
            StartupError::Stream(format!(
                "could not open video stream at {}: {:#}",
                source.describe(),
                err
            ))
        })?;
        Ok(Self {
            source,
            reconnect_delay,
            stats: SourceStats::default(),
        })
    }

    /// Block until a frame is available. Returns `None` only when shutdown is requested.
    pub fn read(&mut self, shutdown: &ShutdownSignal) -> Option<Frame> {
        loop {
            if shutdown.is_triggered() {
                return None;
            }
            match self.source.next_frame() {
                Ok(frame) => {
                    self.stats.frames_read += 1;
                    return Some(frame);
                }
                Err(err) => {
                    self.stats.read_failures += 1;
                    log::warn!(
                        "frame read from {} failed: {:#}; retrying in {:?}",
                        self.source.describe(),
                        err,
                        self.reconnect_delay
                    );
                    if shutdown.sleep(self.reconnect_delay) {
                        return None;
                    }
                    self.reconnect();
                }
            }
        }
    }

    fn reconnect(&mut self) {
        self.source.disconnect();
        match self.source.connect() {
            Ok(()) => {
                self.stats.reconnects += 1;
                log::info!("reconnected to {}", self.source.describe());
            }
            Err(err) => {
                log::warn!("reconnect to {} failed: {:#}", self.source.describe(), err);
            }
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    pub fn into_inner(mut self) -> S {
        self.source.disconnect();
        self.source
    }
}

//! Decoded video frames.
//!
//! - `Frame`: owned RGB pixel buffer handed from a frame source to the detector.
//!
//! Pixel bytes are private. The only consumer is a `DetectorBackend`, reached through
//! `Frame::run_detector`; everything downstream of detection works on boxes only.

use anyhow::{anyhow, Result};

use crate::detect::{DetectorBackend, RawDetection};

/// One decoded RGB frame (3 bytes per pixel, row-major, no padding).
pub struct Frame {
    /// Private pixel data. Not exposed outside the detector call.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Per-connection sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// Create a frame from tightly packed RGB bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    /// Run a detector on this frame. The detector sees the pixels only for the call.
    pub fn run_detector<D: DetectorBackend + ?Sized>(
        &self,
        detector: &mut D,
    ) -> Result<Vec<RawDetection>> {
        detector.detect(&self.data, self.width, self.height)
    }

    /// Raw byte length (for memory accounting in logs).
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

use anyhow::Result;

use crate::detect::result::RawDetection;

/// Detector backend trait.
///
/// Given one RGB frame, returns candidate detections with a class index, a confidence
/// score and a bounding box in frame pixel coordinates. Class indices are resolved to
/// `ObjectClass` by a `LabelMap` loaded once at startup.
///
/// Implementations must treat the pixel slice as read-only and must not retain it past
/// the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: DetectorBackend + ?Sized> DetectorBackend for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        (**self).detect(pixels, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

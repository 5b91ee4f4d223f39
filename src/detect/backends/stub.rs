use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Stub backend for tests and dry runs.
///
/// Returns a scripted list of detections per call, cycling through the script. An empty
/// script never detects anything.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    script: Vec<Vec<RawDetection>>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detections returned on successive frames, repeating once exhausted.
    pub fn scripted(script: Vec<Vec<RawDetection>>) -> Self {
        Self { script, calls: 0 }
    }

    /// The same detections on every frame.
    pub fn constant(detections: Vec<RawDetection>) -> Self {
        Self::scripted(vec![detections])
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<RawDetection>> {
        let idx = self.calls;
        self.calls += 1;
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let slot = (idx % self.script.len() as u64) as usize;
        Ok(self.script[slot].clone())
    }
}

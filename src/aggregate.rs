//! Per-frame detection aggregation.
//!
//! Filters detections to the target class above a confidence threshold, then removes
//! duplicate boxes with greedy non-max suppression.

use crate::detect::{Detection, ObjectClass};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregatorConfig {
    pub target_class: ObjectClass,
    /// Detections must score strictly above this.
    pub confidence_threshold: f32,
    /// Boxes whose IoU with a kept box is strictly above this are suppressed.
    pub nms_threshold: f32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            target_class: ObjectClass::Person,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DetectionAggregator {
    config: AggregatorConfig,
}

impl DetectionAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Deduplicated target-class boxes for one frame, highest confidence first.
    pub fn aggregate(&self, detections: &[Detection]) -> Vec<Detection> {
        let mut candidates: Vec<Detection> = detections
            .iter()
            .filter(|det| {
                det.class == self.config.target_class
                    && det.confidence > self.config.confidence_threshold
            })
            .copied()
            .collect();

        // Stable: equal scores keep input order.
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let duplicate = kept
                .iter()
                .any(|k| k.bbox.iou(&candidate.bbox) > self.config.nms_threshold);
            if !duplicate {
                kept.push(candidate);
            }
        }
        kept
    }
}

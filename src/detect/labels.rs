use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::detect::result::{Detection, ObjectClass, RawDetection};

/// COCO-80 labels in model output order.
pub const COCO_LABELS: &[&str] = &[
    "person", "bicycle", "car", "motorbike", "aeroplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "sofa", "pottedplant", "bed", "diningtable", "toilet", "tvmonitor", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Class index -> `ObjectClass`, resolved once when the label list is loaded.
#[derive(Clone, Debug)]
pub struct LabelMap {
    labels: Vec<String>,
    classes: Vec<ObjectClass>,
}

impl LabelMap {
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels: Vec<String> = labels
            .into_iter()
            .map(|label| label.as_ref().trim().to_string())
            .collect();
        if labels.is_empty() {
            return Err(anyhow!("label list is empty"));
        }
        let classes = labels
            .iter()
            .map(|label| ObjectClass::from_label(label))
            .collect();
        Ok(Self { labels, classes })
    }

    pub fn coco() -> Self {
        Self {
            labels: COCO_LABELS.iter().map(|label| label.to_string()).collect(),
            classes: COCO_LABELS
                .iter()
                .map(|label| ObjectClass::from_label(label))
                .collect(),
        }
    }

    /// Load a newline-separated label file (one label per line, model order).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        Self::from_labels(raw.trim_end_matches('\n').split('\n'))
            .with_context(|| format!("invalid label file {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    pub fn class_of(&self, class_id: usize) -> ObjectClass {
        self.classes
            .get(class_id)
            .copied()
            .unwrap_or(ObjectClass::Unknown)
    }

    pub fn resolve(&self, raw: &RawDetection) -> Detection {
        Detection {
            bbox: raw.bbox,
            confidence: raw.confidence,
            class: self.class_of(raw.class_id),
        }
    }

    pub fn resolve_all(&self, raw: &[RawDetection]) -> Vec<Detection> {
        raw.iter().map(|det| self.resolve(det)).collect()
    }
}

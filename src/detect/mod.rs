mod backend;
mod backends;
mod labels;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{LabelMap, COCO_LABELS};
pub use yolo::ScoreLayout;
pub use result::{BoundingBox, Detection, ObjectClass, RawDetection};

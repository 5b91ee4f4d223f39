use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in frame pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Area shared by both rectangles. Zero when they only touch or are disjoint.
    pub fn intersection_area(&self, other: &Self) -> f32 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        w * h
    }

    /// True unless the rectangles are strictly apart. Shared edges and corners count.
    pub fn touches_or_overlaps(&self, other: &Self) -> bool {
        !(self.right() < other.x
            || self.x > other.right()
            || self.bottom() < other.y
            || self.y > other.bottom())
    }

    /// Intersection over union, in `[0, 1]`.
    pub fn iou(&self, other: &Self) -> f32 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Detector output before label resolution: class index, score, box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Detection with a resolved object class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: ObjectClass,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Package,
    Unknown,
}

impl ObjectClass {
    /// Coarse class for a detector label (COCO naming).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "person" => ObjectClass::Person,
            "bicycle" | "car" | "motorbike" | "motorcycle" | "aeroplane" | "airplane" | "bus"
            | "train" | "truck" | "boat" => ObjectClass::Vehicle,
            "bird" | "cat" | "dog" | "horse" | "sheep" | "cow" | "elephant" | "bear"
            | "zebra" | "giraffe" => ObjectClass::Animal,
            "backpack" | "handbag" | "suitcase" => ObjectClass::Package,
            _ => ObjectClass::Unknown,
        }
    }
}

impl std::str::FromStr for ObjectClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" => Ok(ObjectClass::Person),
            "vehicle" => Ok(ObjectClass::Vehicle),
            "animal" => Ok(ObjectClass::Animal),
            "package" => Ok(ObjectClass::Package),
            other => Err(anyhow::anyhow!("unknown object class '{}'", other)),
        }
    }
}

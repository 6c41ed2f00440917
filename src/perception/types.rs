use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use crate::perception::geometry::{Bounds, Point, Polygon};

/// Immutable snapshot of the screen. Clones share the pixel buffer.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub image: Arc<RgbImage>,
    pub captured_at: DateTime<Utc>,
}

impl ScreenFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn center(&self) -> Point {
        Point::new(self.width() as i32 / 2, self.height() as i32 / 2)
    }
}

/// Outcome of one template lookup. `location` is only set when the
/// confidence cleared the requested threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub location: Option<Point>,
    pub confidence: f32,
}

impl DetectionResult {
    pub const NONE: DetectionResult = DetectionResult {
        location: None,
        confidence: 0.0,
    };

    pub fn found(&self) -> bool {
        self.location.is_some()
    }
}

/// Axis-aligned match box, top-left plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl MatchBox {
    pub fn center(&self) -> Point {
        Point::new(
            (self.x + self.width / 2) as i32,
            (self.y + self.height / 2) as i32,
        )
    }

    pub fn overlaps(&self, other: &MatchBox) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldGeometry {
    pub center: Point,
    pub boundary: Polygon,
}

/// Everything the detection task derives from one frame.
#[derive(Debug, Clone, Default)]
pub struct FieldObservation {
    pub field: Option<FieldGeometry>,
    pub coverage: f32,
    pub ready_for_harvest: bool,
    pub silo_popup: bool,
}

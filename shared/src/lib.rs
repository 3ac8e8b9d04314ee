use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use uuid::Uuid;

/// One message pushed to a client over a task stream.
///
/// Serialized as a JSON object whose `type` field names the variant, e.g.
/// `{"type":"update","id":0,"score":0.913}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamEvent {
    Caption { caption: String },
    Status { message: String },
    Candidates { candidates: Vec<CandidateThumbnail> },
    Update { id: usize, score: f32 },
    Done,
    Error { message: String },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateThumbnail {
    pub id: usize,
    /// Base64-encoded PNG.
    pub thumbnail: String,
}

/// Rectangle in pixel coordinates. A zero width or height selects the whole image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionOfInterest {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_full_image(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Detector box as `[x_min, y_min, x_max, y_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x_min, b.y_min, b.x_max, b.y_max]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub id: usize,
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub detections: Vec<DetectedRegion>,
    /// Base64-encoded PNG of the target image with every box outlined.
    pub annotated_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

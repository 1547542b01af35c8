use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Review status of a detection.
///
/// `Model` detections form the candidate pool, `Active` ones were picked by the
/// outlier miner and wait for a human, `User` ones carry a confirmed label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Model,
    Active,
    User,
}

impl DetectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionKind::Model => "model",
            DetectionKind::Active => "active",
            DetectionKind::User => "user",
        }
    }
}

impl From<DetectionKind> for String {
    fn from(kind: DetectionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for DetectionKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "model" => Ok(DetectionKind::Model),
            "active" => Ok(DetectionKind::Active),
            "user" => Ok(DetectionKind::User),
            _ => Err(format!("Invalid detection kind: {}", value)),
        }
    }
}

impl std::str::FromStr for DetectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectionKind::try_from(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Detection {
    pub id: String,
    pub image_path: String,
    pub category_id: Option<i64>,
    pub kind: String,

    pub bbox_x: Option<f64>,
    pub bbox_y: Option<f64>,
    pub bbox_w: Option<f64>,
    pub bbox_h: Option<f64>,
    pub confidence: Option<f64>,

    #[serde(skip_serializing)]
    pub embedding: Option<String>, // Base64 encoded embedding

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Detection record as produced by the detector + embedding pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDetection {
    pub id: String,
    pub image_path: String,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Normalized `[x, y, w, h]` box.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// A pool member handed to the outlier miner.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub image_path: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelAssignment {
    pub detection_id: String,
    pub category_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MiningRun {
    pub id: String,
    pub target: i64,
    pub status: String,
    pub iterations: i64,
    pub selected_count: i64,
    pub transitioned_count: i64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionStats {
    pub model: i64,
    pub active: i64,
    pub user: i64,
    pub categories: i64,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gaze::{FaceBox, GazeEstimate};

/// Coarse attention label derived from one observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLabel {
    Focused,
    LookingAway,
    /// A face was found but no usable eye landmarks.
    FaceOnly,
    Absent,
}

impl ActivityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLabel::Focused => "focused",
            ActivityLabel::LookingAway => "looking_away",
            ActivityLabel::FaceOnly => "face_only",
            ActivityLabel::Absent => "absent",
        }
    }

    pub fn is_focus(&self) -> bool {
        matches!(self, ActivityLabel::Focused)
    }

    pub fn is_distraction(&self) -> bool {
        matches!(self, ActivityLabel::LookingAway | ActivityLabel::Absent)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    Left,
    Right,
    Up,
    Down,
    Center,
}

/// Latest per-session measurement. Stored with an expiry and never deleted
/// explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub gaze: Option<GazeEstimate>,
    pub face: Option<FaceBox>,
    pub activity: Option<ActivityLabel>,
    pub direction: Option<GazeDirection>,
}

//! Per-frame estimation results shared by the vision and tracking layers.

use serde::{Deserialize, Serialize};

/// Axis-aligned face rectangle in source-frame pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IrisPair {
    pub left: PixelPoint,
    pub right: PixelPoint,
}

/// Normalized gaze ratios.
///
/// `horizontal` is in `[-1, 1]` with 0 centered; `vertical` is in `[0, 1]`
/// where 0 is looking up, 1 looking down and 0.5 centered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GazeEstimate {
    pub horizontal: f64,
    pub vertical: f64,
    pub eyes: IrisPair,
}

/// Result of running the estimator on one frame. Either field may be absent
/// independently of the other.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub face: Option<FaceBox>,
    pub gaze: Option<GazeEstimate>,
}

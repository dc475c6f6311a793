use image::RgbImage;

use crate::{
    models::{GazeEstimate, IrisPair, Observation, PixelPoint},
    settings::DetectorSettings,
};

use super::detector::{FaceDetector, FaceLandmarks, LandmarkExtractor, PupilLandmarker, SkinToneDetector};

fn sub(a: PixelPoint, b: PixelPoint) -> (f64, f64) {
    (a.x - b.x, a.y - b.y)
}

fn distance(a: PixelPoint, b: PixelPoint) -> f64 {
    let (dx, dy) = sub(a, b);
    dx.hypot(dy)
}

/// Rounds to 3 decimals for transport.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Projection of the iris onto the inner → outer canthus axis, mapped so the
/// inner corner is -1 and the outer corner is +1. A zero-length axis yields 0.
pub fn normalized_horizontal(iris: PixelPoint, inner: PixelPoint, outer: PixelPoint) -> f64 {
    let (ax, ay) = sub(outer, inner);
    let length_sq = ax * ax + ay * ay;
    if length_sq == 0.0 || !length_sq.is_finite() {
        return 0.0;
    }
    let (ix, iy) = sub(iris, inner);
    let value = 2.0 * (ix * ax + iy * ay) / length_sq - 1.0;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Iris-to-upper-lid distance over the lid opening. Closed or degenerate lids
/// yield 0.5.
pub fn vertical_ratio(iris: PixelPoint, upper: PixelPoint, lower: PixelPoint) -> f64 {
    let opening = distance(upper, lower);
    if opening == 0.0 || !opening.is_finite() {
        return 0.5;
    }
    let value = distance(iris, upper) / opening;
    if value.is_finite() {
        value
    } else {
        0.5
    }
}

/// Horizontal comes from the image-left eye alone; vertical is the mean of
/// both eyes.
pub fn gaze_from_landmarks(landmarks: &FaceLandmarks) -> GazeEstimate {
    let FaceLandmarks { left, right } = landmarks;

    let horizontal = normalized_horizontal(left.iris, left.inner, left.outer);
    let vertical = (vertical_ratio(left.iris, left.upper, left.lower)
        + vertical_ratio(right.iris, right.upper, right.lower))
        / 2.0;

    GazeEstimate {
        horizontal: round3(horizontal.clamp(-1.0, 1.0)),
        vertical: round3(vertical.clamp(0.0, 1.0)),
        eyes: IrisPair {
            left: left.iris,
            right: right.iris,
        },
    }
}

pub struct GazeEstimator {
    detector: Box<dyn FaceDetector>,
    landmarks: Box<dyn LandmarkExtractor>,
}

impl GazeEstimator {
    pub fn new(detector: Box<dyn FaceDetector>, landmarks: Box<dyn LandmarkExtractor>) -> Self {
        Self { detector, landmarks }
    }

    /// Built-in skin-tone face detector and dark-pupil landmarker.
    pub fn with_builtin(settings: &DetectorSettings) -> Self {
        Self::new(
            Box::new(SkinToneDetector::new(settings.clone())),
            Box::new(PupilLandmarker::new(settings.clone())),
        )
    }

    /// Face box and gaze are found independently; either may be absent.
    pub fn estimate(&self, frame: &RgbImage) -> Observation {
        let face = self.detector.detect(frame);
        let gaze = self.landmarks.extract(frame).map(|l| gaze_from_landmarks(&l));
        Observation { face, gaze }
    }
}

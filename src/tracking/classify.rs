use crate::{
    models::{ActivityLabel, GazeDirection, GazeEstimate, Observation},
    settings::AttentionThresholds,
};

pub fn classify(observation: &Observation, thresholds: &AttentionThresholds) -> ActivityLabel {
    match (&observation.face, &observation.gaze) {
        (_, Some(gaze)) => {
            if direction(gaze, thresholds) == GazeDirection::Center {
                ActivityLabel::Focused
            } else {
                ActivityLabel::LookingAway
            }
        }
        (Some(_), None) => ActivityLabel::FaceOnly,
        (None, None) => ActivityLabel::Absent,
    }
}

/// Coarse direction from the subject's point of view. Horizontal deviation
/// wins over vertical.
pub fn direction(gaze: &GazeEstimate, thresholds: &AttentionThresholds) -> GazeDirection {
    if gaze.horizontal < -thresholds.max_abs_horizontal {
        GazeDirection::Left
    } else if gaze.horizontal > thresholds.max_abs_horizontal {
        GazeDirection::Right
    } else if gaze.vertical < thresholds.min_vertical {
        GazeDirection::Up
    } else if gaze.vertical > thresholds.max_vertical {
        GazeDirection::Down
    } else {
        GazeDirection::Center
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FaceBox, IrisPair, PixelPoint};

    fn gaze(horizontal: f64, vertical: f64) -> GazeEstimate {
        let origin = PixelPoint { x: 0.0, y: 0.0 };
        GazeEstimate {
            horizontal,
            vertical,
            eyes: IrisPair {
                left: origin,
                right: origin,
            },
        }
    }

    fn face() -> Option<FaceBox> {
        Some(FaceBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        })
    }

    #[test]
    fn labels_follow_what_was_found() {
        let thresholds = AttentionThresholds::default();
        let centered = Observation {
            face: face(),
            gaze: Some(gaze(0.0, 0.5)),
        };
        let sideways = Observation {
            face: face(),
            gaze: Some(gaze(0.9, 0.5)),
        };
        let face_only = Observation {
            face: face(),
            gaze: None,
        };

        assert_eq!(classify(&centered, &thresholds), ActivityLabel::Focused);
        assert_eq!(classify(&sideways, &thresholds), ActivityLabel::LookingAway);
        assert_eq!(classify(&face_only, &thresholds), ActivityLabel::FaceOnly);
        assert_eq!(classify(&Observation::default(), &thresholds), ActivityLabel::Absent);
    }

    #[test]
    fn direction_buckets() {
        let t = AttentionThresholds::default();
        assert_eq!(direction(&gaze(-0.5, 0.5), &t), GazeDirection::Left);
        assert_eq!(direction(&gaze(0.5, 0.1), &t), GazeDirection::Right);
        assert_eq!(direction(&gaze(0.1, 0.1), &t), GazeDirection::Up);
        assert_eq!(direction(&gaze(0.1, 0.95), &t), GazeDirection::Down);
        assert_eq!(direction(&gaze(0.35, 0.8), &t), GazeDirection::Center);
    }
}

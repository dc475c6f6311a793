pub mod decode;
pub mod detector;
pub mod gaze;
pub mod phash;

pub use decode::{decode_frame, FrameError};
pub use detector::{FaceDetector, FaceLandmarks, LandmarkExtractor, PupilLandmarker, SkinToneDetector};
pub use gaze::GazeEstimator;
pub use phash::FrameHasher;

pub mod activity;
pub mod gaze;
pub mod session;

pub use activity::{ActivityLabel, ActivityRecord, GazeDirection};
pub use gaze::{FaceBox, GazeEstimate, IrisPair, Observation, PixelPoint};
pub use session::{Session, SessionFilter, SessionReport, SessionStatus, SessionSummary};

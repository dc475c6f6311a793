pub mod lifecycle;
pub mod report;

pub use lifecycle::{SessionLifecycle, SessionStarted};
pub use report::build_report;

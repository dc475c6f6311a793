pub mod classify;
pub mod controller;
pub mod loop_worker;

pub use classify::{classify, direction};
pub use controller::{StreamGuard, TrackingController};
pub use loop_worker::{tracking_loop, FrameSlot, Inbound, StreamContext, StreamEnd, TrackingMessage};

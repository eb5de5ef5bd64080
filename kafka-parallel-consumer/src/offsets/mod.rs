pub mod controller;
pub mod tracker;

pub use controller::{OffsetCommand, OffsetController};
pub use tracker::OffsetTracker;

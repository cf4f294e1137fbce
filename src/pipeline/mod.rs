pub mod control;
pub mod readout;
pub mod stats;
pub mod timing;

pub use control::{ControlSlot, ControlSnapshot};
pub use readout::{CapturedFrame, Publish, ReadoutSlot};
pub use stats::{SensorMetrics, SensorStats};
pub use timing::Nsecs;

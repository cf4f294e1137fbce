pub mod buffer;
pub mod dispatch;

pub use buffer::{BufferHandle, Buffers, DataSpace, HalPixelFormat, StreamBuffer};
pub use dispatch::{CaptureDispatch, DispatchSummary, SensorState};

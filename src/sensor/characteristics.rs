//! Static capabilities the emulated sensor reports to the metadata layer

use crate::pipeline::timing::Nsecs;

/// 1 us - 0.3 s
pub const EXPOSURE_TIME_RANGE: [Nsecs; 2] = [1_000, 300_000_000];
/// ~1/30 s - 0.3 s
pub const FRAME_DURATION_RANGE: [Nsecs; 2] = [33_331_760, 300_000_000];
pub const MIN_VERTICAL_BLANK: Nsecs = 10_000;

pub const SENSITIVITY_RANGE: [i32; 2] = [100, 1600];
pub const DEFAULT_SENSITIVITY: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCharacteristics {
    pub pixel_array_width: u32,
    pub pixel_array_height: u32,
    pub active_array: Rect,
}

impl SensorCharacteristics {
    /// The whole pixel array is active.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixel_array_width: width,
            pixel_array_height: height,
            active_array: Rect {
                left: 0,
                top: 0,
                width,
                height,
            },
        }
    }

    pub fn exposure_time_range(&self) -> [Nsecs; 2] {
        EXPOSURE_TIME_RANGE
    }

    pub fn frame_duration_range(&self) -> [Nsecs; 2] {
        FRAME_DURATION_RANGE
    }

    pub fn sensitivity_range(&self) -> [i32; 2] {
        SENSITIVITY_RANGE
    }

    /// Longest exposure that still leaves the minimum blanking interval
    pub fn max_exposure_for(&self, frame_duration: Nsecs) -> Nsecs {
        let [min, max] = EXPOSURE_TIME_RANGE;
        (frame_duration - MIN_VERTICAL_BLANK).clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_array_covers_pixel_array() {
        let c = SensorCharacteristics::new(1280, 720);
        assert_eq!(
            c.active_array,
            Rect {
                left: 0,
                top: 0,
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn exposure_leaves_vertical_blank() {
        let c = SensorCharacteristics::new(640, 480);
        assert_eq!(c.max_exposure_for(33_331_760), 33_321_760);
        assert_eq!(c.max_exposure_for(1_000_000_000), 300_000_000);
    }
}

//! Sensor clock and frame pacing

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Nanoseconds on the monotonic clock
pub type Nsecs = i64;

pub const NSECS_PER_SEC: Nsecs = 1_000_000_000;

/// Frames finishing this close to their deadline are not slept
pub const TIME_ACCURACY: Nsecs = 2_000_000;

/// Current `CLOCK_MONOTONIC` time, the timebase of every sensor timestamp.
pub fn system_time() -> Nsecs {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is always available on Linux.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as Nsecs * NSECS_PER_SEC + ts.tv_nsec as Nsecs
}

/// Sleep until `deadline`, resuming after early wake-ups until the full
/// interval has elapsed.
pub fn sleep_until(deadline: Nsecs) {
    loop {
        let remaining = deadline - system_time();
        if remaining <= 0 {
            return;
        }
        std::thread::sleep(Duration::from_nanos(remaining as u64));
    }
}

/// Vertical blanking: sleep out the rest of the frame unless the work already
/// landed within [`TIME_ACCURACY`] of `frame_end`. Returns whether it slept.
pub fn pace_to_frame_end(frame_end: Nsecs) -> bool {
    if system_time() < frame_end - TIME_ACCURACY {
        sleep_until(frame_end);
        true
    } else {
        false
    }
}

/// Sliding window of recent iteration periods
pub struct FramePeriodHistory {
    ring: HeapRb<Nsecs>,
}

impl FramePeriodHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    pub fn record(&mut self, period: Nsecs) {
        self.ring.push_overwrite(period);
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn average(&self) -> Option<Nsecs> {
        let len = self.ring.occupied_len();
        if len == 0 {
            return None;
        }
        let sum: i128 = self.ring.iter().map(|&p| p as i128).sum();
        Some((sum / len as i128) as Nsecs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = system_time();
        let b = system_time();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn sleep_until_reaches_deadline() {
        let deadline = system_time() + 5_000_000;
        sleep_until(deadline);
        assert!(system_time() >= deadline);
    }

    #[test]
    fn no_sleep_inside_accuracy_window() {
        let start = system_time();
        assert!(!pace_to_frame_end(start + TIME_ACCURACY / 2));
        assert!(!pace_to_frame_end(start - NSECS_PER_SEC));
    }

    #[test]
    fn pacing_sleeps_to_frame_end() {
        let frame_end = system_time() + 20_000_000;
        assert!(pace_to_frame_end(frame_end));
        assert!(system_time() >= frame_end);
    }

    #[test]
    fn history_keeps_latest_periods() {
        let mut history = FramePeriodHistory::new(3);
        assert_eq!(history.average(), None);

        for period in [100, 200, 300, 400] {
            history.record(period);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.average(), Some(300));
    }
}

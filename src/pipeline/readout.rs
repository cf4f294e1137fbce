//! One-slot handoff of captured frames from the sensor worker to a consumer

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use super::timing::Nsecs;
use crate::capture::Buffers;

/// A filled buffer set and the time its exposure started
#[derive(Debug)]
pub struct CapturedFrame {
    pub buffers: Buffers,
    pub capture_time: Nsecs,
    pub frame_number: u32,
}

/// Result of handing a frame to the slot
#[derive(Debug)]
pub enum Publish {
    /// Stored; `stalled` when the worker had to wait for the consumer
    Published { stalled: bool },
    /// The slot was closed while waiting; the frame is returned unpublished
    Abandoned(CapturedFrame),
}

struct ReadoutState {
    captured: Option<CapturedFrame>,
    closed: bool,
}

pub struct ReadoutSlot {
    state: Mutex<ReadoutState>,
    available: Condvar,
    complete: Condvar,
}

impl ReadoutSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReadoutState {
                captured: None,
                closed: false,
            }),
            available: Condvar::new(),
            complete: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReadoutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer side. Waits without a deadline while the previous frame is
    /// still uncollected, so no frame is ever dropped.
    pub fn publish(&self, frame: CapturedFrame) -> Publish {
        let mut state = self.lock();
        let stalled = state.captured.is_some() && !state.closed;
        if stalled {
            debug!("waiting for readout consumer to catch up");
        }
        state = self
            .complete
            .wait_while(state, |s| s.captured.is_some() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Publish::Abandoned(frame);
        }

        trace!(capture_time = frame.capture_time, "readout available");
        state.captured = Some(frame);
        self.available.notify_all();
        Publish::Published { stalled }
    }

    /// Consumer side. Takes the pending frame, waiting up to `timeout` for one.
    pub fn wait_for_new_frame(&self, timeout: Duration) -> Option<CapturedFrame> {
        let state = self.lock();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.captured.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        let frame = state.captured.take()?;
        self.complete.notify_all();
        Some(frame)
    }

    pub fn is_full(&self) -> bool {
        self.lock().captured.is_some()
    }

    /// Wake a blocked producer and refuse further frames. Any uncollected
    /// frame is dropped.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        if state.captured.take().is_some() {
            debug!("abandoning uncollected readout");
        }
        self.complete.notify_all();
    }

    pub fn reopen(&self) {
        let mut state = self.lock();
        state.closed = false;
        state.captured = None;
    }
}

impl Default for ReadoutSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame(capture_time: Nsecs) -> CapturedFrame {
        CapturedFrame {
            buffers: Buffers::new(),
            capture_time,
            frame_number: capture_time as u32,
        }
    }

    #[test]
    fn empty_slot_times_out() {
        let slot = ReadoutSlot::new();
        let start = Instant::now();
        assert!(slot.wait_for_new_frame(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn published_frame_is_taken_once() {
        let slot = ReadoutSlot::new();
        assert!(matches!(
            slot.publish(frame(42)),
            Publish::Published { stalled: false }
        ));
        assert!(slot.is_full());

        let got = slot.wait_for_new_frame(Duration::ZERO).unwrap();
        assert_eq!(got.capture_time, 42);
        assert!(!slot.is_full());
        assert!(slot.wait_for_new_frame(Duration::ZERO).is_none());
    }

    #[test]
    fn consumer_wakes_on_publish() {
        let slot = Arc::new(ReadoutSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                slot.publish(frame(7));
            })
        };
        let got = slot.wait_for_new_frame(Duration::from_secs(1));
        assert_eq!(got.map(|f| f.capture_time), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn producer_blocks_until_consumer_drains() {
        let slot = Arc::new(ReadoutSlot::new());
        slot.publish(frame(1));

        let producer = {
            let slot = slot.clone();
            thread::spawn(move || slot.publish(frame(2)))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(
            slot.wait_for_new_frame(Duration::ZERO).map(|f| f.capture_time),
            Some(1)
        );
        assert!(matches!(
            producer.join().unwrap(),
            Publish::Published { stalled: true }
        ));
        assert_eq!(
            slot.wait_for_new_frame(Duration::from_secs(1)).map(|f| f.capture_time),
            Some(2)
        );
    }

    #[test]
    fn close_releases_blocked_producer() {
        let slot = Arc::new(ReadoutSlot::new());
        slot.publish(frame(1));

        let producer = {
            let slot = slot.clone();
            thread::spawn(move || slot.publish(frame(2)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();

        match producer.join().unwrap() {
            Publish::Abandoned(f) => assert_eq!(f.capture_time, 2),
            other => panic!("expected abandoned frame, got {other:?}"),
        }
        assert!(slot.wait_for_new_frame(Duration::ZERO).is_none());

        slot.reopen();
        assert!(matches!(slot.publish(frame(3)), Publish::Published { .. }));
    }
}

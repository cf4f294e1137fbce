//! Control slot: parameters for the next sensor iteration, and the VSync gate

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{trace, warn};

use super::timing::Nsecs;
use crate::capture::Buffers;
use crate::sensor::characteristics::FRAME_DURATION_RANGE;
use crate::sensor::listener::SensorListener;

struct ControlState {
    frame_duration: Nsecs,
    next_buffers: Option<Buffers>,
    frame_number: u32,
    listener: Option<Arc<dyn SensorListener>>,
    got_vsync: bool,
}

/// What the worker reads at the top of an iteration
pub struct ControlSnapshot {
    pub frame_duration: Nsecs,
    pub buffers: Option<Buffers>,
    pub frame_number: u32,
    pub listener: Option<Arc<dyn SensorListener>>,
}

/// Mailbox written by any thread and drained once per iteration by the worker.
/// The same mutex guards the VSync condition.
pub struct ControlSlot {
    state: Mutex<ControlState>,
    vsync: Condvar,
}

/// Clamp a requested frame period to what the sensor can produce.
pub fn clamp_frame_duration(ns: Nsecs) -> Nsecs {
    let [min, max] = FRAME_DURATION_RANGE;
    ns.clamp(min, max)
}

impl ControlSlot {
    pub fn new(frame_duration: Nsecs) -> Self {
        Self {
            state: Mutex::new(ControlState {
                frame_duration: clamp_frame_duration(frame_duration),
                next_buffers: None,
                frame_number: 0,
                listener: None,
                got_vsync: false,
            }),
            vsync: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_frame_duration(&self, ns: Nsecs) {
        let clamped = clamp_frame_duration(ns);
        if clamped != ns {
            warn!(requested = ns, clamped, "frame duration out of range");
        }
        trace!("frame duration set to {:.3} ms", clamped as f64 / 1_000_000.0);
        self.lock().frame_duration = clamped;
    }

    pub fn frame_duration(&self) -> Nsecs {
        self.lock().frame_duration
    }

    /// Install the buffers for the next iteration. A set that was installed
    /// earlier and never picked up is handed back.
    pub fn set_destination_buffers(&self, buffers: Buffers) -> Option<Buffers> {
        let displaced = self.lock().next_buffers.replace(buffers);
        if displaced.is_some() {
            warn!("destination buffers replaced before the sensor picked them up");
        }
        displaced
    }

    pub fn set_frame_number(&self, frame_number: u32) {
        self.lock().frame_number = frame_number;
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn SensorListener>>) {
        self.lock().listener = listener;
    }

    /// Block until the next VSync pulse or until `timeout` elapses.
    pub fn wait_for_vsync(&self, timeout: Duration) -> bool {
        let mut state = self.lock();
        state.got_vsync = false;
        let (state, _) = self
            .vsync
            .wait_timeout_while(state, timeout, |s| !s.got_vsync)
            .unwrap_or_else(PoisonError::into_inner);
        state.got_vsync
    }

    /// Worker side: copy the parameters, take the pending buffers so they
    /// are never reused, and raise VSync.
    pub fn snapshot_and_vsync(&self) -> ControlSnapshot {
        let mut state = self.lock();
        let snapshot = ControlSnapshot {
            frame_duration: state.frame_duration,
            buffers: state.next_buffers.take(),
            frame_number: state.frame_number,
            listener: state.listener.clone(),
        };
        trace!("sensor vsync");
        state.got_vsync = true;
        self.vsync.notify_all();
        snapshot
    }
}

//! Sensor event notifications

use flume::{Receiver, Sender};
use tracing::trace;

use crate::pipeline::timing::Nsecs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorEvent {
    /// Exposure of a submitted request began at the given timestamp
    ExposureStart,
}

/// Receives sensor events on the worker thread.
///
/// Implementations must return quickly and must not call back into the
/// sensor's control surface.
pub trait SensorListener: Send + Sync {
    fn on_sensor_event(&self, frame_number: u32, event: SensorEvent, timestamp: Nsecs);
}

impl<F> SensorListener for F
where
    F: Fn(u32, SensorEvent, Nsecs) + Send + Sync,
{
    fn on_sensor_event(&self, frame_number: u32, event: SensorEvent, timestamp: Nsecs) {
        self(frame_number, event, timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorNotification {
    pub frame_number: u32,
    pub event: SensorEvent,
    pub timestamp: Nsecs,
}

/// Forwards events to a channel so they can be consumed off the worker thread
pub struct ChannelListener {
    tx: Sender<SensorNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<SensorNotification>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl SensorListener for ChannelListener {
    fn on_sensor_event(&self, frame_number: u32, event: SensorEvent, timestamp: Nsecs) {
        let notification = SensorNotification {
            frame_number,
            event,
            timestamp,
        };
        if self.tx.send(notification).is_err() {
            trace!(frame_number, "listener channel closed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_listener_forwards_events() {
        let (listener, rx) = ChannelListener::new();
        listener.on_sensor_event(4, SensorEvent::ExposureStart, 1_000);

        assert_eq!(
            rx.try_recv().unwrap(),
            SensorNotification {
                frame_number: 4,
                event: SensorEvent::ExposureStart,
                timestamp: 1_000,
            }
        );
    }

    #[test]
    fn closures_are_listeners() {
        let seen = std::sync::Mutex::new(Vec::new());
        let listener = |n: u32, _: SensorEvent, t: Nsecs| seen.lock().unwrap().push((n, t));
        listener.on_sensor_event(1, SensorEvent::ExposureStart, 10);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 10)]);
    }
}

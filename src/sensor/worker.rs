//! The sensor loop: one iteration per simulated frame

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, trace};

use super::listener::SensorEvent;
use super::Exchange;
use crate::capture::CaptureDispatch;
use crate::pipeline::readout::{CapturedFrame, Publish};
use crate::pipeline::timing::{pace_to_frame_end, system_time, FramePeriodHistory, Nsecs};
use crate::upstream::UpstreamClient;

/// Iterations averaged for the reported frame period
const PERIOD_HISTORY_LEN: usize = 120;

pub(crate) struct SensorWorker<C> {
    exchange: Arc<Exchange>,
    dispatch: Arc<Mutex<CaptureDispatch<C>>>,
    exit: Arc<AtomicBool>,
    /// Captured last iteration, read out at the start of the next one
    next_captured: Option<CapturedFrame>,
    history: FramePeriodHistory,
    last_start: Option<Nsecs>,
}

impl<C: UpstreamClient> SensorWorker<C> {
    pub(crate) fn new(
        exchange: Arc<Exchange>,
        dispatch: Arc<Mutex<CaptureDispatch<C>>>,
        exit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            exchange,
            dispatch,
            exit,
            next_captured: None,
            history: FramePeriodHistory::new(PERIOD_HISTORY_LEN),
            last_start: None,
        }
    }

    pub(crate) fn run(mut self) {
        info!("sensor worker running");
        while !self.exit.load(Ordering::Acquire) {
            self.iterate();
        }
        if let Some(frame) = self.next_captured.take() {
            debug!(
                frame_number = frame.frame_number,
                "dropping capture that was never read out"
            );
        }
        info!("sensor worker exited");
    }

    /// Stages run out of order within an iteration but in order across time:
    /// what is captured now is read out one iteration later.
    fn iterate(&mut self) {
        let snapshot = self.exchange.control.snapshot_and_vsync();

        let start = system_time();
        let frame_end = start + snapshot.frame_duration;

        if let Some(frame) = self.next_captured.take() {
            trace!(frame_number = frame.frame_number, "sensor readout");
            match self.exchange.readout.publish(frame) {
                Publish::Published { stalled } => self.exchange.stats.readout_published(stalled),
                Publish::Abandoned(frame) => {
                    debug!(frame_number = frame.frame_number, "readout abandoned on shutdown")
                }
            }
        }

        let capture_time = system_time();
        if let Some(mut buffers) = snapshot.buffers {
            if let Some(listener) = &snapshot.listener {
                listener.on_sensor_event(
                    snapshot.frame_number,
                    SensorEvent::ExposureStart,
                    capture_time,
                );
            }
            self.exchange.stats.exposure_started();

            let summary = self
                .dispatch
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .capture(&mut buffers);
            self.exchange
                .stats
                .buffers_dispatched(summary.skipped, summary.upstream_failures);
            trace!(frame_number = snapshot.frame_number, ?summary, "frame captured");

            self.next_captured = Some(CapturedFrame {
                buffers,
                capture_time,
                frame_number: snapshot.frame_number,
            });
        }

        trace!("sensor vertical blanking interval");
        pace_to_frame_end(frame_end);

        let end = system_time();
        if let Some(previous) = self.last_start.replace(start) {
            self.history.record(start - previous);
        }
        self.exchange
            .stats
            .frame_finished(end - start, self.history.average());
        trace!(
            "frame cycle took {} ms, target {} ms",
            (end - start) / 1_000_000,
            snapshot.frame_duration / 1_000_000
        );
    }
}

//! Emulated camera sensor backed by a host webcam.
//!
//! A dedicated worker runs one iteration per frame period. Each iteration
//! raises VSync, hands the previous iteration's capture to the readout slot
//! and fills the buffers submitted for this iteration from the upstream
//! source. Foreign threads drive it through [`SensorControl`].

pub mod characteristics;
pub mod listener;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use crate::capture::{Buffers, CaptureDispatch, SensorState};
use crate::error::SensorError;
use crate::pipeline::{CapturedFrame, ControlSlot, Nsecs, ReadoutSlot, SensorMetrics, SensorStats};
use crate::upstream::UpstreamClient;
use crate::utils;
use crate::SensorConfig;

pub use characteristics::SensorCharacteristics;
pub use listener::{ChannelListener, SensorEvent, SensorListener, SensorNotification};

use worker::SensorWorker;

/// State shared between the worker and every control handle
pub(crate) struct Exchange {
    pub(crate) control: ControlSlot,
    pub(crate) readout: ReadoutSlot,
    pub(crate) stats: SensorStats,
}

/// Control surface for the request-assembly layer. Cheap to clone and
/// usable from any thread.
#[derive(Clone)]
pub struct SensorControl {
    exchange: Arc<Exchange>,
}

impl SensorControl {
    /// Takes effect on the next iteration. Values outside
    /// [`characteristics::FRAME_DURATION_RANGE`] are clamped.
    pub fn set_frame_duration(&self, ns: Nsecs) {
        self.exchange.control.set_frame_duration(ns);
    }

    /// Buffers to fill on the next iteration. Returns a previously installed
    /// set that no iteration picked up.
    pub fn set_destination_buffers(&self, buffers: Buffers) -> Option<Buffers> {
        self.exchange.control.set_destination_buffers(buffers)
    }

    /// Frame number reported with the next iteration's exposure start.
    pub fn set_frame_number(&self, frame_number: u32) {
        self.exchange.control.set_frame_number(frame_number);
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn SensorListener>>) {
        self.exchange.control.set_listener(listener);
    }

    /// True iff a VSync pulse arrived before `timeout`.
    pub fn wait_for_vsync(&self, timeout: Duration) -> bool {
        self.exchange.control.wait_for_vsync(timeout)
    }

    /// Collect the next read-out frame, waiting up to `timeout`.
    pub fn wait_for_new_frame(&self, timeout: Duration) -> Option<CapturedFrame> {
        self.exchange.readout.wait_for_new_frame(timeout)
    }

    pub fn metrics(&self) -> SensorMetrics {
        self.exchange.stats.snapshot()
    }
}

/// Owns the sensor worker and the upstream device.
///
/// `start_up` and `shut_down` belong to one supervisor; everything else goes
/// through [`SensorControl`].
pub struct Sensor<C: UpstreamClient + 'static> {
    device_name: String,
    characteristics: SensorCharacteristics,
    control: SensorControl,
    dispatch: Arc<Mutex<CaptureDispatch<C>>>,
    exit: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    pin_core: Option<usize>,
}

impl<C: UpstreamClient + 'static> Sensor<C> {
    pub fn new(device_name: impl Into<String>, width: u32, height: u32, client: C) -> Self {
        let device_name = device_name.into();
        debug!(device = %device_name, width, height, "sensor created");
        Self {
            characteristics: SensorCharacteristics::new(width, height),
            control: SensorControl {
                exchange: Arc::new(Exchange {
                    control: ControlSlot::new(characteristics::FRAME_DURATION_RANGE[0]),
                    readout: ReadoutSlot::new(),
                    stats: SensorStats::new(),
                }),
            },
            dispatch: Arc::new(Mutex::new(CaptureDispatch::new(device_name.clone(), client))),
            exit: Arc::new(AtomicBool::new(false)),
            worker: None,
            pin_core: None,
            device_name,
        }
    }

    pub fn from_config(config: &SensorConfig, client: C) -> Self {
        let sensor = Self::new(config.device_name.clone(), config.width, config.height, client);
        sensor.set_frame_duration(config.frame_duration_ns);
        sensor.with_pin_core(config.pin_core)
    }

    /// Pin the worker thread to a CPU core when it starts
    pub fn with_pin_core(mut self, core: Option<usize>) -> Self {
        self.pin_core = core;
        self
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn characteristics(&self) -> &SensorCharacteristics {
        &self.characteristics
    }

    pub fn control(&self) -> SensorControl {
        self.control.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn state(&self) -> SensorState {
        self.dispatch().state()
    }

    fn dispatch(&self) -> MutexGuard<'_, CaptureDispatch<C>> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker and connect to the upstream device.
    ///
    /// The worker keeps running when the connection fails; call
    /// [`Sensor::shut_down`] before trying again.
    #[instrument(skip(self), fields(device = %self.device_name))]
    pub fn start_up(&mut self) -> Result<(), SensorError> {
        if self.worker.is_some() {
            return Err(SensorError::AlreadyRunning);
        }

        self.exit.store(false, Ordering::Release);
        self.control.exchange.readout.reopen();

        let worker = SensorWorker::new(
            self.control.exchange.clone(),
            self.dispatch.clone(),
            self.exit.clone(),
        );
        let pin_core = self.pin_core;
        let handle = std::thread::Builder::new()
            .name(format!("sensor-{}", self.device_name))
            .spawn(move || {
                utils::raise_thread_priority(utils::URGENT_DISPLAY_PRIORITY);
                if let Some(core) = pin_core {
                    utils::pin_to_core(core);
                }
                worker.run();
            })
            .map_err(|e| {
                error!(error = %e, "unable to start sensor worker");
                SensorError::Spawn(e)
            })?;
        self.worker = Some(handle);

        self.dispatch().connect()?;
        info!("sensor started");
        Ok(())
    }

    /// Stop the worker, then the upstream device.
    ///
    /// The upstream stop is issued even when the worker never ran. A frame
    /// still waiting in the readout slot is dropped.
    #[instrument(skip(self), fields(device = %self.device_name))]
    pub fn shut_down(&mut self) -> Result<(), SensorError> {
        self.exit.store(true, Ordering::Release);
        self.control.exchange.readout.close();

        let joined = match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| {
                error!("sensor worker panicked");
                SensorError::WorkerPanicked
            }),
            None => {
                debug!("sensor worker was not running");
                Ok(())
            }
        };

        let stopped = self.dispatch().stop();
        joined?;
        stopped?;
        info!("sensor shut down");
        Ok(())
    }

    pub fn set_frame_duration(&self, ns: Nsecs) {
        self.control.set_frame_duration(ns);
    }

    pub fn set_destination_buffers(&self, buffers: Buffers) -> Option<Buffers> {
        self.control.set_destination_buffers(buffers)
    }

    pub fn set_frame_number(&self, frame_number: u32) {
        self.control.set_frame_number(frame_number);
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn SensorListener>>) {
        self.control.set_listener(listener);
    }

    pub fn wait_for_vsync(&self, timeout: Duration) -> bool {
        self.control.wait_for_vsync(timeout)
    }

    pub fn wait_for_new_frame(&self, timeout: Duration) -> Option<CapturedFrame> {
        self.control.wait_for_new_frame(timeout)
    }

    pub fn metrics(&self) -> SensorMetrics {
        self.control.metrics()
    }
}

impl<C: UpstreamClient + 'static> Drop for Sensor<C> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shut_down() {
                error!(error = %e, "shutdown on drop failed");
            }
        }
    }
}

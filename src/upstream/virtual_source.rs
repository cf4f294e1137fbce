//! In-process upstream that emits patterned frames.
//!
//! Stands in for the host webcam when no host channel is available and
//! records every call so the call order can be inspected.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::{FourCc, FrameTarget, UpstreamClient, WhiteBalance};
use crate::error::UpstreamError;

/// One upstream call as the virtual source observed it
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCall {
    Connect(String),
    Start {
        pixel_format: FourCc,
        width: u32,
        height: u32,
    },
    Stop,
    FetchFrame {
        yuv_size: usize,
        rgba_size: usize,
        white_balance: WhiteBalance,
        exposure_compensation: f32,
    },
}

/// Shared, append-only record of upstream calls
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<UpstreamCall>>>,
}

impl CallLog {
    fn push(&self, call: UpstreamCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn snapshot(&self) -> Vec<UpstreamCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|c| matches!(c, UpstreamCall::FetchFrame { .. }))
            .count()
    }

    pub fn start_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|c| matches!(c, UpstreamCall::Start { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Failures to inject, each consumed by the next matching call
#[derive(Debug, Default)]
struct Faults {
    connect: bool,
    start: bool,
    stop: bool,
    fetch: bool,
}

pub struct VirtualUpstream {
    log: CallLog,
    faults: Arc<Mutex<Faults>>,
    fetch_latency: Duration,
    connected: bool,
    active: Option<(u32, u32)>,
    frame_counter: u64,
}

impl VirtualUpstream {
    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            faults: Arc::default(),
            fetch_latency: Duration::ZERO,
            connected: false,
            active: None,
            frame_counter: 0,
        }
    }

    /// Simulate the host's delivery delay for every frame
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = latency;
        self
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    /// Handle for injecting failures after the source moved into a sensor
    pub fn fault_injector(&self) -> FaultInjector {
        FaultInjector {
            faults: self.faults.clone(),
        }
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut bool) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(pick(&mut faults))
    }
}

impl Default for VirtualUpstream {
    fn default() -> Self {
        Self::new()
    }
}

/// Arms one-shot failures on a [`VirtualUpstream`]
#[derive(Clone)]
pub struct FaultInjector {
    faults: Arc<Mutex<Faults>>,
}

impl FaultInjector {
    fn arm(&self, pick: impl FnOnce(&mut Faults) -> &mut bool) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        *pick(&mut faults) = true;
    }

    pub fn fail_next_connect(&self) {
        self.arm(|f| &mut f.connect);
    }

    pub fn fail_next_start(&self) {
        self.arm(|f| &mut f.start);
    }

    pub fn fail_next_stop(&self) {
        self.arm(|f| &mut f.stop);
    }

    pub fn fail_next_fetch(&self) {
        self.arm(|f| &mut f.fetch);
    }
}

impl UpstreamClient for VirtualUpstream {
    fn connect(&mut self, descriptor: &str) -> Result<(), UpstreamError> {
        self.log.push(UpstreamCall::Connect(descriptor.to_string()));
        if self.take_fault(|f| &mut f.connect) {
            return Err(UpstreamError::Status(-libc::ENODEV));
        }
        self.connected = true;
        Ok(())
    }

    fn start(
        &mut self,
        pixel_format: FourCc,
        width: u32,
        height: u32,
    ) -> Result<(), UpstreamError> {
        self.log.push(UpstreamCall::Start {
            pixel_format,
            width,
            height,
        });
        if !self.connected {
            return Err(UpstreamError::NotConnected);
        }
        if self.take_fault(|f| &mut f.start) {
            return Err(UpstreamError::Status(-libc::EBUSY));
        }
        self.active = Some((width, height));
        debug!(%pixel_format, width, height, "virtual source started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), UpstreamError> {
        self.log.push(UpstreamCall::Stop);
        if !self.connected {
            return Err(UpstreamError::NotConnected);
        }
        if self.take_fault(|f| &mut f.stop) {
            return Err(UpstreamError::Status(-libc::EIO));
        }
        self.active = None;
        Ok(())
    }

    fn fetch_frame(
        &mut self,
        mut target: FrameTarget<'_>,
        white_balance: WhiteBalance,
        exposure_compensation: f32,
    ) -> Result<(), UpstreamError> {
        let (yuv_size, rgba_size) = target.sizes();
        self.log.push(UpstreamCall::FetchFrame {
            yuv_size,
            rgba_size,
            white_balance,
            exposure_compensation,
        });
        if self.active.is_none() {
            return Err(UpstreamError::Status(-libc::EINVAL));
        }
        if self.take_fault(|f| &mut f.fetch) {
            return Err(UpstreamError::Status(-libc::EIO));
        }
        if !self.fetch_latency.is_zero() {
            std::thread::sleep(self.fetch_latency);
        }

        self.frame_counter += 1;
        let pattern = (self.frame_counter % 255) as u8 + 1;
        target.as_mut_slice().fill(pattern);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let mut source = VirtualUpstream::new();
        let log = source.call_log();

        source.connect("name=virtual").unwrap();
        source.start(FourCc::NV21, 2, 2).unwrap();
        let mut img = vec![0u8; 6];
        source
            .fetch_frame(FrameTarget::Yuv(&mut img), WhiteBalance::IDENTITY, 1.0)
            .unwrap();
        source.stop().unwrap();

        assert_eq!(
            log.snapshot(),
            vec![
                UpstreamCall::Connect("name=virtual".into()),
                UpstreamCall::Start {
                    pixel_format: FourCc::NV21,
                    width: 2,
                    height: 2
                },
                UpstreamCall::FetchFrame {
                    yuv_size: 6,
                    rgba_size: 0,
                    white_balance: WhiteBalance::IDENTITY,
                    exposure_compensation: 1.0
                },
                UpstreamCall::Stop,
            ]
        );
        assert!(img.iter().all(|&b| b != 0));
    }

    #[test]
    fn fetch_before_start_fails_without_writing() {
        let mut source = VirtualUpstream::new();
        source.connect("name=virtual").unwrap();
        let mut img = vec![0u8; 4];
        assert!(source
            .fetch_frame(FrameTarget::Rgba(&mut img), WhiteBalance::IDENTITY, 1.0)
            .is_err());
        assert_eq!(img, vec![0u8; 4]);
    }

    #[test]
    fn injected_fault_fires_once() {
        let mut source = VirtualUpstream::new();
        let faults = source.fault_injector();
        source.connect("name=virtual").unwrap();

        faults.fail_next_start();
        assert!(source.start(FourCc::NV21, 8, 8).is_err());
        assert!(source.start(FourCc::NV21, 8, 8).is_ok());
    }
}

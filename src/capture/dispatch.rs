//! Routes each buffer of a request to the upstream source by pixel format

use tracing::{debug, error, info, trace, warn};

use crate::capture::buffer::{
    nv21_frame_size, rgba_frame_size, Buffers, DataSpace, HalPixelFormat, StreamBuffer,
};
use crate::error::{DispatchError, UpstreamError};
use crate::upstream::{FourCc, FrameTarget, UpstreamClient, WhiteBalance};

/// Identity gains; the emulated sensor never perturbs host pixels
const WHITE_BALANCE: WhiteBalance = WhiteBalance::IDENTITY;
const EXPOSURE_COMPENSATION: f32 = 1.0;

/// Connection state of the upstream source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Initial,
    Connected,
    Started,
}

/// What happened to one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    Captured,
    /// An auxiliary YUV buffer was appended for a JPEG request
    AuxiliaryAppended,
}

/// Per-request tally, used for logging and counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub captured: usize,
    pub auxiliary: usize,
    /// Unsupported or misconfigured buffers, never sent upstream
    pub skipped: usize,
    /// Buffers whose start or fetch failed upstream
    pub upstream_failures: usize,
}

/// Owns the upstream client, its state and the resolution latch.
pub struct CaptureDispatch<C> {
    client: C,
    device_name: String,
    state: SensorState,
    /// Dimensions the upstream was last started with; `None` until the first start
    latch: Option<(u32, u32)>,
}

impl<C: UpstreamClient> CaptureDispatch<C> {
    pub fn new(device_name: impl Into<String>, client: C) -> Self {
        Self {
            client,
            device_name: device_name.into(),
            state: SensorState::Initial,
            latch: None,
        }
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Descriptor the host channel is opened with
    pub fn descriptor(&self) -> String {
        format!("name={}", self.device_name)
    }

    pub fn connect(&mut self) -> Result<(), UpstreamError> {
        let descriptor = self.descriptor();
        match self.client.connect(&descriptor) {
            Ok(()) => {
                info!(device = %self.device_name, "connected to upstream camera");
                self.state = SensorState::Connected;
                Ok(())
            }
            Err(e) => {
                error!(device = %self.device_name, error = %e, "connection to upstream camera failed");
                Err(e)
            }
        }
    }

    /// Quiesce the upstream source. On success the latch is reset so the next
    /// request starts it again.
    pub fn stop(&mut self) -> Result<(), UpstreamError> {
        match self.client.stop() {
            Ok(()) => {
                info!(device = %self.device_name, "upstream camera stopped");
                self.state = SensorState::Connected;
                self.latch = None;
                Ok(())
            }
            Err(e) => {
                error!(device = %self.device_name, error = %e, "unable to stop upstream camera");
                Err(e)
            }
        }
    }

    /// Fill every buffer of `buffers`. Buffers appended while iterating are
    /// captured too, which is how the JPEG auxiliary buffer gets its pixels.
    pub fn capture(&mut self, buffers: &mut Buffers) -> DispatchSummary {
        let blobs = buffers
            .iter()
            .filter(|b| b.format == HalPixelFormat::Blob)
            .count();
        buffers.reserve(blobs);

        let mut summary = DispatchSummary::default();
        let mut i = 0;
        while i < buffers.len() {
            trace!(
                index = i,
                stream = buffers[i].stream_id,
                width = buffers[i].width,
                height = buffers[i].height,
                format = ?buffers[i].format,
                stride = buffers[i].stride,
                "capturing buffer"
            );
            match self.capture_one(buffers, i) {
                Ok(BufferOutcome::Captured) => summary.captured += 1,
                Ok(BufferOutcome::AuxiliaryAppended) => summary.auxiliary += 1,
                Err(e @ DispatchError::Transport(_)) => {
                    summary.upstream_failures += 1;
                    error!(index = i, error = %e, "buffer capture failed");
                }
                Err(e @ DispatchError::Unsupported(_)) => {
                    summary.skipped += 1;
                    error!(index = i, error = %e, "buffer skipped");
                }
                Err(e @ DispatchError::Misconfigured(_)) => {
                    summary.skipped += 1;
                    warn!(index = i, error = %e, "buffer skipped");
                }
            }
            i += 1;
        }
        summary
    }

    fn capture_one(
        &mut self,
        buffers: &mut Buffers,
        index: usize,
    ) -> Result<BufferOutcome, DispatchError> {
        let format = buffers[index].format;
        let data_space = buffers[index].data_space;
        match format {
            HalPixelFormat::Rgba8888 => {
                self.capture_frame(&mut buffers[index], Path::Rgba)?;
                Ok(BufferOutcome::Captured)
            }
            HalPixelFormat::YCbCr420_888 => {
                self.capture_frame(&mut buffers[index], Path::Yuv)?;
                Ok(BufferOutcome::Captured)
            }
            HalPixelFormat::Blob if data_space == DataSpace::Depth => {
                Err(DispatchError::Unsupported("depth clouds"))
            }
            HalPixelFormat::Blob => {
                // The JPEG encoder downstream takes ownership along with the set.
                let aux = StreamBuffer::auxiliary_for(&buffers[index]);
                debug!(width = aux.width, height = aux.height, "appending auxiliary buffer");
                buffers.push(aux);
                Ok(BufferOutcome::AuxiliaryAppended)
            }
            HalPixelFormat::Rgb888 => Err(DispatchError::Unsupported("RGB_888 capture")),
            HalPixelFormat::Other(code) => Err(DispatchError::Misconfigured(format!(
                "unknown pixel format {code:#x}"
            ))),
        }
    }

    fn capture_frame(&mut self, b: &mut StreamBuffer, path: Path) -> Result<(), DispatchError> {
        self.ensure_started(b.width, b.height)?;

        if b.stride != b.width {
            warn!(
                expected = b.width,
                actual = b.stride,
                "stride differs from width, writing tightly packed"
            );
        }

        let size = match path {
            Path::Rgba => rgba_frame_size(b.width, b.height),
            Path::Yuv => nv21_frame_size(b.width, b.height),
        };
        if b.img.len() < size {
            return Err(DispatchError::Misconfigured(format!(
                "image region holds {} bytes, frame needs {}",
                b.img.len(),
                size
            )));
        }

        let region = &mut b.img[..size];
        let target = match path {
            Path::Rgba => FrameTarget::Rgba(region),
            Path::Yuv => FrameTarget::Yuv(region),
        };
        self.client
            .fetch_frame(target, WHITE_BALANCE, EXPOSURE_COMPENSATION)?;
        trace!(?path, size, "sensor image captured");
        Ok(())
    }

    /// Restart the upstream source when the request's dimensions differ
    /// from the latch. The host always streams NV21; RGBA is its preview path.
    fn ensure_started(&mut self, width: u32, height: u32) -> Result<(), UpstreamError> {
        if self.latch == Some((width, height)) && self.state == SensorState::Started {
            return Ok(());
        }
        if self.state == SensorState::Initial {
            return Err(UpstreamError::NotConnected);
        }

        info!(
            width,
            height,
            previous = ?self.latch,
            "request dimensions changed, restarting upstream camera"
        );
        if self.latch.is_some() {
            match self.client.stop() {
                Ok(()) => {
                    debug!(device = %self.device_name, "upstream camera stopped for restart");
                    self.state = SensorState::Connected;
                }
                // The start below decides the outcome.
                Err(e) => error!(device = %self.device_name, error = %e, "unable to stop upstream camera"),
            }
        }

        match self.client.start(FourCc::NV21, width, height) {
            Ok(()) => {
                self.latch = Some((width, height));
                self.state = SensorState::Started;
                info!(
                    device = %self.device_name,
                    pixel_format = %FourCc::NV21,
                    width,
                    height,
                    "upstream camera started"
                );
                Ok(())
            }
            Err(e) => {
                self.state = SensorState::Connected;
                error!(
                    device = %self.device_name,
                    pixel_format = %FourCc::NV21,
                    width,
                    height,
                    error = %e,
                    "unable to start upstream camera"
                );
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Path {
    Rgba,
    Yuv,
}

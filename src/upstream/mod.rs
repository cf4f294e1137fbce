//! Host camera source the sensor pulls pixels from

pub mod client;
pub mod query;
pub mod transport;
pub mod virtual_source;

use std::fmt;

use crate::error::UpstreamError;

pub use client::HostCameraClient;
pub use virtual_source::{CallLog, FaultInjector, UpstreamCall, VirtualUpstream};

/// V4L2-style four character code, little endian packed
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    /// The only format the sensor ever asks the host for
    pub const NV21: FourCc = FourCc::new(*b"NV21");

    pub const fn new(code: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(code))
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_le_bytes() {
            let c = if byte.is_ascii_graphic() { byte as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Per-channel white balance gains
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WhiteBalance {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl WhiteBalance {
    pub const IDENTITY: WhiteBalance = WhiteBalance {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };
}

/// Where a fetched frame lands. Exactly one path per fetch.
#[derive(Debug)]
pub enum FrameTarget<'a> {
    /// NV21 video path
    Yuv(&'a mut [u8]),
    /// RGB32 preview path
    Rgba(&'a mut [u8]),
}

impl FrameTarget<'_> {
    /// `(yuv, rgba)` byte counts as they appear on the wire
    pub fn sizes(&self) -> (usize, usize) {
        match self {
            FrameTarget::Yuv(buf) => (buf.len(), 0),
            FrameTarget::Rgba(buf) => (0, buf.len()),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            FrameTarget::Yuv(buf) | FrameTarget::Rgba(buf) => buf,
        }
    }
}

/// Synchronous facade over the host camera.
///
/// After startup the sensor worker is the only caller.
pub trait UpstreamClient: Send {
    /// Open the channel described by `descriptor` and handshake.
    fn connect(&mut self, descriptor: &str) -> Result<(), UpstreamError>;

    /// Ask the host to begin producing `pixel_format` frames.
    fn start(&mut self, pixel_format: FourCc, width: u32, height: u32)
        -> Result<(), UpstreamError>;

    fn stop(&mut self) -> Result<(), UpstreamError>;

    /// Block until the next frame has been written into `target`.
    fn fetch_frame(
        &mut self,
        target: FrameTarget<'_>,
        white_balance: WhiteBalance,
        exposure_compensation: f32,
    ) -> Result<(), UpstreamError>;
}

impl<T: UpstreamClient + ?Sized> UpstreamClient for Box<T> {
    fn connect(&mut self, descriptor: &str) -> Result<(), UpstreamError> {
        (**self).connect(descriptor)
    }

    fn start(
        &mut self,
        pixel_format: FourCc,
        width: u32,
        height: u32,
    ) -> Result<(), UpstreamError> {
        (**self).start(pixel_format, width, height)
    }

    fn stop(&mut self) -> Result<(), UpstreamError> {
        (**self).stop()
    }

    fn fetch_frame(
        &mut self,
        target: FrameTarget<'_>,
        white_balance: WhiteBalance,
        exposure_compensation: f32,
    ) -> Result<(), UpstreamError> {
        (**self).fetch_frame(target, white_balance, exposure_compensation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv21_fourcc_matches_v4l2() {
        assert_eq!(FourCc::NV21.0, 0x3132_564E);
        assert_ne!(FourCc::NV21, FourCc::new(*b"NV12"));
        assert_eq!(FourCc::NV21.to_string(), "NV21");
    }

    #[test]
    fn target_sizes_put_zero_on_unused_path() {
        let mut yuv = vec![0u8; 12];
        let mut rgba = vec![0u8; 16];
        assert_eq!(FrameTarget::Yuv(&mut yuv).sizes(), (12, 0));
        assert_eq!(FrameTarget::Rgba(&mut rgba).sizes(), (0, 16));
    }
}

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// HAL pixel formats a request buffer can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HalPixelFormat {
    Rgba8888,
    Rgb888,
    Blob,
    /// Delivered as NV21
    YCbCr420_888,
    /// Any HAL code the sensor does not route
    Other(u32),
}

impl HalPixelFormat {
    pub const HAL_RGBA_8888: u32 = 0x1;
    pub const HAL_RGB_888: u32 = 0x3;
    pub const HAL_BLOB: u32 = 0x21;
    pub const HAL_YCBCR_420_888: u32 = 0x23;

    pub fn from_hal(code: u32) -> Self {
        match code {
            Self::HAL_RGBA_8888 => Self::Rgba8888,
            Self::HAL_RGB_888 => Self::Rgb888,
            Self::HAL_BLOB => Self::Blob,
            Self::HAL_YCBCR_420_888 => Self::YCbCr420_888,
            other => Self::Other(other),
        }
    }

    pub fn hal_code(self) -> u32 {
        match self {
            Self::Rgba8888 => Self::HAL_RGBA_8888,
            Self::Rgb888 => Self::HAL_RGB_888,
            Self::Blob => Self::HAL_BLOB,
            Self::YCbCr420_888 => Self::HAL_YCBCR_420_888,
            Self::Other(code) => code,
        }
    }

    /// Bytes the sensor writes for a `width` x `height` image of this format.
    ///
    /// BLOB has no fixed size; callers allocate JPEG output themselves.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgba8888 => Some(rgba_frame_size(width, height)),
            Self::Rgb888 => Some(pixels * 3),
            Self::YCbCr420_888 => Some(nv21_frame_size(width, height)),
            Self::Blob | Self::Other(_) => None,
        }
    }
}

/// NV21 is a full-resolution Y plane followed by interleaved, quarter-size VU.
pub fn nv21_frame_size(width: u32, height: u32) -> usize {
    (width as usize * height as usize * 12) / 8
}

pub fn rgba_frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Size of the YUV scratch region appended for a JPEG request.
pub fn auxiliary_frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataSpace {
    #[default]
    Unknown,
    Jfif,
    Depth,
}

/// Opaque handle of the gralloc-style buffer behind a stream buffer.
/// The sensor never looks inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// One output buffer of a capture request
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    /// Caller assigned; 0 marks buffers the sensor appended itself
    pub stream_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: HalPixelFormat,
    /// Row stride in pixels
    pub stride: u32,
    pub data_space: DataSpace,
    pub handle: Option<BufferHandle>,
    /// Image bytes the sensor writes into
    pub img: Vec<u8>,
}

impl StreamBuffer {
    pub const AUXILIARY_STREAM_ID: u32 = 0;

    /// Buffer with a tightly packed, zeroed image region sized for `format`.
    pub fn new(stream_id: u32, format: HalPixelFormat, width: u32, height: u32) -> Self {
        let size = format.frame_size(width, height).unwrap_or(0);
        Self {
            stream_id,
            width,
            height,
            format,
            stride: width,
            data_space: DataSpace::Unknown,
            handle: None,
            img: vec![0; size],
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_data_space(mut self, data_space: DataSpace) -> Self {
        self.data_space = data_space;
        self
    }

    pub fn with_handle(mut self, handle: BufferHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn with_img(mut self, img: Vec<u8>) -> Self {
        self.img = img;
        self
    }

    /// YUV input buffer for the JPEG encoder that consumes `blob`.
    pub fn auxiliary_for(blob: &StreamBuffer) -> Self {
        Self {
            stream_id: Self::AUXILIARY_STREAM_ID,
            width: blob.width,
            height: blob.height,
            format: HalPixelFormat::YCbCr420_888,
            stride: blob.width,
            data_space: DataSpace::Unknown,
            handle: None,
            img: vec![0; auxiliary_frame_size(blob.width, blob.height)],
        }
    }

    pub fn is_auxiliary(&self) -> bool {
        self.stream_id == Self::AUXILIARY_STREAM_ID && self.handle.is_none()
    }
}

/// Ordered set of output buffers for one capture request.
///
/// The sensor may append auxiliary buffers while capturing; it owns the set
/// from the moment it is snapshotted until the readout hands it back.
#[derive(Debug, Clone, Default)]
pub struct Buffers {
    inner: Vec<StreamBuffer>,
}

impl Buffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, buffer: StreamBuffer) {
        self.inner.push(buffer);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.inner.reserve(additional);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StreamBuffer> {
        self.inner.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut StreamBuffer> {
        self.inner.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamBuffer> {
        self.inner.iter()
    }

    /// Auxiliary buffers appended by the sensor
    pub fn auxiliary(&self) -> impl Iterator<Item = &StreamBuffer> {
        self.inner.iter().filter(|b| b.is_auxiliary())
    }

    pub fn into_vec(self) -> Vec<StreamBuffer> {
        self.inner
    }
}

impl From<Vec<StreamBuffer>> for Buffers {
    fn from(inner: Vec<StreamBuffer>) -> Self {
        Self { inner }
    }
}

impl FromIterator<StreamBuffer> for Buffers {
    fn from_iter<I: IntoIterator<Item = StreamBuffer>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl Index<usize> for Buffers {
    type Output = StreamBuffer;

    fn index(&self, index: usize) -> &StreamBuffer {
        &self.inner[index]
    }
}

impl IndexMut<usize> for Buffers {
    fn index_mut(&mut self, index: usize) -> &mut StreamBuffer {
        &mut self.inner[index]
    }
}

impl<'a> IntoIterator for &'a Buffers {
    type Item = &'a StreamBuffer;
    type IntoIter = std::slice::Iter<'a, StreamBuffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

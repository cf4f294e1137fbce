//! Host camera queries and replies.
//!
//! A query is a short ASCII command terminated by NUL. A reply starts with
//! `ok` or `ko`, optionally followed by `:` and a data section (mode list,
//! frame bytes or a failure reason).

use bytes::{Buf, Bytes, BytesMut};

use super::{FourCc, WhiteBalance};
use crate::error::UpstreamError;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Connect,
    Start {
        pixel_format: FourCc,
        width: u32,
        height: u32,
    },
    Stop,
    Frame {
        yuv_size: usize,
        rgba_size: usize,
        white_balance: WhiteBalance,
        exposure_compensation: f32,
    },
}

impl Query {
    /// Command text without the terminator
    pub fn text(&self) -> String {
        match self {
            Query::Connect => "connect".to_string(),
            Query::Start {
                pixel_format,
                width,
                height,
            } => format!("start pixfmt={} dim={}x{}", pixel_format.0, width, height),
            Query::Stop => "stop".to_string(),
            Query::Frame {
                yuv_size,
                rgba_size,
                white_balance: wb,
                exposure_compensation,
            } => format!(
                "frame yuv={} rgb={} wb={},{},{} exp={}",
                yuv_size, rgba_size, wb.r, wb.g, wb.b, exposure_compensation
            ),
        }
    }

    pub fn encode(&self) -> Bytes {
        let text = self.text();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.extend_from_slice(&[0]);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub ok: bool,
    pub data: Bytes,
}

impl Reply {
    pub fn parse(query: &str, mut payload: Bytes) -> Result<Self, UpstreamError> {
        if payload.len() < 2 {
            return Err(UpstreamError::Protocol {
                query: query.to_string(),
                detail: format!("reply is {} bytes", payload.len()),
            });
        }

        let ok = match &payload[..2] {
            b"ok" => true,
            b"ko" => false,
            other => {
                return Err(UpstreamError::Protocol {
                    query: query.to_string(),
                    detail: format!("unknown status {:?}", String::from_utf8_lossy(other)),
                })
            }
        };

        payload.advance(2);
        let data = match payload.first() {
            None => Bytes::new(),
            Some(b':') => payload.split_off(1),
            Some(&b) => {
                return Err(UpstreamError::Protocol {
                    query: query.to_string(),
                    detail: format!("unexpected byte {b:#04x} after status"),
                })
            }
        };

        Ok(Self { ok, data })
    }

    /// Data section as text, with any trailing NUL dropped
    pub fn text(&self) -> String {
        let data = self.data.strip_suffix(&[0u8]).unwrap_or(&self.data[..]);
        String::from_utf8_lossy(data).into_owned()
    }

    /// Turn a `ko` into [`UpstreamError::Rejected`].
    pub fn into_result(self, query: &str) -> Result<Bytes, UpstreamError> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(UpstreamError::Rejected {
                query: query.to_string(),
                reason: self.text(),
            })
        }
    }
}

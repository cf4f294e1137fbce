//! Length-prefixed framing over the host channel

use std::io::{self, Read, Write};

use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Eight lowercase hex digits
const HEADER_LEN: usize = 8;
/// Largest payload accepted from the host (a 4K RGBA frame fits comfortably)
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Message channel to the host camera service
pub struct FramedChannel<S> {
    stream: S,
}

impl<S: Read + Write> FramedChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds frame limit", payload.len()),
            ));
        }
        let header = format!("{:08x}", payload.len());
        self.stream.write_all(header.as_bytes())?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        trace!(len = payload.len(), "sent message");
        Ok(())
    }

    pub fn recv(&mut self) -> io::Result<Bytes> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header)?;

        let len = std::str::from_utf8(&header)
            .ok()
            .and_then(|s| usize::from_str_radix(s, 16).ok())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad message header {:?}", String::from_utf8_lossy(&header)),
                )
            })?;
        if len > MAX_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message of {len} bytes exceeds frame limit"),
            ));
        }

        let mut payload = BytesMut::zeroed(len);
        self.stream.read_exact(&mut payload)?;
        trace!(len, "received message");
        Ok(payload.freeze())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

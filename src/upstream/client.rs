//! Host camera client over a framed byte stream

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, info, instrument};

use super::query::{Query, Reply};
use super::transport::FramedChannel;
use super::{FourCc, FrameTarget, UpstreamClient, WhiteBalance};
use crate::error::UpstreamError;

type Dialer<S> = Box<dyn FnMut() -> io::Result<S> + Send>;

/// Talks to the host-side virtual webcam service.
///
/// The channel is opened lazily by [`UpstreamClient::connect`], so a client
/// can be built before the host is reachable.
pub struct HostCameraClient<S> {
    dialer: Dialer<S>,
    channel: Option<FramedChannel<S>>,
    modes: Option<String>,
}

impl<S: Read + Write + Send> HostCameraClient<S> {
    pub fn new(dialer: impl FnMut() -> io::Result<S> + Send + 'static) -> Self {
        Self {
            dialer: Box::new(dialer),
            channel: None,
            modes: None,
        }
    }

    /// Modes the host advertised during the handshake
    pub fn supported_modes(&self) -> Option<&str> {
        self.modes.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn channel(&mut self) -> Result<&mut FramedChannel<S>, UpstreamError> {
        self.channel.as_mut().ok_or(UpstreamError::NotConnected)
    }

    fn query(&mut self, query: &Query) -> Result<Reply, UpstreamError> {
        let text = query.text();
        let channel = self.channel()?;
        channel.send(&query.encode())?;
        let payload = channel.recv()?;
        let reply = Reply::parse(&text, payload)?;
        debug!(query = %text, ok = reply.ok, data_len = reply.data.len(), "host replied");
        Ok(reply)
    }
}

impl HostCameraClient<TcpStream> {
    /// Client for a host channel exposed on `addr`
    pub fn tcp(addr: impl Into<String>, io_timeout: Duration) -> Self {
        let addr = addr.into();
        Self::new(move || {
            let stream = TcpStream::connect(&addr)?;
            stream.set_nodelay(true)?;
            stream.set_read_timeout(Some(io_timeout))?;
            stream.set_write_timeout(Some(io_timeout))?;
            Ok(stream)
        })
    }
}

impl<S: Read + Write + Send> UpstreamClient for HostCameraClient<S> {
    #[instrument(skip(self))]
    fn connect(&mut self, descriptor: &str) -> Result<(), UpstreamError> {
        let stream = (self.dialer)()?;
        let mut channel = FramedChannel::new(stream);

        let mut open = descriptor.as_bytes().to_vec();
        open.push(0);
        channel.send(&open)?;
        Reply::parse(descriptor, channel.recv()?)?.into_result(descriptor)?;
        self.channel = Some(channel);

        // The mode list rides on the `connect` reply.
        let modes = match self.query(&Query::Connect) {
            Ok(reply) if reply.ok => reply.text(),
            Ok(reply) => {
                self.channel = None;
                return Err(UpstreamError::Rejected {
                    query: "connect".to_string(),
                    reason: reply.text(),
                });
            }
            Err(e) => {
                self.channel = None;
                return Err(e);
            }
        };
        info!(%modes, "connected to host camera");
        self.modes = Some(modes);
        Ok(())
    }

    fn start(
        &mut self,
        pixel_format: FourCc,
        width: u32,
        height: u32,
    ) -> Result<(), UpstreamError> {
        let query = Query::Start {
            pixel_format,
            width,
            height,
        };
        self.query(&query)?.into_result(&query.text())?;
        info!(%pixel_format, width, height, "host camera started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), UpstreamError> {
        self.query(&Query::Stop)?.into_result("stop")?;
        info!("host camera stopped");
        Ok(())
    }

    fn fetch_frame(
        &mut self,
        mut target: FrameTarget<'_>,
        white_balance: WhiteBalance,
        exposure_compensation: f32,
    ) -> Result<(), UpstreamError> {
        let (yuv_size, rgba_size) = target.sizes();
        let query = Query::Frame {
            yuv_size,
            rgba_size,
            white_balance,
            exposure_compensation,
        };
        let text = query.text();
        let data = self.query(&query)?.into_result(&text)?;

        let expected = yuv_size + rgba_size;
        if data.len() != expected {
            return Err(UpstreamError::Protocol {
                query: text,
                detail: format!("frame carries {} bytes, expected {}", data.len(), expected),
            });
        }
        // Only one section is non-empty, so the payload is exactly that section.
        target.as_mut_slice().copy_from_slice(&data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::transport::tests::ScriptedStream;

    fn client_with(stream: ScriptedStream) -> HostCameraClient<ScriptedStream> {
        let mut stream = Some(stream);
        HostCameraClient::new(move || {
            stream
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "dialed twice"))
        })
    }

    fn written(client: &HostCameraClient<ScriptedStream>) -> String {
        let channel = client.channel.as_ref().expect("connected");
        String::from_utf8_lossy(&channel.get_ref().written).into_owned()
    }

    #[test]
    fn connect_sends_descriptor_then_handshake() {
        let mut client = client_with(ScriptedStream::new(&["ok", "ok:640x480,1280x720"]));
        client.connect("name=webcam0").unwrap();

        assert!(client.is_connected());
        assert_eq!(client.supported_modes(), Some("640x480,1280x720"));
        assert_eq!(written(&client), "0000000dname=webcam0\000000008connect\0");
    }

    #[test]
    fn rejected_handshake_leaves_client_disconnected() {
        let mut client = client_with(ScriptedStream::new(&["ok", "ko:no such device"]));
        let err = client.connect("name=missing").unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { .. }));
        assert!(!client.is_connected());
        assert!(matches!(client.stop(), Err(UpstreamError::NotConnected)));
    }

    #[test]
    fn fetch_copies_yuv_section() {
        let mut reply = b"ok:".to_vec();
        reply.extend_from_slice(&[7u8; 12]);
        let mut stream = ScriptedStream::new(&["ok", "ok", "ok"]);
        stream.push_reply(&reply);
        let mut client = client_with(stream);
        client.connect("name=webcam0").unwrap();
        client.start(FourCc::NV21, 4, 2).unwrap();

        let mut img = vec![0u8; 12];
        client
            .fetch_frame(FrameTarget::Yuv(&mut img), WhiteBalance::IDENTITY, 1.0)
            .unwrap();
        assert_eq!(img, vec![7u8; 12]);
        assert!(written(&client).ends_with("frame yuv=12 rgb=0 wb=1,1,1 exp=1\0"));
    }

    #[test]
    fn short_frame_is_protocol_error_and_buffer_untouched() {
        let mut stream = ScriptedStream::new(&["ok", "ok"]);
        stream.push_reply(b"ok:\x01\x02");
        let mut client = client_with(stream);
        client.connect("name=webcam0").unwrap();

        let mut img = vec![0u8; 16];
        let err = client
            .fetch_frame(FrameTarget::Rgba(&mut img), WhiteBalance::IDENTITY, 1.0)
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Protocol { .. }));
        assert!(img.iter().all(|&b| b == 0));
    }
}

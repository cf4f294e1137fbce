use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use vsensor::upstream::{FourCc, FrameTarget, HostCameraClient, UpstreamClient, WhiteBalance};
use vsensor::{Buffers, HalPixelFormat, Sensor, StreamBuffer, UpstreamError};

fn read_message(stream: &mut TcpStream) -> Option<String> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).ok()?;
    let len = usize::from_str_radix(std::str::from_utf8(&header).ok()?, 16).ok()?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).ok()?;
    let text = payload.strip_suffix(&[0]).unwrap_or(&payload[..]);
    Some(String::from_utf8_lossy(text).into_owned())
}

fn write_message(stream: &mut TcpStream, payload: &[u8]) {
    stream
        .write_all(format!("{:08x}", payload.len()).as_bytes())
        .unwrap();
    stream.write_all(payload).unwrap();
}

/// Fake host webcam service. Answers every query and returns the queries it saw.
fn spawn_host(reject_start: bool) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut seen = Vec::new();
        while let Some(query) = read_message(&mut stream) {
            let reply: Vec<u8> = match query.split(' ').next().unwrap_or_default() {
                "connect" => b"ok:dim=640x480,fps=30".to_vec(),
                "start" if reject_start => b"ko:device busy".to_vec(),
                "frame" => {
                    let yuv: usize = query
                        .split(' ')
                        .find_map(|p| p.strip_prefix("yuv="))
                        .and_then(|v| v.parse().ok())
                        .unwrap();
                    let mut reply = b"ok:".to_vec();
                    reply.resize(3 + yuv, 0x80);
                    reply
                }
                _ => b"ok".to_vec(),
            };
            write_message(&mut stream, &reply);
            seen.push(query);
        }
        seen
    });
    (addr, handle)
}

#[test]
fn client_speaks_the_host_protocol() {
    let (addr, host) = spawn_host(false);
    let mut client = HostCameraClient::tcp(addr, Duration::from_secs(2));

    client.connect("name=webcam0").unwrap();
    assert_eq!(client.supported_modes(), Some("dim=640x480,fps=30"));
    client.start(FourCc::NV21, 4, 2).unwrap();
    let mut img = vec![0u8; 12];
    client
        .fetch_frame(FrameTarget::Yuv(&mut img), WhiteBalance::IDENTITY, 1.0)
        .unwrap();
    client.stop().unwrap();
    drop(client);

    assert!(img.iter().all(|&b| b == 0x80));
    assert_eq!(
        host.join().unwrap(),
        vec![
            "name=webcam0",
            "connect",
            "start pixfmt=825382478 dim=4x2",
            "frame yuv=12 rgb=0 wb=1,1,1 exp=1",
            "stop",
        ]
    );
}

#[test]
fn rejected_start_carries_the_host_reason() {
    let (addr, host) = spawn_host(true);
    let mut client = HostCameraClient::tcp(addr, Duration::from_secs(2));
    client.connect("name=webcam0").unwrap();

    match client.start(FourCc::NV21, 640, 480) {
        Err(UpstreamError::Rejected { reason, .. }) => assert_eq!(reason, "device busy"),
        other => panic!("unexpected start result {other:?}"),
    }
    drop(client);
    host.join().unwrap();
}

#[test]
fn unreachable_host_fails_to_connect() {
    let addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .to_string();
    let mut client = HostCameraClient::tcp(addr, Duration::from_millis(200));

    assert!(matches!(
        client.connect("name=webcam0"),
        Err(UpstreamError::Io(_))
    ));
    assert!(!client.is_connected());
}

#[test]
fn sensor_streams_from_host() {
    let (addr, host) = spawn_host(false);
    let mut sensor = Sensor::new(
        "webcam0",
        640,
        480,
        HostCameraClient::tcp(addr, Duration::from_secs(2)),
    );
    sensor.start_up().unwrap();

    assert!(sensor.wait_for_vsync(Duration::from_millis(200)));
    let buffers: Buffers =
        vec![StreamBuffer::new(1, HalPixelFormat::YCbCr420_888, 32, 24)].into();
    sensor.set_destination_buffers(buffers);
    let frame = sensor
        .wait_for_new_frame(Duration::from_millis(500))
        .unwrap();
    assert!(frame.buffers[0].img.iter().all(|&b| b == 0x80));

    sensor.shut_down().unwrap();
    drop(sensor);

    let seen = host.join().unwrap();
    assert_eq!(seen[2], "start pixfmt=825382478 dim=32x24");
    assert_eq!(seen.last().map(String::as_str), Some("stop"));
}

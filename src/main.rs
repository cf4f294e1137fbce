//! vsensor: emulated camera sensor fed by a host webcam

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, info, warn};

use vsensor::sensor::ChannelListener;
use vsensor::upstream::{HostCameraClient, UpstreamClient, VirtualUpstream};
use vsensor::{
    Buffers, Config, HalPixelFormat, PipelineConfig, Sensor, SensorConfig, SensorControl,
    StreamBuffer, UpstreamConfig, VIRTUAL_ENDPOINT,
};

/// Stream id the demo request loop submits its preview buffer under
const PREVIEW_STREAM_ID: u32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("vsensor=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("vsensor launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    vsensor::CONFIG.store(Arc::new(config.clone()));
    info!("Using upstream endpoint: {}", config.upstream.endpoint);

    let mut sensor = Sensor::from_config(&config.sensor, upstream_client(&config.upstream));

    // Listener events are logged off the sensor thread
    let (listener, events) = ChannelListener::new();
    sensor.set_listener(Some(Arc::new(listener)));
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            debug!(
                frame_number = event.frame_number,
                timestamp = event.timestamp,
                "{:?}",
                event.event
            );
        }
    });

    sensor.start_up()?;

    let running = Arc::new(AtomicBool::new(true));
    let submitter = tokio::task::spawn_blocking({
        let control = sensor.control();
        let running = running.clone();
        let sensor_config = config.sensor.clone();
        let pipeline = config.pipeline.clone();
        move || submit_requests(control, &sensor_config, &pipeline, &running)
    });
    let reader = tokio::task::spawn_blocking({
        let control = sensor.control();
        let running = running.clone();
        let pipeline = config.pipeline.clone();
        move || read_frames(control, &pipeline, &running)
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    running.store(false, Ordering::Release);

    let submitted = submitter.await?;
    let shut_down = tokio::task::spawn_blocking(move || {
        let result = sensor.shut_down();
        let metrics = sensor.metrics();
        drop(sensor);
        result.map(|()| metrics)
    });
    let read = reader.await?;
    let metrics = shut_down.await??;
    event_task.await?;

    info!(
        submitted,
        read,
        exposed = metrics.frames_exposed,
        stalls = metrics.readout_stalls,
        upstream_failures = metrics.upstream_failures,
        average_period_ns = metrics.average_frame_period_ns,
        "vsensor shutting down"
    );
    Ok(())
}

fn upstream_client(config: &UpstreamConfig) -> Box<dyn UpstreamClient> {
    if config.endpoint == VIRTUAL_ENDPOINT {
        Box::new(VirtualUpstream::new().with_fetch_latency(Duration::from_millis(5)))
    } else {
        Box::new(HostCameraClient::tcp(
            config.endpoint.clone(),
            Duration::from_millis(config.io_timeout_ms),
        ))
    }
}

/// Request assembly: one NV21 preview buffer per VSync
fn submit_requests(
    control: SensorControl,
    sensor: &SensorConfig,
    pipeline: &PipelineConfig,
    running: &AtomicBool,
) -> u32 {
    let vsync_timeout = Duration::from_millis(pipeline.vsync_timeout_ms);
    let mut frame_number = 0u32;

    while running.load(Ordering::Acquire) {
        if !control.wait_for_vsync(vsync_timeout) {
            warn!("no vsync within {:?}", vsync_timeout);
            continue;
        }

        frame_number += 1;
        let mut buffers = Buffers::with_capacity(1);
        buffers.push(StreamBuffer::new(
            PREVIEW_STREAM_ID,
            HalPixelFormat::YCbCr420_888,
            sensor.width,
            sensor.height,
        ));
        control.set_frame_number(frame_number);
        if control.set_destination_buffers(buffers).is_some() {
            warn!(frame_number, "previous request was never picked up");
        }
    }
    frame_number
}

fn read_frames(control: SensorControl, pipeline: &PipelineConfig, running: &AtomicBool) -> u64 {
    let readout_timeout = Duration::from_millis(pipeline.readout_timeout_ms);
    let mut read = 0u64;

    while running.load(Ordering::Acquire) {
        match control.wait_for_new_frame(readout_timeout) {
            Some(frame) => {
                read += 1;
                let first = frame.buffers.get(0).map(|b| b.img.first().copied());
                debug!(
                    frame_number = frame.frame_number,
                    capture_time = frame.capture_time,
                    buffers = frame.buffers.len(),
                    first_byte = ?first,
                    "frame read out"
                );
            }
            None => debug!("no readout within {:?}", readout_timeout),
        }
    }
    read
}

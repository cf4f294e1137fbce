pub mod capture;
pub mod error;
pub mod pipeline;
pub mod sensor;
pub mod upstream;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{Buffers, DataSpace, HalPixelFormat, SensorState, StreamBuffer};
pub use error::{SensorError, UpstreamError};
pub use pipeline::{CapturedFrame, Nsecs, SensorMetrics};
pub use sensor::{Sensor, SensorControl, SensorEvent, SensorListener};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Endpoint value selecting the in-process virtual source
pub const VIRTUAL_ENDPOINT: &str = "virtual";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorConfig,
    pub upstream: UpstreamConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub device_name: String,
    /// Pixel array size
    pub width: u32,
    pub height: u32,
    pub frame_duration_ns: Nsecs,
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `host:port` of the host camera channel, or `virtual`
    pub endpoint: String,
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub vsync_timeout_ms: u64,
    pub readout_timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device_name: "webcam0".into(),
            width: 640,
            height: 480,
            frame_duration_ns: sensor::characteristics::FRAME_DURATION_RANGE[0],
            pin_core: None,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: VIRTUAL_ENDPOINT.into(),
            io_timeout_ms: 2_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Two frame periods at 30 fps
            vsync_timeout_ms: 66,
            readout_timeout_ms: 66,
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by
    /// `VSENSOR__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("VSENSOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_target_thirty_fps_virtual_source() {
        let config = Config::default();
        assert_eq!(config.sensor.frame_duration_ns, 33_331_760);
        assert_eq!(config.upstream.endpoint, VIRTUAL_ENDPOINT);
    }

    #[test]
    fn file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("vsensor-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[sensor]\ndevice_name = \"hostcam\"\nwidth = 1280\nheight = 720\n\n[upstream]\nendpoint = \"10.0.2.2:5556\""
        )
        .unwrap();
        drop(file);

        let config = Config::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.sensor.device_name, "hostcam");
        assert_eq!((config.sensor.width, config.sensor.height), (1280, 720));
        assert_eq!(config.upstream.endpoint, "10.0.2.2:5556");
        assert_eq!(config.pipeline.readout_timeout_ms, 66);
    }
}

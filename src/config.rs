//! Server configuration using Figment.
//!
//! Configuration is assembled from, in increasing priority:
//! 1. Built-in defaults (control port 5025, data port 50101, ...)
//! 2. An optional TOML file given on the command line
//! 3. Environment variables prefixed with `PICOSCPI_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use picoscpi::config::ServerConfig;
//!
//! // PICOSCPI_SERVER__CONTROL_PORT=6000 overrides the file
//! let config = ServerConfig::load(Some("picoscpi.toml".as_ref()))?;
//! config.validate()?;
//! println!("control port: {}", config.server.control_port);
//! # Ok::<(), picoscpi::error::ServerError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::capture::DEFAULT_BUFFER_SAMPLES;
use crate::error::ServerError;
use crate::hardware::driver::{CaptureRequest, GeneratorConfig, TriggerConfig};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PICOSCPI_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings
    pub server: NetworkConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Capture parameters and buffer size
    pub capture: CaptureConfig,
    /// Device bring-up options
    pub device: DeviceConfig,
    /// Signal generator programmed at startup
    pub generator: GeneratorConfig,
    /// Trigger programmed at startup
    pub trigger: TriggerConfig,
    /// Simulated device behaviour
    pub simulation: SimulationConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both listeners bind to
    pub bind_address: IpAddr,
    /// Port of the command listener
    pub control_port: u16,
    /// Port of the sample stream listener
    pub data_port: u16,
    /// Upper bound on one write to either client, in milliseconds. Covers
    /// control replies and sample buffers.
    pub client_write_timeout_ms: u64,
}

impl NetworkConfig {
    /// Socket address of the command listener.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.control_port)
    }

    /// Socket address of the sample stream listener.
    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.data_port)
    }

    /// Write timeout for control replies and sample buffers.
    pub fn client_write_timeout(&self) -> Duration {
        Duration::from_millis(self.client_write_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_port: 5025,
            data_port: 50101,
            client_write_timeout_ms: 2000,
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, coloured
    #[default]
    Pretty,
    /// One line per event, no colours
    Compact,
    /// JSON objects for log aggregation
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Samples kept before the trigger point
    pub pre_trigger_samples: u32,
    /// Samples kept after the trigger point
    pub post_trigger_samples: u32,
    /// Device timebase index
    pub timebase: u32,
    /// Oversampling factor
    pub oversample: u16,
    /// Sample buffer capacity
    pub buffer_samples: usize,
}

impl CaptureConfig {
    /// Request sent with every capture.
    pub fn request(&self) -> CaptureRequest {
        CaptureRequest {
            pre_trigger_samples: self.pre_trigger_samples,
            post_trigger_samples: self.post_trigger_samples,
            timebase: self.timebase,
            oversample: self.oversample,
            segment_index: 0,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let request = CaptureRequest::default();
        Self {
            pre_trigger_samples: request.pre_trigger_samples,
            post_trigger_samples: request.post_trigger_samples,
            timebase: request.timebase,
            oversample: request.oversample,
            buffer_samples: DEFAULT_BUFFER_SAMPLES,
        }
    }
}

/// Device bring-up configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Run from USB power when the external supply is missing
    pub allow_usb_power: bool,
    /// LED blinks after opening, 0 to skip
    pub led_flashes: i16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            allow_usb_power: true,
            led_flashes: 2,
        }
    }
}

/// Simulated device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time from arming to completion, in milliseconds
    pub capture_delay_ms: u64,
    /// Unit information returned by `*IDN?`
    pub identity: Vec<String>,
}

impl SimulationConfig {
    /// Unit information reported by the simulated device.
    pub fn default_identity() -> Vec<String> {
        [
            "3.7.11",
            "3.0",
            "1",
            "3206B",
            "SIM00/0001",
            "01Jan26",
            "1.0",
            "1",
            "1",
            "1.7.5.0",
            "1.2.2.0",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            capture_delay_ms: 100,
            identity: Self::default_identity(),
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ServerConfig {
    /// Load defaults, then `path` (if given), then `PICOSCPI_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ServerError> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ServerError::Configuration(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ServerError> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(ServerError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }

        // Port 0 asks the OS for an ephemeral port, so only fixed ports can clash
        if self.server.control_port != 0 && self.server.control_port == self.server.data_port {
            return Err(ServerError::Configuration(format!(
                "control_port and data_port are both {}",
                self.server.control_port
            )));
        }

        if self.capture.buffer_samples == 0 {
            return Err(ServerError::Configuration(
                "buffer_samples must be greater than 0".to_string(),
            ));
        }

        let total = self.capture.request().total_samples();
        if total == 0 {
            return Err(ServerError::Configuration(
                "capture must request at least one sample".to_string(),
            ));
        }
        if total > self.capture.buffer_samples {
            return Err(ServerError::Configuration(format!(
                "capture of {} samples does not fit buffer of {}",
                total, self.capture.buffer_samples
            )));
        }

        if !self.trigger.level_volts.is_finite() {
            return Err(ServerError::Configuration(
                "trigger level must be a finite voltage".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ServerError> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Configuration(e.to_string()))
    }
}

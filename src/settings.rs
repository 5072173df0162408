//! Configuration loading
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file
//! (`argus.toml`, or the path in `ARGUS_CONFIG`), then the process environment.
//! Environment keys are unprefixed so existing camera deployments keep working.

use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::{BrokerConfig, CaptureConfig, Config, DetectorConfig, PipelineConfig};

const DEFAULT_CONFIG_FILE: &str = "argus.toml";
const DEFAULT_YOLO_PORT: u16 = 8080;

/// Values treated as "off" for boolean-ish environment flags
const FALSEY_VALUES: [&str; 4] = ["", "0", "false", "False"];

/// Flat, environment-shaped settings as read from the sources
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub message_broker_host: Option<String>,
    pub message_broker_exchange_name: String,
    pub rtsp_endpoint: Option<String>,
    pub yolo_host: Option<String>,
    pub yolo_port: u16,
    pub threshold: String,
    pub include_image: Option<String>,
    pub image_save_path: Option<PathBuf>,
    /// Seconds; zero disables the staleness watchdog
    pub max_time_since_last_frame: u64,
    pub broker_connect_retries: u32,
    pub broker_retry_interval: u64,
    pub detector_timeout: u64,
    pub broker_publish_timeout: u64,
    pub stream_read_timeout_ms: u64,
}

impl Settings {
    /// Builder pre-populated with defaults, without any file or environment source
    pub fn builder() -> Result<ConfigBuilder<DefaultState>> {
        let capture = CaptureConfig::default();
        let detector = DetectorConfig::default();
        let broker = BrokerConfig::default();

        let builder = config::Config::builder()
            .set_default("message_broker_exchange_name", broker.exchange)?
            .set_default("yolo_port", DEFAULT_YOLO_PORT as i64)?
            .set_default("threshold", detector.threshold.to_string())?
            .set_default(
                "max_time_since_last_frame",
                capture.staleness_window.map_or(0, |w| w.as_secs()) as i64,
            )?
            .set_default("broker_connect_retries", broker.connect_retries as i64)?
            .set_default("broker_retry_interval", broker.retry_interval.as_secs() as i64)?
            .set_default("detector_timeout", detector.timeout.as_secs() as i64)?
            .set_default("broker_publish_timeout", broker.publish_timeout.as_secs() as i64)?
            .set_default("stream_read_timeout_ms", capture.read_timeout.as_millis() as i64)?;
        Ok(builder)
    }

    /// Load settings from the config file (if any) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("ARGUS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let settings = Self::builder()?
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::default())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validate and convert into the runtime configuration
    pub fn into_config(self) -> Result<Config> {
        let broker = self.broker_config()?;
        let stream = required(self.rtsp_endpoint, "RTSP_ENDPOINT")?;
        let yolo_host = required(self.yolo_host, "YOLO_HOST")?;

        let threshold: f32 = self
            .threshold
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("THRESHOLD is not a number: {:?}", self.threshold)))?;

        let staleness_window = match self.max_time_since_last_frame {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Config {
            capture: CaptureConfig {
                stream,
                staleness_window,
                read_timeout: Duration::from_millis(self.stream_read_timeout_ms),
                ..CaptureConfig::default()
            },
            detector: DetectorConfig {
                endpoint: format!("http://{}:{}/detect", yolo_host, self.yolo_port),
                threshold,
                timeout: Duration::from_secs(self.detector_timeout),
            },
            broker,
            pipeline: PipelineConfig {
                include_image: is_truthy(self.include_image.as_deref()),
                image_save_path: self.image_save_path.filter(|p| !p.as_os_str().is_empty()),
                ..PipelineConfig::default()
            },
        })
    }
}

impl Settings {
    /// Just the broker part, for tools that only talk to the exchange
    pub fn broker_config(&self) -> Result<BrokerConfig> {
        let host = required(self.message_broker_host.clone(), "MESSAGE_BROKER_HOST")?;
        if self.broker_connect_retries == 0 {
            return Err(Error::Config("BROKER_CONNECT_RETRIES must be at least 1".into()));
        }
        Ok(BrokerConfig {
            host,
            exchange: self.message_broker_exchange_name.clone(),
            connect_retries: self.broker_connect_retries,
            retry_interval: Duration::from_secs(self.broker_retry_interval),
            publish_timeout: Duration::from_secs(self.broker_publish_timeout),
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Config(format!("{} must be set", name))),
    }
}

pub fn is_truthy(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !FALSEY_VALUES.contains(&v),
    }
}

pub mod broker;
pub mod capture;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod settings;
pub mod utils;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSource};
pub use detect::{Detection, DetectionClient};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{DetectionEvent, Pipeline};
pub use settings::Settings;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub broker: BrokerConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub stream: String,
    /// No successful read within this window is fatal; `None` disables the watchdog
    pub staleness_window: Option<Duration>,
    pub read_timeout: Duration,
    /// Pause after a failed read so a dead decoder doesn't spin the thread
    pub error_backoff: Duration,
    /// How long shutdown waits for the acquisition thread before detaching it
    pub stop_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub endpoint: String,
    pub threshold: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub exchange: String,
    pub connect_retries: u32,
    pub retry_interval: Duration,
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub include_image: bool,
    pub image_save_path: Option<PathBuf>,
    pub no_frame_delay: Duration,
    pub idle_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stream: String::new(),
            staleness_window: Some(Duration::from_secs(30)),
            read_timeout: Duration::from_millis(500),
            error_backoff: Duration::from_millis(10),
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            threshold: 0.25,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            exchange: "observed_cam_events".into(),
            connect_retries: 5,
            retry_interval: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            include_image: false,
            image_save_path: None,
            no_frame_delay: Duration::from_millis(100),
            idle_delay: Duration::from_millis(500),
        }
    }
}

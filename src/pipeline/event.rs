use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::detect::Detection;

/// Message published for every detection
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvent {
    pub stream: String,
    /// ISO-8601, UTC with explicit offset
    pub time: String,
    pub detection: Detection,
    /// Base64 PNG of the detection's crop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl DetectionEvent {
    pub fn new(stream: &str, time: DateTime<Utc>, detection: Detection) -> Self {
        Self {
            stream: stream.to_string(),
            time: time.to_rfc3339_opts(SecondsFormat::Micros, false),
            detection,
            image: None,
        }
    }

    pub fn with_image(mut self, png: &[u8]) -> Self {
        self.image = Some(STANDARD.encode(png));
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

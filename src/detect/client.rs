use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument};

use crate::capture::Frame;
use crate::detect::{encode_png, parse_detections, Detection};
use crate::error::DetectError;
use crate::DetectorConfig;

/// Anything that turns an encoded frame into detections
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, png: Bytes, threshold: f32) -> Result<Vec<Detection>, DetectError>;

    /// Encode `frame` and run it through the detector
    async fn detect_frame(
        &self,
        frame: &Frame,
        threshold: f32,
    ) -> Result<Vec<Detection>, DetectError> {
        let png = encode_png(&frame.image)?;
        self.detect(png, threshold).await
    }
}

/// HTTP client for the object-detection service (`POST {endpoint}`)
pub struct DetectionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl DetectionClient {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Detector for DetectionClient {
    #[instrument(skip(self, png), fields(bytes = png.len()))]
    async fn detect(&self, png: Bytes, threshold: f32) -> Result<Vec<Detection>, DetectError> {
        let form = Form::new()
            .part(
                "image_file",
                Part::bytes(png.to_vec())
                    .file_name("frame.png")
                    .mime_str("image/png")?,
            )
            .text("threshold", threshold.to_string());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        let detections = parse_detections(&body)?;
        debug!(count = detections.len(), "Detector responded");
        Ok(detections)
    }
}

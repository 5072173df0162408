//! Capture → detect → publish loop

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use image::imageops;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerConnection, Session};
use crate::capture::{Frame, FrameSource};
use crate::detect::{encode_png, Detection, Detector};
use crate::error::{Error, Result};
use crate::pipeline::{DetectionEvent, SnapshotWriter};
use crate::{BrokerConfig, DetectorConfig, PipelineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    WaitingForFrame,
    Detecting,
    Formatting,
    Publishing,
    Idle,
}

/// What a single cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing captured yet
    NoFrame,
    /// Encoding or detection failed, nothing published
    Skipped,
    /// Number of events published
    Published(usize),
}

pub struct Pipeline<D, S: Session> {
    source: FrameSource,
    detector: D,
    broker: BrokerConnection<S>,
    exchange: String,
    threshold: f32,
    config: PipelineConfig,
    snapshots: Option<SnapshotWriter>,
    state: PipelineState,
}

impl<D: Detector, S: Session> Pipeline<D, S> {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder<D, S> {
        PipelineBuilder::new(config)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Loop until `shutdown` resolves or a fatal error occurs.
    ///
    /// The frame source is stopped and the broker closed on every exit path.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(stream = %self.source.locator(), "Capturing frames");

        let result = tokio::select! {
            result = self.run_loop() => result,
            _ = shutdown => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!(error = %e, kind = ?e.kind(), "Pipeline stopped");
        }

        self.source.shutdown().await;
        let closed = self.broker.close().await;

        match (result, closed) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e.into()),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            let delay = match self.run_cycle().await? {
                CycleOutcome::NoFrame => self.config.no_frame_delay,
                CycleOutcome::Skipped | CycleOutcome::Published(_) => self.config.idle_delay,
            };
            self.state = PipelineState::Idle;
            tokio::time::sleep(delay).await;
        }
    }

    /// Run one capture → detect → publish pass.
    ///
    /// Only fatal conditions (stale stream, broker failure) are returned as
    /// errors; detection problems show up as [`CycleOutcome::Skipped`].
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.state = PipelineState::WaitingForFrame;
        let Some(frame) = self.source.get_frame()? else {
            return Ok(CycleOutcome::NoFrame);
        };
        let time = Utc::now();

        self.state = PipelineState::Detecting;
        let detections = match self.detect(&frame).await {
            Some(detections) => detections,
            None => {
                metrics::counter!("argus_cycles_skipped_total").increment(1);
                return Ok(CycleOutcome::Skipped);
            }
        };

        self.state = PipelineState::Formatting;
        let stream = self.source.locator().to_string();
        let events: Vec<DetectionEvent> = detections
            .into_iter()
            .map(|detection| {
                info!(label = %detection.label, confidence = detection.confidence, "Got detection");
                DetectionEvent::new(&stream, time, detection)
            })
            .collect();

        self.state = PipelineState::Publishing;
        for event in &events {
            let body = match self.crop(&frame, &event.detection) {
                Some(png) => event.clone().with_image(&png).to_json(),
                None => event.to_json(),
            };
            let body = match body {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "Failed to serialize event");
                    continue;
                }
            };
            self.broker.publish(&self.exchange, &body).await?;
            metrics::counter!("argus_events_published_total").increment(1);
        }

        if let Some(snapshots) = &self.snapshots {
            if !events.is_empty() {
                if let Err(e) = snapshots.save(&stream, time, &frame.image, &events) {
                    warn!(error = %e, "Failed to save snapshot");
                }
            }
        }

        Ok(CycleOutcome::Published(events.len()))
    }

    async fn detect(&self, frame: &Frame) -> Option<Vec<Detection>> {
        match self.detector.detect_frame(frame, self.threshold).await {
            Ok(detections) => {
                debug!(count = detections.len(), sequence = frame.meta.sequence, "Frame processed");
                Some(detections)
            }
            Err(e) => {
                warn!(error = %e, "Detection failed, skipping frame");
                None
            }
        }
    }

    /// PNG of the detection's region, when images are requested and the box overlaps the frame
    fn crop(&self, frame: &Frame, detection: &Detection) -> Option<Bytes> {
        if !self.config.include_image {
            return None;
        }
        let (width, height) = frame.dimensions();
        let Some(region) = detection.bbox.crop_region(width, height) else {
            debug!(label = %detection.label, "Detection box outside frame, no image attached");
            return None;
        };

        let sub = imageops::crop_imm(&frame.image, region.x, region.y, region.width, region.height)
            .to_image();
        match encode_png(&sub) {
            Ok(png) => Some(png),
            Err(e) => {
                warn!(error = %e, "Failed to encode crop");
                None
            }
        }
    }
}

/// Assembles a [`Pipeline`] from its collaborators
pub struct PipelineBuilder<D, S: Session> {
    config: PipelineConfig,
    exchange: String,
    threshold: f32,
    source: Option<FrameSource>,
    detector: Option<D>,
    broker: Option<BrokerConnection<S>>,
}

impl<D: Detector, S: Session> PipelineBuilder<D, S> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            exchange: BrokerConfig::default().exchange,
            threshold: DetectorConfig::default().threshold,
            source: None,
            detector: None,
            broker: None,
        }
    }

    pub fn source(mut self, source: FrameSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn detector(mut self, detector: D) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn broker(mut self, broker: BrokerConnection<S>) -> Self {
        self.broker = Some(broker);
        self
    }

    // Overrides the default exchange name.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn include_image(mut self, include_image: bool) -> Self {
        self.config.include_image = include_image;
        self
    }

    pub fn image_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.image_save_path = Some(path.into());
        self
    }

    // Sleep between cycles; `no_frame` applies while nothing has been captured.
    pub fn delays(mut self, no_frame: Duration, idle: Duration) -> Self {
        self.config.no_frame_delay = no_frame;
        self.config.idle_delay = idle;
        self
    }

    /// Assemble the pipeline.
    ///
    /// On failure the broker connection, if one was supplied, is closed before
    /// the error is returned.
    pub async fn build(mut self) -> Result<Pipeline<D, S>> {
        let missing = if self.source.is_none() {
            Some("frame source")
        } else if self.detector.is_none() {
            Some("detector")
        } else if self.broker.is_none() {
            Some("broker connection")
        } else {
            None
        };
        if let Some(part) = missing {
            let error = Error::Config(format!("{} not set", part));
            return Err(self.abandon(error).await);
        }

        let snapshots = match &self.config.image_save_path {
            Some(path) => match SnapshotWriter::create(path) {
                Ok(writer) => Some(writer),
                Err(e) => return Err(self.abandon(e.into()).await),
            },
            None => None,
        };

        match (self.source, self.detector, self.broker) {
            (Some(source), Some(detector), Some(broker)) => Ok(Pipeline {
                source,
                detector,
                broker,
                exchange: self.exchange,
                threshold: self.threshold,
                config: self.config,
                snapshots,
                state: PipelineState::Idle,
            }),
            _ => Err(Error::Config("incomplete pipeline".into())),
        }
    }

    async fn abandon(&mut self, error: Error) -> Error {
        if let Some(broker) = self.broker.as_mut() {
            if let Err(e) = broker.close().await {
                warn!(error = %e, "Failed to close broker connection");
            }
        }
        error
    }
}

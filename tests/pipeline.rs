use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus::broker::{BrokerConnection, Connector, RetryPolicy, Session};
use argus::capture::{FrameSource, StreamReader};
use argus::detect::{parse_detections, Detection, Detector};
use argus::error::{BrokerError, CaptureError, DetectError};
use argus::pipeline::snapshot::METADATA_KEYWORD;
use argus::pipeline::{CycleOutcome, Pipeline, PipelineBuilder, PipelineState};
use argus::{CaptureConfig, ErrorKind, PipelineConfig};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use serde_json::{json, Value};

const STREAM: &str = "rtsp://camera.local/front";

/// Endless stream of identical frames
struct StillCamera;

impl StreamReader for StillCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(Some(RgbImage::from_pixel(64, 48, Rgb([30, 60, 90]))))
    }
}

/// A camera whose decoder never yields
struct DeadCamera;

impl StreamReader for DeadCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        std::thread::sleep(Duration::from_millis(1));
        Err(CaptureError::Read("no route to host".into()))
    }
}

/// A decoder call that never comes back
struct HungCamera;

impl StreamReader for HungCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        std::thread::sleep(Duration::from_secs(3600));
        Ok(None)
    }
}

/// Replays canned detector responses, repeating the last one
struct ScriptedDetector {
    responses: Vec<&'static str>,
    calls: AtomicU32,
}

impl ScriptedDetector {
    fn new(responses: &[&'static str]) -> Self {
        Self {
            responses: responses.to_vec(),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, png: Bytes, threshold: f32) -> Result<Vec<Detection>, DetectError> {
        assert!(png.starts_with(b"\x89PNG"));
        assert!((threshold - 0.25).abs() < f32::EPSILON);
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let body = self.responses[call.min(self.responses.len() - 1)];
        parse_detections(body.as_bytes())
    }
}

#[derive(Default)]
struct Published {
    messages: Vec<(String, Vec<u8>)>,
    closes: u32,
}

struct RecordingSession(Arc<Mutex<Published>>);

#[async_trait]
impl Session for RecordingSession {
    async fn declare_fanout(&mut self, _exchange: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(&mut self, exchange: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.0
            .lock()
            .unwrap()
            .messages
            .push((exchange.to_string(), body.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.0.lock().unwrap().closes += 1;
        Ok(())
    }
}

struct RecordingConnector(Arc<Mutex<Published>>);

#[async_trait]
impl Connector for RecordingConnector {
    type Session = RecordingSession;

    async fn connect(&self, _host: &str) -> Result<RecordingSession, BrokerError> {
        Ok(RecordingSession(self.0.clone()))
    }
}

fn capture_config(window: Option<Duration>) -> CaptureConfig {
    CaptureConfig {
        stream: STREAM.into(),
        staleness_window: window,
        read_timeout: Duration::from_millis(10),
        error_backoff: Duration::from_millis(1),
        stop_grace: Duration::from_millis(200),
    }
}

/// Builder wired to a recording broker, relying on the default exchange and threshold
async fn builder<R: StreamReader>(
    reader: R,
    window: Option<Duration>,
    detector: ScriptedDetector,
) -> (PipelineBuilder<ScriptedDetector, RecordingSession>, Arc<Mutex<Published>>) {
    let published = Arc::new(Mutex::new(Published::default()));
    let broker = BrokerConnection::connect(
        &RecordingConnector(published.clone()),
        "mq",
        "observed_cam_events",
        RetryPolicy::default(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let source = FrameSource::start(reader, &capture_config(window)).unwrap();

    let builder = Pipeline::builder(PipelineConfig::default())
        .source(source)
        .detector(detector)
        .broker(broker)
        .delays(Duration::from_millis(5), Duration::from_millis(5));

    (builder, published)
}

async fn pipeline<R: StreamReader>(
    reader: R,
    window: Option<Duration>,
    detector: ScriptedDetector,
    include_image: bool,
) -> (Pipeline<ScriptedDetector, RecordingSession>, Arc<Mutex<Published>>) {
    let (builder, published) = builder(reader, window, detector).await;
    let pipeline = builder.include_image(include_image).build().await.unwrap();
    (pipeline, published)
}

fn scratch_dir(name: &str) -> PathBuf {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    std::env::temp_dir().join(format!("argus-{}-{}-{}", name, std::process::id(), nanos))
}

fn png_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(png_files(&path));
        } else if path.extension().is_some_and(|ext| ext == "png") {
            found.push(path);
        }
    }
    found
}

/// Cycle until the source has produced a frame
async fn first_capture(pipeline: &mut Pipeline<ScriptedDetector, RecordingSession>) -> CycleOutcome {
    for _ in 0..500 {
        match pipeline.run_cycle().await.unwrap() {
            CycleOutcome::NoFrame => tokio::time::sleep(Duration::from_millis(5)).await,
            outcome => return outcome,
        }
    }
    panic!("source never produced a frame");
}

fn messages(published: &Arc<Mutex<Published>>) -> Vec<Value> {
    published
        .lock()
        .unwrap()
        .messages
        .iter()
        .map(|(_, body)| serde_json::from_slice(body).unwrap())
        .collect()
}

#[tokio::test]
async fn publishes_one_event_per_detection() {
    let detector = ScriptedDetector::new(&[r#"[["dog",0.9,[10,10,20,20]]]"#]);
    let (mut pipeline, published) = pipeline(StillCamera, None, detector, false).await;

    assert_eq!(first_capture(&mut pipeline).await, CycleOutcome::Published(1));
    assert_eq!(pipeline.state(), PipelineState::Publishing);

    let messages = messages(&published);
    assert_eq!(messages.len(), 1);
    let event = &messages[0];
    assert_eq!(event["stream"], STREAM);
    assert!(DateTime::parse_from_rfc3339(event["time"].as_str().unwrap()).is_ok());
    assert_eq!(event["detection"], json!(["dog", 0.9, [10, 10, 20, 20]]));
    assert!(event.get("image").is_none());
    assert_eq!(published.lock().unwrap().messages[0].0, "observed_cam_events");
}

#[tokio::test]
async fn detections_keep_detector_order() {
    let detector = ScriptedDetector::new(&[
        r#"[["person",0.8,[5,5,4,4]],["car",0.7,[30,20,10,10]],["dog",0.6,[1,1,2,2]]]"#,
    ]);
    let (mut pipeline, published) = pipeline(StillCamera, None, detector, false).await;

    assert_eq!(first_capture(&mut pipeline).await, CycleOutcome::Published(3));

    let labels: Vec<_> = messages(&published)
        .iter()
        .map(|m| m["detection"][0].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, ["person", "car", "dog"]);
}

#[tokio::test]
async fn attaches_cropped_image_when_enabled() {
    let detector = ScriptedDetector::new(&[r#"[["dog",0.9,[10,10,20,20]],["ghost",0.5,[500,500,4,4]]]"#]);
    let (mut pipeline, published) = pipeline(StillCamera, None, detector, true).await;

    assert_eq!(first_capture(&mut pipeline).await, CycleOutcome::Published(2));

    let messages = messages(&published);
    let encoded = messages[0]["image"].as_str().unwrap();
    let png = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
    let crop = image::load_from_memory(&png).unwrap();
    assert_eq!((crop.width(), crop.height()), (20, 20));

    // entirely outside the frame: published without an image
    assert!(messages[1].get("image").is_none());
}

#[tokio::test]
async fn malformed_detector_response_skips_the_cycle() {
    let detector = ScriptedDetector::new(&["<html>oops</html>", r#"[["cat",0.5,[8,8,4,4]]]"#]);
    let (mut pipeline, published) = pipeline(StillCamera, None, detector, false).await;

    assert_eq!(first_capture(&mut pipeline).await, CycleOutcome::Skipped);
    assert!(messages(&published).is_empty());

    assert_eq!(pipeline.run_cycle().await.unwrap(), CycleOutcome::Published(1));
    assert_eq!(messages(&published).len(), 1);
}

#[tokio::test]
async fn empty_detection_list_publishes_nothing() {
    let detector = ScriptedDetector::new(&["[]"]);
    let (mut pipeline, published) = pipeline(StillCamera, None, detector, false).await;

    assert_eq!(first_capture(&mut pipeline).await, CycleOutcome::Published(0));
    assert!(messages(&published).is_empty());
}

#[tokio::test]
async fn stale_stream_ends_run_with_distinct_error() {
    let detector = ScriptedDetector::new(&["[]"]);
    let (pipeline, published) =
        pipeline(DeadCamera, Some(Duration::from_millis(50)), detector, false).await;

    let err = tokio::time::timeout(Duration::from_secs(5), pipeline.run(std::future::pending()))
        .await
        .expect("watchdog never fired")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StreamStale);
    assert_eq!(published.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn stream_stuck_in_read_still_ends_run() {
    let detector = ScriptedDetector::new(&["[]"]);
    let (pipeline, published) =
        pipeline(HungCamera, Some(Duration::from_millis(50)), detector, false).await;

    let err = tokio::time::timeout(Duration::from_secs(3), pipeline.run(std::future::pending()))
        .await
        .expect("run blocked on the stuck acquisition thread")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StreamStale);
    assert_eq!(published.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn snapshots_only_cycles_with_detections() {
    let root = scratch_dir("pipeline-snapshots");
    let detector = ScriptedDetector::new(&[r#"[["dog",0.9,[10,10,20,20]]]"#, "[]"]);
    let (builder, _published) = builder(StillCamera, None, detector).await;
    let mut pipeline = builder
        .include_image(true)
        .image_save_path(&root)
        .build()
        .await
        .unwrap();

    assert_eq!(first_capture(&mut pipeline).await, CycleOutcome::Published(1));
    assert_eq!(pipeline.run_cycle().await.unwrap(), CycleOutcome::Published(0));

    let files = png_files(&root);
    assert_eq!(files.len(), 1);

    let reader = png::Decoder::new(File::open(&files[0]).unwrap())
        .read_info()
        .unwrap();
    let chunk = reader
        .info()
        .uncompressed_latin1_text
        .iter()
        .find(|c| c.keyword == METADATA_KEYWORD)
        .unwrap();
    let saved: Value = serde_json::from_str(&chunk.text).unwrap();
    assert_eq!(saved.as_array().unwrap().len(), 1);
    assert_eq!(saved[0]["detection"], json!(["dog", 0.9, [10, 10, 20, 20]]));
    // crops go out on the wire only
    assert!(saved[0].get("image").is_none());

    drop(pipeline);
    fs::remove_dir_all(root).unwrap();
}

#[tokio::test]
async fn failed_build_closes_the_broker() {
    let published = Arc::new(Mutex::new(Published::default()));
    let broker = BrokerConnection::connect(
        &RecordingConnector(published.clone()),
        "mq",
        "observed_cam_events",
        RetryPolicy::default(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let err = Pipeline::builder(PipelineConfig::default())
        .detector(ScriptedDetector::new(&["[]"]))
        .broker(broker)
        .build()
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(published.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn shutdown_releases_broker() {
    let detector = ScriptedDetector::new(&[r#"[["dog",0.9,[10,10,20,20]]]"#]);
    let (pipeline, published) = pipeline(StillCamera, None, detector, false).await;

    pipeline
        .run(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();

    let published = published.lock().unwrap();
    assert_eq!(published.closes, 1);
    assert!(!published.messages.is_empty());
}

//! GStreamer-based stream decoding (RTSP, HTTP, files)

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::capture::StreamReader;
use crate::error::CaptureError;

/// Decodes any URI GStreamer understands into packed RGB frames
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    read_timeout: gst::ClockTime,
    released: bool,
}

impl GstCapture {
    /// Build the decode pipeline for `locator` and bring it to PLAYING
    pub fn open(locator: &str, read_timeout: Duration) -> Result<Self, CaptureError> {
        let open_err = |reason: String| CaptureError::Open {
            locator: locator.to_string(),
            reason,
        };

        gst::init().map_err(|e| open_err(format!("failed to initialize GStreamer: {}", e)))?;

        let uri = Self::to_uri(locator).map_err(open_err)?;
        let pipeline_str = Self::build_pipeline_string(&uri);
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| open_err(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| open_err("failed to create pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| open_err("failed to find appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| open_err("failed to cast to AppSink".into()))?;

        // Keep only the newest decoded buffer, the pipeline loop wants freshness
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        let mut capture = Self {
            pipeline,
            appsink,
            read_timeout: gst::ClockTime::from_mseconds(read_timeout.as_millis() as u64),
            released: false,
        };
        capture.start_stream().map_err(open_err)?;

        Ok(capture)
    }

    fn to_uri(locator: &str) -> Result<String, String> {
        if locator.contains("://") {
            return Ok(locator.to_string());
        }
        let path = std::fs::canonicalize(locator).map_err(|e| e.to_string())?;
        gst::glib::filename_to_uri(path, None)
            .map(|uri| uri.to_string())
            .map_err(|e| e.to_string())
    }

    fn build_pipeline_string(uri: &str) -> String {
        format!(
            "uridecodebin uri={} ! \
             queue max-size-buffers=2 leaky=downstream ! \
             videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=appsink",
            uri
        )
    }

    fn start_stream(&mut self) -> Result<(), String> {
        info!("Starting GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| format!("failed to start pipeline: {:?}", e))?;

        // Network sources usually preroll asynchronously
        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));

        match state_change {
            Ok(gst::StateChangeSuccess::Success) => {
                info!("Pipeline started successfully");
                Ok(())
            }
            Ok(_) => {
                info!("Pipeline starting asynchronously");
                Ok(())
            }
            Err(e) => Err(format!("pipeline failed to reach PLAYING: {:?}", e)),
        }
    }

    fn stop_stream(&mut self) {
        if self.released {
            return;
        }
        info!("Stopping GStreamer pipeline");
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
        self.released = true;
    }

    fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage, CaptureError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::Read("sample contains no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::Read("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| CaptureError::Read("failed to parse video info from caps".into()))?;

        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::Read("failed to map buffer".into()))?;

        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * 3;
        let stride = info.stride()[0] as usize;

        // Rows may be padded to a 4-byte boundary
        let data = map.as_slice();
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let line = data
                .get(start..start + row_bytes)
                .ok_or_else(|| CaptureError::Read("buffer shorter than frame".into()))?;
            pixels.extend_from_slice(line);
        }

        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| CaptureError::Read("frame size mismatch".into()))
    }
}

impl StreamReader for GstCapture {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        match self.appsink.try_pull_sample(self.read_timeout) {
            Some(sample) => Self::sample_to_image(&sample).map(Some),
            None if self.appsink.is_eos() => Err(CaptureError::Read("end of stream".into())),
            None => {
                debug!("No sample within {}", self.read_timeout);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        self.stop_stream();
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

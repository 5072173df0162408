//! Latest-frame-wins acquisition
//!
//! A dedicated thread reads the stream as fast as it delivers and overwrites a
//! single shared slot. Readers copy the slot under the same lock, so they only
//! ever see a frame that was fully stored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::capture::Frame;
use crate::error::CaptureError;
use crate::CaptureConfig;

/// Source of decoded frames, driven by the acquisition thread
pub trait StreamReader: Send + 'static {
    /// Block until the next frame is decoded.
    ///
    /// `Ok(None)` means the read timed out without a frame; the caller will
    /// simply try again.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError>;

    /// Free the underlying decoder. Called once, from the acquisition thread.
    fn release(&mut self) {}
}

struct Slot {
    frame: Option<Frame>,
    last_good: Instant,
    stale: Option<Duration>,
}

struct Shared {
    slot: Mutex<Slot>,
    running: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot only holds plain data, a panicked writer can't leave it half-updated
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Continuously captures the freshest frame of a stream
pub struct FrameSource {
    locator: String,
    shared: Arc<Shared>,
    staleness_window: Option<Duration>,
    stop_grace: Duration,
    thread: Option<JoinHandle<()>>,
}

const STOP_POLL: Duration = Duration::from_millis(10);

impl FrameSource {
    /// Open `config.stream` and start acquiring. Open failures are not retried.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        #[cfg(feature = "gstreamer-pipeline")]
        {
            let reader = super::GstCapture::open(&config.stream, config.read_timeout)?;
            Self::start(reader, config)
        }

        #[cfg(not(feature = "gstreamer-pipeline"))]
        {
            Err(CaptureError::Unsupported(format!(
                "cannot open {}: built without the gstreamer-pipeline feature",
                config.stream
            )))
        }
    }

    /// Spawn the acquisition thread over an already opened reader
    pub fn start<R: StreamReader>(reader: R, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                frame: None,
                last_good: Instant::now(),
                stale: None,
            }),
            running: AtomicBool::new(true),
        });

        let worker = Acquisition {
            shared: shared.clone(),
            staleness_window: config.staleness_window,
            error_backoff: config.error_backoff,
        };

        let thread = thread::Builder::new()
            .name("stream_read_thread".into())
            .spawn(move || worker.run(reader))
            .map_err(|e| CaptureError::Open {
                locator: config.stream.clone(),
                reason: format!("failed to spawn acquisition thread: {}", e),
            })?;

        info!(stream = %config.stream, "Frame acquisition started");

        Ok(Self {
            locator: config.stream.clone(),
            shared,
            staleness_window: config.staleness_window,
            stop_grace: config.stop_grace,
            thread: Some(thread),
        })
    }

    /// Copy of the most recent frame, `None` if nothing was captured yet.
    ///
    /// Fails with [`CaptureError::Stale`] once the watchdog window has passed
    /// without a successful read.
    pub fn get_frame(&self) -> Result<Option<Frame>, CaptureError> {
        let slot = self.shared.lock();

        if let Some(silence) = slot.stale {
            return Err(CaptureError::Stale(silence));
        }
        // Also covers a read call that never returns, see `shutdown`
        if let Some(window) = self.staleness_window {
            let silence = slot.last_good.elapsed();
            if silence > window {
                return Err(CaptureError::Stale(silence));
            }
        }

        Ok(slot.frame.clone())
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Whether the acquisition thread is still reading
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the acquisition thread and wait for it to release the stream
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(stream = %self.locator, "Acquisition thread panicked");
            }
            info!(stream = %self.locator, "Frame acquisition stopped");
        }
    }

    /// Stop without blocking the runtime, waiting at most `stop_grace`.
    ///
    /// A reader wedged inside `read_frame` never sees the stop flag. Its thread
    /// is detached instead of joined and goes away with the process.
    pub async fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let deadline = Instant::now() + self.stop_grace;
        while self.is_running() && Instant::now() < deadline {
            tokio::time::sleep(STOP_POLL).await;
        }

        if self.is_running() {
            self.thread = None;
            error!(
                stream = %self.locator,
                grace = ?self.stop_grace,
                "Acquisition thread is stuck in a read, detaching it"
            );
        } else {
            // already finished, the join can't block
            self.stop();
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Acquisition {
    shared: Arc<Shared>,
    staleness_window: Option<Duration>,
    error_backoff: Duration,
}

impl Acquisition {
    fn run<R: StreamReader>(self, mut reader: R) {
        let mut sequence = 0u64;
        let mut last_good = Instant::now();

        while self.shared.running.load(Ordering::Acquire) {
            match reader.read_frame() {
                Ok(Some(image)) => {
                    sequence += 1;
                    let frame = Frame::new(image, sequence);
                    last_good = frame.timestamp;

                    let mut slot = self.shared.lock();
                    slot.frame = Some(frame);
                    slot.last_good = last_good;
                    drop(slot);

                    metrics::counter!("argus_frames_captured_total").increment(1);
                }
                Ok(None) => debug!("Stream read timed out"),
                Err(e) => {
                    warn!(error = %e, "Failed to read from stream");
                    metrics::counter!("argus_stream_read_errors_total").increment(1);
                    thread::sleep(self.error_backoff);
                }
            }

            if let Some(window) = self.staleness_window {
                let silence = last_good.elapsed();
                if silence > window {
                    error!(?silence, "Not getting frames from stream, giving up");
                    self.shared.lock().stale = Some(silence);
                    break;
                }
            }
        }

        reader.release();
        debug!(frames = sequence, "Acquisition loop exited");
    }
}

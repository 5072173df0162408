use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;

/// A decoded frame owned by whoever holds it
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixels
    pub image: RgbImage,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            image,
            meta: FrameMetadata {
                sequence,
                width,
                height,
                captured_at: Utc::now(),
            },
            timestamp: Instant::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("meta", &self.meta).finish()
    }
}

pub mod client;
pub mod detection;

use std::io::Cursor;

use bytes::Bytes;
use image::{ImageFormat, RgbImage};

use crate::error::DetectError;

pub use client::{DetectionClient, Detector};
pub use detection::{parse_detections, BoundingBox, CropRegion, Detection};

/// PNG-encode an image for transport
pub fn encode_png(image: &RgbImage) -> Result<Bytes, DetectError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(Bytes::from(buf.into_inner()))
}

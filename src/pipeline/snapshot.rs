//! Full-frame PNG snapshots with the cycle's detections embedded as a `tEXt` chunk

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Timelike, Utc};
use image::RgbImage;
use tracing::debug;

use crate::error::SnapshotError;
use crate::pipeline::DetectionEvent;
use crate::utils::make_safe_for_filename;

pub const METADATA_KEYWORD: &str = "detections";

pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    /// Create the snapshot root if needed
    pub fn create(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// `{root}/{stream}/{year}/{month}/{day}/{h}-{m}-{s}-{us}.png`
    pub fn path_for(&self, stream: &str, time: DateTime<Utc>) -> PathBuf {
        self.root
            .join(make_safe_for_filename(stream))
            .join(time.year().to_string())
            .join(time.month().to_string())
            .join(time.day().to_string())
            .join(format!(
                "{}-{}-{}-{}.png",
                time.hour(),
                time.minute(),
                time.second(),
                time.timestamp_subsec_micros()
            ))
    }

    /// Write `image` with `events` (which should carry no crops) as metadata
    pub fn save(
        &self,
        stream: &str,
        time: DateTime<Utc>,
        image: &RgbImage,
        events: &[DetectionEvent],
    ) -> Result<PathBuf, SnapshotError> {
        let path = self.path_for(stream, time);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let metadata = serde_json::to_string(events)?;

        let writer = BufWriter::new(File::create(&path)?);
        let mut encoder = png::Encoder::new(writer, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.add_text_chunk(METADATA_KEYWORD.to_string(), metadata)?;

        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;

        debug!(path = %path.display(), "Saved snapshot");
        Ok(path)
    }
}

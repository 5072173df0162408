use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::DetectError;

/// Box in frame pixel coordinates, centre based as the detector reports it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Pixel rectangle inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Region of a `frame_width` x `frame_height` frame covered by this box.
    ///
    /// Both edges are clamped to the frame. Returns `None` when nothing of the
    /// box lies inside it.
    pub fn crop_region(&self, frame_width: u32, frame_height: u32) -> Option<CropRegion> {
        let (x, x_end) = clamp_span(self.center_x, self.width, frame_width)?;
        let (y, y_end) = clamp_span(self.center_y, self.height, frame_height)?;
        Some(CropRegion {
            x,
            y,
            width: x_end - x,
            height: y_end - y,
        })
    }
}

fn clamp_span(center: f64, extent: f64, limit: u32) -> Option<(u32, u32)> {
    let half = extent / 2.0;
    let start = (center - half).trunc().max(0.0);
    let end = (center + half).trunc().min(f64::from(limit));
    (end > start).then(|| (start as u32, end as u32))
}

/// One detector result.
///
/// The detector's entry is kept verbatim so published events carry exactly
/// what the service returned, including any trailing fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    raw: Value,
}

impl Detection {
    /// Parse a `[label, confidence, [cx, cy, w, h], ...]` entry
    pub fn from_value(value: Value) -> Result<Self, DetectError> {
        let fields = match value.as_array() {
            Some(fields) if fields.len() >= 3 => fields,
            _ => return Err(malformed("expected [label, confidence, box, ...]", &value)),
        };

        let label = match &fields[0] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let confidence = fields[1]
            .as_f64()
            .ok_or_else(|| malformed("confidence is not a number", &value))?;
        let bbox = parse_box(&fields[2]).ok_or_else(|| malformed("bad bounding box", &value))?;

        Ok(Self {
            label,
            confidence,
            bbox,
            raw: value,
        })
    }
}

impl Serialize for Detection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

fn parse_box(value: &Value) -> Option<BoundingBox> {
    let coords = value.as_array()?;
    if coords.len() != 4 {
        return None;
    }
    let mut out = [0f64; 4];
    for (slot, v) in out.iter_mut().zip(coords) {
        *slot = v.as_f64().filter(|f| f.is_finite())?;
    }
    let [center_x, center_y, width, height] = out;
    Some(BoundingBox {
        center_x,
        center_y,
        width,
        height,
    })
}

fn malformed(what: &str, value: &Value) -> DetectError {
    DetectError::Protocol(format!("{}: {}", what, value))
}

/// Parse a detector response body: a JSON array of detection entries
pub fn parse_detections(body: &[u8]) -> Result<Vec<Detection>, DetectError> {
    let entries: Vec<Value> = serde_json::from_slice(body).map_err(|e| {
        let excerpt: String = String::from_utf8_lossy(body).chars().take(200).collect();
        DetectError::Protocol(format!("{} in {:?}", e, excerpt))
    })?;
    entries.into_iter().map(Detection::from_value).collect()
}

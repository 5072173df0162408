pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod source;

pub use frame::{Frame, FrameMetadata};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstCapture;
pub use source::{FrameSource, StreamReader};

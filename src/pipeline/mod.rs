pub mod event;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod snapshot;

pub use event::DetectionEvent;
pub use pipeline::{CycleOutcome, Pipeline, PipelineBuilder, PipelineState};
pub use snapshot::SnapshotWriter;

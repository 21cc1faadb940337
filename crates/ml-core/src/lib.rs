//! Detection and tracking primitives shared by the streaming pipeline.
//!
//! The detector itself is a black box behind [`ObjectDetector`]; the TorchScript
//! backend is compiled only with the `with-tch` feature. Everything downstream of
//! raw model output (class filtering, NMS, track association) lives here so it can
//! be exercised without a model.

pub mod classes;
pub mod detector;
pub mod postprocess;
pub mod tracker;
mod types;

pub use detector::{DetectorSettings, NullDetector, ObjectDetector};
pub use tracker::{ByteTracker, TrackerConfig};
pub use types::{BoundingBox, Candidate, Detection};

#[cfg(feature = "with-tch")]
pub use detector::TorchDetector;
#[cfg(feature = "with-tch")]
pub use tch;

//! Per-client vehicle tracking stream served as MJPEG over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Drives one session through decode, detect, track, draw, encode.
//! - `processing`: Detector loading and per-session tracking.
//! - `annotation`: Box and label drawing.
//! - `encoding`: JPEG encoding and multipart framing.
//! - `server`: Actix Web endpoints.
//! - `telemetry`: Tracing subscriber and Prometheus recorder.
//! - `data`: Structs passed between stages.

/// Re-export stream settings so callers can configure runs without reaching
/// into submodules.
pub use config::{StreamCliArgs, StreamConfig};
/// Start the HTTP server with a ready-made configuration.
pub use server::run_server;

pub(crate) mod annotation;
mod config;
mod data;
pub(crate) mod encoding;
pub(crate) mod pipeline;
pub(crate) mod processing;
pub(crate) mod server;
pub(crate) mod telemetry;

//! Frame ingestion backed by an external decode process.
//!
//! A [`FrameSource`] owns one decoder child process for its whole lifetime and
//! hands out fixed-size RGB frames as an iterator. Dropping the source kills
//! and reaps the decoder, so an abandoned stream never leaves it running.

mod ffmpeg;
mod types;

pub use ffmpeg::{DecoderSettings, FrameSource, RawFrameReader};
pub use types::{DecodeError, Frame, FrameFormat};

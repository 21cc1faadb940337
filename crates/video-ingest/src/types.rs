use std::{fmt, io, process::ExitStatus};

use anyhow::Error;
use thiserror::Error;

/// Raw RGB frame produced by the decode process.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Number of bytes one frame of the given size occupies on the wire.
    pub fn byte_len(width: u32, height: u32, format: FrameFormat) -> usize {
        (width as usize) * (height as usize) * format.bytes_per_pixel()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    /// Packed 8-bit R, G, B (ffmpeg `rgb24`).
    Rgb8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Rgb8 => 3,
        }
    }

    /// Pixel format name passed to the decoder.
    pub fn ffmpeg_pix_fmt(self) -> &'static str {
        match self {
            FrameFormat::Rgb8 => "rgb24",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to spawn decoder {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read decoder output")]
    Io(#[from] io::Error),
    #[error("decoder exited with {status}: {diagnostics}")]
    ProcessFailed {
        status: ExitStatus,
        diagnostics: String,
    },
    #[error(transparent)]
    Other(#[from] Error),
}

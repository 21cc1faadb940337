//! Configuration parsing for the streaming server.
//!
//! This module owns translation of CLI arguments into a `StreamConfig` struct
//! which downstream stages use without re-parsing flags.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Result, bail};
use clap::Args;
use ml_core::{DetectorSettings, TrackerConfig};
use video_ingest::DecoderSettings;

const DEFAULT_VIDEO: &str = "traffic.mp4";
const DEFAULT_MODEL: &str = "yolo11n.torchscript";
const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
/// COCO car, bus, truck.
const DEFAULT_CLASSES: [usize; 3] = [2, 5, 7];
const DEFAULT_CONFIDENCE: f32 = 0.1;
const DEFAULT_IOU: f32 = 0.5;
const DEFAULT_IMGSZ: u32 = 1280;
const DEFAULT_JPEG_QUALITY: u8 = 95;
const DEFAULT_PORT: u16 = 8000;

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stream session.
pub struct StreamConfig {
    /// Video file decoded from the start for every session.
    pub video_path: PathBuf,
    /// TorchScript weights loaded once at startup.
    pub model_path: PathBuf,
    /// Decoder executable.
    pub ffmpeg_path: PathBuf,
    /// Width every decoded frame is scaled to.
    pub width: u32,
    /// Height every decoded frame is scaled to.
    pub height: u32,
    /// Confidence, NMS and class filtering applied to model output.
    pub detector: DetectorSettings,
    /// Track association thresholds; a fresh tracker is built per session.
    pub tracker: TrackerConfig,
    /// JPEG quality for the MJPEG stream (1-100).
    pub jpeg_quality: u8,
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,
    /// Run inference on the CPU even when CUDA is available.
    pub use_cpu: bool,
    /// Telemetry and instrumentation options.
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// CLI arguments accepted by the server.
#[derive(Debug, Args)]
pub struct StreamCliArgs {
    /// Video file to stream [default: traffic.mp4].
    #[arg(long = "video", value_name = "PATH")]
    pub video: Option<PathBuf>,
    /// TorchScript detector weights [default: yolo11n.torchscript].
    #[arg(long = "model", value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// Decoder executable [default: ffmpeg].
    #[arg(long = "ffmpeg", value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,
    /// Output frame width in pixels [default: 1280].
    #[arg(long = "width", value_name = "PX")]
    pub width: Option<u32>,
    /// Output frame height in pixels [default: 720].
    #[arg(long = "height", value_name = "PX")]
    pub height: Option<u32>,
    /// Comma separated COCO class ids to keep [default: 2,5,7].
    #[arg(long = "classes", value_name = "IDS", value_delimiter = ',')]
    pub classes: Vec<usize>,
    /// Minimum detection confidence [default: 0.1].
    #[arg(long = "conf", value_name = "SCORE")]
    pub confidence: Option<f32>,
    /// IoU threshold for duplicate suppression [default: 0.5].
    #[arg(long = "iou", value_name = "RATIO")]
    pub iou: Option<f32>,
    /// Detector input resolution [default: 1280].
    #[arg(long = "imgsz", value_name = "PX")]
    pub imgsz: Option<u32>,
    /// JPEG quality used by the encoder (1-100) [default: 95].
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,
    /// Listen address [default: 127.0.0.1:8000].
    #[arg(long = "bind", value_name = "ADDR")]
    pub bind: Option<SocketAddr>,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Frames a lost track is kept before its id is retired [default: 30].
    #[arg(long = "track-buffer", value_name = "FRAMES")]
    pub track_buffer: Option<u32>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<StreamCliArgs> for StreamConfig {
    type Error = anyhow::Error;

    fn try_from(args: StreamCliArgs) -> Result<Self> {
        let width = args.width.unwrap_or(DEFAULT_WIDTH);
        let height = args.height.unwrap_or(DEFAULT_HEIGHT);
        if width == 0 || height == 0 {
            bail!("Frame width and height must be positive integers");
        }

        let confidence_threshold = args.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        if !(0.0..=1.0).contains(&confidence_threshold) {
            bail!("--conf must be between 0 and 1");
        }
        let iou_threshold = args.iou.unwrap_or(DEFAULT_IOU);
        if !(0.0..=1.0).contains(&iou_threshold) {
            bail!("--iou must be between 0 and 1");
        }

        let input_size = args.imgsz.unwrap_or(DEFAULT_IMGSZ);
        if input_size == 0 || input_size % 32 != 0 {
            bail!("--imgsz must be a positive multiple of 32");
        }

        let classes = if args.classes.is_empty() {
            DEFAULT_CLASSES.to_vec()
        } else {
            args.classes
        };

        let jpeg_quality = args.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let mut tracker = TrackerConfig::default();
        if let Some(frames) = args.track_buffer {
            tracker.max_lost_frames = frames;
        }
        // Candidates the detector lets through must at least be able to rescue a track.
        tracker.low_score_threshold = tracker.low_score_threshold.min(confidence_threshold);

        Ok(Self {
            video_path: args.video.unwrap_or_else(|| DEFAULT_VIDEO.into()),
            model_path: args.model.unwrap_or_else(|| DEFAULT_MODEL.into()),
            ffmpeg_path: args.ffmpeg.unwrap_or_else(|| DEFAULT_FFMPEG.into()),
            width,
            height,
            detector: DetectorSettings {
                confidence_threshold,
                iou_threshold,
                input_size,
                classes,
            },
            tracker,
            jpeg_quality,
            bind: args
                .bind
                .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))),
            use_cpu: args.use_cpu,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

impl StreamConfig {
    /// Decoder invocation for one session.
    pub fn decoder_settings(&self) -> DecoderSettings {
        DecoderSettings {
            program: self.ffmpeg_path.clone(),
            input: self.video_path.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

use anyhow::Result;
use clap::Parser;

use crate::vision::{StreamCliArgs, StreamConfig};

/// Serve a video file as an annotated MJPEG stream with tracked vehicle ids.
#[derive(Debug, Parser)]
#[command(name = "traffic-stream", version)]
pub struct Cli {
    #[command(flatten)]
    pub stream: StreamCliArgs,
}

/// Parse process arguments into a validated configuration.
pub fn load_config() -> Result<StreamConfig> {
    StreamConfig::try_from(Cli::parse().stream)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    fn parse(args: &[&str]) -> Result<StreamConfig> {
        let cli = Cli::try_parse_from(std::iter::once("traffic-stream").chain(args.iter().copied()))?;
        StreamConfig::try_from(cli.stream)
    }

    #[test]
    fn defaults_match_traffic_setup() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.video_path.to_str(), Some("traffic.mp4"));
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.detector.classes, vec![2, 5, 7]);
        assert_eq!(config.detector.confidence_threshold, 0.1);
        assert_eq!(config.detector.iou_threshold, 0.5);
        assert_eq!(config.detector.input_size, 1280);
        assert_eq!(config.jpeg_quality, 95);
        assert_eq!(config.bind, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
        assert!(config.telemetry.chrome_trace_path.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--video",
            "clip.mkv",
            "--classes",
            "0,2",
            "--conf",
            "0.05",
            "--width",
            "640",
            "--height",
            "360",
            "--track-buffer",
            "10",
            "--bind",
            "0.0.0.0:9000",
        ])
        .unwrap();
        assert_eq!(config.video_path.to_str(), Some("clip.mkv"));
        assert_eq!(config.detector.classes, vec![0, 2]);
        assert_eq!(config.tracker.max_lost_frames, 10);
        assert_eq!(config.tracker.low_score_threshold, 0.05);

        let decoder = config.decoder_settings();
        assert_eq!((decoder.width, decoder.height), (640, 360));
        assert_eq!(decoder.program.to_str(), Some("ffmpeg"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse(&["--conf", "1.5"]).is_err());
        assert!(parse(&["--iou", "-0.1"]).is_err());
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--imgsz", "1000"]).is_err());
    }
}

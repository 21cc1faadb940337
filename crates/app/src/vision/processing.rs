//! Detection and tracking for one stream session.
//!
//! The detector is loaded once and shared read-only between sessions; every
//! session owns its own tracker so track ids never leak between clients.

use std::sync::Arc;

use anyhow::Result;
use ml_core::{ByteTracker, Detection, ObjectDetector, TrackerConfig};
use tracing::{debug, warn};
use video_ingest::Frame;

use crate::vision::config::StreamConfig;

/// Detector handle plus the tracker state private to one session.
pub(crate) struct SessionTracker {
    detector: Arc<dyn ObjectDetector>,
    tracker: ByteTracker,
}

impl SessionTracker {
    pub(crate) fn new(detector: Arc<dyn ObjectDetector>, config: TrackerConfig) -> Self {
        Self {
            detector,
            tracker: ByteTracker::new(config),
        }
    }

    /// Detect and track objects in `frame`.
    ///
    /// A detector failure is logged and treated as an empty frame without
    /// advancing the tracker, so the stream keeps flowing.
    pub(crate) fn process(&mut self, frame: &Frame, frame_number: u64) -> Vec<Detection> {
        let candidates = match self.detector.detect(frame) {
            Ok(candidates) => candidates,
            Err(err) => {
                metrics::counter!("stream_detector_errors_total").increment(1);
                warn!(
                    frame = frame_number,
                    detector = self.detector.name(),
                    "detection failed: {err:#}"
                );
                return Vec::new();
            }
        };

        let track_ids = self.tracker.update(&candidates);
        let detections: Vec<Detection> = candidates
            .iter()
            .zip(track_ids)
            .filter_map(|(candidate, track_id)| {
                Detection::from_candidate(candidate, track_id, frame.width, frame.height)
            })
            .collect();

        debug!(
            frame = frame_number,
            candidates = candidates.len(),
            detections = detections.len(),
            active_tracks = self.tracker.active_tracks(),
            "frame processed"
        );
        detections
    }
}

/// Load the detector backend selected at build time.
#[cfg(feature = "with-tch")]
pub(crate) fn load_detector(config: &StreamConfig) -> Result<Arc<dyn ObjectDetector>> {
    use anyhow::Context;
    use ml_core::{TorchDetector, tch::Device};
    use tracing::info;

    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    let detector = TorchDetector::new(&config.model_path, device, config.detector.clone())
        .with_context(|| format!("failed to load detector {}", config.model_path.display()))?;
    info!(
        model = %config.model_path.display(),
        device = ?detector.device(),
        input_size = config.detector.input_size,
        "detector ready"
    );
    Ok(Arc::new(detector))
}

/// Load the detector backend selected at build time.
#[cfg(not(feature = "with-tch"))]
pub(crate) fn load_detector(config: &StreamConfig) -> Result<Arc<dyn ObjectDetector>> {
    warn!(
        model = %config.model_path.display(),
        "built without the `with-tch` feature; frames are streamed without detections"
    );
    Ok(Arc::new(ml_core::NullDetector))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use ml_core::{BoundingBox, Candidate};
    use video_ingest::FrameFormat;

    use super::*;

    /// Replays a fixed list of per-frame results.
    struct ScriptedDetector {
        frames: Mutex<Vec<Result<Vec<Candidate>>>>,
    }

    impl ScriptedDetector {
        fn new(mut frames: Vec<Result<Vec<Candidate>>>) -> Self {
            frames.reverse();
            Self {
                frames: Mutex::new(frames),
            }
        }
    }

    impl ObjectDetector for ScriptedDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<Candidate>> {
            self.frames.lock().unwrap().pop().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn frame() -> Frame {
        Frame {
            data: vec![0; Frame::byte_len(640, 360, FrameFormat::Rgb8)],
            width: 640,
            height: 360,
            timestamp_ms: 0,
            format: FrameFormat::Rgb8,
        }
    }

    fn truck(x: f32, confidence: f32) -> Candidate {
        Candidate {
            bbox: BoundingBox::new(x, 100.0, x + 120.0, 180.0),
            class_id: 7,
            confidence,
        }
    }

    #[test]
    fn tracked_objects_keep_ids_across_frames() {
        let detector = ScriptedDetector::new(vec![
            Ok(vec![truck(10.0, 0.9)]),
            Ok(vec![truck(14.0, 0.9)]),
            Ok(vec![truck(18.0, 0.9), truck(400.0, 0.8)]),
        ]);
        let mut session = SessionTracker::new(Arc::new(detector), TrackerConfig::default());

        let first = session.process(&frame(), 0);
        let second = session.process(&frame(), 1);
        let third = session.process(&frame(), 2);

        assert_eq!(first[0].track_id, Some(1));
        assert_eq!(first[0].class_name, "truck");
        assert_eq!(second[0].track_id, Some(1));
        assert_eq!(third[0].track_id, Some(1));
        assert_eq!(third[1].track_id, Some(2));
    }

    #[test]
    fn detector_error_yields_empty_frame_and_keeps_tracks() {
        let detector = ScriptedDetector::new(vec![
            Ok(vec![truck(10.0, 0.9)]),
            Err(anyhow!("cuda out of memory")),
            Ok(vec![truck(12.0, 0.9)]),
        ]);
        let mut session = SessionTracker::new(Arc::new(detector), TrackerConfig::default());

        session.process(&frame(), 0);
        assert!(session.process(&frame(), 1).is_empty());
        assert_eq!(session.process(&frame(), 2)[0].track_id, Some(1));
    }

    #[test]
    fn boxes_outside_the_frame_are_dropped() {
        let outside = Candidate {
            bbox: BoundingBox::new(700.0, 10.0, 800.0, 50.0),
            class_id: 2,
            confidence: 0.9,
        };
        let detector = ScriptedDetector::new(vec![Ok(vec![outside, truck(10.0, 0.9)])]);
        let mut session = SessionTracker::new(Arc::new(detector), TrackerConfig::default());

        let detections = session.process(&frame(), 0);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, [10, 100, 130, 180]);
    }

    #[cfg(not(feature = "with-tch"))]
    #[test]
    fn default_build_uses_null_detector() {
        use crate::vision::StreamCliArgs;
        use clap::Parser;

        #[derive(Parser)]
        struct Args {
            #[command(flatten)]
            stream: StreamCliArgs,
        }

        let config = StreamConfig::try_from(Args::parse_from(["test"]).stream).unwrap();
        assert_eq!(load_detector(&config).unwrap().name(), "none");
    }
}

use anyhow::Result;
use video_ingest::Frame;

use crate::Candidate;

/// Knobs applied to raw model output before tracking.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Candidates scoring below this are discarded.
    pub confidence_threshold: f32,
    /// Same-class boxes overlapping a stronger box by more than this are suppressed.
    pub iou_threshold: f32,
    /// Square model input resolution in pixels.
    pub input_size: u32,
    /// COCO class ids to keep; empty keeps every class.
    pub classes: Vec<usize>,
}

impl DetectorSettings {
    pub fn allows(&self, class_id: usize) -> bool {
        self.classes.is_empty() || self.classes.contains(&class_id)
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.1,
            iou_threshold: 0.5,
            input_size: 1280,
            classes: vec![2, 5, 7],
        }
    }
}

/// Stateless object detector shared read-only by every stream session.
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in one frame; coordinates are in frame pixels.
    fn detect(&self, frame: &Frame) -> Result<Vec<Candidate>>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Detector used when no model backend is compiled in: every frame is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl ObjectDetector for NullDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Candidate>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(feature = "with-tch")]
pub use torch::TorchDetector;

#[cfg(feature = "with-tch")]
mod torch {
    use std::{path::Path, sync::Mutex};

    use anyhow::{Context, Result, anyhow, bail};
    use image::{RgbImage, imageops::FilterType};
    use tch::{Device, Kind, Tensor};
    use video_ingest::{Frame, FrameFormat};

    use super::{DetectorSettings, ObjectDetector};
    use crate::{Candidate, postprocess::decode_yolo_output};

    /// TorchScript-backed YOLO detector.
    pub struct TorchDetector {
        module: Mutex<tch::CModule>,
        device: Device,
        settings: DetectorSettings,
    }

    impl TorchDetector {
        /// Load a TorchScript export (e.g. `yolo export format=torchscript`).
        pub fn new<P: AsRef<Path>>(
            model_path: P,
            device: Device,
            settings: DetectorSettings,
        ) -> Result<Self> {
            let path = model_path.as_ref();
            let mut module = tch::CModule::load_on_device(path, device)
                .with_context(|| format!("failed to load TorchScript model {}", path.display()))?;
            module.set_eval();
            Ok(Self {
                module: Mutex::new(module),
                device,
                settings,
            })
        }

        pub fn device(&self) -> Device {
            self.device
        }

        /// Resize an RGB frame to the square model input and normalise to `[0, 1]` NCHW.
        fn frame_to_tensor(&self, frame: &Frame) -> Result<Tensor> {
            if frame.format != FrameFormat::Rgb8 {
                bail!("unsupported frame format {:?}", frame.format);
            }
            let expected = Frame::byte_len(frame.width, frame.height, frame.format);
            if frame.data.len() != expected {
                bail!(
                    "unexpected frame buffer size: got {} bytes, expected {}",
                    frame.data.len(),
                    expected
                );
            }

            let size = self.settings.input_size;
            let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
                .ok_or_else(|| anyhow!("failed to wrap frame as image"))?;
            let resized = image::imageops::resize(&image, size, size, FilterType::Triangle);

            let side = size as i64;
            let tensor = Tensor::from_slice(resized.as_raw())
                .to_device(self.device)
                .to_kind(Kind::Float)
                .view([1, side, side, 3])
                .permute([0, 3, 1, 2])
                / 255.0;
            Ok(tensor)
        }
    }

    impl ObjectDetector for TorchDetector {
        fn detect(&self, frame: &Frame) -> Result<Vec<Candidate>> {
            let input = self.frame_to_tensor(frame)?;
            let output = {
                let module = self
                    .module
                    .lock()
                    .map_err(|_| anyhow!("detector module poisoned"))?;
                tch::no_grad(|| module.forward_ts(&[input]))?
            };

            let shape = output.size();
            if shape.len() != 3 || shape[0] != 1 {
                bail!("unexpected detector output shape: {shape:?}");
            }
            let channels = shape[1] as usize;
            let anchors = shape[2] as usize;

            let flat = output
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .contiguous()
                .view([-1]);
            let values = Vec::<f32>::try_from(&flat)?;

            let size = self.settings.input_size as f32;
            let scale = (frame.width as f32 / size, frame.height as f32 / size);
            decode_yolo_output(&values, channels, anchors, scale, &self.settings)
        }

        fn name(&self) -> &str {
            "torchscript"
        }
    }
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    #[test]
    fn empty_allow_list_keeps_everything() {
        let mut settings = DetectorSettings::default();
        assert!(settings.allows(2) && !settings.allows(0));
        settings.classes.clear();
        assert!(settings.allows(0));
    }

    #[test]
    fn null_detector_finds_nothing() {
        let frame = Frame {
            data: vec![0; 12],
            width: 2,
            height: 2,
            timestamp_ms: 0,
            format: FrameFormat::Rgb8,
        };
        assert!(NullDetector.detect(&frame).unwrap().is_empty());
    }
}

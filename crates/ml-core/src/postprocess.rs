//! Turns raw YOLO output into filtered, de-duplicated candidates.

use anyhow::{Result, bail};

use crate::{BoundingBox, Candidate, DetectorSettings};

/// Decode a YOLOv8/YOLO11 style output tensor laid out as `[channels, anchors]`
/// (row-major), where the first four channels are `cx, cy, w, h` in model input
/// pixels and the remaining channels are per-class scores.
///
/// Boxes are rescaled by `scale` (frame size / model input size), filtered by
/// the class allow-list and confidence threshold, then passed through NMS.
pub fn decode_yolo_output(
    output: &[f32],
    channels: usize,
    anchors: usize,
    scale: (f32, f32),
    settings: &DetectorSettings,
) -> Result<Vec<Candidate>> {
    if channels < 5 {
        bail!("detector output requires at least 5 channels (cx,cy,w,h,score), got {channels}");
    }
    if output.len() < channels * anchors {
        bail!(
            "detector output holds {} values, expected {}x{}",
            output.len(),
            channels,
            anchors
        );
    }

    let at = |channel: usize, anchor: usize| output[channel * anchors + anchor];
    let (scale_x, scale_y) = scale;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let Some((class_id, confidence)) = (4..channels)
            .map(|channel| (channel - 4, at(channel, anchor)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if confidence < settings.confidence_threshold || !settings.allows(class_id) {
            continue;
        }

        let bbox = BoundingBox::from_cxcywh(
            at(0, anchor) * scale_x,
            at(1, anchor) * scale_y,
            at(2, anchor) * scale_x,
            at(3, anchor) * scale_y,
        );
        candidates.push(Candidate {
            bbox,
            class_id,
            confidence,
        });
    }

    non_max_suppression(&mut candidates, settings.iou_threshold);
    Ok(candidates)
}

/// Per-class greedy NMS: keeps the highest scoring box and drops any later box
/// of the same class overlapping a kept one by more than `iou_threshold`.
/// Survivors are left sorted by descending confidence.
pub fn non_max_suppression(candidates: &mut Vec<Candidate>, iou_threshold: f32) {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..candidates.len() {
        let suppressed = (0..kept).any(|prev| {
            candidates[prev].class_id == candidates[index].class_id
                && candidates[prev].bbox.iou(&candidates[index].bbox) > iou_threshold
        });
        if !suppressed {
            candidates.swap(kept, index);
            kept += 1;
        }
    }
    candidates.truncate(kept);
}

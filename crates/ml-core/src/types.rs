use crate::classes::class_name;

/// Axis-aligned box in frame pixel space, corners `(x1, y1)`-`(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Integer pixel corners clamped to a `width`x`height` frame, or `None`
    /// when nothing with positive extent remains.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<[i32; 4]> {
        if width == 0 || height == 0 {
            return None;
        }
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;
        let x1 = self.x1.clamp(0.0, max_x) as i32;
        let y1 = self.y1.clamp(0.0, max_y) as i32;
        let x2 = self.x2.clamp(0.0, max_x) as i32;
        let y2 = self.y2.clamp(0.0, max_y) as i32;
        (x1 < x2 && y1 < y2).then_some([x1, y1, x2, y2])
    }
}

/// Raw detector output for one object, before track association.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

/// Detection handed to the annotator: integer box, class and optional track id.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` with `x1 < x2` and `y1 < y2`.
    pub bbox: [i32; 4],
    pub class_id: usize,
    pub class_name: &'static str,
    pub confidence: f32,
    pub track_id: Option<u32>,
}

impl Detection {
    /// Resolve a candidate against a frame; `None` when its box collapses after clamping.
    pub fn from_candidate(
        candidate: &Candidate,
        track_id: Option<u32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let bbox = candidate.bbox.to_pixels(frame_width, frame_height)?;
        Some(Self {
            bbox,
            class_id: candidate.class_id,
            class_name: class_name(candidate.class_id),
            confidence: candidate.confidence.clamp(0.0, 1.0),
            track_id,
        })
    }
}

//! ByteTrack-style multi-object tracker.
//!
//! Association runs in two passes: confident candidates are matched against
//! every live track, then weak candidates get a chance to rescue tracks that
//! are still unmatched. Motion is a constant-velocity filter per track. One
//! tracker instance belongs to exactly one stream session.

use tracing::trace;

use crate::{BoundingBox, Candidate};

/// Fraction of the estimated velocity kept across each prediction step.
const VELOCITY_DECAY: f32 = 0.95;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Candidates at or above this score take part in the first association pass.
    pub high_score_threshold: f32,
    /// Candidates between this and `high_score_threshold` may only rescue tracks.
    pub low_score_threshold: f32,
    /// Unmatched candidates at or above this score start a new track.
    pub new_track_threshold: f32,
    /// Minimum IoU for a first-pass match.
    pub high_match_iou: f32,
    /// Minimum IoU for a second-pass (rescue) match.
    pub low_match_iou: f32,
    /// Frames a track survives without a match.
    pub max_lost_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            high_score_threshold: 0.25,
            low_score_threshold: 0.1,
            new_track_threshold: 0.25,
            high_match_iou: 0.2,
            low_match_iou: 0.5,
            max_lost_frames: 30,
        }
    }
}

/// Constant-velocity filter over `[cx, cy, w, h]` with a diagonal covariance.
#[derive(Debug, Clone)]
struct KalmanBoxFilter {
    /// `[cx, cy, w, h, vx, vy, vw, vh]`
    state: [f32; 8],
    covariance: [f32; 8],
    process_noise: f32,
    measurement_noise: f32,
}

impl KalmanBoxFilter {
    fn new(bbox: &BoundingBox) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            state: [cx, cy, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            covariance: [10.0; 8],
            process_noise: 0.1,
            measurement_noise: 0.5,
        }
    }

    fn predict(&mut self) {
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
            self.state[i + 4] *= VELOCITY_DECAY;
        }
        for p in &mut self.covariance {
            *p += self.process_noise;
        }
    }

    fn update(&mut self, bbox: &BoundingBox) {
        let (cx, cy) = bbox.center();
        let measured = [cx, cy, bbox.width(), bbox.height()];
        let r = self.measurement_noise;

        for i in 0..4 {
            let residual = measured[i] - self.state[i];

            let gain = self.covariance[i] / (self.covariance[i] + r);
            self.state[i] += gain * residual;
            self.covariance[i] *= 1.0 - gain;

            let velocity_gain = self.covariance[i + 4] / (self.covariance[i + 4] + r * 10.0);
            self.state[i + 4] += velocity_gain * residual;
            self.covariance[i + 4] *= 1.0 - velocity_gain;
        }
    }

    fn bbox(&self) -> BoundingBox {
        let [cx, cy, w, h, ..] = self.state;
        BoundingBox::from_cxcywh(cx, cy, w.max(1.0), h.max(1.0))
    }
}

#[derive(Debug, Clone)]
struct Track {
    id: u32,
    filter: KalmanBoxFilter,
    frames_lost: u32,
    hits: u32,
}

/// Per-session track association state.
#[derive(Debug)]
pub struct ByteTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u32,
}

impl ByteTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Number of live (matched or recently lost) tracks.
    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Advance one frame. Returns one entry per candidate: the id of the track
    /// it continues or starts, or `None` for a weak candidate that matched nothing.
    pub fn update(&mut self, candidates: &[Candidate]) -> Vec<Option<u32>> {
        for track in &mut self.tracks {
            track.filter.predict();
        }

        let high: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].confidence >= self.config.high_score_threshold)
            .collect();
        let low: Vec<usize> = (0..candidates.len())
            .filter(|&i| {
                let score = candidates[i].confidence;
                score < self.config.high_score_threshold
                    && score >= self.config.low_score_threshold
            })
            .collect();

        let mut assigned: Vec<Option<u32>> = vec![None; candidates.len()];
        let mut track_matched = vec![false; self.tracks.len()];

        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let first_pass = self.associate(candidates, &high, &all_tracks, self.config.high_match_iou);
        self.apply_matches(candidates, &first_pass, &mut assigned, &mut track_matched);

        let remaining: Vec<usize> = (0..self.tracks.len())
            .filter(|&t| !track_matched[t])
            .collect();
        let second_pass = self.associate(candidates, &low, &remaining, self.config.low_match_iou);
        self.apply_matches(candidates, &second_pass, &mut assigned, &mut track_matched);

        for (index, candidate) in candidates.iter().enumerate() {
            if assigned[index].is_none() && candidate.confidence >= self.config.new_track_threshold
            {
                let id = self.next_id;
                self.next_id += 1;
                self.tracks.push(Track {
                    id,
                    filter: KalmanBoxFilter::new(&candidate.bbox),
                    frames_lost: 0,
                    hits: 1,
                });
                assigned[index] = Some(id);
                trace!(track = id, "track started");
            }
        }

        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if !matched {
                track.frames_lost += 1;
            }
        }
        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|track| {
            let keep = track.frames_lost <= max_lost;
            if !keep {
                trace!(track = track.id, hits = track.hits, "track expired");
            }
            keep
        });

        assigned
    }

    fn apply_matches(
        &mut self,
        candidates: &[Candidate],
        matches: &[(usize, usize)],
        assigned: &mut [Option<u32>],
        track_matched: &mut [bool],
    ) {
        for &(candidate_idx, track_idx) in matches {
            let track = &mut self.tracks[track_idx];
            track.filter.update(&candidates[candidate_idx].bbox);
            track.frames_lost = 0;
            track.hits += 1;
            assigned[candidate_idx] = Some(track.id);
            track_matched[track_idx] = true;
        }
    }

    /// Greedy IoU association, best overlaps first.
    fn associate(
        &self,
        candidates: &[Candidate],
        candidate_indices: &[usize],
        track_indices: &[usize],
        min_iou: f32,
    ) -> Vec<(usize, usize)> {
        if candidate_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut pairs = Vec::new();
        for &c in candidate_indices {
            for &t in track_indices {
                let iou = candidates[c].bbox.iou(&self.tracks[t].filter.bbox());
                if iou >= min_iou {
                    pairs.push((iou, c, t));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut used_candidates = Vec::new();
        let mut used_tracks = Vec::new();
        let mut matches = Vec::new();
        for (_, c, t) in pairs {
            if used_candidates.contains(&c) || used_tracks.contains(&t) {
                continue;
            }
            used_candidates.push(c);
            used_tracks.push(t);
            matches.push((c, t));
        }
        matches
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(x: f32, y: f32, confidence: f32) -> Candidate {
        Candidate {
            bbox: BoundingBox::new(x, y, x + 80.0, y + 40.0),
            class_id: 2,
            confidence,
        }
    }

    #[test]
    fn moving_object_keeps_its_id() {
        let mut tracker = ByteTracker::default();
        for step in 0..20 {
            let ids = tracker.update(&[car(100.0 + step as f32 * 6.0, 200.0, 0.8)]);
            assert_eq!(ids, vec![Some(1)], "step {step}");
        }
        assert_eq!(tracker.active_tracks(), 1);
    }

    #[test]
    fn ids_are_assigned_monotonically() {
        let mut tracker = ByteTracker::default();
        assert_eq!(
            tracker.update(&[car(0.0, 0.0, 0.9), car(400.0, 0.0, 0.9)]),
            vec![Some(1), Some(2)]
        );
        assert_eq!(
            tracker.update(&[car(0.0, 0.0, 0.9), car(400.0, 0.0, 0.9), car(0.0, 300.0, 0.9)]),
            vec![Some(1), Some(2), Some(3)]
        );
    }

    #[test]
    fn weak_candidate_rescues_track_but_never_starts_one() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[car(100.0, 100.0, 0.9)]);

        let ids = tracker.update(&[car(102.0, 100.0, 0.15), car(600.0, 400.0, 0.15)]);

        assert_eq!(ids, vec![Some(1), None]);
        assert_eq!(tracker.active_tracks(), 1);
    }

    #[test]
    fn expired_track_comes_back_with_new_id() {
        let mut tracker = ByteTracker::new(TrackerConfig {
            max_lost_frames: 2,
            ..TrackerConfig::default()
        });
        tracker.update(&[car(100.0, 100.0, 0.9)]);
        for _ in 0..3 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.active_tracks(), 0);

        assert_eq!(tracker.update(&[car(100.0, 100.0, 0.9)]), vec![Some(2)]);
    }

    #[test]
    fn briefly_lost_track_is_recovered() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[car(100.0, 100.0, 0.9)]);
        tracker.update(&[]);
        assert_eq!(tracker.update(&[car(101.0, 100.0, 0.9)]), vec![Some(1)]);
    }

    #[test]
    fn separate_trackers_do_not_share_ids() {
        let mut a = ByteTracker::default();
        let mut b = ByteTracker::default();
        a.update(&[car(0.0, 0.0, 0.9), car(300.0, 0.0, 0.9)]);
        assert_eq!(b.update(&[car(0.0, 0.0, 0.9)]), vec![Some(1)]);
    }

    #[test]
    fn below_low_threshold_is_ignored() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[car(100.0, 100.0, 0.9)]);
        assert_eq!(tracker.update(&[car(100.0, 100.0, 0.05)]), vec![None]);
    }
}

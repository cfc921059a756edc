/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The quality-probing state machine (§4.1).
//!
//! The original represents the evaluator's entry reason as two independent
//! tagged fields (`type`, `reason`) plus four clamp fields
//! (`min_quality_id`/`min_quality_fps`/`max_quality_id`/`max_quality_fps`)
//! that are always present but only meaningfully populated by the entry
//! point matching the current `type`. Here `type` and its payload collapse
//! into one sum type, [`Kind`], so a downgrade clamp can't be read while the
//! evaluator is in an upgrade or a fresh `Set` by construction, not by
//! convention. Where the stepping algorithm reads a clamp that belongs to a
//! *different* variant than the one currently active (the exploration and
//! too-slow regimes reference `min_quality_fps`/`min_quality_id` even while
//! downgrading), the accessor returns the original's cleared-by-default
//! value of `0`, which is the value Reset-Quality would have left there.

use crate::quality::{MAX_QUALITY_ID, QUALITY_SAMPLES};

pub const MAX_FPS: u32 = 25;
pub const MIN_FPS: u32 = 1;

/// The event that triggered the current (or most recent) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// A quality commit changed the encoded-size curve (e.g. content change).
    SizeChange,
    /// The controller's `byte_rate` belief itself changed.
    RateChange,
}

/// The evaluator's entry reason, carrying only the fields meaningful to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Generic entry, used only once at construction.
    Set,
    /// Looking for a higher quality than `min_quality_id`, which is
    /// guaranteed achievable at `min_quality_fps`.
    Upgrade {
        min_quality_id: usize,
        min_quality_fps: u32,
    },
    /// Looking for a lower quality than `max_quality_id`, which is the
    /// highest still compatible with `max_quality_fps`.
    Downgrade {
        max_quality_id: usize,
        max_quality_fps: u32,
    },
}

/// Best `(fps, quality_id)` pair observed during the walk, used as a
/// tie-break if the assumed compression-ratio monotonicity is violated.
#[derive(Debug, Clone, Copy, Default)]
struct BestSample {
    fps: u32,
    quality_id: usize,
}

/// The probing record described in §3 / §4.1.
#[derive(Debug, Clone)]
pub struct QualityEval {
    kind: Kind,
    reason: Reason,
    encoded_size_by_quality: [u64; QUALITY_SAMPLES.len()],
    best: BestSample,
}

/// Outcome of committing to a final `(quality_id, fps)` pair.
#[derive(Debug, Clone, Copy)]
pub struct Commit {
    pub quality_id: usize,
    pub fps: u32,
    pub enc_size: u64,
    pub reason: Reason,
}

impl Default for QualityEval {
    fn default() -> Self {
        QualityEval {
            kind: Kind::Set,
            reason: Reason::SizeChange,
            encoded_size_by_quality: [0; QUALITY_SAMPLES.len()],
            best: BestSample::default(),
        }
    }
}

impl QualityEval {
    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Clear all sampled sizes and the best-so-far tracker. Reset-Quality
    /// (§4.2) always follows this with a fresh `set`/`set_upgrade`/`set_downgrade`.
    pub fn clear(&mut self) {
        self.encoded_size_by_quality = [0; QUALITY_SAMPLES.len()];
        self.best = BestSample::default();
    }

    pub fn set(&mut self, reason: Reason) {
        self.clear();
        self.kind = Kind::Set;
        self.reason = reason;
    }

    pub fn set_upgrade(&mut self, reason: Reason, min_quality_id: usize, min_quality_fps: u32) {
        self.clear();
        self.kind = Kind::Upgrade {
            min_quality_id,
            min_quality_fps,
        };
        self.reason = reason;
    }

    pub fn set_downgrade(&mut self, reason: Reason, max_quality_id: usize, max_quality_fps: u32) {
        self.clear();
        self.kind = Kind::Downgrade {
            max_quality_id,
            max_quality_fps,
        };
        self.reason = reason;
    }

    pub fn record_size(&mut self, quality_id: usize, enc_size: u64) {
        self.encoded_size_by_quality[quality_id] = enc_size;
    }

    pub fn sampled_size(&self, quality_id: usize) -> u64 {
        self.encoded_size_by_quality[quality_id]
    }

    pub fn is_cleared(&self) -> bool {
        self.encoded_size_by_quality.iter().all(|&s| s == 0)
    }

    /// Number of distinct quality ids sampled so far in this walk (invariant 2, §8).
    pub fn distinct_samples(&self) -> usize {
        self.encoded_size_by_quality.iter().filter(|&&s| s != 0).count()
    }

    fn min_quality_id(&self) -> usize {
        match self.kind {
            Kind::Upgrade { min_quality_id, .. } => min_quality_id,
            _ => 0,
        }
    }

    fn min_quality_fps(&self) -> u32 {
        match self.kind {
            Kind::Upgrade { min_quality_fps, .. } => min_quality_fps,
            _ => 0,
        }
    }

    fn max_quality_id(&self) -> usize {
        match self.kind {
            Kind::Downgrade { max_quality_id, .. } => max_quality_id,
            _ => MAX_QUALITY_ID,
        }
    }

    /// `byte_rate / enc_size`, rounding toward zero; `MAX_FPS` if `enc_size == 0`
    /// so division by zero never occurs (§9).
    pub(crate) fn fps_for_size(byte_rate: u64, enc_size: u64) -> u32 {
        if enc_size == 0 {
            MAX_FPS
        } else {
            (byte_rate / enc_size) as u32
        }
    }

    /// Run one step of the evaluator for the frame just encoded at
    /// `quality_id`. Returns `Some(Commit)` if the walk concluded; otherwise
    /// the caller should encode the next frame at `next_quality_id` from the
    /// step and call `step` again once that sample is in.
    ///
    /// Mirrors §4.1 steps 1-5, in the regime order given there.
    pub fn step(&mut self, quality_id: usize, byte_rate: u64, src_fps: u32) -> StepOutcome {
        let enc_size = self.encoded_size_by_quality[quality_id];
        if enc_size == 0 {
            return StepOutcome::NoSampleYet;
        }

        let fps = Self::fps_for_size(byte_rate, enc_size);

        if fps > self.best.fps
            || ((fps == self.best.fps || fps >= src_fps) && quality_id > self.best.quality_id)
        {
            self.best = BestSample { fps, quality_id };
        }

        if quality_id > 3 && fps < 10 && fps < src_fps {
            // High-quality regime: prefer FPS over quality.
            return if quality_id > 0 && self.encoded_size_by_quality[quality_id - 1] != 0 {
                StepOutcome::Commit(self.commit(quality_id - 1, byte_rate))
            } else {
                StepOutcome::Probe(quality_id - 1)
            };
        }

        let exploring_upwards = (fps > 5 && fps as f64 >= 0.66 * self.min_quality_fps() as f64)
            || fps >= src_fps;

        if exploring_upwards {
            let max_id = self.max_quality_id();
            return if quality_id == MAX_QUALITY_ID
                || quality_id >= max_id
                || self.encoded_size_by_quality[quality_id + 1] != 0
            {
                StepOutcome::Commit(self.commit(quality_id, byte_rate))
            } else if quality_id == 3 && fps < 10 && fps < src_fps {
                StepOutcome::Commit(self.commit(quality_id, byte_rate))
            } else {
                StepOutcome::Probe(quality_id + 1)
            };
        }

        // Too-slow regime: try to lower quality.
        let floor = self.min_quality_id();
        if quality_id == 0 || quality_id <= floor {
            StepOutcome::Commit(self.commit(quality_id, byte_rate))
        } else if self.encoded_size_by_quality[quality_id - 1] != 0 {
            StepOutcome::Commit(self.commit(quality_id - 1, byte_rate))
        } else {
            StepOutcome::Probe(quality_id - 1)
        }
    }

    fn commit(&mut self, quality_id: usize, byte_rate: u64) -> Commit {
        let final_quality_id = if self.best.fps > 0 {
            quality_id.max(self.best.quality_id)
        } else {
            quality_id
        };
        let final_enc_size = self.encoded_size_by_quality[final_quality_id];
        let mut final_fps = Self::fps_for_size(byte_rate, final_enc_size);

        if final_quality_id == self.min_quality_id() {
            if let Kind::Upgrade { min_quality_fps, .. } = self.kind {
                final_fps = final_fps.max(min_quality_fps);
            }
        }
        if final_quality_id == self.max_quality_id() {
            if let Kind::Downgrade { max_quality_fps, .. } = self.kind {
                final_fps = final_fps.min(max_quality_fps);
            }
        }

        Commit {
            quality_id: final_quality_id,
            fps: final_fps.clamp(MIN_FPS, MAX_FPS),
            enc_size: final_enc_size,
            reason: self.reason,
        }
    }

    /// Where the evaluator would commit right now if stopped (§4.5).
    pub fn stop_target(&self) -> (usize, u32) {
        match self.kind {
            Kind::Upgrade {
                min_quality_id,
                min_quality_fps,
            } => (min_quality_id, min_quality_fps),
            Kind::Downgrade {
                max_quality_id,
                max_quality_fps,
            } => (max_quality_id, max_quality_fps),
            Kind::Set => (3, MAX_FPS / 2),
        }
    }
}

/// Result of a single `step`: either commit to a final pair, or probe
/// another quality id and wait for its sample.
#[derive(Debug, Clone, Copy)]
pub enum StepOutcome {
    NoSampleYet,
    Probe(usize),
    Commit(Commit),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_eval_is_cleared() {
        let qe = QualityEval::default();
        assert!(qe.is_cleared());
        assert_eq!(qe.kind(), Kind::Set);
    }

    #[test]
    fn no_sample_yet_returns_none() {
        let mut qe = QualityEval::default();
        qe.set_upgrade(Reason::RateChange, 2, 10);
        assert!(matches!(
            qe.step(3, 1_000_000, 25),
            StepOutcome::NoSampleYet
        ));
    }

    #[test]
    fn clearing_resets_all_samples() {
        let mut qe = QualityEval::default();
        qe.record_size(3, 20_000);
        qe.record_size(4, 25_000);
        assert!(!qe.is_cleared());
        qe.clear();
        assert!(qe.is_cleared());
    }

    #[test]
    fn quality_walk_from_median_climbs_to_best_sampled_quality() {
        // Encoded sizes sampled in sequence at q=3,4,5,6 with byte_rate=1_000_000
        // and src_fps=25: 50, 40, 25, then 11 FPS. Each step stays above the
        // permissive bar (>5 FPS) so the walk keeps climbing; q=6 is the table
        // ceiling so it commits there immediately once sampled. 11 FPS is still
        // >= the strict bar (10) so the high-quality-regime rollback to q=5
        // never triggers, even though q=6's own fps is worse than q=5's.
        let mut qe = QualityEval::default();
        qe.set(Reason::SizeChange);
        let byte_rate = 1_000_000u64;
        let src_fps = 25;

        qe.record_size(3, 20_000);
        assert!(matches!(
            qe.step(3, byte_rate, src_fps),
            StepOutcome::Probe(4)
        ));

        qe.record_size(4, 25_000);
        let after_four = qe.step(4, byte_rate, src_fps);

        let commit = match after_four {
            StepOutcome::Commit(c) => c,
            StepOutcome::Probe(5) => {
                qe.record_size(5, 40_000);
                match qe.step(5, byte_rate, src_fps) {
                    StepOutcome::Commit(c) => c,
                    StepOutcome::Probe(6) => {
                        qe.record_size(6, 90_000);
                        match qe.step(6, byte_rate, src_fps) {
                            StepOutcome::Commit(c) => c,
                            other => panic!("expected commit by q=6, got {other:?}"),
                        }
                    }
                    other => panic!("unexpected outcome at q=5: {other:?}"),
                }
            }
            other => panic!("unexpected outcome at q=4: {other:?}"),
        };

        assert_eq!(commit.quality_id, 6);
    }

    #[test]
    fn distinct_samples_never_exceeds_table_size() {
        let mut qe = QualityEval::default();
        for q in 0..7 {
            qe.record_size(q, 1000 + q as u64);
        }
        assert_eq!(qe.distinct_samples(), 7);
    }
}

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

//! The closed-loop rate controller (§3, §4.2-§4.8).
//!
//! [`RateControl`] holds every piece of mutable policy state and is driven
//! entirely through explicit parameters (`now_ns`, `src_fps`, `latency_ms`,
//! ...) rather than owning a [`crate::clock::Clock`] or
//! [`crate::callbacks::EncoderCallbacks`]. That keeps it a plain, deterministic
//! state machine that the host-facing [`crate::encoder::Encoder`] drives and
//! that tests can exercise without any I/O.

use crate::bit_rate_info::BitRateInfo;
use crate::client_state::{ClientState, ServerState};
use crate::clock::interval_ns_for_fps;
use crate::quality::{quality_value, MAX_QUALITY_ID, MEDIAN_QUALITY_ID};
use crate::quality_eval::{Kind, QualityEval, Reason, StepOutcome, MAX_FPS, MIN_FPS};

const AVERAGE_SIZE_WINDOW: u64 = 3;
const BIT_RATE_EVAL_MIN_NUM_FRAMES: u64 = 3;
const IMPROVE_QUALITY_FPS_STRICT_TH: u32 = 10;
const ADJUST_FPS_TIMEOUT_MS: u64 = 500;
const MAX_CLIENT_PLAYBACK_DELAY_MS: u32 = 5_000;
const WARMUP_TIME_NS: u64 = 3_000_000_000;
const SERVER_STATUS_EVAL_FPS_INTERVAL: u64 = 1;
const SERVER_STATUS_DOWNGRADE_DROP_FACTOR_TH: f64 = 0.1;
const CLIENT_POSITIVE_REPORT_TIMEOUT_MS: i64 = 2_000;
const CLIENT_POSITIVE_REPORT_STRICT_TIMEOUT_MS: i64 = 3_000;
const PLAYBACK_LATENCY_DECREASE_FACTOR: f64 = 0.5;
const VIDEO_VS_AUDIO_LATENCY_FACTOR: f64 = 1.25;
const VIDEO_DELAY_TH: i32 = -15;

/// A threshold from the source material that no code path ever reads. Kept
/// as a documented, unused constant rather than silently dropped, since
/// removing constants that later turn out to matter is harder to notice
/// than leaving one idle.
#[allow(dead_code)]
pub const LOW_FPS_RATE_TH: u32 = 3;

/// The minimum client playback-buffer delay, in milliseconds, that should
/// absorb one encoded frame's transmission time plus network latency
/// without underflowing (§4.6).
fn min_required_playback_delay(frame_enc_size: u64, byte_rate: u64, latency_ms: u32) -> u32 {
    if frame_enc_size == 0 || byte_rate == 0 {
        return latency_ms;
    }
    let one_frame_time_ms = (frame_enc_size * 1_000 / byte_rate) as u32;
    (one_frame_time_ms.saturating_mul(2).saturating_add(latency_ms)).min(MAX_CLIENT_PLAYBACK_DELAY_MS)
}

/// Whether a frame presented to [`RateControl::begin_frame`] should be
/// encoded or silently dropped by the admission gate (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Drop,
}

/// The full closed-loop controller: current `(quality_id, fps)`, the
/// quality-probing walk, bit-rate estimation bookkeeping, and the
/// client/server drop monitors that feed it.
#[derive(Debug, Clone)]
pub struct RateControl {
    byte_rate: u64,
    quality_id: usize,
    fps: u32,
    adjusted_fps: f64,
    adjusted_fps_start_time: u64,
    adjusted_fps_num_frames: u64,
    last_enc_size: u64,
    base_enc_size: u64,
    sum_recent_enc_size: u64,
    num_recent_enc_frames: u64,
    during_quality_eval: bool,
    quality_eval: QualityEval,
    bit_rate: BitRateInfo,
    client_state: ClientState,
    server_state: ServerState,
    warmup_start_time: u64,
    pending_playback_notice: Option<u32>,
}

impl RateControl {
    /// Construct a fresh controller. `now_ns` anchors the warm-up window
    /// (§4.8 construction-defaults scenario).
    pub fn new(starting_byte_rate: u64, now_ns: u64) -> Self {
        let mut rc = RateControl {
            byte_rate: starting_byte_rate,
            quality_id: 0,
            fps: 0,
            adjusted_fps: 0.0,
            adjusted_fps_start_time: 0,
            adjusted_fps_num_frames: 0,
            last_enc_size: 0,
            base_enc_size: 0,
            sum_recent_enc_size: 0,
            num_recent_enc_frames: 0,
            during_quality_eval: false,
            quality_eval: QualityEval::default(),
            bit_rate: BitRateInfo::default(),
            client_state: ClientState::default(),
            server_state: ServerState::default(),
            warmup_start_time: now_ns,
            pending_playback_notice: None,
        };
        rc.reset_quality(MEDIAN_QUALITY_ID, 5, 0);
        rc.during_quality_eval = true;
        rc.quality_eval.set(Reason::RateChange);
        rc
    }

    pub fn quality_id(&self) -> usize {
        self.quality_id
    }

    pub fn quality_value(&self) -> u8 {
        quality_value(self.quality_id)
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Bytes/second the controller currently believes the network can carry.
    pub fn byte_rate(&self) -> u64 {
        self.byte_rate
    }

    /// Bits/second, the unit exposed to hosts (§6).
    pub fn bit_rate(&self) -> u64 {
        self.byte_rate * 8
    }

    /// A recommended client playback-buffer delay produced by the most
    /// recent quality-eval commit or client report, if any has accumulated
    /// since the last call. Cleared on read.
    pub fn take_pending_playback_notice(&mut self) -> Option<u32> {
        self.pending_playback_notice.take()
    }

    /// Admit or drop the frame about to be presented at `frame_mm_time`
    /// (§4.4). On [`Admission::Proceed`], the caller should go on to ingest
    /// pixels and compress at [`Self::quality_value`]; on
    /// [`Admission::Drop`] it must do nothing else for this frame.
    pub fn begin_frame(
        &mut self,
        now_ns: u64,
        frame_mm_time: u32,
        src_fps: u32,
        latency_ms: u32,
    ) -> Admission {
        if self.adjusted_fps_start_time == 0 {
            self.adjusted_fps_start_time = now_ns;
        }
        self.adjust_fps(now_ns, src_fps);

        let interval = now_ns.saturating_sub(self.bit_rate.last_frame_time);
        if interval < interval_ns_for_fps(self.adjusted_fps) {
            return Admission::Drop;
        }

        self.adjust_to_bit_rate(src_fps, latency_ms, now_ns);

        let size_change_eval =
            !self.during_quality_eval || self.quality_eval.reason() == Reason::SizeChange;
        if size_change_eval {
            if self.bit_rate.change_start_time == 0 {
                self.bit_rate.change_start_time = now_ns;
                self.bit_rate.change_start_mm_time = frame_mm_time;
            }
            self.bit_rate.last_frame_time = now_ns;
        }

        Admission::Proceed
    }

    /// Periodically re-tune `adjusted_fps` so the pacing interval tracks the
    /// stream's actual average output rate rather than only its target
    /// (§4.4 pacing note).
    fn adjust_fps(&mut self, now_ns: u64, src_fps: u32) {
        let elapsed_ms = now_ns.saturating_sub(self.adjusted_fps_start_time) / 1_000_000;
        if self.during_quality_eval
            || elapsed_ms <= ADJUST_FPS_TIMEOUT_MS
            || (elapsed_ms as f64) <= 1_000.0 / self.adjusted_fps
        {
            return;
        }

        let avg_fps = (self.adjusted_fps_num_frames as f64 * 1_000.0) / elapsed_ms as f64;
        let fps_ratio = avg_fps / self.fps as f64;

        log::debug!(
            "adjust_fps: avg-fps={:.2} defined={} adjusted={:.2}",
            avg_fps,
            self.fps,
            self.adjusted_fps
        );

        if avg_fps + 0.5 < self.fps as f64 && src_fps as f64 > avg_fps {
            let new_adjusted_fps = if avg_fps != 0.0 {
                self.adjusted_fps / fps_ratio
            } else {
                self.adjusted_fps * 2.0
            };
            self.adjusted_fps = (self.fps as f64 * 2.0).min(new_adjusted_fps);
        } else if self.fps as f64 + 0.5 < avg_fps {
            let new_adjusted_fps = self.adjusted_fps / fps_ratio;
            self.adjusted_fps = (self.fps as f64).max(new_adjusted_fps);
        }
        self.adjusted_fps_start_time = now_ns;
        self.adjusted_fps_num_frames = 0;
    }

    /// Compare the measured encode size against `byte_rate` and either feed
    /// the quality evaluator a sample or kick off a fresh up/downgrade walk
    /// (§4.2, §4.3 size-change path).
    fn adjust_to_bit_rate(&mut self, src_fps: u32, latency_ms: u32, now_ns: u64) {
        if self.last_enc_size == 0 {
            return;
        }

        if self.during_quality_eval {
            self.quality_eval.record_size(self.quality_id, self.last_enc_size);
            self.step_evaluator(src_fps, latency_ms);
            return;
        }

        if self.num_recent_enc_frames == 0 {
            return;
        }

        let mut new_avg_enc_size = 0u64;
        if !(self.num_recent_enc_frames < AVERAGE_SIZE_WINDOW
            && self.num_recent_enc_frames < self.fps as u64)
        {
            new_avg_enc_size = self.sum_recent_enc_size / self.num_recent_enc_frames;
            let new_fps = QualityEval::fps_for_size(self.byte_rate, new_avg_enc_size);

            if new_fps > self.fps && (self.fps < src_fps || self.quality_id < MAX_QUALITY_ID) {
                log::debug!("fps improved: re-evaluating quality and fps");
                self.quality_eval.set_upgrade(Reason::SizeChange, self.quality_id, self.fps);
                self.during_quality_eval = true;
            } else if new_fps < self.fps && new_fps < src_fps {
                log::debug!("fps degraded: re-evaluating quality and fps");
                self.quality_eval.set_downgrade(Reason::SizeChange, self.quality_id, self.fps);
                self.during_quality_eval = true;
            }
        }

        if self.during_quality_eval {
            self.quality_eval.record_size(self.quality_id, new_avg_enc_size);
            self.step_evaluator(src_fps, latency_ms);
        } else {
            self.check_server_drop_ratio(src_fps, now_ns);
        }
    }

    /// Run one step of the quality walk and, if it just committed, fold the
    /// result back into the controller's steady-state fields (§4.1, §4.5).
    fn step_evaluator(&mut self, src_fps: u32, latency_ms: u32) {
        match self.quality_eval.step(self.quality_id, self.byte_rate, src_fps) {
            StepOutcome::NoSampleYet => {}
            StepOutcome::Probe(next_id) => {
                self.quality_id = next_id;
            }
            StepOutcome::Commit(commit) => {
                log::debug!(
                    "quality eval commit: quality_id={} fps={}",
                    commit.quality_id,
                    commit.fps
                );
                self.reset_quality(commit.quality_id, commit.fps, commit.enc_size);
                self.sum_recent_enc_size = commit.enc_size;
                self.num_recent_enc_frames = 1;
                let min_delay =
                    min_required_playback_delay(commit.enc_size, self.byte_rate, latency_ms);
                self.pending_playback_notice = Some(min_delay);
            }
        }
    }

    /// Abandon the evaluator mid-walk and settle on its stop target (§4.5),
    /// used before a rate change takes over the evaluator for its own
    /// purposes.
    fn quality_eval_stop(&mut self) {
        if !self.during_quality_eval {
            return;
        }
        let (quality_id, fps) = self.quality_eval.stop_target();
        self.reset_quality(quality_id, fps, 0);
    }

    /// Land on `(quality_id, fps)`, clear the evaluator, and re-derive
    /// `adjusted_fps` from the *previous* fps/adjusted_fps ratio so pacing
    /// carries forward smoothly across the change (§4.2).
    fn reset_quality(&mut self, quality_id: usize, fps: u32, frame_enc_size: u64) {
        self.during_quality_eval = false;

        if self.quality_id != quality_id {
            self.last_enc_size = 0;
        }
        if self.quality_eval.reason() == Reason::RateChange {
            self.server_state.reset();
        }

        self.quality_id = quality_id;
        self.quality_eval = QualityEval::default();

        let fps_ratio = if self.adjusted_fps > 0.0 {
            self.adjusted_fps / self.fps as f64
        } else {
            1.5
        };
        self.fps = fps.clamp(MIN_FPS, MAX_FPS);
        self.adjusted_fps = self.fps as f64 * fps_ratio;
        self.adjusted_fps_start_time = 0;
        self.adjusted_fps_num_frames = 0;
        self.base_enc_size = frame_enc_size;

        self.sum_recent_enc_size = 0;
        self.num_recent_enc_frames = 0;
    }

    /// Record the size of a successfully compressed frame and fold it into
    /// the rolling windows used by bit-rate estimation (§4.3, §4.7).
    pub fn record_encoded(&mut self, enc_size: u64) {
        self.last_enc_size = enc_size;
        self.server_state.num_frames_encoded += 1;

        let size_change_eval =
            !self.during_quality_eval || self.quality_eval.reason() == Reason::SizeChange;
        if size_change_eval {
            if !self.during_quality_eval {
                if self.num_recent_enc_frames >= AVERAGE_SIZE_WINDOW {
                    self.num_recent_enc_frames = 0;
                    self.sum_recent_enc_size = 0;
                }
                self.sum_recent_enc_size += self.last_enc_size;
                self.num_recent_enc_frames += 1;
                self.adjusted_fps_num_frames += 1;
            }
            self.bit_rate.sum_enc_size += self.last_enc_size;
            self.bit_rate.num_enc_frames += 1;
        }
    }

    /// A frame that was admitted and began compression but could not be
    /// finished (pixel path failure after compression had already started).
    /// Matches the original's abandon-and-zero behavior rather than letting
    /// a stale size leak into the next frame's bit-rate evaluation.
    pub fn record_encode_aborted(&mut self) {
        self.last_enc_size = 0;
    }

    /// A frame visibly dropped by the server (not by this controller's own
    /// admission gate) after having been accepted for encoding, e.g. a
    /// downstream queue overflow (§4.7).
    pub fn notify_server_frame_drop(&mut self, now_ns: u64, src_fps: u32) {
        self.server_state.num_frames_dropped += 1;
        self.check_server_drop_ratio(src_fps, now_ns);
    }

    /// Decrease the bit rate if the server-side drop ratio over the last
    /// evaluation window exceeded the threshold (§4.7).
    fn check_server_drop_ratio(&mut self, src_fps: u32, now_ns: u64) {
        let fps = self.fps.min(src_fps);
        if self.server_state.num_frames_encoded < fps as u64 * SERVER_STATUS_EVAL_FPS_INTERVAL {
            return;
        }

        let total = self.server_state.num_frames_dropped + self.server_state.num_frames_encoded;
        let drop_factor = self.server_state.num_frames_dropped as f64 / total as f64;
        log::debug!(
            "server drops: {}/{} (fps={} src-fps={})",
            self.server_state.num_frames_dropped,
            total,
            self.fps,
            src_fps
        );
        if drop_factor > SERVER_STATUS_DOWNGRADE_DROP_FACTOR_TH {
            self.decrease_bit_rate(now_ns);
        }
        self.server_state.reset();
    }

    /// Estimate the achieved throughput since the last rate change and
    /// settle on a smaller `byte_rate`, unless the controller is still
    /// inside its post-construction warm-up window (§4.8).
    fn decrease_bit_rate(&mut self, now_ns: u64) {
        self.quality_eval_stop();
        self.client_state.reset();

        if self.warmup_start_time != 0 {
            if now_ns.saturating_sub(self.warmup_start_time) < WARMUP_TIME_NS {
                log::debug!("decrease_bit_rate: during warmup, ignoring");
                return;
            }
            self.warmup_start_time = 0;
        }

        let (measured_byte_rate, decrease_size) = if self.bit_rate.num_enc_frames
            > BIT_RATE_EVAL_MIN_NUM_FRAMES
            || self.bit_rate.num_enc_frames > self.fps as u64
        {
            let duration_sec = self
                .bit_rate
                .last_frame_time
                .saturating_sub(self.bit_rate.change_start_time) as f64
                / 1_000_000_000.0;
            let measured_byte_rate = (self.bit_rate.sum_enc_size as f64 / duration_sec) as u64;
            let decrease_size = self.bit_rate.sum_enc_size / self.bit_rate.num_enc_frames;
            (measured_byte_rate, decrease_size)
        } else {
            let measured_byte_rate = self.byte_rate;
            let decrease_size = measured_byte_rate / self.fps as u64;
            (measured_byte_rate, decrease_size)
        };

        let measured_byte_rate = measured_byte_rate.min(self.byte_rate);
        let decrease_size = if decrease_size >= measured_byte_rate {
            measured_byte_rate / 2
        } else {
            decrease_size
        };

        self.byte_rate = measured_byte_rate - decrease_size;
        self.bit_rate.reset(false);
        log::debug!("decrease bit rate to {} B/s", self.byte_rate);

        self.quality_eval.set_downgrade(Reason::RateChange, self.quality_id, self.fps);
        self.during_quality_eval = true;
    }

    /// Estimate the achieved throughput and settle on a bigger `byte_rate`,
    /// unless too few frames were encoded since the last rate change to
    /// trust the measurement (§4.3).
    fn increase_bit_rate(&mut self) {
        let (measured_byte_rate, increase_size) = if self.bit_rate.num_enc_frames
            > BIT_RATE_EVAL_MIN_NUM_FRAMES
            || self.bit_rate.num_enc_frames > self.fps as u64
        {
            let duration_sec = self
                .bit_rate
                .last_frame_time
                .saturating_sub(self.bit_rate.change_start_time) as f64
                / 1_000_000_000.0;
            let measured_byte_rate = (self.bit_rate.sum_enc_size as f64 / duration_sec) as u64;
            let avg_frame_size = self.bit_rate.sum_enc_size / self.bit_rate.num_enc_frames;
            (measured_byte_rate, avg_frame_size)
        } else {
            log::debug!("increase_bit_rate: not enough samples, no change");
            return;
        };

        self.quality_eval_stop();

        if measured_byte_rate + increase_size >= self.byte_rate {
            self.byte_rate = measured_byte_rate.min(self.byte_rate) + increase_size;
        }
        self.bit_rate.reset(true);
        log::debug!("increase bit rate to {} B/s", self.byte_rate);

        self.quality_eval.set_upgrade(Reason::RateChange, self.quality_id, self.fps);
        self.during_quality_eval = true;
    }

    /// Feed a client playback report into the controller (§4.8). `now_ns`
    /// drives the warm-up check if this ends up triggering a decrease;
    /// `latency_ms` is the current network round-trip estimate.
    #[allow(clippy::too_many_arguments)]
    pub fn client_stream_report(
        &mut self,
        now_ns: u64,
        src_fps: u32,
        latency_ms: u32,
        num_frames: u32,
        num_drops: u32,
        start_frame_mm_time: u32,
        end_frame_mm_time: u32,
        end_frame_delay: i32,
        audio_delay: u32,
    ) {
        log::debug!(
            "client report: #frames={} #drops={} video-delay={} audio-delay={}",
            num_frames,
            num_drops,
            end_frame_delay,
            audio_delay
        );

        if self.during_quality_eval
            && matches!(self.quality_eval.kind(), Kind::Downgrade { .. })
            && self.quality_eval.reason() == Reason::RateChange
        {
            return;
        }

        let avg_enc_size = if self.num_recent_enc_frames != 0 {
            self.sum_recent_enc_size / self.num_recent_enc_frames
        } else {
            0
        };
        let min_playback_delay = min_required_playback_delay(avg_enc_size, self.byte_rate, latency_ms);

        // Comparing a `u32` minimum against a possibly-negative `i32` delay
        // by re-interpreting the delay's bits as `u32` (rather than widening
        // both to a signed type) makes a negative `end_frame_delay` compare
        // as enormous, so this branch is only ever taken for a non-negative
        // delay that is genuinely smaller than the minimum.
        let mut is_video_delay_small = false;
        if min_playback_delay > end_frame_delay as u32 {
            if self.quality_id != MAX_QUALITY_ID
                || self.fps < src_fps.min(MAX_FPS)
                || end_frame_delay < 0
            {
                is_video_delay_small = true;
                self.pending_playback_notice = Some(min_playback_delay);
            }
        }

        if end_frame_delay > 0
            && (audio_delay as f64) < PLAYBACK_LATENCY_DECREASE_FACTOR * self.client_state.max_audio_latency as f64
            && end_frame_delay as f64 > VIDEO_VS_AUDIO_LATENCY_FACTOR * audio_delay as f64
        {
            self.handle_negative(now_ns, end_frame_mm_time);
            return;
        }

        if end_frame_delay < VIDEO_DELAY_TH {
            self.handle_negative(now_ns, end_frame_mm_time);
            return;
        }

        self.client_state.max_video_latency = end_frame_delay.max(self.client_state.max_video_latency);
        self.client_state.max_audio_latency = audio_delay.max(self.client_state.max_audio_latency);

        let medium_thresh = self.client_state.max_video_latency as f64 * PLAYBACK_LATENCY_DECREASE_FACTOR;
        let major_thresh = medium_thresh * PLAYBACK_LATENCY_DECREASE_FACTOR;

        if ((end_frame_delay as f64) < medium_thresh && is_video_delay_small)
            || (end_frame_delay as f64) < major_thresh
        {
            self.handle_negative(now_ns, end_frame_mm_time);
        } else if num_drops == 0 {
            self.handle_positive(src_fps, start_frame_mm_time);
        }
    }

    /// A client report signaling the stream is behind: decrease the bit
    /// rate unless a later downgrade has already superseded this report
    /// (§4.8).
    fn handle_negative(&mut self, now_ns: u64, report_end_frame_mm_time: u32) {
        if (self.bit_rate.change_start_mm_time > report_end_frame_mm_time
            || self.bit_rate.change_start_mm_time == 0)
            && !self.bit_rate.was_upgraded
        {
            log::debug!("handle_negative: a downgrade already occurred later than this report");
            return;
        }
        self.decrease_bit_rate(now_ns);
    }

    /// A client report signaling the stream is keeping up: increase the bit
    /// rate once the current setting has proven stable for long enough
    /// (§4.8).
    fn handle_positive(&mut self, src_fps: u32, report_start_frame_mm_time: u32) {
        if self.during_quality_eval && self.quality_eval.reason() == Reason::RateChange {
            return;
        }

        let timeout = if (self.fps > IMPROVE_QUALITY_FPS_STRICT_TH || self.fps >= src_fps)
            && self.quality_id > MEDIAN_QUALITY_ID
        {
            CLIENT_POSITIVE_REPORT_STRICT_TIMEOUT_MS
        } else {
            CLIENT_POSITIVE_REPORT_TIMEOUT_MS
        };

        // 32-bit wrapping subtraction truncated back to a signed `int`,
        // matching the original's `(int)report_start_frame_mm_time -
        // (uint32_t)change_start_mm_time` rather than a widening subtract -
        // a report older than the mm-clock at the last rate change wraps the
        // same way the original's arithmetic does.
        let stable_client_mm_time = (report_start_frame_mm_time as i32)
            .wrapping_sub(self.bit_rate.change_start_mm_time as i32)
            as i64;

        if self.bit_rate.change_start_mm_time == 0 || stable_client_mm_time < timeout {
            log::debug!("handle_positive: not stable long enough yet");
            return;
        }
        self.increase_bit_rate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn construction_starts_at_median_quality_and_five_fps() {
        let rc = RateControl::new(1_000_000, 0);
        assert_eq!(rc.quality_id(), MEDIAN_QUALITY_ID);
        assert_eq!(rc.fps(), 5);
        assert_eq!(rc.byte_rate(), 1_000_000);
    }

    #[test]
    fn admission_gate_drops_frames_submitted_too_soon() {
        let mut rc = RateControl::new(1_000_000, 0);
        // adjusted_fps starts at fps(5) * 1.5 = 7.5 -> ~133ms min spacing.
        // `last_frame_time` starts at 0, so the very first admitted frame
        // must itself be comfortably past that spacing from time zero.
        assert_eq!(rc.begin_frame(200_000_000, 200, 25, 0), Admission::Proceed);
        assert_eq!(rc.begin_frame(210_000_000, 210, 25, 0), Admission::Drop);
        assert_eq!(rc.begin_frame(400_000_000, 400, 25, 0), Admission::Proceed);
    }

    #[test]
    fn quality_eval_commit_produces_a_playback_notice() {
        let mut rc = RateControl::new(1_000_000, 0);
        // Construction starts a Set/RateChange walk, whose `reason` keeps
        // the admission gate's change_start_time/last_frame_time bookkeeping
        // dormant (matching the original) until the walk commits, so
        // `last_frame_time` stays at 0 and every well-spaced `now` here
        // clears the gate on its own.
        assert_eq!(rc.begin_frame(200_000_000, 200, 25, 0), Admission::Proceed);
        assert!(rc.during_quality_eval);

        // Every sampled size compresses to the same 20_000 bytes at
        // byte_rate=1_000_000 (50 fps), so the walk keeps climbing quality
        // until it hits the table ceiling and commits there.
        rc.record_encoded(20_000);
        let mut now = 400_000_000u64;
        while rc.during_quality_eval {
            let admitted = rc.begin_frame(now, (now / 1_000_000) as u32, 25, 10);
            assert_eq!(admitted, Admission::Proceed);
            if rc.during_quality_eval {
                rc.record_encoded(20_000);
            }
            now += 200_000_000;
        }
        assert_eq!(rc.quality_id(), MAX_QUALITY_ID);
        assert!(rc.take_pending_playback_notice().is_some());
    }

    #[test]
    fn warmup_suppresses_decrease_bit_rate() {
        // A nonzero construction time so `warmup_start_time` isn't mistaken
        // for the "unset" sentinel.
        let mut rc = RateControl::new(1_000_000, 1);
        rc.during_quality_eval = false;
        rc.quality_eval = QualityEval::default();
        let before = rc.byte_rate();
        rc.decrease_bit_rate(1_000_000_000); // 1s in, still inside 3s warmup
        assert_eq!(rc.byte_rate(), before);
    }

    #[test]
    fn decrease_bit_rate_after_warmup_lowers_the_rate_and_starts_a_downgrade() {
        let mut rc = RateControl::new(1_000_000, 1);
        rc.during_quality_eval = false;
        rc.quality_eval = QualityEval::default();
        rc.bit_rate.num_enc_frames = 10;
        rc.bit_rate.sum_enc_size = 200_000;
        rc.bit_rate.change_start_time = 0;
        rc.bit_rate.last_frame_time = 2 * SEC;

        rc.decrease_bit_rate(4 * SEC); // past the 3s warmup window
        assert!(rc.byte_rate() < 1_000_000);
        assert!(rc.during_quality_eval);
        assert!(matches!(rc.quality_eval.kind(), Kind::Downgrade { .. }));
    }

    #[test]
    fn server_drop_ratio_above_threshold_triggers_decrease() {
        let mut rc = RateControl::new(1_000_000, 0);
        rc.during_quality_eval = false;
        rc.quality_eval = QualityEval::default();
        rc.warmup_start_time = 0;
        rc.fps = 10;
        rc.server_state.num_frames_encoded = 20;
        rc.server_state.num_frames_dropped = 5; // 5/25 = 0.2 > 0.1
        rc.bit_rate.num_enc_frames = 10;
        rc.bit_rate.sum_enc_size = 200_000;
        rc.bit_rate.last_frame_time = 2 * SEC;

        let before = rc.byte_rate();
        rc.check_server_drop_ratio(10, 4 * SEC);
        assert!(rc.byte_rate() < before);
        assert_eq!(rc.server_state.num_frames_encoded, 0);
        assert_eq!(rc.server_state.num_frames_dropped, 0);
    }

    #[test]
    fn negative_video_delay_below_threshold_triggers_decrease() {
        let mut rc = RateControl::new(1_000_000, 0);
        rc.during_quality_eval = false;
        rc.quality_eval = QualityEval::default();
        rc.warmup_start_time = 0;
        rc.bit_rate.num_enc_frames = 10;
        rc.bit_rate.sum_enc_size = 200_000;
        rc.bit_rate.last_frame_time = 2 * SEC;
        // Nonzero and no later than the report, so handle_negative doesn't
        // treat this as superseded by a downgrade that already happened.
        rc.bit_rate.change_start_mm_time = 500;
        let before = rc.byte_rate();

        rc.client_stream_report(4 * SEC, 25, 10, 30, 0, 0, 1_000, -20, 5);
        assert!(rc.byte_rate() < before);
    }

    #[test]
    fn negative_end_frame_delay_never_trips_the_small_delay_branch() {
        // With the `u32`-reinterpreting comparison, a negative delay compares
        // as huge and so never satisfies `min_playback_delay > delay`.
        let mut rc = RateControl::new(1_000_000, 0);
        rc.during_quality_eval = false;
        rc.quality_eval = QualityEval::default();
        rc.sum_recent_enc_size = 20_000;
        rc.num_recent_enc_frames = 1;

        rc.client_stream_report(0, 25, 0, 1, 0, 0, 0, -1, 0);
        assert!(rc.take_pending_playback_notice().is_none());
    }

    #[test]
    fn positive_report_after_stable_timeout_increases_bit_rate() {
        // A low starting byte rate so the measured throughput plus the
        // average frame size comfortably clears it, taking the "upgrade"
        // branch of increase_bit_rate rather than the "just re-evaluate" one.
        let mut rc = RateControl::new(400_000, 0);
        rc.during_quality_eval = false;
        rc.quality_eval = QualityEval::default();
        rc.bit_rate.num_enc_frames = 10;
        rc.bit_rate.sum_enc_size = 200_000;
        rc.bit_rate.last_frame_time = 2 * SEC;
        rc.bit_rate.change_start_time = 0;
        rc.bit_rate.change_start_mm_time = 1;

        let before = rc.byte_rate();
        // Comfortably positive delay, no drops, stable for longer than the
        // 2s timeout (MEDIAN_QUALITY_ID so only the lenient timeout applies).
        rc.client_stream_report(5 * SEC, 25, 0, 30, 0, 3_000, 3_100, 100, 10);
        assert!(rc.byte_rate() > before);
        assert!(rc.during_quality_eval);
    }
}

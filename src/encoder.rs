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

//! The host-facing encoder facade (§4.9, §6).
//!
//! [`Encoder`] owns the [`Clock`], the [`EncoderCallbacks`] bundle and the
//! [`RateControl`] policy, and is the only type most embedders need to
//! touch: it drives the admission gate, the pixel conversion and the JPEG
//! primitive, and feeds the compressed size back into rate control.

use crate::callbacks::EncoderCallbacks;
use crate::clock::Clock;
use crate::config::EncoderConfig;
use crate::error::Result;
use crate::jpeg;
use crate::pixel::{self, Chunks, PixelFormat, Rect};
use crate::rate_control::{Admission, RateControl};
use crate::stats::{EncoderStats, QualityAccumulator};

/// Outcome of a single [`Encoder::encode_frame`] call (§6, §7).
///
/// Deliberately not an error type: `Drop` and `Unsupported` are expected,
/// frequent, non-exceptional results of the admission gate and the pixel
/// path, not failures the caller needs to propagate with `?`.
#[derive(Debug)]
pub enum EncodeOutcome {
    /// The frame was compressed; `buffer` is a complete JPEG byte stream.
    Done(Vec<u8>),
    /// The rate controller's admission gate rejected this frame.
    Drop,
    /// The pixel format was unrecognized, or scanline conversion failed.
    Unsupported,
}

/// A single Motion-JPEG encoder instance for one stream.
///
/// Not `Sync`; callers sharing one across threads must provide their own
/// synchronization (§5).
pub struct Encoder<C: Clock, CB: EncoderCallbacks> {
    clock: C,
    callbacks: CB,
    rate_control: RateControl,
    starting_bit_rate: u64,
    quality_stats: QualityAccumulator,
}

impl<C: Clock, CB: EncoderCallbacks> Encoder<C, CB> {
    /// Construct a new encoder. Fails if `config.starting_bit_rate == 0`
    /// (§7).
    pub fn new(config: EncoderConfig, clock: C, callbacks: CB) -> Result<Self> {
        config.validate()?;
        let now_ns = clock.now_ns();
        Ok(Encoder {
            rate_control: RateControl::new(config.starting_byte_rate(), now_ns),
            starting_bit_rate: config.starting_bit_rate,
            clock,
            callbacks,
            quality_stats: QualityAccumulator::default(),
        })
    }

    /// Encode one frame, or report why it was not encoded (§4.9, §6).
    ///
    /// `frame_mm_time` is the host's media-time stamp for this frame.
    /// `chunks`/`format`/`src_rect`/`image_height`/`top_down` describe the
    /// source bitmap exactly as in §4.10.
    #[allow(clippy::too_many_arguments)]
    pub fn encode_frame(
        &mut self,
        frame_mm_time: u32,
        chunks: &Chunks<'_>,
        format: PixelFormat,
        src_rect: Rect,
        image_height: u32,
        top_down: bool,
    ) -> EncodeOutcome {
        let now_ns = self.clock.now_ns();
        let src_fps = self.callbacks.get_source_fps();
        let latency_ms = self.callbacks.get_roundtrip_ms() / 2;

        if self.rate_control.begin_frame(now_ns, frame_mm_time, src_fps, latency_ms)
            == Admission::Drop
        {
            return EncodeOutcome::Drop;
        }

        // `begin_frame` can run a quality-eval commit (via adjust_to_bit_rate),
        // which leaves a recommended playback delay pending; deliver it now,
        // synchronously within this frame's encode, matching the original's
        // `adjust_params_to_bit_rate` calling `update_client_playback_delay`
        // directly from inside `start_frame` rather than waiting for the next
        // client report.
        if let Some(delay_ms) = self.rate_control.take_pending_playback_notice() {
            self.callbacks.update_client_playback_delay(delay_ms);
        }

        // Quality is counted as soon as a frame is admitted and about to be
        // compressed, even if the pixel path fails partway through -
        // matching the original, which increments its lifetime counters in
        // `mjpeg_encoder_start_frame`, before any scanline is written.
        self.quality_stats.record(self.rate_control.quality_value());

        let rgb = match pixel::extract_rgb24(chunks, format, src_rect, image_height, top_down) {
            Ok(rgb) => rgb,
            Err(_) => {
                self.rate_control.record_encode_aborted();
                return EncodeOutcome::Unsupported;
            }
        };

        let quality = self.rate_control.quality_value();
        match jpeg::compress_rgb24(&rgb, src_rect.width(), src_rect.height(), quality) {
            Ok(buffer) => {
                self.rate_control.record_encoded(buffer.len() as u64);
                EncodeOutcome::Done(buffer)
            }
            Err(_) => {
                self.rate_control.record_encode_aborted();
                EncodeOutcome::Unsupported
            }
        }
    }

    /// Feed a client playback report into the rate controller (§4.8). If
    /// this produces a new recommended playback delay, forwards it via
    /// [`EncoderCallbacks::update_client_playback_delay`].
    #[allow(clippy::too_many_arguments)]
    pub fn client_stream_report(
        &mut self,
        num_frames: u32,
        num_drops: u32,
        start_frame_mm_time: u32,
        end_frame_mm_time: u32,
        end_frame_delay: i32,
        audio_delay: u32,
    ) {
        let now_ns = self.clock.now_ns();
        let src_fps = self.callbacks.get_source_fps();
        let latency_ms = self.callbacks.get_roundtrip_ms() / 2;

        self.rate_control.client_stream_report(
            now_ns,
            src_fps,
            latency_ms,
            num_frames,
            num_drops,
            start_frame_mm_time,
            end_frame_mm_time,
            end_frame_delay,
            audio_delay,
        );

        if let Some(delay_ms) = self.rate_control.take_pending_playback_notice() {
            self.callbacks.update_client_playback_delay(delay_ms);
        }
    }

    /// Notify the controller that the server dropped a frame after
    /// admission (§4.7, §6).
    pub fn notify_server_frame_drop(&mut self) {
        let now_ns = self.clock.now_ns();
        let src_fps = self.callbacks.get_source_fps();
        self.rate_control.notify_server_frame_drop(now_ns, src_fps);
    }

    /// Current assumed network capacity, in bits per second (§6).
    pub fn get_bit_rate(&self) -> u64 {
        self.rate_control.bit_rate()
    }

    /// Lifetime statistics (§3, §6).
    pub fn get_stats(&self) -> EncoderStats {
        EncoderStats {
            starting_bit_rate: self.starting_bit_rate,
            cur_bit_rate: self.rate_control.bit_rate(),
            avg_quality: self.quality_stats.average(),
        }
    }

    /// Thin, synchronous parity wrapper for the capability set in §6; there
    /// is no resource to release early, the real teardown is `Drop` (§9).
    pub fn destroy(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NullCallbacks;
    use crate::clock::ManualClock;

    fn solid_bgr24_chunks(width: u32, height: u32, value: u8) -> Vec<Vec<u8>> {
        let stride = (width * 3) as usize;
        vec![vec![value; stride]; height as usize]
    }

    #[test]
    fn construction_rejects_zero_bit_rate() {
        let clock = ManualClock::new();
        let result = Encoder::new(EncoderConfig::new(0), clock, NullCallbacks);
        assert!(result.is_err());
    }

    #[test]
    fn first_admitted_frame_encodes_to_real_jpeg_bytes() {
        let clock = ManualClock::new();
        clock.set(1_000_000_000);
        let mut encoder =
            Encoder::new(EncoderConfig::default(), clock, NullCallbacks).unwrap();

        let rows = solid_bgr24_chunks(16, 16, 100);
        let slices: Vec<&[u8]> = rows.iter().map(|r| r.as_slice()).collect();
        let chunks = Chunks::new(&slices, 16 * 3);
        let rect = Rect {
            left: 0,
            top: 0,
            right: 16,
            bottom: 16,
        };

        let outcome = encoder.encode_frame(0, &chunks, PixelFormat::Bgr24, rect, 16, true);
        match outcome {
            EncodeOutcome::Done(buffer) => {
                assert!(!buffer.is_empty());
                assert_eq!(&buffer[0..2], &[0xff, 0xd8]);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(encoder.get_stats().avg_quality > 0.0);
    }

    #[test]
    fn unsupported_pixel_path_is_reported_without_crashing() {
        let clock = ManualClock::new();
        clock.set(1_000_000_000);
        let mut encoder =
            Encoder::new(EncoderConfig::default(), clock, NullCallbacks).unwrap();

        // A single, too-short chunk: width 16 needs 48 bytes/row, this has 4.
        let rows: Vec<u8> = vec![0u8; 4];
        let slices: Vec<&[u8]> = vec![rows.as_slice()];
        let chunks = Chunks::new(&slices, 4);
        let rect = Rect {
            left: 0,
            top: 0,
            right: 16,
            bottom: 16,
        };

        let outcome = encoder.encode_frame(0, &chunks, PixelFormat::Bgr24, rect, 16, true);
        assert!(matches!(outcome, EncodeOutcome::Unsupported));
    }

    #[test]
    fn stats_track_starting_and_current_bit_rate() {
        let clock = ManualClock::new();
        clock.set(1_000_000_000);
        let cfg = EncoderConfig::new(2_000_000);
        let encoder = Encoder::new(cfg, clock, NullCallbacks).unwrap();
        let stats = encoder.get_stats();
        assert_eq!(stats.starting_bit_rate, 2_000_000);
        assert_eq!(stats.cur_bit_rate, encoder.get_bit_rate());
        assert_eq!(stats.avg_quality, 0.0);
    }
}

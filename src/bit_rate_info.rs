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

//! Rolling encode statistics since the last rate change.

/// Tracks encoded-frame statistics accumulated since the last time the
/// controller changed `byte_rate`, used to produce a measured throughput
/// estimate in Decrease/Increase-bit-rate (§4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct BitRateInfo {
    /// Monotonic-clock timestamp (ns) of the last rate change. `0` means unset.
    pub change_start_time: u64,
    /// Media-time (ms) stamped on the frame current when the rate last
    /// changed. `0` is ambiguous with "unset"; see the Handle-Negative note
    /// in the rate controller.
    pub change_start_mm_time: u32,
    /// Monotonic-clock timestamp (ns) of the most recently admitted frame.
    pub last_frame_time: u64,
    /// True if the last rate change was an increase.
    pub was_upgraded: bool,
    pub num_enc_frames: u64,
    pub sum_enc_size: u64,
}

impl BitRateInfo {
    pub fn reset(&mut self, was_upgraded: bool) {
        *self = BitRateInfo {
            was_upgraded,
            ..Default::default()
        };
    }
}

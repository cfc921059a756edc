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

//! The host-facing callback contract consumed by the rate controller (§4.6, §6).

use crate::quality_eval::MAX_FPS;

/// Capabilities the streaming server provides to the encoder.
///
/// All three methods are read-only queries or a fire-and-forget
/// notification; none may re-enter the encoder (§5). The default trait
/// methods match the original's fallback behavior when a host doesn't wire
/// up a given callback.
pub trait EncoderCallbacks: Send {
    /// The frame rate the source (capture) side believes it can sustain.
    /// Defaults to `MAX_FPS` if the host has no opinion.
    fn get_source_fps(&self) -> u32 {
        MAX_FPS
    }

    /// Network round-trip time in milliseconds. Defaults to 0 (no latency
    /// information) if the host doesn't track it.
    fn get_roundtrip_ms(&self) -> u32 {
        0
    }

    /// Recommended client playback-buffer delay, in milliseconds. Hosts that
    /// don't forward this to the client may ignore the call.
    fn update_client_playback_delay(&self, _delay_ms: u32) {}
}

/// A callback bundle that reports no FPS/RTT information and ignores the
/// playback-delay recommendation, for tests and simple embedders.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallbacks;

impl EncoderCallbacks for NullCallbacks {}

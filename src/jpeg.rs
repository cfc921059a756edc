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

//! JPEG compression primitive (§4.11).
//!
//! Baseline-encodes packed RGB24 scanlines at a given quality using the
//! `image` crate's encoder, writing into an in-memory `Vec<u8>` rather than
//! the original's growable `malloc`-backed destination manager; `Vec`
//! already grows amortized geometrically, so there is nothing bespoke to
//! port here.

use image::codecs::jpeg::JpegEncoder;
use image::ColorType;

use crate::error::{MjpegError, Result};

/// Compress `width`x`height` packed RGB24 pixels (`rgb.len() == width *
/// height * 3`) into a complete JPEG byte buffer at `quality` (1..=100).
pub fn compress_rgb24(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(rgb.len() / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(rgb, width, height, ColorType::Rgb8)
        .map_err(|e| MjpegError::JpegEncode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compresses_a_solid_color_frame_to_nonempty_jpeg_bytes() {
        let width = 16u32;
        let height = 16u32;
        let rgb = vec![128u8; (width * height * 3) as usize];
        let bytes = compress_rgb24(&rgb, width, height, 50).unwrap();
        assert!(!bytes.is_empty());
        // JPEG SOI marker.
        assert_eq!(&bytes[0..2], &[0xff, 0xd8]);
    }

    #[test]
    fn higher_quality_does_not_shrink_output_for_noisy_input() {
        let width = 32u32;
        let height = 32u32;
        let mut rgb = vec![0u8; (width * height * 3) as usize];
        for (i, b) in rgb.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let low = compress_rgb24(&rgb, width, height, 20).unwrap();
        let high = compress_rgb24(&rgb, width, height, 90).unwrap();
        assert!(high.len() >= low.len());
    }
}

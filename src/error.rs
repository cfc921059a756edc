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

use thiserror::Error;

/// Result type for the rate-control core's fallible operations.
pub type Result<T> = std::result::Result<T, MjpegError>;

/// Errors from construction and pixel ingestion.
///
/// Per-frame rate-control outcomes (drop / unsupported / done) are not
/// modeled as errors here since they are ordinary, expected results of the
/// admission gate and the pixel path, not failures; see
/// [`crate::encoder::EncodeOutcome`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MjpegError {
    #[error("starting bit rate must be greater than zero")]
    InvalidBitRate,

    #[error("unsupported pixel format: {0} bytes per pixel")]
    UnsupportedPixelFormat(u32),

    #[error("row stride overflowed while converting bitmap")]
    StrideOverflow,

    #[error("failed to write scanline {0} while converting bitmap")]
    ScanlineWrite(usize),

    #[error("JPEG compression failed: {0}")]
    JpegEncode(String),
}

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

//! Drives `Encoder` across a short synthetic sequence of solid-color
//! frames, printing the rate controller's decisions as it goes.
//!
//! Run with `RUST_LOG=debug cargo run --example basic_usage` to see the
//! controller's quality/fps transitions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mjpeg_rate_control::{
    Chunks, EncodeOutcome, Encoder, EncoderCallbacks, EncoderConfig, PixelFormat, Rect,
    SystemClock,
};

/// A minimal host: reports a fixed source fps and round-trip time, and
/// prints whatever playback delay the controller recommends.
struct DemoHost {
    source_fps: u32,
    roundtrip_ms: u32,
    last_delay_ms: Arc<AtomicU32>,
}

impl EncoderCallbacks for DemoHost {
    fn get_source_fps(&self) -> u32 {
        self.source_fps
    }

    fn get_roundtrip_ms(&self) -> u32 {
        self.roundtrip_ms
    }

    fn update_client_playback_delay(&self, delay_ms: u32) {
        self.last_delay_ms.store(delay_ms, Ordering::Relaxed);
        println!("host: recommended playback delay is now {delay_ms}ms");
    }
}

fn solid_frame(width: u32, height: u32, value: u8) -> Vec<Vec<u8>> {
    let stride = (width * 3) as usize;
    vec![vec![value; stride]; height as usize]
}

fn main() {
    env_logger::init();

    let host = DemoHost {
        source_fps: 25,
        roundtrip_ms: 40,
        last_delay_ms: Arc::new(AtomicU32::new(0)),
    };

    let mut encoder = Encoder::new(EncoderConfig::default(), SystemClock::new(), host)
        .expect("starting_bit_rate is nonzero");

    let width = 64;
    let height = 64;
    let rect = Rect {
        left: 0,
        top: 0,
        right: width,
        bottom: height,
    };

    for frame_no in 0..30u32 {
        let rows = solid_frame(width, height, (frame_no * 7) as u8);
        let slices: Vec<&[u8]> = rows.iter().map(|r| r.as_slice()).collect();
        let chunks = Chunks::new(&slices, width * 3);

        let mm_time = frame_no * 40;
        match encoder.encode_frame(mm_time, &chunks, PixelFormat::Bgr24, rect, height, true) {
            EncodeOutcome::Done(buffer) => {
                println!("frame {frame_no}: encoded {} bytes", buffer.len());
            }
            EncodeOutcome::Drop => println!("frame {frame_no}: dropped by rate control"),
            EncodeOutcome::Unsupported => println!("frame {frame_no}: unsupported"),
        }
    }

    encoder.client_stream_report(30, 0, 0, 1200, 5, 10);

    let stats = encoder.get_stats();
    println!(
        "stats: starting={}bps current={}bps avg_quality={:.1}",
        stats.starting_bit_rate, stats.cur_bit_rate, stats.avg_quality
    );

    encoder.destroy();
}

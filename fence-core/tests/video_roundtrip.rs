//! Encode/decode round trip through the FFmpeg bridge.
//!
//! Dimensions are multiples of 16 so the MPEG-4 encoder works on whole
//! macroblocks and the decoded frame count stays exact.

use fence_core::video::{save_to_video, total_frames, RgbFrame, VideoReader, VideoWriter};
use tempfile::tempdir;

const W: u32 = 64;
const H: u32 = 48;

fn solid_frame(level: u8) -> RgbFrame {
    RgbFrame {
        data: vec![level; (W * H * 3) as usize],
        width: W,
        height: H,
        pts: 0,
    }
}

#[test]
fn frame_count_survives_encode_then_decode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roundtrip.mp4");

    let frames = vec![solid_frame(16), solid_frame(128), solid_frame(240)];
    save_to_video(&frames, &path, 30).unwrap();

    let mut reader = VideoReader::open(&path).unwrap();
    assert_eq!(reader.width(), W);
    assert_eq!(reader.height(), H);

    let mut decoded = 0usize;
    while let Some(frame) = reader.next_frame().unwrap() {
        assert_eq!(frame.width, W);
        assert_eq!(frame.height, H);
        assert_eq!(frame.data.len(), (W * H * 3) as usize);
        decoded += 1;
    }
    assert_eq!(decoded, frames.len());
}

#[test]
fn output_resolution_follows_first_frame_and_mismatches_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mismatch.mp4");

    let mut writer = VideoWriter::create(&path, W, H, 30).unwrap();
    writer.write(&solid_frame(100)).unwrap();

    let wrong = RgbFrame {
        data: vec![0u8; (32 * H * 3) as usize],
        width: 32,
        height: H,
        pts: 0,
    };
    let err = writer.write(&wrong).unwrap_err();
    assert!(err.to_string().contains("writer expects"));
}

#[test]
fn total_frames_reports_written_count() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("counted.mp4");

    let frames: Vec<RgbFrame> = (0..10).map(|i| solid_frame(i * 20)).collect();
    save_to_video(&frames, &path, 30).unwrap();

    assert_eq!(total_frames(&path), 10);
}

//! Synthetic test clips for ffmpeg-backed tests.

use std::path::Path;

use crate::shared::frame::Frame;
use crate::video::domain::frame_sink::{FrameSink, SinkFormat};

use super::ffmpeg_sink::FfmpegSink;

/// Frame `i` of a synthetic clip: a horizontal gradient whose brightness
/// steps by 40 per frame, so neighbouring frames differ after encoding.
pub(crate) fn test_frame(index: usize, width: u32, height: u32, fps: f64) -> Frame {
    let base = (index * 40) % 256;
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..height {
        for col in 0..width {
            let value = ((base + col as usize * 32 / width.max(1) as usize) % 256) as u8;
            data.extend_from_slice(&[value, value, value]);
        }
    }
    Frame::new(data, width, height, 3, index, index as f64 / fps)
}

/// Encodes `num_frames` synthetic frames to `path` through [`FfmpegSink`].
pub(crate) fn create_test_video(path: &Path, num_frames: usize, width: u32, height: u32, fps: f64) {
    let mut sink = FfmpegSink::new();
    sink.open(path, &SinkFormat::new(width, height, fps)).unwrap();
    for i in 0..num_frames {
        sink.write(&test_frame(i, width, height, fps)).unwrap();
    }
    sink.close().unwrap();
}

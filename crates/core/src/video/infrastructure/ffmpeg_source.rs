use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::media_descriptor::MediaDescriptor;
use crate::video::domain::frame_source::{FrameSource, SourceError};

/// `AVFormatContext::duration` is expressed in microseconds.
const AV_TIME_BASE: f64 = 1_000_000.0;

/// Decodes video frames via ffmpeg-next (libavformat + libavcodec).
///
/// Converts each decoded frame to RGB24 and wraps it in a [`Frame`].
/// Frames are pulled one packet at a time so the whole video is never
/// buffered in memory.
pub struct FfmpegSource {
    input_ctx: Option<ffmpeg_next::format::context::Input>,
    decoder: Option<ffmpeg_next::decoder::Video>,
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    video_stream_index: usize,
    width: u32,
    height: u32,
    fps: f64,
    time_base: f64,
    first_pts: Option<i64>,
    advertised_frames: Option<usize>,
    frame_index: usize,
    flushing: bool,
    done: bool,
}

// Safety: FfmpegSource is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn new() -> Self {
        Self {
            input_ctx: None,
            decoder: None,
            scaler: None,
            video_stream_index: 0,
            width: 0,
            height: 0,
            fps: 0.0,
            time_base: 0.0,
            first_pts: None,
            advertised_frames: None,
            frame_index: 0,
            flushing: false,
            done: false,
        }
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, SourceError> {
        let (Some(decoder), Some(scaler)) = (self.decoder.as_mut(), self.scaler.as_mut()) else {
            return Err(SourceError::NotOpened);
        };

        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        match decoder.receive_frame(&mut decoded) {
            Ok(()) => {}
            // Needs another packet, or fully drained.
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                return Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(None),
            Err(e) => return Err(corrupt(self.frame_index, e)),
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        scaler
            .run(&decoded, &mut rgb_frame)
            .map_err(|e| corrupt(self.frame_index, e))?;

        let timestamp = match decoded.timestamp() {
            Some(pts) if self.time_base > 0.0 => {
                let origin = *self.first_pts.get_or_insert(pts);
                (pts - origin).max(0) as f64 * self.time_base
            }
            _ if self.fps > 0.0 => self.frame_index as f64 / self.fps,
            _ => 0.0,
        };

        let pixels = extract_rgb_pixels(&rgb_frame, self.width, self.height);
        let frame = Frame::new(
            pixels,
            self.width,
            self.height,
            3,
            self.frame_index,
            timestamp,
        );
        self.frame_index += 1;
        Ok(Some(frame))
    }

    /// Pulls packets until the decoder yields a frame or the input ends.
    fn decode_next(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }

            if self.flushing {
                self.done = true;
                return match self.advertised_frames {
                    Some(expected) if self.frame_index < expected => {
                        Err(SourceError::CorruptStream {
                            frame_index: self.frame_index,
                            reason: format!(
                                "stream ended after {} of {expected} advertised frames",
                                self.frame_index
                            ),
                        })
                    }
                    _ => Ok(None),
                };
            }

            let frame_index = self.frame_index;
            let (Some(ictx), Some(decoder)) = (self.input_ctx.as_mut(), self.decoder.as_mut())
            else {
                return Err(SourceError::NotOpened);
            };

            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(ictx) {
                Ok(()) => {
                    if packet.stream() != self.video_stream_index {
                        continue;
                    }
                    decoder
                        .send_packet(&packet)
                        .map_err(|e| corrupt(frame_index, e))?;
                }
                Err(ffmpeg_next::Error::Eof) => {
                    let _ = decoder.send_eof();
                    self.flushing = true;
                }
                Err(e) => return Err(corrupt(frame_index, e)),
            }
        }
    }
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FfmpegSource {
    fn open(&mut self, path: &Path) -> Result<MediaDescriptor, SourceError> {
        self.close();

        let unreadable = |reason: String| SourceError::UnreadableMedia {
            path: path.to_path_buf(),
            reason,
        };

        ffmpeg_next::init().map_err(|e| unreadable(e.to_string()))?;

        let ictx = ffmpeg_next::format::input(path).map_err(|e| unreadable(e.to_string()))?;

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| unreadable("no video stream found".to_string()))?;

        let video_stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| unreadable(format!("unsupported codec: {e}")))?;
        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|e| unreadable(format!("unsupported codec: {e}")))?;

        let width = decoder.width();
        let height = decoder.height();
        if width == 0 || height == 0 {
            return Err(unreadable("video stream has no dimensions".to_string()));
        }

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| unreadable(format!("unsupported pixel format: {e}")))?;

        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        let tb = stream.time_base();
        let time_base = if tb.denominator() != 0 {
            tb.numerator() as f64 / tb.denominator() as f64
        } else {
            0.0
        };
        let total_frames = (stream.frames() > 0).then(|| stream.frames() as usize);
        let duration_secs = (ictx.duration() > 0).then(|| ictx.duration() as f64 / AV_TIME_BASE);

        let descriptor = MediaDescriptor {
            path: path.to_path_buf(),
            container: ictx.format().name().to_string(),
            codec: decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            width,
            height,
            fps,
            total_frames,
            duration_secs,
        };

        log::debug!(
            "Opened {} ({}x{} @ {:.2} fps, {:?} frames, codec {})",
            path.display(),
            width,
            height,
            fps,
            total_frames,
            descriptor.codec
        );

        self.video_stream_index = video_stream_index;
        self.width = width;
        self.height = height;
        self.fps = fps;
        self.time_base = time_base;
        self.advertised_frames = total_frames;
        self.decoder = Some(decoder);
        self.scaler = Some(scaler);
        self.input_ctx = Some(ictx);

        Ok(descriptor)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.input_ctx.is_none() {
            return Err(SourceError::NotOpened);
        }
        if self.done {
            return Ok(None);
        }

        let result = self.decode_next();
        if result.is_err() {
            self.done = true;
        }
        result
    }

    fn close(&mut self) {
        self.scaler = None;
        self.decoder = None;
        self.input_ctx = None;
        self.first_pts = None;
        self.advertised_frames = None;
        self.frame_index = 0;
        self.flushing = false;
        self.done = false;
    }
}

fn corrupt(frame_index: usize, e: ffmpeg_next::Error) -> SourceError {
    SourceError::CorruptStream {
        frame_index,
        reason: e.to_string(),
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride > width*3).
/// This function strips that padding to produce a tightly-packed pixel buffer.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::infrastructure::test_video::create_test_video;

    #[test]
    fn test_open_returns_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mp4");
        create_test_video(&path, 5, 160, 120, 30.0);

        let mut source = FfmpegSource::new();
        let meta = source.open(&path).unwrap();
        assert_eq!(meta.width, 160);
        assert_eq!(meta.height, 120);
        assert!(meta.fps > 0.0);
        assert_eq!(meta.path, path);
        assert!(meta.container.contains("mp4"));
    }

    #[test]
    fn test_open_nonexistent_is_unreadable() {
        let mut source = FfmpegSource::new();
        let err = source.open(Path::new("/nonexistent/test.mp4")).unwrap_err();
        assert!(matches!(err, SourceError::UnreadableMedia { .. }));
    }

    #[test]
    fn test_open_garbage_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.mp4");
        std::fs::write(&path, b"definitely not a video container").unwrap();

        let mut source = FfmpegSource::new();
        let err = source.open(&path).unwrap_err();
        assert!(matches!(err, SourceError::UnreadableMedia { .. }));
    }

    #[test]
    fn test_yields_every_frame_then_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mp4");
        create_test_video(&path, 5, 160, 120, 30.0);

        let mut source = FfmpegSource::new();
        source.open(&path).unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 5);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frames_have_sequential_indices_and_increasing_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mp4");
        create_test_video(&path, 5, 160, 120, 30.0);

        let mut source = FfmpegSource::new();
        source.open(&path).unwrap();

        let mut previous_ts = -1.0;
        let mut i = 0;
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.index(), i);
            assert!(frame.timestamp() > previous_ts);
            assert_eq!(frame.channels(), 3);
            assert_eq!(frame.data().len(), 160 * 120 * 3);
            previous_ts = frame.timestamp();
            i += 1;
        }
    }

    #[test]
    fn test_truncated_file_is_corrupt_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.avi");
        create_test_video(&path, 90, 320, 240, 30.0);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() * 6 / 10]).unwrap();

        let mut source = FfmpegSource::new();
        let meta = source.open(&path).unwrap();
        assert_eq!(meta.total_frames, Some(90));

        let mut frames = 0;
        let err = loop {
            match source.next_frame() {
                Ok(Some(_)) => frames += 1,
                Ok(None) => panic!("clean end of stream after {frames} frames"),
                Err(e) => break e,
            }
        };
        assert!(frames < 90);
        assert!(matches!(err, SourceError::CorruptStream { .. }));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_complete_file_matches_advertised_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("full.avi");
        create_test_video(&path, 12, 160, 120, 30.0);

        let mut source = FfmpegSource::new();
        assert_eq!(source.open(&path).unwrap().total_frames, Some(12));
        let mut frames = 0;
        while source.next_frame().unwrap().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 12);
    }

    #[test]
    fn test_next_frame_without_open_is_error() {
        let mut source = FfmpegSource::new();
        assert_eq!(source.next_frame(), Err(SourceError::NotOpened));
    }

    #[test]
    fn test_reopen_restarts_from_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mp4");
        create_test_video(&path, 3, 160, 120, 30.0);

        let mut source = FfmpegSource::new();
        source.open(&path).unwrap();
        while source.next_frame().unwrap().is_some() {}

        source.open(&path).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.index(), 0);
    }

    #[test]
    fn test_close_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mp4");
        create_test_video(&path, 1, 160, 120, 30.0);

        let mut source = FfmpegSource::new();
        source.open(&path).unwrap();
        source.close();
        source.close();
        assert_eq!(source.next_frame(), Err(SourceError::NotOpened));
    }
}

use std::path::Path;

use crate::shared::frame::Frame;
use crate::video::domain::frame_sink::{FrameSink, SinkError, SinkFormat, SinkSummary};

/// Largest time base denominator the MPEG-4 Part 2 encoder accepts.
const MPEG4_MAX_TIME_BASE: i32 = 65_535;

/// Encodes RGB frames to MPEG-4 via ffmpeg-next.
///
/// The container is chosen from the output extension. YUV420P needs even
/// dimensions, so odd-sized frames are scaled down by at most one pixel per
/// axis during color conversion.
pub struct FfmpegSink {
    octx: Option<ffmpeg_next::format::context::Output>,
    encoder: Option<ffmpeg_next::codec::encoder::video::Encoder>,
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    fps: f64,
    /// Frame duration as (numerator, denominator).
    frame_time_base: (i32, i32),
    frame_count: usize,
    video_stream_index: usize,
}

// Safety: FfmpegSink is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegSink {}

impl FfmpegSink {
    pub fn new() -> Self {
        Self {
            octx: None,
            encoder: None,
            scaler: None,
            width: 0,
            height: 0,
            fps: 0.0,
            frame_time_base: (1, 30),
            frame_count: 0,
            video_stream_index: 0,
        }
    }

    fn flush_and_finalize(&mut self) -> Result<(), SinkError> {
        let finalize = |e: ffmpeg_next::Error| SinkError::Finalize {
            reason: e.to_string(),
        };
        self.encoder
            .as_mut()
            .ok_or(SinkError::NotOpened)?
            .send_eof()
            .map_err(finalize)?;
        self.drain_packets(self.frame_count)?;
        self.octx
            .as_mut()
            .ok_or(SinkError::NotOpened)?
            .write_trailer()
            .map_err(finalize)
    }

    fn drain_packets(&mut self, frame_index: usize) -> Result<(), SinkError> {
        let (Some(encoder), Some(octx)) = (self.encoder.as_mut(), self.octx.as_mut()) else {
            return Err(SinkError::NotOpened);
        };
        let write_error = |e: ffmpeg_next::Error| SinkError::Write {
            frame_index,
            reason: e.to_string(),
        };

        let ost_time_base = octx
            .stream(self.video_stream_index)
            .ok_or(SinkError::NotOpened)?
            .time_base();
        let (num, den) = self.frame_time_base;

        let mut encoded = ffmpeg_next::Packet::empty();
        while encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.video_stream_index);
            encoded.rescale_ts(ffmpeg_next::Rational(num, den), ost_time_base);
            encoded.write_interleaved(octx).map_err(write_error)?;
        }
        Ok(())
    }
}

impl Default for FfmpegSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for FfmpegSink {
    fn open(&mut self, path: &Path, format: &SinkFormat) -> Result<(), SinkError> {
        let unwritable = |reason: String| SinkError::UnwritableDestination {
            path: path.to_path_buf(),
            reason,
        };

        if format.width == 0 || format.height == 0 {
            return Err(unwritable("frame has no pixels".to_string()));
        }

        ffmpeg_next::init().map_err(|e| unwritable(e.to_string()))?;

        let mut octx = ffmpeg_next::format::output(path).map_err(|e| unwritable(e.to_string()))?;

        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        // MPEG4 is available in every ffmpeg build, unlike libx264.
        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
            .ok_or_else(|| unwritable("MPEG4 encoder not found".to_string()))?;

        let mut ost = octx
            .add_stream(Some(codec))
            .map_err(|e| unwritable(e.to_string()))?;

        let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| unwritable(e.to_string()))?;

        let (enc_w, enc_h) = even_dimensions(format.width, format.height);
        let (num, den) = frame_time_base(format.fps);

        encoder_ctx.set_width(enc_w);
        encoder_ctx.set_height(enc_h);
        encoder_ctx.set_format(ffmpeg_next::format::Pixel::YUV420P);
        encoder_ctx.set_time_base(ffmpeg_next::Rational(num, den));
        encoder_ctx.set_frame_rate(Some(ffmpeg_next::Rational(den, num)));

        if global_header {
            encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder_ctx
            .open_with(ffmpeg_next::Dictionary::new())
            .map_err(|e| unwritable(e.to_string()))?;
        ost.set_parameters(&encoder);
        let video_stream_index = ost.index();

        octx.write_header().map_err(|e| unwritable(e.to_string()))?;

        let scaler = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::RGB24,
            format.width,
            format.height,
            ffmpeg_next::format::Pixel::YUV420P,
            enc_w,
            enc_h,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| unwritable(e.to_string()))?;

        self.width = format.width;
        self.height = format.height;
        self.fps = if format.fps > 0.0 {
            format.fps
        } else {
            den as f64 / num as f64
        };
        self.frame_time_base = (num, den);
        self.video_stream_index = video_stream_index;
        self.octx = Some(octx);
        self.encoder = Some(encoder);
        self.scaler = Some(scaler);
        self.frame_count = 0;

        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let (Some(encoder), Some(scaler)) = (self.encoder.as_mut(), self.scaler.as_mut()) else {
            return Err(SinkError::NotOpened);
        };
        let write_error = |reason: String| SinkError::Write {
            frame_index: frame.index(),
            reason,
        };

        if frame.width() != self.width || frame.height() != self.height || frame.channels() != 3
        {
            return Err(write_error(format!(
                "frame is {}x{}x{}, output stream is {}x{}x3",
                frame.width(),
                frame.height(),
                frame.channels(),
                self.width,
                self.height
            )));
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::new(
            ffmpeg_next::format::Pixel::RGB24,
            self.width,
            self.height,
        );

        let stride = rgb_frame.stride(0);
        let row_bytes = self.width as usize * 3;
        let data = rgb_frame.data_mut(0);
        let src = frame.data();

        for row in 0..self.height as usize {
            let src_start = row * row_bytes;
            let dst_start = row * stride;
            data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src[src_start..src_start + row_bytes]);
        }

        let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
        scaler
            .run(&rgb_frame, &mut yuv_frame)
            .map_err(|e| write_error(e.to_string()))?;
        // PTS is the output ordinal, so dropped frames never leave gaps.
        yuv_frame.set_pts(Some(self.frame_count as i64));

        encoder
            .send_frame(&yuv_frame)
            .map_err(|e| write_error(e.to_string()))?;

        self.drain_packets(frame.index())?;
        self.frame_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<SinkSummary, SinkError> {
        if self.encoder.is_none() {
            self.octx = None;
            self.scaler = None;
            return Ok(SinkSummary::default());
        }

        let result = self.flush_and_finalize();

        self.encoder = None;
        self.scaler = None;
        self.octx = None;
        result?;

        Ok(SinkSummary {
            frames_written: self.frame_count,
            duration_secs: self.frame_count as f64 / self.fps,
            keyframes: Vec::new(),
        })
    }
}

/// Rounds dimensions down to the nearest even value (minimum 2).
fn even_dimensions(width: u32, height: u32) -> (u32, u32) {
    ((width & !1).max(2), (height & !1).max(2))
}

/// Converts a frame rate to the duration of one frame as a reduced
/// rational `(num, den)`, keeping the denominator encodable.
fn frame_time_base(fps: f64) -> (i32, i32) {
    if !(fps.is_finite() && fps > 0.0) {
        return (1, 30);
    }
    let rate_num = (fps * 1000.0).round() as i64;
    let rate_den = 1000_i64;
    let g = gcd(rate_num, rate_den);
    let (rate_num, rate_den) = (rate_num / g, rate_den / g);

    if rate_num <= MPEG4_MAX_TIME_BASE as i64 && rate_num > 0 {
        (rate_den as i32, rate_num as i32)
    } else {
        (1, (fps.round() as i32).clamp(1, MPEG4_MAX_TIME_BASE))
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a.abs().max(1)
    } else {
        gcd(b, a % b)
    }
}

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::shared::frame::Frame;
use crate::shared::settings::KeyframeSettings;
use crate::video::domain::frame_sink::{FrameSink, Keyframe, SinkError, SinkFormat, SinkSummary};
use crate::video::domain::image_writer::ImageWriter;

/// Picks evenly spaced input frame indices to capture as keyframes.
///
/// One keyframe per `seconds_per_keyframe` of input, clamped to
/// `[min_count, max_count]` and never more than the frame count.
pub fn plan_keyframes(total_frames: usize, fps: f64, settings: &KeyframeSettings) -> Vec<usize> {
    if total_frames == 0 || settings.max_count == 0 {
        return Vec::new();
    }

    let per_keyframe = fps.max(0.0) * settings.seconds_per_keyframe;
    let by_duration = if per_keyframe > 0.0 {
        (total_frames as f64 / per_keyframe) as usize
    } else {
        0
    };
    let count = by_duration
        .clamp(settings.min_count.min(settings.max_count), settings.max_count)
        .clamp(1, total_frames);
    let interval = total_frames / count;

    (0..count).map(|i| i * interval).collect()
}

/// Directory keyframes are written to: `<parent>/<stem>_keyframes`.
pub fn keyframe_dir(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("{stem}_keyframes"))
}

/// Decorator that saves selected output frames as JPEG stills while
/// delegating encoding to the wrapped sink.
///
/// Targets are input frame indices; when a target frame was dropped by a
/// stage, the next written frame stands in for it. Failing to save a still
/// is logged and never fails the stream.
pub struct KeyframeCapturingSink {
    inner: Box<dyn FrameSink>,
    writer: Box<dyn ImageWriter>,
    settings: KeyframeSettings,
    dir: PathBuf,
    pending: VecDeque<usize>,
    captured: Vec<Keyframe>,
}

impl KeyframeCapturingSink {
    pub fn new(
        inner: Box<dyn FrameSink>,
        writer: Box<dyn ImageWriter>,
        settings: KeyframeSettings,
        dir: PathBuf,
    ) -> Self {
        Self {
            inner,
            writer,
            settings,
            dir,
            pending: VecDeque::new(),
            captured: Vec::new(),
        }
    }

    fn capture(&mut self, frame: &Frame) {
        let order = self.captured.len() + 1;
        let path = self.dir.join(format!("keyframe_{order}.jpg"));
        match self.writer.write_jpeg(
            &path,
            frame,
            self.settings.max_width,
            self.settings.jpeg_quality,
        ) {
            Ok(()) => self.captured.push(Keyframe {
                order,
                frame_index: frame.index(),
                timestamp: frame.timestamp(),
                path,
            }),
            Err(e) => log::warn!(
                "Keyframe capture failed for frame {}: {e}",
                frame.index()
            ),
        }
    }
}

impl FrameSink for KeyframeCapturingSink {
    fn open(&mut self, path: &Path, format: &SinkFormat) -> Result<(), SinkError> {
        self.inner.open(path, format)?;

        self.captured.clear();
        self.pending = match format.input_frames {
            Some(total) => plan_keyframes(total, format.input_fps, &self.settings).into(),
            None => {
                log::info!("Input frame count unknown, skipping keyframe capture");
                VecDeque::new()
            }
        };
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.inner.write(frame)?;

        let mut due = false;
        while self.pending.front().is_some_and(|&t| t <= frame.index()) {
            self.pending.pop_front();
            due = true;
        }
        if due {
            self.capture(frame);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<SinkSummary, SinkError> {
        self.pending.clear();
        let mut summary = self.inner.close()?;
        summary.keyframes.append(&mut self.captured);
        Ok(summary)
    }
}

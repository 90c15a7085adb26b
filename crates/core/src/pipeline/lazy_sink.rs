use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::jobs::domain::pipeline_job::{JobFailure, JobResult};
use crate::shared::frame::Frame;
use crate::shared::media_descriptor::{MediaDescriptor, OutputDescriptor};
use crate::video::domain::frame_sink::{FrameSink, SinkFormat};

/// Frame sink that is opened with the dimensions of the first frame that
/// reaches it. A run that writes nothing never touches the destination.
pub struct LazySink {
    sink: Box<dyn FrameSink>,
    path: PathBuf,
    fps: f64,
    input_frames: Option<usize>,
    input_fps: f64,
    format: Option<SinkFormat>,
    written: usize,
}

impl LazySink {
    pub fn new(sink: Box<dyn FrameSink>, path: &Path, input: &MediaDescriptor, fps: f64) -> Self {
        Self {
            sink,
            path: path.to_path_buf(),
            fps,
            input_frames: input.total_frames,
            input_fps: input.effective_fps(),
            format: None,
            written: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.format.is_some()
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), JobFailure> {
        if self.format.is_none() {
            let format = SinkFormat {
                width: frame.width(),
                height: frame.height(),
                fps: self.fps,
                input_frames: self.input_frames,
                input_fps: self.input_fps,
            };
            self.sink.open(&self.path, &format)?;
            log::info!(
                "Opened output {} ({}x{} @ {:.2} fps)",
                self.path.display(),
                format.width,
                format.height,
                format.fps
            );
            self.format = Some(format);
        }

        self.sink.write(frame)?;
        self.written += 1;
        Ok(())
    }

    /// Closes the sink (if it was opened) and builds the run's result.
    pub fn finish(mut self, frames_read: usize, started: Instant) -> Result<JobResult, JobFailure> {
        let (output, keyframes) = match self.format {
            Some(format) => {
                let summary = self.sink.close()?;
                let output = OutputDescriptor {
                    path: self.path.clone(),
                    width: format.width,
                    height: format.height,
                    fps: format.fps,
                    frame_count: self.written,
                    duration_secs: summary.duration_secs,
                };
                (output, summary.keyframes)
            }
            None => {
                log::info!("No frames reached the output, {} not created", self.path.display());
                let output = OutputDescriptor {
                    path: self.path.clone(),
                    width: 0,
                    height: 0,
                    fps: self.fps,
                    frame_count: 0,
                    duration_secs: 0.0,
                };
                (output, Vec::new())
            }
        };

        Ok(JobResult {
            output,
            frames_read,
            frames_written: self.written,
            elapsed_secs: started.elapsed().as_secs_f64(),
            keyframes,
        })
    }

    /// Best-effort close after a failed or cancelled run.
    pub fn abort(mut self) {
        if self.format.is_none() {
            return;
        }
        if let Err(e) = self.sink.close() {
            log::warn!("Closing {} after failure: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::domain::pipeline_job::FailureKind;
    use crate::video::domain::frame_sink::{SinkError, SinkSummary};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Tally {
        opened: Option<SinkFormat>,
        writes: usize,
        closes: usize,
    }

    struct TallySink {
        tally: Arc<Mutex<Tally>>,
        refuse_open: bool,
    }

    impl FrameSink for TallySink {
        fn open(&mut self, path: &Path, format: &SinkFormat) -> Result<(), SinkError> {
            if self.refuse_open {
                return Err(SinkError::UnwritableDestination {
                    path: path.to_path_buf(),
                    reason: "read-only".to_string(),
                });
            }
            self.tally.lock().unwrap().opened = Some(*format);
            Ok(())
        }

        fn write(&mut self, _frame: &Frame) -> Result<(), SinkError> {
            self.tally.lock().unwrap().writes += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<SinkSummary, SinkError> {
            let mut tally = self.tally.lock().unwrap();
            tally.closes += 1;
            Ok(SinkSummary {
                frames_written: tally.writes,
                duration_secs: tally.writes as f64 / 10.0,
                keyframes: Vec::new(),
            })
        }
    }

    fn descriptor() -> MediaDescriptor {
        MediaDescriptor {
            path: PathBuf::from("in.mp4"),
            container: "mp4".to_string(),
            codec: "mpeg4".to_string(),
            width: 8,
            height: 8,
            fps: 20.0,
            total_frames: Some(40),
            duration_secs: Some(2.0),
        }
    }

    fn lazy(refuse_open: bool) -> (LazySink, Arc<Mutex<Tally>>) {
        let tally = Arc::new(Mutex::new(Tally::default()));
        let sink = TallySink {
            tally: tally.clone(),
            refuse_open,
        };
        (
            LazySink::new(Box::new(sink), Path::new("out.mp4"), &descriptor(), 10.0),
            tally,
        )
    }

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![0; (width * height * 3) as usize], width, height, 3, 0, 0.0)
    }

    #[test]
    fn test_opens_with_first_frame_dimensions() {
        let (mut sink, tally) = lazy(false);
        assert!(!sink.is_open());
        sink.write(&frame(4, 2)).unwrap();
        sink.write(&frame(4, 2)).unwrap();

        let format = tally.lock().unwrap().opened.unwrap();
        assert_eq!((format.width, format.height), (4, 2));
        assert_eq!(format.fps, 10.0);
        assert_eq!(format.input_frames, Some(40));
        assert_eq!(format.input_fps, 20.0);

        let result = sink.finish(5, Instant::now()).unwrap();
        assert_eq!(result.frames_read, 5);
        assert_eq!(result.frames_written, 2);
        assert_eq!(result.output.frame_count, 2);
        assert_eq!(result.output.duration_secs, 0.2);
        assert_eq!(tally.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_never_opened_reports_empty_output() {
        let (sink, tally) = lazy(false);
        let result = sink.finish(0, Instant::now()).unwrap();
        assert_eq!(result.output.frame_count, 0);
        assert_eq!(result.output.duration_secs, 0.0);
        assert!(tally.lock().unwrap().opened.is_none());
        assert_eq!(tally.lock().unwrap().closes, 0);
    }

    #[test]
    fn test_open_failure_is_unwritable_destination() {
        let (mut sink, _tally) = lazy(true);
        let failure = sink.write(&frame(2, 2)).unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnwritableDestination);
        assert!(!sink.is_open());
    }

    #[test]
    fn test_abort_closes_only_opened_sink() {
        let (unopened, tally) = lazy(false);
        unopened.abort();
        assert_eq!(tally.lock().unwrap().closes, 0);

        let (mut opened, tally) = lazy(false);
        opened.write(&frame(2, 2)).unwrap();
        opened.abort();
        assert_eq!(tally.lock().unwrap().closes, 1);
    }
}

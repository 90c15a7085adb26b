//! Instrumented sources, sinks and stages for pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::shared::frame::Frame;
use crate::shared::media_descriptor::MediaDescriptor;
use crate::stages::domain::stage::{Stage, StageError, StageOutput};
use crate::video::domain::frame_sink::{FrameSink, SinkError, SinkFormat, SinkSummary};
use crate::video::domain::frame_source::{FrameSource, SourceError};

pub(crate) const WIDTH: u32 = 4;
pub(crate) const HEIGHT: u32 = 2;
pub(crate) const FPS: f64 = 10.0;

#[derive(Default)]
pub(crate) struct SourceTally {
    pub opens: usize,
    pub closes: usize,
    pub reads: usize,
}

/// Deterministic source: frame `i` has byte `j` equal to `(i + j) % 251`.
pub(crate) struct StubSource {
    frames: usize,
    corrupt_at: Option<usize>,
    unreadable: bool,
    known_length: bool,
    delay: Option<Duration>,
    next: usize,
    opened: bool,
    tally: Arc<Mutex<SourceTally>>,
}

impl StubSource {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            corrupt_at: None,
            unreadable: false,
            known_length: true,
            delay: None,
            next: 0,
            opened: false,
            tally: Arc::new(Mutex::new(SourceTally::default())),
        }
    }

    pub fn corrupt_at(mut self, index: usize) -> Self {
        self.corrupt_at = Some(index);
        self
    }

    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    pub fn unknown_length(mut self) -> Self {
        self.known_length = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn tally(&self) -> Arc<Mutex<SourceTally>> {
        self.tally.clone()
    }
}

pub(crate) fn stub_frame(index: usize) -> Frame {
    let len = (WIDTH * HEIGHT * 3) as usize;
    let data = (0..len).map(|j| ((index + j) % 251) as u8).collect();
    Frame::new(data, WIDTH, HEIGHT, 3, index, index as f64 / FPS)
}

impl FrameSource for StubSource {
    fn open(&mut self, path: &Path) -> Result<MediaDescriptor, SourceError> {
        self.tally.lock().unwrap().opens += 1;
        if self.unreadable {
            return Err(SourceError::UnreadableMedia {
                path: path.to_path_buf(),
                reason: "not a media file".to_string(),
            });
        }
        self.next = 0;
        self.opened = true;
        Ok(MediaDescriptor {
            path: path.to_path_buf(),
            container: "stub".to_string(),
            codec: "raw".to_string(),
            width: WIDTH,
            height: HEIGHT,
            fps: FPS,
            total_frames: self.known_length.then_some(self.frames),
            duration_secs: Some(self.frames as f64 / FPS),
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.opened {
            return Err(SourceError::NotOpened);
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.corrupt_at == Some(self.next) {
            return Err(SourceError::CorruptStream {
                frame_index: self.next,
                reason: "truncated packet".to_string(),
            });
        }
        if self.next >= self.frames {
            return Ok(None);
        }
        let frame = stub_frame(self.next);
        self.next += 1;
        self.tally.lock().unwrap().reads += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.opened {
            self.tally.lock().unwrap().closes += 1;
        }
        self.opened = false;
    }
}

#[derive(Default)]
pub(crate) struct SinkTally {
    pub opens: Vec<(PathBuf, SinkFormat)>,
    pub frames: Vec<Frame>,
    pub closes: usize,
}

pub(crate) struct StubSink {
    tally: Arc<Mutex<SinkTally>>,
    fail_open: bool,
    fail_write_at: Option<usize>,
    fps: f64,
}

impl StubSink {
    pub fn new() -> Self {
        Self {
            tally: Arc::new(Mutex::new(SinkTally::default())),
            fail_open: false,
            fail_write_at: None,
            fps: 0.0,
        }
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fails the write of the `n`-th output frame (zero-based).
    pub fn failing_write_at(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    pub fn tally(&self) -> Arc<Mutex<SinkTally>> {
        self.tally.clone()
    }
}

impl FrameSink for StubSink {
    fn open(&mut self, path: &Path, format: &SinkFormat) -> Result<(), SinkError> {
        if self.fail_open {
            return Err(SinkError::UnwritableDestination {
                path: path.to_path_buf(),
                reason: "read-only file system".to_string(),
            });
        }
        self.fps = format.fps;
        self.tally
            .lock()
            .unwrap()
            .opens
            .push((path.to_path_buf(), *format));
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let mut tally = self.tally.lock().unwrap();
        if self.fail_write_at == Some(tally.frames.len()) {
            return Err(SinkError::Write {
                frame_index: frame.index(),
                reason: "disk full".to_string(),
            });
        }
        tally.frames.push(frame.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<SinkSummary, SinkError> {
        let mut tally = self.tally.lock().unwrap();
        tally.closes += 1;
        Ok(SinkSummary {
            frames_written: tally.frames.len(),
            duration_secs: tally.frames.len() as f64 / self.fps.max(1.0),
            keyframes: Vec::new(),
        })
    }
}

/// Drops frames whose index matches the predicate.
pub(crate) struct DropWhere(pub fn(usize) -> bool);

impl Stage for DropWhere {
    fn name(&self) -> &str {
        "drop_where"
    }

    fn apply(&mut self, frame: Frame) -> Result<StageOutput, StageError> {
        if (self.0)(frame.index()) {
            Ok(StageOutput::Drop)
        } else {
            Ok(StageOutput::Emit(frame))
        }
    }

    fn may_drop(&self) -> bool {
        true
    }
}

/// Fails on one frame index.
pub(crate) struct FailAt(pub usize);

impl Stage for FailAt {
    fn name(&self) -> &str {
        "fail_at"
    }

    fn apply(&mut self, frame: Frame) -> Result<StageOutput, StageError> {
        if frame.index() == self.0 {
            Err(StageError::new(format!("refusing frame {}", self.0)))
        } else {
            Ok(StageOutput::Emit(frame))
        }
    }
}

pub(crate) struct Invert;

impl Stage for Invert {
    fn name(&self) -> &str {
        "invert"
    }

    fn apply(&mut self, mut frame: Frame) -> Result<StageOutput, StageError> {
        frame.data_mut().iter_mut().for_each(|v| *v = 255 - *v);
        Ok(StageOutput::Emit(frame))
    }
}

/// Raises a cancellation flag when it sees frame `at`.
pub(crate) struct CancelAt {
    pub at: usize,
    pub flag: Arc<AtomicBool>,
}

impl Stage for CancelAt {
    fn name(&self) -> &str {
        "cancel_at"
    }

    fn apply(&mut self, frame: Frame) -> Result<StageOutput, StageError> {
        if frame.index() == self.at {
            self.flag.store(true, Ordering::Relaxed);
        }
        Ok(StageOutput::Emit(frame))
    }
}

/// Counts applications and closes.
#[derive(Clone, Default)]
pub(crate) struct Counting {
    pub applied: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl Stage for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn apply(&mut self, frame: Frame) -> Result<StageOutput, StageError> {
        self.applied.fetch_add(1, Ordering::Relaxed);
        Ok(StageOutput::Emit(frame))
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

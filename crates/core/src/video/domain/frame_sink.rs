use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("cannot write to {path}: {reason}")]
    UnwritableDestination { path: PathBuf, reason: String },
    #[error("failed to write frame {frame_index}: {reason}")]
    Write { frame_index: usize, reason: String },
    #[error("failed to finalize output: {reason}")]
    Finalize { reason: String },
    #[error("frame sink not opened")]
    NotOpened,
}

/// Target format for an output stream, derived from the first frame that
/// survives the stage chain, plus hints about the input it came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SinkFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub input_frames: Option<usize>,
    pub input_fps: f64,
}

impl SinkFormat {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            input_frames: None,
            input_fps: fps,
        }
    }
}

/// A still captured from the output stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// 1-based position among the captured keyframes.
    pub order: usize,
    pub frame_index: usize,
    pub timestamp: f64,
    pub path: PathBuf,
}

/// What a sink reports once it has been finalized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkSummary {
    pub frames_written: usize,
    pub duration_secs: f64,
    pub keyframes: Vec<Keyframe>,
}

/// Abstracts video encoding so the pipeline can write output without
/// depending on a specific codec library.
pub trait FrameSink: Send {
    fn open(&mut self, path: &Path, format: &SinkFormat) -> Result<(), SinkError>;

    /// Frames must be written in the order they should appear in the output.
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Flushes and finalizes container metadata. A second call is a no-op
    /// that returns an empty summary.
    fn close(&mut self) -> Result<SinkSummary, SinkError>;
}

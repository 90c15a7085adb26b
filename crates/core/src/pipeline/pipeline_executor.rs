use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::jobs::domain::pipeline_job::{JobFailure, JobProgress, JobResult};
use crate::shared::media_descriptor::MediaDescriptor;
use crate::stages::domain::stage::Stage;
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::FrameSource;

use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};

pub type OpenedCallback = Box<dyn FnMut(&MediaDescriptor) + Send>;
pub type ProgressCallback = Box<dyn FnMut(JobProgress) + Send>;

/// Configuration for one pipeline run.
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Polled before every frame is read.
    pub cancelled: Arc<AtomicBool>,
    pub on_opened: Option<OpenedCallback>,
    /// Called after every frame with cumulative counters.
    pub on_progress: Option<ProgressCallback>,
    pub logger: Box<dyn PipelineLogger>,
}

impl PipelineConfig {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
            on_opened: None,
            on_progress: None,
            logger: Box::new(NullPipelineLogger),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn notify_opened(&mut self, descriptor: &MediaDescriptor) {
        self.logger.info(&format!(
            "Opened {} ({}x{} @ {:.2} fps, {} frames)",
            descriptor.path.display(),
            descriptor.width,
            descriptor.height,
            descriptor.fps,
            descriptor
                .total_frames
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        ));
        if let Some(callback) = self.on_opened.as_mut() {
            callback(descriptor);
        }
    }

    pub(crate) fn report(&mut self, progress: JobProgress, total_frames: Option<usize>) {
        self.logger
            .progress(progress.frames_processed, total_frames.unwrap_or(0));
        if let Some(callback) = self.on_progress.as_mut() {
            callback(progress);
        }
    }
}

/// Abstracts how the read → stages → write pipeline is executed.
///
/// Implementations open the source, run every frame through the stages in
/// index order and write survivors in the same order. On every exit path
/// the source and stages are closed and an opened sink gets a best-effort
/// close. A cancelled run returns a failure of kind `Cancelled`.
pub trait PipelineExecutor: Send + Sync {
    fn execute(
        &self,
        source: Box<dyn FrameSource>,
        stages: Vec<Box<dyn Stage>>,
        sink: Box<dyn FrameSink>,
        config: PipelineConfig,
    ) -> Result<JobResult, JobFailure>;
}

pub(crate) fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

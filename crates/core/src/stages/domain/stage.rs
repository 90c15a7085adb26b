use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::media_descriptor::MediaDescriptor;

use super::stage_params::{StageConfigError, StageParams};

/// What a stage does with the frame it was handed.
#[derive(Debug, PartialEq)]
pub enum StageOutput {
    /// Pass this frame (new or mutated) on to the next stage.
    Emit(Frame),
    /// Remove the frame from the stream.
    Drop,
}

/// A stage could not transform a frame. Terminal for the job.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct StageError {
    message: String,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Domain interface for one per-frame transformation step.
///
/// Stages take exclusive ownership of the incoming frame and either hand
/// it back (possibly with a new pixel buffer) or drop it. Frames arrive in
/// strictly increasing index order with no gaps, so stateful stages may
/// keep history, bounded by [`Stage::lookback`].
pub trait Stage: Send {
    /// Kind identifier, reported in failure details.
    fn name(&self) -> &str;

    /// Called once per run after the source is opened, before any frame.
    fn start(&mut self, _input: &MediaDescriptor) -> Result<(), StageError> {
        Ok(())
    }

    fn apply(&mut self, frame: Frame) -> Result<StageOutput, StageError>;

    /// Frame rate of this stage's output given its input rate.
    fn output_fps(&self, input_fps: f64) -> f64 {
        input_fps
    }

    /// Number of previous frames the stage retains.
    fn lookback(&self) -> usize {
        0
    }

    /// Whether `apply` can return [`StageOutput::Drop`]. A stage with a
    /// lookback must not follow one that may drop.
    fn may_drop(&self) -> bool {
        false
    }

    /// Releases per-run state. Called on every exit path.
    fn close(&mut self) {}
}

/// A stage that can be built from validated parameters.
pub trait ConfigurableStage: Stage + Sized {
    /// Identifier used in stage configs.
    const KIND: &'static str;

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError>;
}

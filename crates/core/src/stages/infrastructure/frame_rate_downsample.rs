use crate::shared::frame::Frame;
use crate::shared::media_descriptor::MediaDescriptor;
use crate::stages::domain::stage::{ConfigurableStage, Stage, StageError, StageOutput};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

/// How the stage decides which frames survive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DownsampleMode {
    /// Keep frames evenly spaced to approximate this rate.
    TargetFps(f64),
    /// Keep every n-th frame, starting with the first.
    KeepEvery(u32),
}

/// Drops frames to lower the stream's frame rate. Kept frames pass
/// through untouched, so indices and timestamps stay those of the input.
pub struct FrameRateDownsampleStage {
    mode: DownsampleMode,
    input_fps: f64,
    seen: u64,
    next_keep: f64,
}

impl FrameRateDownsampleStage {
    pub fn new(mode: DownsampleMode) -> Self {
        Self {
            mode,
            input_fps: 0.0,
            seen: 0,
            next_keep: 0.0,
        }
    }

    fn keep(&mut self) -> bool {
        let position = self.seen;
        self.seen += 1;
        match self.mode {
            DownsampleMode::KeepEvery(n) => position % n as u64 == 0,
            DownsampleMode::TargetFps(target) => {
                if target >= self.input_fps || self.input_fps <= 0.0 {
                    return true;
                }
                if position as f64 + 1e-9 >= self.next_keep {
                    self.next_keep += self.input_fps / target;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl ConfigurableStage for FrameRateDownsampleStage {
    const KIND: &'static str = "frame_rate_downsample";

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError> {
        params.expect_only(&["target_fps", "keep_every"])?;

        let mode = match (params.f64("target_fps")?, params.u32("keep_every")?) {
            (Some(_), Some(_)) => {
                return Err(params.invalid(
                    "keep_every",
                    "cannot be combined with target_fps",
                ))
            }
            (None, None) => return Err(params.missing("target_fps")),
            (Some(fps), None) if fps <= 0.0 => {
                return Err(params.invalid("target_fps", "must be positive"))
            }
            (Some(fps), None) => DownsampleMode::TargetFps(fps),
            (None, Some(0)) => return Err(params.invalid("keep_every", "must be at least 1")),
            (None, Some(n)) => DownsampleMode::KeepEvery(n),
        };
        Ok(Self::new(mode))
    }
}

impl Stage for FrameRateDownsampleStage {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn start(&mut self, input: &MediaDescriptor) -> Result<(), StageError> {
        self.input_fps = input.effective_fps();
        self.seen = 0;
        self.next_keep = 0.0;
        Ok(())
    }

    fn apply(&mut self, frame: Frame) -> Result<StageOutput, StageError> {
        if self.keep() {
            Ok(StageOutput::Emit(frame))
        } else {
            Ok(StageOutput::Drop)
        }
    }

    fn output_fps(&self, input_fps: f64) -> f64 {
        match self.mode {
            DownsampleMode::TargetFps(target) => target.min(input_fps),
            DownsampleMode::KeepEvery(n) => input_fps / n as f64,
        }
    }

    fn may_drop(&self) -> bool {
        true
    }
}

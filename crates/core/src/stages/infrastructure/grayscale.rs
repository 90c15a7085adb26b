use ndarray::Axis;

use crate::shared::frame::Frame;
use crate::stages::domain::stage::{ConfigurableStage, Stage, StageError, StageOutput};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

use super::rgb::require_rgb;

/// Replaces every pixel with its Rec.601 luma, keeping three channels so
/// downstream stages and the encoder see an unchanged layout.
pub struct GrayscaleStage;

impl ConfigurableStage for GrayscaleStage {
    const KIND: &'static str = "grayscale";

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError> {
        params.expect_only(&[])?;
        Ok(Self)
    }
}

impl Stage for GrayscaleStage {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&mut self, mut frame: Frame) -> Result<StageOutput, StageError> {
        require_rgb(Self::KIND, &frame)?;

        let mut pixels = frame.as_ndarray_mut();
        for mut px in pixels.lanes_mut(Axis(2)) {
            let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            px.fill(luma.round().min(255.0) as u8);
        }
        Ok(StageOutput::Emit(frame))
    }
}

use crate::shared::frame::Frame;
use crate::stages::domain::stage::{ConfigurableStage, Stage, StageError, StageOutput};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

use super::rgb::require_rgb;

/// Linear brightness/contrast adjustment around mid-gray.
///
/// Formula: `out = (v - 128) * contrast + 128 + brightness`, clamped to
/// `[0, 255]`. The mapping is precomputed into a 256-entry table.
pub struct BrightnessContrastStage {
    lut: [u8; 256],
}

impl BrightnessContrastStage {
    pub fn new(brightness: f64, contrast: f64) -> Self {
        let mut lut = [0u8; 256];
        for (v, out) in lut.iter_mut().enumerate() {
            let adjusted = (v as f64 - 128.0) * contrast + 128.0 + brightness;
            *out = adjusted.round().clamp(0.0, 255.0) as u8;
        }
        Self { lut }
    }
}

impl ConfigurableStage for BrightnessContrastStage {
    const KIND: &'static str = "brightness_contrast";

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError> {
        params.expect_only(&["brightness", "contrast"])?;

        let brightness = params.f64("brightness")?.unwrap_or(0.0);
        if !(-255.0..=255.0).contains(&brightness) {
            return Err(params.invalid("brightness", "must be between -255 and 255"));
        }
        let contrast = params.f64("contrast")?.unwrap_or(1.0);
        if contrast < 0.0 {
            return Err(params.invalid("contrast", "must not be negative"));
        }

        Ok(Self::new(brightness, contrast))
    }
}

impl Stage for BrightnessContrastStage {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&mut self, mut frame: Frame) -> Result<StageOutput, StageError> {
        require_rgb(Self::KIND, &frame)?;

        for v in frame.data_mut() {
            *v = self.lut[*v as usize];
        }
        Ok(StageOutput::Emit(frame))
    }
}

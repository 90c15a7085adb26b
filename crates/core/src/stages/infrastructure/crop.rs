use crate::shared::frame::Frame;
use crate::stages::domain::stage::{ConfigurableStage, Stage, StageError, StageOutput};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

use super::rgb::require_rgb;

/// Cuts a fixed rectangle out of every frame.
pub struct CropStage {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl CropStage {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl ConfigurableStage for CropStage {
    const KIND: &'static str = "crop";

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError> {
        params.expect_only(&["x", "y", "width", "height"])?;

        let width = params.required_u32("width")?;
        let height = params.required_u32("height")?;
        if width == 0 {
            return Err(params.invalid("width", "must be at least 1"));
        }
        if height == 0 {
            return Err(params.invalid("height", "must be at least 1"));
        }

        Ok(Self::new(
            params.u32("x")?.unwrap_or(0),
            params.u32("y")?.unwrap_or(0),
            width,
            height,
        ))
    }
}

impl Stage for CropStage {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&mut self, mut frame: Frame) -> Result<StageOutput, StageError> {
        require_rgb(Self::KIND, &frame)?;

        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        if right > frame.width() as u64 || bottom > frame.height() as u64 {
            return Err(StageError::new(format!(
                "crop {}x{} at ({}, {}) exceeds frame {}x{}",
                self.width,
                self.height,
                self.x,
                self.y,
                frame.width(),
                frame.height()
            )));
        }

        let stride = frame.width() as usize * 3;
        let row_len = self.width as usize * 3;
        let left = self.x as usize * 3;
        let mut cropped = Vec::with_capacity(row_len * self.height as usize);
        for row in frame
            .data()
            .chunks_exact(stride)
            .skip(self.y as usize)
            .take(self.height as usize)
        {
            cropped.extend_from_slice(&row[left..left + row_len]);
        }

        frame.replace_pixels(cropped, self.width, self.height);
        Ok(StageOutput::Emit(frame))
    }
}

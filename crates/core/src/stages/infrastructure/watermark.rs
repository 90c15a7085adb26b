use std::path::Path;

use image::RgbaImage;

use crate::shared::frame::Frame;
use crate::stages::domain::stage::{ConfigurableStage, Stage, StageError, StageOutput};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

use super::rgb::require_rgb;

const DEFAULT_OPACITY: f64 = 0.5;

/// Alpha-blends an overlay image onto each frame at a fixed position.
///
/// The overlay's own alpha channel is multiplied by `opacity`. Parts of
/// the overlay that fall outside the frame are clipped.
pub struct WatermarkStage {
    overlay: RgbaImage,
    x: u32,
    y: u32,
    opacity: f32,
}

impl WatermarkStage {
    pub fn new(overlay: RgbaImage, x: u32, y: u32, opacity: f32) -> Self {
        Self {
            overlay,
            x,
            y,
            opacity,
        }
    }

    pub fn from_file(path: &Path, x: u32, y: u32, opacity: f32) -> Result<Self, image::ImageError> {
        let overlay = image::open(path)?.to_rgba8();
        log::debug!(
            "Loaded watermark {} ({}x{})",
            path.display(),
            overlay.width(),
            overlay.height()
        );
        Ok(Self::new(overlay, x, y, opacity))
    }
}

impl ConfigurableStage for WatermarkStage {
    const KIND: &'static str = "watermark";

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError> {
        params.expect_only(&["image", "x", "y", "opacity"])?;

        let opacity = params.f64("opacity")?.unwrap_or(DEFAULT_OPACITY);
        if !(0.0..=1.0).contains(&opacity) {
            return Err(params.invalid("opacity", "must be between 0 and 1"));
        }

        let image = params.required_str("image")?;
        Self::from_file(
            Path::new(image),
            params.u32("x")?.unwrap_or(0),
            params.u32("y")?.unwrap_or(0),
            opacity as f32,
        )
        .map_err(|e| params.invalid("image", format!("cannot be loaded: {e}")))
    }
}

impl Stage for WatermarkStage {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&mut self, mut frame: Frame) -> Result<StageOutput, StageError> {
        require_rgb(Self::KIND, &frame)?;

        let fw = frame.width();
        let fh = frame.height();
        if self.x >= fw || self.y >= fh || self.opacity == 0.0 {
            return Ok(StageOutput::Emit(frame));
        }
        let visible_w = self.overlay.width().min(fw - self.x);
        let visible_h = self.overlay.height().min(fh - self.y);

        let data = frame.data_mut();
        for oy in 0..visible_h {
            for ox in 0..visible_w {
                let src = self.overlay.get_pixel(ox, oy).0;
                let alpha = self.opacity * src[3] as f32 / 255.0;
                if alpha == 0.0 {
                    continue;
                }
                let idx = (((self.y + oy) * fw + self.x + ox) * 3) as usize;
                for c in 0..3 {
                    let base = data[idx + c] as f32;
                    let blended = base + (src[c] as f32 - base) * alpha;
                    data[idx + c] = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        Ok(StageOutput::Emit(frame))
    }
}

use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};

use crate::shared::constants::MAX_FRAME_DIMENSION;
use crate::shared::frame::Frame;
use crate::stages::domain::stage::{ConfigurableStage, Stage, StageError, StageOutput};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

use super::rgb::require_rgb;

/// Scales frames to a fixed size. When only one side is given the other
/// follows the source aspect ratio.
pub struct ResizeStage {
    width: Option<u32>,
    height: Option<u32>,
    filter: FilterType,
}

impl ResizeStage {
    pub fn new(width: Option<u32>, height: Option<u32>, filter: FilterType) -> Self {
        Self {
            width,
            height,
            filter,
        }
    }

    fn target_size(&self, src_w: u32, src_h: u32) -> (u32, u32) {
        let scaled = |num: u32, den: u32, other: u32| -> u32 {
            ((other as f64 * num as f64 / den as f64).round() as u32).clamp(1, MAX_FRAME_DIMENSION)
        };
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, scaled(w, src_w, src_h)),
            (None, Some(h)) => (scaled(h, src_h, src_w), h),
            (None, None) => (src_w, src_h),
        }
    }
}

fn parse_filter(name: &str) -> Option<FilterType> {
    match name {
        "nearest" => Some(FilterType::Nearest),
        "triangle" => Some(FilterType::Triangle),
        "catmullrom" => Some(FilterType::CatmullRom),
        "gaussian" => Some(FilterType::Gaussian),
        "lanczos3" => Some(FilterType::Lanczos3),
        _ => None,
    }
}

impl ConfigurableStage for ResizeStage {
    const KIND: &'static str = "resize";

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError> {
        params.expect_only(&["width", "height", "filter"])?;

        let width = params.u32("width")?;
        let height = params.u32("height")?;
        for (param, value) in [("width", width), ("height", height)] {
            match value {
                Some(0) => return Err(params.invalid(param, "must be at least 1")),
                Some(v) if v > MAX_FRAME_DIMENSION => {
                    return Err(params.invalid(
                        param,
                        format!("must be at most {MAX_FRAME_DIMENSION}"),
                    ))
                }
                _ => {}
            }
        }
        if width.is_none() && height.is_none() {
            return Err(params.missing("width"));
        }

        let filter = match params.str("filter")? {
            None => FilterType::Triangle,
            Some(name) => parse_filter(name).ok_or_else(|| {
                params.invalid(
                    "filter",
                    "must be one of nearest, triangle, catmullrom, gaussian, lanczos3",
                )
            })?,
        };

        Ok(Self::new(width, height, filter))
    }
}

impl Stage for ResizeStage {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn apply(&mut self, mut frame: Frame) -> Result<StageOutput, StageError> {
        require_rgb(Self::KIND, &frame)?;

        let (src_w, src_h) = (frame.width(), frame.height());
        let (dst_w, dst_h) = self.target_size(src_w, src_h);
        if (dst_w, dst_h) == (src_w, src_h) {
            return Ok(StageOutput::Emit(frame));
        }

        let src = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(src_w, src_h, frame.data())
            .ok_or_else(|| StageError::new("frame buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(&src, dst_w, dst_h, self.filter);
        frame.replace_pixels(resized.into_raw(), dst_w, dst_h);
        Ok(StageOutput::Emit(frame))
    }
}

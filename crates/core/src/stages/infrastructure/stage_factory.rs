use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::shared::stage_config::StageConfig;
use crate::stages::domain::stage::{ConfigurableStage, Stage};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

use super::brightness_contrast::BrightnessContrastStage;
use super::crop::CropStage;
use super::frame_rate_downsample::FrameRateDownsampleStage;
use super::grayscale::GrayscaleStage;
use super::resize::ResizeStage;
use super::temporal_smooth::TemporalSmoothStage;
use super::watermark::WatermarkStage;

/// Built-in stage kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    Resize,
    Grayscale,
    FrameRateDownsample,
    Crop,
    Watermark,
    BrightnessContrast,
    TemporalSmooth,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::Resize,
        StageKind::Grayscale,
        StageKind::FrameRateDownsample,
        StageKind::Crop,
        StageKind::Watermark,
        StageKind::BrightnessContrast,
        StageKind::TemporalSmooth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Resize => ResizeStage::KIND,
            StageKind::Grayscale => GrayscaleStage::KIND,
            StageKind::FrameRateDownsample => FrameRateDownsampleStage::KIND,
            StageKind::Crop => CropStage::KIND,
            StageKind::Watermark => WatermarkStage::KIND,
            StageKind::BrightnessContrast => BrightnessContrastStage::KIND,
            StageKind::TemporalSmooth => TemporalSmoothStage::KIND,
        }
    }

    /// One-line parameter summary for help output.
    pub fn usage(self) -> &'static str {
        match self {
            StageKind::Resize => "width=<px> height=<px> filter=nearest|triangle|catmullrom|gaussian|lanczos3",
            StageKind::Grayscale => "(no parameters)",
            StageKind::FrameRateDownsample => "target_fps=<fps> | keep_every=<n>",
            StageKind::Crop => "x=<px> y=<px> width=<px> height=<px>",
            StageKind::Watermark => "image=<path> x=<px> y=<px> opacity=<0..1>",
            StageKind::BrightnessContrast => "brightness=<-255..255> contrast=<>=0>",
            StageKind::TemporalSmooth => "window=<2..16>",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = StageConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StageConfigError::UnknownKind {
                kind: s.to_string(),
            })
    }
}

/// A stage list entry failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("stage {index}: {source}")]
pub struct StageBuildError {
    /// Position in the submitted stage list.
    pub index: usize,
    #[source]
    pub source: StageConfigError,
}

fn boxed<S: ConfigurableStage + 'static>(
    params: &StageParams<'_>,
) -> Result<Box<dyn Stage>, StageConfigError> {
    Ok(Box::new(S::configure(params)?))
}

/// Validates one config and builds the stage it names.
pub fn build_stage(config: &StageConfig) -> Result<Box<dyn Stage>, StageConfigError> {
    let kind: StageKind = config.kind.parse()?;
    let params = StageParams::new(kind.as_str(), &config.params);

    let stage = match kind {
        StageKind::Resize => boxed::<ResizeStage>(&params),
        StageKind::Grayscale => boxed::<GrayscaleStage>(&params),
        StageKind::FrameRateDownsample => boxed::<FrameRateDownsampleStage>(&params),
        StageKind::Crop => boxed::<CropStage>(&params),
        StageKind::Watermark => boxed::<WatermarkStage>(&params),
        StageKind::BrightnessContrast => boxed::<BrightnessContrastStage>(&params),
        StageKind::TemporalSmooth => boxed::<TemporalSmoothStage>(&params),
    }?;

    log::debug!("Configured {} stage with {} parameter(s)", kind, config.params.len());
    Ok(stage)
}

/// Builds an ordered stage chain, stopping at the first invalid entry.
///
/// A stage with a lookback placed after a stage that may drop frames is
/// rejected: its history would span frames that are not neighbours.
pub fn build_stages(configs: &[StageConfig]) -> Result<Vec<Box<dyn Stage>>, StageBuildError> {
    let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(configs.len());
    let mut dropper: Option<String> = None;

    for (index, config) in configs.iter().enumerate() {
        let stage = build_stage(config).map_err(|source| StageBuildError { index, source })?;
        if stage.lookback() > 0 {
            if let Some(dropper) = &dropper {
                return Err(StageBuildError {
                    index,
                    source: StageConfigError::HistoryAfterDrop {
                        stage: stage.name().to_string(),
                        dropper: dropper.clone(),
                    },
                });
            }
        }
        if dropper.is_none() && stage.may_drop() {
            dropper = Some(stage.name().to_string());
        }
        stages.push(stage);
    }
    Ok(stages)
}

use std::collections::VecDeque;

use crate::shared::frame::Frame;
use crate::shared::media_descriptor::MediaDescriptor;
use crate::stages::domain::stage::{ConfigurableStage, Stage, StageError, StageOutput};
use crate::stages::domain::stage_params::{StageConfigError, StageParams};

pub const DEFAULT_WINDOW: u32 = 3;
const MAX_WINDOW: u32 = 16;

/// Sliding-window mean over the current frame and the previous
/// `window - 1` input frames.
///
/// Early frames average over whatever history exists. History is dropped
/// whenever the frame size changes.
pub struct TemporalSmoothStage {
    window: usize,
    history: VecDeque<Vec<u8>>,
    dims: Option<(u32, u32, u8)>,
    sums: Vec<u32>,
}

impl TemporalSmoothStage {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            history: VecDeque::with_capacity(window),
            dims: None,
            sums: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.history.clear();
        self.dims = None;
    }
}

impl Default for TemporalSmoothStage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW as usize)
    }
}

impl ConfigurableStage for TemporalSmoothStage {
    const KIND: &'static str = "temporal_smooth";

    fn configure(params: &StageParams<'_>) -> Result<Self, StageConfigError> {
        params.expect_only(&["window"])?;

        let window = params.u32("window")?.unwrap_or(DEFAULT_WINDOW);
        if !(2..=MAX_WINDOW).contains(&window) {
            return Err(params.invalid("window", format!("must be between 2 and {MAX_WINDOW}")));
        }
        Ok(Self::new(window as usize))
    }
}

impl Stage for TemporalSmoothStage {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn start(&mut self, _input: &MediaDescriptor) -> Result<(), StageError> {
        self.reset();
        Ok(())
    }

    fn apply(&mut self, mut frame: Frame) -> Result<StageOutput, StageError> {
        let dims = (frame.width(), frame.height(), frame.channels());
        if self.dims != Some(dims) {
            if self.dims.is_some() {
                log::debug!(
                    "Frame {} changed size to {}x{}, resetting smoothing history",
                    frame.index(),
                    dims.0,
                    dims.1
                );
            }
            self.history.clear();
            self.dims = Some(dims);
        }

        let current = frame.data().to_vec();
        self.sums.clear();
        self.sums.extend(current.iter().map(|&v| v as u32));
        for past in &self.history {
            for (sum, &v) in self.sums.iter_mut().zip(past) {
                *sum += v as u32;
            }
        }

        let count = self.history.len() as u32 + 1;
        for (out, &sum) in frame.data_mut().iter_mut().zip(&self.sums) {
            *out = ((sum + count / 2) / count) as u8;
        }

        self.history.push_back(current);
        if self.history.len() > self.lookback() {
            self.history.pop_front();
        }
        Ok(StageOutput::Emit(frame))
    }

    fn lookback(&self) -> usize {
        self.window - 1
    }

    fn close(&mut self) {
        self.reset();
    }
}

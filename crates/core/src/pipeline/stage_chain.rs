use std::time::Instant;

use crate::jobs::domain::pipeline_job::{FailureKind, JobFailure};
use crate::shared::frame::Frame;
use crate::shared::media_descriptor::MediaDescriptor;
use crate::stages::domain::stage::{Stage, StageError, StageOutput};

use super::pipeline_executor::elapsed_ms;
use super::pipeline_logger::PipelineLogger;

/// Result of pushing one frame through the chain.
#[derive(Debug)]
pub struct Processed {
    /// The frame to write, or `None` if a stage dropped it.
    pub frame: Option<Frame>,
    /// Last stage that emitted the frame.
    pub stage_index: Option<usize>,
}

/// Ordered stages applied to each frame in turn.
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
}

fn stage_failure(stage: &dyn Stage, err: StageError) -> JobFailure {
    JobFailure::new(FailureKind::StageError, err.message()).at_stage(stage.name())
}

impl StageChain {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Starts every stage and returns the chain's output frame rate. Each
    /// stage sees the descriptor with the frame rate produced upstream.
    pub fn start(&mut self, input: &MediaDescriptor) -> Result<f64, JobFailure> {
        let mut descriptor = input.clone();
        let mut fps = input.effective_fps();
        for stage in &mut self.stages {
            descriptor.fps = fps;
            stage
                .start(&descriptor)
                .map_err(|e| stage_failure(&**stage, e))?;
            fps = stage.output_fps(fps);
        }

        let lookback = self.stages.iter().map(|s| s.lookback()).max().unwrap_or(0);
        log::debug!(
            "Started {} stage(s), output {:.3} fps, max lookback {}",
            self.stages.len(),
            fps,
            lookback
        );
        Ok(fps)
    }

    /// Runs `frame` through every stage. The first failing stage aborts
    /// the frame with a `StageError` naming the stage and frame index.
    pub fn process(
        &mut self,
        frame: Frame,
        logger: &mut dyn PipelineLogger,
    ) -> Result<Processed, JobFailure> {
        let index = frame.index();
        let mut current = frame;
        let mut stage_index = None;

        for (i, stage) in self.stages.iter_mut().enumerate() {
            let started = Instant::now();
            let output = stage
                .apply(current)
                .map_err(|e| stage_failure(&**stage, e).at_frame(index))?;
            logger.timing(stage.name(), elapsed_ms(started));

            match output {
                StageOutput::Emit(next) => {
                    current = next;
                    stage_index = Some(i);
                }
                StageOutput::Drop => {
                    logger.dropped(stage.name());
                    return Ok(Processed {
                        frame: None,
                        stage_index,
                    })
                }
            }
        }

        Ok(Processed {
            frame: Some(current),
            stage_index,
        })
    }

    pub fn close(&mut self) {
        for stage in &mut self.stages {
            stage.close();
        }
    }
}

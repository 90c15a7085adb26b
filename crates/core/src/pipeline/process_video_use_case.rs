use std::sync::Arc;

use crate::jobs::domain::pipeline_job::{JobFailure, JobResult};
use crate::stages::domain::stage::Stage;
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::FrameSource;

use super::pipeline_executor::{PipelineConfig, PipelineExecutor};

/// Orchestrates one video processing run.
///
/// Wires the source, stage chain and sink together and delegates execution
/// to a `PipelineExecutor`. This is a single-use struct: `execute` consumes
/// the owned components, so calling it twice will fail.
pub struct ProcessVideoUseCase {
    source: Option<Box<dyn FrameSource>>,
    stages: Option<Vec<Box<dyn Stage>>>,
    sink: Option<Box<dyn FrameSink>>,
    executor: Arc<dyn PipelineExecutor>,
}

impl ProcessVideoUseCase {
    pub fn new(
        source: Box<dyn FrameSource>,
        stages: Vec<Box<dyn Stage>>,
        sink: Box<dyn FrameSink>,
        executor: Arc<dyn PipelineExecutor>,
    ) -> Self {
        Self {
            source: Some(source),
            stages: Some(stages),
            sink: Some(sink),
            executor,
        }
    }

    pub fn execute(&mut self, config: PipelineConfig) -> Result<JobResult, JobFailure> {
        let already = || JobFailure::internal("Pipeline already executed");
        let source = self.source.take().ok_or_else(already)?;
        let stages = self.stages.take().ok_or_else(already)?;
        let sink = self.sink.take().ok_or_else(already)?;

        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        log::info!(
            "Processing {} -> {} through [{}]",
            config.input.display(),
            config.output.display(),
            names.join(", ")
        );

        self.executor.execute(source, stages, sink, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::domain::pipeline_job::FailureKind;
    use crate::pipeline::infrastructure::sequential_pipeline_executor::SequentialPipelineExecutor;
    use crate::pipeline::test_support::{Invert, StubSink, StubSource};

    fn use_case(frames: usize) -> ProcessVideoUseCase {
        ProcessVideoUseCase::new(
            Box::new(StubSource::new(frames)),
            vec![Box::new(Invert) as Box<dyn Stage>],
            Box::new(StubSink::new()),
            Arc::new(SequentialPipelineExecutor::new()),
        )
    }

    #[test]
    fn test_executes_pipeline() {
        let result = use_case(4)
            .execute(PipelineConfig::new("in.mp4", "out.mp4"))
            .unwrap();
        assert_eq!(result.frames_written, 4);
    }

    #[test]
    fn test_second_execute_fails() {
        let mut use_case = use_case(1);
        use_case
            .execute(PipelineConfig::new("in.mp4", "out.mp4"))
            .unwrap();

        let failure = use_case
            .execute(PipelineConfig::new("in.mp4", "out.mp4"))
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Internal);
        assert_eq!(failure.message, "Pipeline already executed");
    }
}

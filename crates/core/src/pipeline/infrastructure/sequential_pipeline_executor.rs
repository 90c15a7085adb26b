use std::time::Instant;

use crate::jobs::domain::pipeline_job::{JobFailure, JobProgress, JobResult};
use crate::pipeline::lazy_sink::LazySink;
use crate::pipeline::pipeline_executor::{elapsed_ms, PipelineConfig, PipelineExecutor};
use crate::pipeline::stage_chain::StageChain;
use crate::stages::domain::stage::Stage;
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::FrameSource;

/// Runs read → stages → write on the calling thread, one frame at a time.
#[derive(Default)]
pub struct SequentialPipelineExecutor;

impl SequentialPipelineExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineExecutor for SequentialPipelineExecutor {
    fn execute(
        &self,
        mut source: Box<dyn FrameSource>,
        stages: Vec<Box<dyn Stage>>,
        sink: Box<dyn FrameSink>,
        mut config: PipelineConfig,
    ) -> Result<JobResult, JobFailure> {
        let started = Instant::now();
        let mut chain = StageChain::new(stages);

        let result = run(&mut *source, &mut chain, sink, &mut config, started);

        chain.close();
        source.close();
        config.logger.summary();
        result
    }
}

fn run(
    source: &mut dyn FrameSource,
    chain: &mut StageChain,
    sink: Box<dyn FrameSink>,
    config: &mut PipelineConfig,
    started: Instant,
) -> Result<JobResult, JobFailure> {
    let descriptor = source.open(&config.input)?;
    config.notify_opened(&descriptor);
    let output_fps = chain.start(&descriptor)?;

    let mut output = LazySink::new(sink, &config.output, &descriptor, output_fps);
    match drive(source, chain, &mut output, config, descriptor.total_frames) {
        Ok(frames_read) => output.finish(frames_read, started),
        Err(failure) => {
            output.abort();
            Err(failure)
        }
    }
}

/// Pulls frames until end of stream; returns the number read.
fn drive(
    source: &mut dyn FrameSource,
    chain: &mut StageChain,
    output: &mut LazySink,
    config: &mut PipelineConfig,
    total_frames: Option<usize>,
) -> Result<usize, JobFailure> {
    let mut progress = JobProgress::default();

    loop {
        if config.is_cancelled() {
            log::info!("Cancelled before frame {}", progress.frames_processed);
            return Err(JobFailure::cancelled(progress.frames_processed));
        }

        let read_started = Instant::now();
        let Some(frame) = source.next_frame()? else {
            break;
        };
        config.logger.timing("read", elapsed_ms(read_started));

        let processed = chain.process(frame, &mut *config.logger)?;
        progress.frames_processed += 1;
        progress.stage_index = processed.stage_index;

        if let Some(frame) = processed.frame {
            let write_started = Instant::now();
            output.write(&frame)?;
            config.logger.timing("write", elapsed_ms(write_started));
            progress.frames_written += 1;
        }

        config.report(progress, total_frames);
    }

    Ok(progress.frames_processed)
}

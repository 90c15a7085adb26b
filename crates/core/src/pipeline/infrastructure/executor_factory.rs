use crate::pipeline::pipeline_executor::PipelineExecutor;
use crate::shared::settings::ExecutorKind;

use super::sequential_pipeline_executor::SequentialPipelineExecutor;
use super::threaded_pipeline_executor::ThreadedPipelineExecutor;

/// Creates the executor selected in settings. Logs which one is used.
pub fn create_executor(kind: ExecutorKind, channel_capacity: usize) -> Box<dyn PipelineExecutor> {
    match kind {
        ExecutorKind::Sequential => {
            log::info!("Using sequential executor");
            Box::new(SequentialPipelineExecutor::new())
        }
        ExecutorKind::Threaded => {
            log::info!("Using threaded executor (channel_capacity={channel_capacity})");
            Box::new(ThreadedPipelineExecutor::with_capacity(channel_capacity))
        }
    }
}

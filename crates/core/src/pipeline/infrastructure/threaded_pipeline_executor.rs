use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use crate::jobs::domain::pipeline_job::{JobFailure, JobProgress, JobResult};
use crate::pipeline::lazy_sink::LazySink;
use crate::pipeline::pipeline_executor::{PipelineConfig, PipelineExecutor};
use crate::pipeline::stage_chain::StageChain;
use crate::shared::constants::DEFAULT_CHANNEL_CAPACITY;
use crate::shared::frame::Frame;
use crate::stages::domain::stage::Stage;
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::{FrameSource, SourceError};

/// `Ok(None)` marks a clean end of stream.
type ReadMessage = Result<Option<Frame>, SourceError>;
type WriterOutcome = (LazySink, Result<(), JobFailure>);

/// Executes the pipeline with dedicated threads for decoding and encoding.
///
/// Layout: `reader → main [stages] → writer`
///
/// The reader decodes ahead and the writer encodes behind the stage loop,
/// connected by bounded FIFO channels, so frame order is preserved and
/// stages still see frames one at a time in index order.
pub struct ThreadedPipelineExecutor {
    channel_capacity: usize,
}

impl ThreadedPipelineExecutor {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
        }
    }
}

impl Default for ThreadedPipelineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineExecutor for ThreadedPipelineExecutor {
    fn execute(
        &self,
        source: Box<dyn FrameSource>,
        stages: Vec<Box<dyn Stage>>,
        sink: Box<dyn FrameSink>,
        mut config: PipelineConfig,
    ) -> Result<JobResult, JobFailure> {
        let started = Instant::now();
        let mut chain = StageChain::new(stages);

        let result = self.run(source, &mut chain, sink, &mut config, started);

        chain.close();
        config.logger.summary();
        result
    }
}

impl ThreadedPipelineExecutor {
    fn run(
        &self,
        mut source: Box<dyn FrameSource>,
        chain: &mut StageChain,
        sink: Box<dyn FrameSink>,
        config: &mut PipelineConfig,
        started: Instant,
    ) -> Result<JobResult, JobFailure> {
        let prepared = source
            .open(&config.input)
            .map_err(JobFailure::from)
            .and_then(|descriptor| {
                config.notify_opened(&descriptor);
                let fps = chain.start(&descriptor)?;
                Ok((descriptor, fps))
            });
        let (descriptor, output_fps) = match prepared {
            Ok(prepared) => prepared,
            Err(failure) => {
                source.close();
                return Err(failure);
            }
        };

        let output = LazySink::new(sink, &config.output, &descriptor, output_fps);
        let cap = self.channel_capacity;
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<ReadMessage>(cap);
        let (write_tx, write_rx) = crossbeam_channel::bounded::<Frame>(cap);
        let written = Arc::new(AtomicUsize::new(0));
        let writer_failed = Arc::new(AtomicBool::new(false));

        let reader_handle = spawn_reader(source, frame_tx, config.cancelled.clone());
        let writer_handle = spawn_writer(output, write_rx, written.clone(), writer_failed.clone());

        let main_result = run_main_loop(
            frame_rx,
            &write_tx,
            chain,
            WriterState {
                written: &written,
                failed: &writer_failed,
            },
            config,
            descriptor.total_frames,
        );

        drop(write_tx);

        join_threads(reader_handle, writer_handle, main_result, started)
    }
}

fn spawn_reader(
    mut source: Box<dyn FrameSource>,
    frame_tx: Sender<ReadMessage>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !cancelled.load(Ordering::Relaxed) {
            let message = source.next_frame();
            let last = !matches!(message, Ok(Some(_)));
            if frame_tx.send(message).is_err() || last {
                break;
            }
        }
        source.close();
    })
}

fn spawn_writer(
    mut output: LazySink,
    write_rx: Receiver<Frame>,
    written: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
) -> JoinHandle<WriterOutcome> {
    std::thread::spawn(move || {
        for frame in write_rx {
            if let Err(failure) = output.write(&frame) {
                failed.store(true, Ordering::Relaxed);
                return (output, Err(failure));
            }
            written.fetch_add(1, Ordering::Relaxed);
        }
        (output, Ok(()))
    })
}

/// Counters the writer thread publishes to the stage loop.
struct WriterState<'a> {
    written: &'a AtomicUsize,
    failed: &'a AtomicBool,
}

/// Runs the main thread loop: receive decoded frames, apply the stage
/// chain and hand survivors to the writer. Returns the number of frames
/// read.
fn run_main_loop(
    frame_rx: Receiver<ReadMessage>,
    write_tx: &Sender<Frame>,
    chain: &mut StageChain,
    writer: WriterState<'_>,
    config: &mut PipelineConfig,
    total_frames: Option<usize>,
) -> Result<usize, JobFailure> {
    let mut progress = JobProgress::default();

    loop {
        if config.is_cancelled() {
            log::info!("Cancelled before frame {}", progress.frames_processed);
            return Err(JobFailure::cancelled(progress.frames_processed));
        }
        if writer.failed.load(Ordering::Relaxed) {
            // The join reports the writer's error.
            log::debug!("Writer failed, stopping before frame {}", progress.frames_processed);
            break;
        }

        config
            .logger
            .metric("reader_queue_depth", frame_rx.len() as f64);
        let frame = match frame_rx.recv() {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(e.into()),
            // The reader only stops without an end marker when cancelled
            // or when it panicked; the join reports the panic.
            Err(_) if config.is_cancelled() => {
                return Err(JobFailure::cancelled(progress.frames_processed))
            }
            Err(_) => break,
        };

        let processed = chain.process(frame, &mut *config.logger)?;
        progress.frames_processed += 1;
        progress.stage_index = processed.stage_index;

        if let Some(frame) = processed.frame {
            config.logger.metric("writer_queue_depth", write_tx.len() as f64);
            if write_tx.send(frame).is_err() {
                // Writer stopped on its own error; the join reports it.
                break;
            }
        }

        progress.frames_written = writer.written.load(Ordering::Relaxed);
        config.report(progress, total_frames);
    }

    Ok(progress.frames_processed)
}

/// Joins both pipeline threads and coalesces the first error encountered.
fn join_threads(
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<WriterOutcome>,
    main_result: Result<usize, JobFailure>,
    started: Instant,
) -> Result<JobResult, JobFailure> {
    fn set_if_none(slot: &mut Option<JobFailure>, failure: JobFailure) {
        if slot.is_none() {
            *slot = Some(failure);
        }
    }

    let (frames_read, mut first_error) = match main_result {
        Ok(frames_read) => (frames_read, None),
        Err(failure) => (0, Some(failure)),
    };

    if reader_handle.join().is_err() {
        set_if_none(&mut first_error, JobFailure::internal("reader thread panicked"));
    }

    let output = match writer_handle.join() {
        Ok((output, Ok(()))) => Some(output),
        Ok((output, Err(failure))) => {
            set_if_none(&mut first_error, failure);
            Some(output)
        }
        Err(_) => {
            set_if_none(&mut first_error, JobFailure::internal("writer thread panicked"));
            None
        }
    };

    match (first_error, output) {
        (None, Some(output)) => output.finish(frames_read, started),
        (Some(failure), output) => {
            if let Some(output) = output {
                output.abort();
            }
            Err(failure)
        }
        (None, None) => Err(JobFailure::internal("writer thread panicked")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::domain::pipeline_job::FailureKind;
    use crate::pipeline::test_support::{DropWhere, Invert, StubSink, StubSource};
    use std::time::Duration;

    #[test]
    fn test_capacity_is_at_least_one() {
        assert_eq!(ThreadedPipelineExecutor::with_capacity(0).channel_capacity, 1);
        assert_eq!(
            ThreadedPipelineExecutor::default().channel_capacity,
            DEFAULT_CHANNEL_CAPACITY
        );
    }

    #[test]
    fn test_tiny_channels_preserve_order() {
        let sink = StubSink::new();
        let tally = sink.tally();
        let result = ThreadedPipelineExecutor::with_capacity(1)
            .execute(
                Box::new(StubSource::new(40)),
                vec![Box::new(Invert) as Box<dyn Stage>],
                Box::new(sink),
                PipelineConfig::new("in.mp4", "out.mp4"),
            )
            .unwrap();

        assert_eq!(result.frames_written, 40);
        let indices: Vec<usize> = tally.lock().unwrap().frames.iter().map(|f| f.index()).collect();
        assert_eq!(indices, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_writer_failure_stops_reading() {
        let source = StubSource::new(1000).with_delay(Duration::from_millis(1));
        let source_tally = source.tally();
        let sink = StubSink::new().failing_write_at(2);
        let sink_tally = sink.tally();

        let failure = ThreadedPipelineExecutor::with_capacity(2)
            .execute(
                Box::new(source),
                Vec::new(),
                Box::new(sink),
                PipelineConfig::new("in.mp4", "out.mp4"),
            )
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::SinkWriteError);
        assert_eq!(failure.frame_index, Some(2));
        assert!(source_tally.lock().unwrap().reads < 1000);
        assert_eq!(source_tally.lock().unwrap().closes, 1);
        assert_eq!(sink_tally.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_writer_failure_stops_loop_when_nothing_else_is_sent() {
        let source = StubSource::new(1000).with_delay(Duration::from_millis(1));
        let source_tally = source.tally();
        let sink = StubSink::new().failing_write_at(0);

        // Only frame 0 reaches the writer, so no later send can observe
        // the closed channel.
        let failure = ThreadedPipelineExecutor::with_capacity(2)
            .execute(
                Box::new(source),
                vec![Box::new(DropWhere(|i| i > 0)) as Box<dyn Stage>],
                Box::new(sink),
                PipelineConfig::new("in.mp4", "out.mp4"),
            )
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::SinkWriteError);
        assert_eq!(failure.frame_index, Some(0));
        assert!(source_tally.lock().unwrap().reads < 500);
        assert_eq!(source_tally.lock().unwrap().closes, 1);
    }
}

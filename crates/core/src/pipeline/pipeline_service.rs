use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::jobs::domain::job_tracker::{JobTracker, TrackerError};
use crate::jobs::domain::pipeline_job::{
    JobFailure, JobId, JobProgress, JobResult, JobStatus, PipelineJob, RunOutcome,
};
use crate::shared::media_descriptor::MediaDescriptor;
use crate::shared::media_policy::{MediaPolicy, PolicyError};
use crate::shared::stage_config::StageConfig;
use crate::stages::infrastructure::stage_factory::{build_stages, StageBuildError};
use crate::video::domain::frame_sink::FrameSink;
use crate::video::domain::frame_source::FrameSource;

use super::pipeline_executor::{PipelineConfig, PipelineExecutor};
use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use super::process_video_use_case::ProcessVideoUseCase;

pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;
pub type SinkFactory = Arc<dyn Fn(&Path) -> Box<dyn FrameSink> + Send + Sync>;
pub type LoggerFactory = Arc<dyn Fn() -> Box<dyn PipelineLogger> + Send + Sync>;

/// Reasons a submission is refused before any job exists.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("rejected media: {0}")]
    RejectedMedia(#[from] PolicyError),
    #[error("invalid stage config: {0}")]
    InvalidStageConfig(#[from] StageBuildError),
    #[error("failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} is still {status}")]
    NotFinished { id: JobId, status: JobStatus },
    #[error("job {id} failed: {failure}")]
    Failed { id: JobId, failure: JobFailure },
    #[error("job {id} was cancelled: {failure}")]
    Cancelled { id: JobId, failure: JobFailure },
}

/// Host-facing entry point: validates submissions, runs each job on its own
/// worker thread and answers status queries from the shared tracker.
pub struct PipelineService {
    tracker: Arc<JobTracker>,
    executor: Arc<dyn PipelineExecutor>,
    sources: SourceFactory,
    sinks: SinkFactory,
    loggers: LoggerFactory,
    policy: Option<MediaPolicy>,
    workers: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl PipelineService {
    pub fn new(
        tracker: Arc<JobTracker>,
        executor: Arc<dyn PipelineExecutor>,
        sources: SourceFactory,
        sinks: SinkFactory,
    ) -> Self {
        Self {
            tracker,
            executor,
            sources,
            sinks,
            loggers: Arc::new(|| Box::new(NullPipelineLogger) as Box<dyn PipelineLogger>),
            policy: None,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Inputs failing the policy are rejected at submit.
    pub fn with_media_policy(mut self, policy: MediaPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_logger_factory(mut self, loggers: LoggerFactory) -> Self {
        self.loggers = loggers;
        self
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Validates the input and stage configs, then starts the job.
    ///
    /// Nothing is opened and no job is recorded when validation fails.
    pub fn submit(
        &self,
        input: &Path,
        output: &Path,
        stages: Vec<StageConfig>,
    ) -> Result<JobId, SubmitError> {
        if let Some(policy) = &self.policy {
            policy.check(input)?;
        }
        let built = build_stages(&stages)?;

        let job = self
            .tracker
            .create(input.to_path_buf(), output.to_path_buf(), stages);
        let id = job.id;

        let mut config = PipelineConfig::new(input, output);
        if let Some(flag) = self.tracker.cancel_flag(id) {
            config.cancelled = flag;
        }
        config.logger = (self.loggers)();

        let use_case = ProcessVideoUseCase::new(
            (self.sources)(),
            built,
            (self.sinks)(output),
            self.executor.clone(),
        );

        let tracker = self.tracker.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("job-{id}"))
            .spawn(move || run_job(&tracker, id, use_case, config));

        match spawned {
            Ok(handle) => {
                self.workers().insert(id, handle);
                log::info!("Submitted job {id}: {} -> {}", input.display(), output.display());
                Ok(id)
            }
            Err(e) => {
                let failure = JobFailure::internal(format!("failed to start worker: {e}"));
                if let Err(e) = self.tracker.finish(id, RunOutcome::Failed(failure)) {
                    log::warn!("{e}");
                }
                Err(SubmitError::Spawn(e))
            }
        }
    }

    pub fn status(&self, id: JobId) -> Result<PipelineJob, JobError> {
        self.tracker.get(id).ok_or(JobError::NotFound(id))
    }

    pub fn list(&self) -> Vec<PipelineJob> {
        self.tracker.list()
    }

    /// Best-effort: the worker stops at the next frame boundary.
    pub fn cancel(&self, id: JobId) -> Result<JobStatus, JobError> {
        match self.tracker.cancel(id) {
            Ok(status) | Err(TrackerError::AlreadyFinished { status, .. }) => Ok(status),
            Err(TrackerError::NotFound(id)) => Err(JobError::NotFound(id)),
        }
    }

    pub fn result(&self, id: JobId) -> Result<JobResult, JobError> {
        let job = self.status(id)?;
        match job.status {
            JobStatus::Succeeded => job
                .result
                .ok_or_else(|| JobError::NotFinished { id, status: job.status }),
            JobStatus::Failed => Err(JobError::Failed {
                id,
                failure: job.failure.unwrap_or_else(|| JobFailure::internal("unknown failure")),
            }),
            JobStatus::Cancelled => Err(JobError::Cancelled {
                id,
                failure: job.failure.unwrap_or_else(|| JobFailure::cancelled(0)),
            }),
            status => Err(JobError::NotFinished { id, status }),
        }
    }

    /// Blocks until the job's worker exits and returns the final snapshot.
    pub fn wait(&self, id: JobId) -> Result<PipelineJob, JobError> {
        let handle = self.workers().remove(&id);
        if let Some(handle) = handle {
            join_worker(&self.tracker, id, handle);
        }
        self.status(id)
    }

    /// Cancels every unfinished job and joins all workers.
    pub fn shutdown(&self) {
        let handles: Vec<(JobId, JoinHandle<()>)> = self.workers().drain().collect();
        if !handles.is_empty() {
            log::info!("Shutting down {} worker(s)", handles.len());
        }
        for (id, _) in &handles {
            if let Err(e) = self.tracker.cancel(*id) {
                log::debug!("{e}");
            }
        }
        for (id, handle) in handles {
            join_worker(&self.tracker, id, handle);
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PipelineService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn join_worker(tracker: &JobTracker, id: JobId, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("Worker for job {id} panicked");
        let failure = JobFailure::internal("worker thread panicked");
        if let Err(e) = tracker.finish(id, RunOutcome::Failed(failure)) {
            log::debug!("{e}");
        }
    }
}

fn run_job(
    tracker: &Arc<JobTracker>,
    id: JobId,
    mut use_case: ProcessVideoUseCase,
    mut config: PipelineConfig,
) {
    if config.is_cancelled() {
        log::info!("Job {id} cancelled before start");
        if let Err(e) = tracker.finish(id, RunOutcome::Cancelled(JobFailure::cancelled(0))) {
            log::warn!("{e}");
        }
        return;
    }
    if let Err(e) = tracker.mark_running(id) {
        log::warn!("{e}");
        return;
    }

    let opened = tracker.clone();
    config.on_opened = Some(Box::new(move |descriptor: &MediaDescriptor| {
        if let Err(e) = opened.set_input(id, descriptor.clone()) {
            log::debug!("{e}");
        }
    }));
    let progressed = tracker.clone();
    config.on_progress = Some(Box::new(move |progress: JobProgress| {
        if let Err(e) = progressed.record_progress(id, progress) {
            log::debug!("{e}");
        }
    }));

    let outcome = RunOutcome::from(use_case.execute(config));
    match &outcome {
        RunOutcome::Succeeded(result) => log::info!(
            "Job {id} succeeded: {} of {} frames written in {:.2}s",
            result.frames_written,
            result.frames_read,
            result.elapsed_secs
        ),
        RunOutcome::Failed(failure) => log::error!("Job {id} failed: {failure}"),
        RunOutcome::Cancelled(failure) => log::info!("Job {id} {failure}"),
    }
    if let Err(e) = tracker.finish(id, outcome) {
        log::warn!("{e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::domain::pipeline_job::FailureKind;
    use crate::pipeline::infrastructure::executor_factory::create_executor;
    use crate::pipeline::test_support::{SinkTally, SourceTally, StubSink, StubSource};
    use crate::shared::settings::ExecutorKind;
    use crate::stages::domain::stage_params::StageConfigError;
    use rstest::rstest;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Records every source and sink handed out by the service.
    #[derive(Clone, Default)]
    struct Tallies {
        source_builds: Arc<AtomicUsize>,
        sources: Arc<Mutex<Vec<Arc<Mutex<SourceTally>>>>>,
        sinks: Arc<Mutex<Vec<Arc<Mutex<SinkTally>>>>>,
    }

    impl Tallies {
        fn source_opens(&self) -> usize {
            self.sources
                .lock()
                .unwrap()
                .iter()
                .map(|p| p.lock().unwrap().opens)
                .sum()
        }

        fn sink(&self, n: usize) -> Arc<Mutex<SinkTally>> {
            self.sinks.lock().unwrap()[n].clone()
        }
    }

    fn service_with(
        kind: ExecutorKind,
        frames: usize,
        delay: Option<Duration>,
    ) -> (PipelineService, Tallies) {
        let tallies = Tallies::default();
        let source_tallies = tallies.clone();
        let sink_tallies = tallies.clone();

        let sources: SourceFactory = Arc::new(move || {
            source_tallies.source_builds.fetch_add(1, Ordering::Relaxed);
            let mut source = StubSource::new(frames);
            if let Some(delay) = delay {
                source = source.with_delay(delay);
            }
            source_tallies.sources.lock().unwrap().push(source.tally());
            Box::new(source) as Box<dyn FrameSource>
        });
        let sinks: SinkFactory = Arc::new(move |_: &Path| {
            let sink = StubSink::new();
            sink_tallies.sinks.lock().unwrap().push(sink.tally());
            Box::new(sink) as Box<dyn FrameSink>
        });

        let service = PipelineService::new(
            Arc::new(JobTracker::new()),
            Arc::from(create_executor(kind, 2)),
            sources,
            sinks,
        );
        (service, tallies)
    }

    fn service(kind: ExecutorKind, frames: usize) -> (PipelineService, Tallies) {
        service_with(kind, frames, None)
    }

    fn submit(service: &PipelineService, stages: Vec<StageConfig>) -> Result<JobId, SubmitError> {
        service.submit(&PathBuf::from("in.mp4"), &PathBuf::from("out.mp4"), stages)
    }

    fn wait_for_progress(service: &PipelineService, id: JobId, frames: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let job = service.status(id).unwrap();
            if job.progress.frames_processed >= frames || job.status.is_terminal() {
                return;
            }
            assert!(Instant::now() < deadline, "job {id} made no progress");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[rstest]
    fn test_frames_pass_through_in_order(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, tallies) = service(kind, 12);
        let id = submit(&service, vec![StageConfig::new("grayscale")]).unwrap();

        let job = service.wait(id).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress.frames_processed, 12);
        assert!(job.input_descriptor.is_some());

        let result = service.result(id).unwrap();
        assert_eq!(result.frames_written, 12);
        let sink = tallies.sink(0);
        let indices: Vec<usize> = sink.lock().unwrap().frames.iter().map(|f| f.index()).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_dropping_stage_reduces_output(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, _) = service(kind, 10);
        let id = submit(
            &service,
            vec![StageConfig::new("frame_rate_downsample").with_param("keep_every", 2)],
        )
        .unwrap();

        service.wait(id).unwrap();
        let result = service.result(id).unwrap();
        assert_eq!(result.frames_read, 10);
        assert_eq!(result.frames_written, 5);
    }

    #[rstest]
    fn test_unknown_stage_kind_rejected_without_opening_source(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, tallies) = service(kind, 5);
        let err = submit(
            &service,
            vec![StageConfig::new("grayscale"), StageConfig::new("sepia")],
        )
        .unwrap_err();

        match err {
            SubmitError::InvalidStageConfig(e) => assert_eq!(e.index, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tallies.source_builds.load(Ordering::Relaxed), 0);
        assert_eq!(tallies.source_opens(), 0);
        assert!(service.list().is_empty());
    }

    #[test]
    fn test_smoothing_after_downsample_rejected_at_submit() {
        let (service, tallies) = service(ExecutorKind::Sequential, 10);
        let err = submit(
            &service,
            vec![
                StageConfig::new("frame_rate_downsample").with_param("keep_every", 2),
                StageConfig::new("temporal_smooth").with_param("window", 2),
            ],
        )
        .unwrap_err();

        match err {
            SubmitError::InvalidStageConfig(e) => {
                assert_eq!(e.index, 1);
                assert!(matches!(e.source, StageConfigError::HistoryAfterDrop { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tallies.source_opens(), 0);
        assert!(service.list().is_empty());
    }

    #[rstest]
    fn test_stage_failure_fails_job(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, _) = service(kind, 5);
        let crop = StageConfig::new("crop")
            .with_param("x", 10)
            .with_param("width", 4)
            .with_param("height", 2);
        let id = submit(&service, vec![crop]).unwrap();

        let job = service.wait(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        match service.result(id).unwrap_err() {
            JobError::Failed { failure, .. } => {
                assert_eq!(failure.kind, FailureKind::StageError);
                assert_eq!(failure.stage.as_deref(), Some("crop"));
                assert_eq!(failure.frame_index, Some(0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    fn test_zero_frames_succeeds(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, tallies) = service(kind, 0);
        let id = submit(&service, Vec::new()).unwrap();

        let job = service.wait(id).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress.frames_processed, 0);
        assert_eq!(service.result(id).unwrap().frames_written, 0);
        assert!(tallies.sink(0).lock().unwrap().opens.is_empty());
    }

    #[rstest]
    fn test_cancel_mid_run(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, tallies) = service_with(kind, 10_000, Some(Duration::from_millis(1)));
        let id = submit(&service, Vec::new()).unwrap();

        wait_for_progress(&service, id, 3);
        service.cancel(id).unwrap();

        let job = service.wait(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        let failure = job.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert!(failure.frame_index.unwrap() < 10_000);
        assert!(matches!(service.result(id), Err(JobError::Cancelled { .. })));
        assert_eq!(tallies.sink(0).lock().unwrap().closes, 1);
    }

    #[rstest]
    fn test_result_before_finish_reports_not_finished(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, _) = service_with(kind, 10_000, Some(Duration::from_millis(1)));
        let id = submit(&service, Vec::new()).unwrap();

        match service.result(id) {
            Err(JobError::NotFinished { status, .. }) => assert!(!status.is_terminal()),
            other => panic!("unexpected result: {other:?}"),
        }
        service.shutdown();
        assert_eq!(service.status(id).unwrap().status, JobStatus::Cancelled);
    }

    #[rstest]
    fn test_identical_submissions_are_deterministic(
        #[values(ExecutorKind::Sequential, ExecutorKind::Threaded)] kind: ExecutorKind,
    ) {
        let (service, tallies) = service(kind, 9);
        let stages = vec![
            StageConfig::new("brightness_contrast")
                .with_param("brightness", 20)
                .with_param("contrast", 1.5),
            StageConfig::new("temporal_smooth").with_param("window", 3),
        ];
        let first = submit(&service, stages.clone()).unwrap();
        let second = submit(&service, stages).unwrap();
        service.wait(first).unwrap();
        service.wait(second).unwrap();

        assert_eq!(
            service.result(first).unwrap().frames_written,
            service.result(second).unwrap().frames_written
        );
        let a = tallies.sink(0).lock().unwrap().frames.clone();
        let b = tallies.sink(1).lock().unwrap().frames.clone();
        assert_eq!(a.len(), 9);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.index(), y.index());
            assert_eq!(x.data(), y.data());
        }
    }

    #[test]
    fn test_concurrent_jobs_listed_in_order() {
        let (service, _) = service(ExecutorKind::Threaded, 20);
        let ids: Vec<JobId> = (0..4)
            .map(|_| submit(&service, vec![StageConfig::new("grayscale")]).unwrap())
            .collect();
        for id in &ids {
            service.wait(*id).unwrap();
        }

        let listed: Vec<JobId> = service.list().iter().map(|j| j.id).collect();
        assert_eq!(listed, ids);
        assert!(service
            .list()
            .iter()
            .all(|j| j.status == JobStatus::Succeeded));
    }

    #[test]
    fn test_unknown_job_ids() {
        let (service, _) = service(ExecutorKind::Sequential, 1);
        let missing = JobId(42);
        assert_eq!(service.status(missing).unwrap_err(), JobError::NotFound(missing));
        assert_eq!(service.cancel(missing).unwrap_err(), JobError::NotFound(missing));
        assert_eq!(service.result(missing).unwrap_err(), JobError::NotFound(missing));
        assert_eq!(service.wait(missing).unwrap_err(), JobError::NotFound(missing));
    }

    #[test]
    fn test_media_policy_rejects_before_job_exists() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"hello").unwrap();
        let video = dir.path().join("clip.MP4");
        std::fs::write(&video, b"fake").unwrap();

        let (service, tallies) = service(ExecutorKind::Sequential, 2);
        let service = service.with_media_policy(MediaPolicy::default());

        let err = service
            .submit(&text, &dir.path().join("out.mp4"), Vec::new())
            .unwrap_err();
        assert!(matches!(err, SubmitError::RejectedMedia(PolicyError::DisallowedExtension { .. })));
        assert!(service.list().is_empty());
        assert_eq!(tallies.source_builds.load(Ordering::Relaxed), 0);

        let id = service
            .submit(&video, &dir.path().join("out.mp4"), Vec::new())
            .unwrap();
        assert_eq!(service.wait(id).unwrap().status, JobStatus::Succeeded);
    }
}

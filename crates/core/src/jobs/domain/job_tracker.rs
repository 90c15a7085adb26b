use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::shared::media_descriptor::MediaDescriptor;
use crate::shared::stage_config::StageConfig;

use super::pipeline_job::{JobId, JobProgress, JobStatus, PipelineJob, RunOutcome};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} already {status}")]
    AlreadyFinished { id: JobId, status: JobStatus },
}

struct TrackedJob {
    job: PipelineJob,
    cancelled: Arc<AtomicBool>,
    started: Option<Instant>,
}

impl TrackedJob {
    fn ensure_active(&self) -> Result<(), TrackerError> {
        if self.job.status.is_terminal() {
            Err(TrackerError::AlreadyFinished {
                id: self.job.id,
                status: self.job.status,
            })
        } else {
            Ok(())
        }
    }

    fn snapshot(&self) -> PipelineJob {
        let mut job = self.job.clone();
        if !job.status.is_terminal() {
            if let Some(started) = self.started {
                job.elapsed_secs = started.elapsed().as_secs_f64();
            }
        }
        job
    }
}

#[derive(Default)]
struct TrackerState {
    last_id: u64,
    jobs: BTreeMap<JobId, TrackedJob>,
}

/// In-memory registry of jobs and their progress.
///
/// All reads and writes go through one mutex, so a snapshot never mixes
/// fields from two updates. Status only moves forward: once a job is
/// terminal every further update is rejected.
#[derive(Default)]
pub struct JobTracker {
    state: Mutex<TrackerState>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // Updates never leave partial state behind.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<T>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut TrackedJob) -> Result<T, TrackerError>,
    ) -> Result<T, TrackerError> {
        let mut state = self.lock();
        let tracked = state.jobs.get_mut(&id).ok_or(TrackerError::NotFound(id))?;
        f(tracked)
    }

    /// Registers a new Pending job.
    pub fn create(&self, input: PathBuf, output: PathBuf, stages: Vec<StageConfig>) -> PipelineJob {
        let submitted_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut state = self.lock();
        state.last_id += 1;
        let id = JobId(state.last_id);
        let job = PipelineJob {
            id,
            stages,
            input,
            input_descriptor: None,
            output,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            failure: None,
            result: None,
            submitted_at_ms,
            elapsed_secs: 0.0,
        };
        state.jobs.insert(
            id,
            TrackedJob {
                job: job.clone(),
                cancelled: Arc::new(AtomicBool::new(false)),
                started: None,
            },
        );
        job
    }

    pub fn get(&self, id: JobId) -> Option<PipelineJob> {
        self.lock().jobs.get(&id).map(TrackedJob::snapshot)
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<PipelineJob> {
        self.lock().jobs.values().map(TrackedJob::snapshot).collect()
    }

    /// Raises the job's cancellation flag. Cancelling a finished job is a
    /// no-op.
    pub fn cancel(&self, id: JobId) -> Result<JobStatus, TrackerError> {
        self.update(id, |tracked| {
            if !tracked.job.status.is_terminal() {
                tracked.cancelled.store(true, Ordering::Relaxed);
            }
            Ok(tracked.job.status)
        })
    }

    /// Flag the job's worker polls at frame boundaries.
    pub fn cancel_flag(&self, id: JobId) -> Option<Arc<AtomicBool>> {
        self.lock().jobs.get(&id).map(|t| t.cancelled.clone())
    }

    pub fn mark_running(&self, id: JobId) -> Result<(), TrackerError> {
        self.update(id, |tracked| {
            tracked.ensure_active()?;
            tracked.job.status = JobStatus::Running;
            tracked.started = Some(Instant::now());
            Ok(())
        })
    }

    pub fn set_input(&self, id: JobId, descriptor: MediaDescriptor) -> Result<(), TrackerError> {
        self.update(id, |tracked| {
            tracked.ensure_active()?;
            tracked.job.input_descriptor = Some(descriptor);
            Ok(())
        })
    }

    pub fn record_progress(&self, id: JobId, progress: JobProgress) -> Result<(), TrackerError> {
        self.update(id, |tracked| {
            tracked.ensure_active()?;
            tracked.job.progress = progress;
            Ok(())
        })
    }

    /// Moves the job to its terminal status.
    pub fn finish(&self, id: JobId, outcome: RunOutcome) -> Result<JobStatus, TrackerError> {
        self.update(id, |tracked| {
            tracked.ensure_active()?;
            let job = &mut tracked.job;
            job.elapsed_secs = tracked
                .started
                .map(|s| s.elapsed().as_secs_f64())
                .unwrap_or(0.0);
            job.status = outcome.status();
            match outcome {
                RunOutcome::Succeeded(result) => {
                    job.progress.frames_processed = result.frames_read;
                    job.progress.frames_written = result.frames_written;
                    job.result = Some(result);
                }
                RunOutcome::Failed(failure) | RunOutcome::Cancelled(failure) => {
                    job.failure = Some(failure);
                }
            }
            Ok(job.status)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::domain::pipeline_job::{FailureKind, JobFailure, JobResult};
    use crate::shared::media_descriptor::OutputDescriptor;
    use std::thread;

    fn create(tracker: &JobTracker) -> JobId {
        tracker
            .create(
                PathBuf::from("in.mp4"),
                PathBuf::from("out.mp4"),
                vec![StageConfig::new("grayscale")],
            )
            .id
    }

    fn result(frames: usize) -> JobResult {
        JobResult {
            output: OutputDescriptor {
                path: PathBuf::from("out.mp4"),
                width: 2,
                height: 2,
                fps: 30.0,
                frame_count: frames,
                duration_secs: frames as f64 / 30.0,
            },
            frames_read: frames,
            frames_written: frames,
            elapsed_secs: 0.1,
            keyframes: Vec::new(),
        }
    }

    #[test]
    fn test_create_assigns_increasing_ids() {
        let tracker = JobTracker::new();
        let a = create(&tracker);
        let b = create(&tracker);
        assert!(b > a);
        let job = tracker.get(a).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.stages.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let tracker = JobTracker::new();
        assert!(tracker.get(JobId(9)).is_none());
        assert_eq!(tracker.cancel(JobId(9)), Err(TrackerError::NotFound(JobId(9))));
    }

    #[test]
    fn test_list_is_ordered_by_id() {
        let tracker = JobTracker::new();
        let ids: Vec<JobId> = (0..5).map(|_| create(&tracker)).collect();
        let listed: Vec<JobId> = tracker.list().iter().map(|j| j.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_lifecycle_to_success() {
        let tracker = JobTracker::new();
        let id = create(&tracker);
        tracker.mark_running(id).unwrap();
        tracker
            .record_progress(
                id,
                JobProgress {
                    stage_index: Some(0),
                    frames_processed: 4,
                    frames_written: 4,
                },
            )
            .unwrap();
        assert_eq!(tracker.get(id).unwrap().progress.frames_processed, 4);

        let status = tracker.finish(id, RunOutcome::Succeeded(result(5))).unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        let job = tracker.get(id).unwrap();
        assert_eq!(job.progress.frames_processed, 5);
        assert_eq!(job.result.unwrap().frames_written, 5);
        assert!(job.failure.is_none());
    }

    #[test]
    fn test_updates_after_terminal_are_rejected() {
        let tracker = JobTracker::new();
        let id = create(&tracker);
        tracker.mark_running(id).unwrap();
        tracker
            .finish(
                id,
                RunOutcome::Failed(JobFailure::new(FailureKind::StageError, "boom")),
            )
            .unwrap();

        assert!(matches!(
            tracker.record_progress(id, JobProgress::default()),
            Err(TrackerError::AlreadyFinished { status: JobStatus::Failed, .. })
        ));
        assert!(tracker.finish(id, RunOutcome::Succeeded(result(1))).is_err());
        assert!(tracker.mark_running(id).is_err());
        assert_eq!(tracker.get(id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_cancel_raises_flag_until_terminal() {
        let tracker = JobTracker::new();
        let id = create(&tracker);
        let flag = tracker.cancel_flag(id).unwrap();
        assert!(!flag.load(Ordering::Relaxed));
        assert_eq!(tracker.cancel(id).unwrap(), JobStatus::Pending);
        assert!(flag.load(Ordering::Relaxed));

        let done = create(&tracker);
        tracker.finish(done, RunOutcome::Succeeded(result(1))).unwrap();
        tracker.cancel(done).unwrap();
        assert!(!tracker.cancel_flag(done).unwrap().load(Ordering::Relaxed));
    }

    #[test]
    fn test_concurrent_progress_snapshots_are_consistent() {
        let tracker = Arc::new(JobTracker::new());
        let id = create(&tracker);
        tracker.mark_running(id).unwrap();

        let writer = {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for n in 1..=500 {
                    tracker
                        .record_progress(
                            id,
                            JobProgress {
                                stage_index: Some(1),
                                frames_processed: n,
                                frames_written: n,
                            },
                        )
                        .unwrap();
                }
            })
        };

        let mut last = 0;
        for _ in 0..500 {
            let progress = tracker.get(id).unwrap().progress;
            assert_eq!(progress.frames_processed, progress.frames_written);
            assert!(progress.frames_processed >= last);
            last = progress.frames_processed;
        }
        writer.join().unwrap();
    }
}

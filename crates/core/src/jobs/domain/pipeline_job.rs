use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::media_descriptor::{MediaDescriptor, OutputDescriptor};
use crate::shared::stage_config::StageConfig;
use crate::video::domain::frame_sink::{Keyframe, SinkError};
use crate::video::domain::frame_source::SourceError;

/// Identifier handed out by the tracker, increasing in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnreadableMedia,
    CorruptStream,
    StageError,
    UnwritableDestination,
    SinkWriteError,
    Cancelled,
    /// Worker panics and other faults outside the taxonomy.
    Internal,
}

/// Why a job did not succeed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub stage: Option<String>,
    pub frame_index: Option<usize>,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: None,
            frame_index: None,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    /// Cancellation observed before reading frame `next_index`.
    pub fn cancelled(next_index: usize) -> Self {
        Self::new(FailureKind::Cancelled, "job was cancelled").at_frame(next_index)
    }

    pub fn at_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn at_frame(mut self, frame_index: usize) -> Self {
        self.frame_index = Some(frame_index);
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(stage) = &self.stage {
            write!(f, " in stage '{stage}'")?;
        }
        if let Some(index) = self.frame_index {
            write!(f, " at frame {index}")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for JobFailure {}

impl From<SourceError> for JobFailure {
    fn from(err: SourceError) -> Self {
        let message = err.to_string();
        match err {
            SourceError::UnreadableMedia { .. } => Self::new(FailureKind::UnreadableMedia, message),
            SourceError::CorruptStream { frame_index, .. } => {
                Self::new(FailureKind::CorruptStream, message).at_frame(frame_index)
            }
            SourceError::NotOpened => Self::internal(message),
        }
    }
}

impl From<SinkError> for JobFailure {
    fn from(err: SinkError) -> Self {
        let message = err.to_string();
        match err {
            SinkError::UnwritableDestination { .. } => {
                Self::new(FailureKind::UnwritableDestination, message)
            }
            SinkError::Write { frame_index, .. } => {
                Self::new(FailureKind::SinkWriteError, message).at_frame(frame_index)
            }
            SinkError::Finalize { .. } => Self::new(FailureKind::SinkWriteError, message),
            SinkError::NotOpened => Self::internal(message),
        }
    }
}

/// What a successful run produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub output: OutputDescriptor,
    pub frames_read: usize,
    pub frames_written: usize,
    pub elapsed_secs: f64,
    pub keyframes: Vec<Keyframe>,
}

/// Per-frame progress reported by an executor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Last stage that emitted the most recent frame; `None` before any
    /// frame or when the first stage dropped it.
    pub stage_index: Option<usize>,
    pub frames_processed: usize,
    pub frames_written: usize,
}

/// Terminal result of one pipeline run.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Succeeded(JobResult),
    Failed(JobFailure),
    Cancelled(JobFailure),
}

impl RunOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            RunOutcome::Succeeded(_) => JobStatus::Succeeded,
            RunOutcome::Failed(_) => JobStatus::Failed,
            RunOutcome::Cancelled(_) => JobStatus::Cancelled,
        }
    }
}

impl From<Result<JobResult, JobFailure>> for RunOutcome {
    fn from(result: Result<JobResult, JobFailure>) -> Self {
        match result {
            Ok(result) => RunOutcome::Succeeded(result),
            Err(failure) if failure.kind == FailureKind::Cancelled => RunOutcome::Cancelled(failure),
            Err(failure) => RunOutcome::Failed(failure),
        }
    }
}

/// Point-in-time snapshot of a tracked job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: JobId,
    pub stages: Vec<StageConfig>,
    pub input: PathBuf,
    pub input_descriptor: Option<MediaDescriptor>,
    pub output: PathBuf,
    pub status: JobStatus,
    #[serde(flatten)]
    pub progress: JobProgress,
    pub failure: Option<JobFailure>,
    pub result: Option<JobResult>,
    /// Milliseconds since the Unix epoch.
    pub submitted_at_ms: u64,
    pub elapsed_secs: f64,
}

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::media_descriptor::MediaDescriptor;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("unreadable media {path}: {reason}")]
    UnreadableMedia { path: PathBuf, reason: String },
    #[error("corrupt stream at frame {frame_index}: {reason}")]
    CorruptStream { frame_index: usize, reason: String },
    #[error("frame source not opened")]
    NotOpened,
}

/// Decodes frames from a media resource.
///
/// Implementations handle I/O details (codec, container format, etc.)
/// while the pipeline works with the abstract `Frame` and
/// `MediaDescriptor` types. A source is finite and not restartable
/// mid-stream: a second pass requires a fresh `open`.
pub trait FrameSource: Send {
    /// Opens a media file and returns its descriptor.
    fn open(&mut self, path: &Path) -> Result<MediaDescriptor, SourceError>;

    /// Returns the next frame in presentation order, `Ok(None)` at a clean
    /// end of stream, or `CorruptStream` when decoding breaks off early.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Releases decoder and container resources. Idempotent.
    fn close(&mut self);
}

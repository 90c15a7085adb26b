use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Properties of an opened input media resource.
///
/// Produced by a frame source on open and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub path: PathBuf,
    /// Container format name as reported by the demuxer (e.g. `mov,mp4,m4a`).
    pub container: String,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` when the container does not advertise a frame count.
    pub total_frames: Option<usize>,
    pub duration_secs: Option<f64>,
}

impl MediaDescriptor {
    /// Frame rate to use for timing math; falls back to 30 when the
    /// container reports none.
    pub fn effective_fps(&self) -> f64 {
        if self.fps > 0.0 {
            self.fps
        } else {
            30.0
        }
    }
}

/// Properties of the artifact a successful run produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: usize,
    pub duration_secs: f64,
}

/// Container extensions accepted by default (lowercase, without the dot).
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Default upload size limit: 100 MiB.
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 100 * 1024 * 1024;

/// One keyframe per this many seconds of input.
pub const KEYFRAME_SECONDS_PER_FRAME: f64 = 20.0;
pub const KEYFRAME_MIN_COUNT: usize = 3;
pub const KEYFRAME_MAX_COUNT: usize = 6;
pub const KEYFRAME_MAX_WIDTH: u32 = 1200;
pub const KEYFRAME_JPEG_QUALITY: u8 = 80;

/// Largest width or height a stage may produce.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Frames between progress log lines.
pub const DEFAULT_PROGRESS_THROTTLE: usize = 25;

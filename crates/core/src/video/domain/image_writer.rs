use std::path::Path;

use crate::shared::frame::Frame;

/// Writes a single frame to a compressed still image.
pub trait ImageWriter: Send {
    /// Writes `frame` to `path` as JPEG, downscaling to `max_width` when the
    /// frame is wider (aspect ratio preserved).
    fn write_jpeg(
        &self,
        path: &Path,
        frame: &Frame,
        max_width: u32,
        quality: u8,
    ) -> Result<(), Box<dyn std::error::Error>>;
}

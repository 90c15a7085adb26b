use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::shared::frame::Frame;
use crate::video::domain::image_writer::ImageWriter;

/// Writes frames as JPEG stills using the `image` crate.
pub struct ImageFileWriter;

impl ImageFileWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWriter for ImageFileWriter {
    fn write_jpeg(
        &self,
        path: &Path,
        frame: &Frame,
        max_width: u32,
        quality: u8,
    ) -> Result<(), Box<dyn std::error::Error>> {
        // Ensure parent directory exists (infrastructure concern)
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let img = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or("Failed to create image from frame data")?;

        let img = if max_width > 0 && img.width() > max_width {
            let ratio = max_width as f64 / img.width() as f64;
            let new_h = ((img.height() as f64 * ratio) as u32).max(1);
            image::imageops::resize(&img, max_width, new_h, FilterType::Triangle)
        } else {
            img
        };

        let out = BufWriter::new(File::create(path)?);
        let mut encoder = JpegEncoder::new_with_quality(out, quality.clamp(1, 100));
        encoder.encode_image(&img)?;
        Ok(())
    }
}

pub mod ffmpeg_source;
pub mod ffmpeg_sink;
pub mod image_file_writer;
pub mod keyframe_sink;
#[cfg(test)]
pub(crate) mod test_video;

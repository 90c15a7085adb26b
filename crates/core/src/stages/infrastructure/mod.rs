pub mod brightness_contrast;
pub mod crop;
pub mod frame_rate_downsample;
pub mod grayscale;
pub mod resize;
pub mod stage_factory;
pub mod temporal_smooth;
pub mod watermark;

mod rgb;

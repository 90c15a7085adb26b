use crate::shared::frame::Frame;
use crate::stages::domain::stage::StageError;

/// Built-in stages operate on packed RGB only.
pub(super) fn require_rgb(stage: &str, frame: &Frame) -> Result<(), StageError> {
    if frame.channels() == 3 {
        Ok(())
    } else {
        Err(StageError::new(format!(
            "{stage} expects 3-channel RGB frames, got {} channels",
            frame.channels()
        )))
    }
}

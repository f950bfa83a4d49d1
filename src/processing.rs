//! Signal-processing stage applied to captured audio.

use std::sync::Arc;

use crate::{AudioFrame, AudioOptions, ProcessingError};

/// In-place transform over one captured frame.
///
/// The processor runs on the capture thread before the frame is delivered to
/// sinks. Errors are logged by the [`AudioSource`](crate::AudioSource) and the
/// frame is delivered as the processor left it.
pub trait AudioProcessor: Send {
    /// Applies the source's audio options. Called once on attachment.
    fn apply_options(&mut self, _options: &AudioOptions) {}

    /// Processes one frame in place.
    fn process(&mut self, frame: &mut AudioFrame) -> Result<(), ProcessingError>;
}

/// A processor that leaves frames unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughProcessor;

impl AudioProcessor for PassthroughProcessor {
    fn process(&mut self, _frame: &mut AudioFrame) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// Callback receiving the audio level in `[0.0, 1.0]`.
///
/// Use [`level_to_percent`](crate::format::level_to_percent) for the 0-100
/// host scale. Runs on the capture thread.
pub type AudioLevelCallback = Arc<dyn Fn(f32) + Send + Sync>;

//! Consumers of processed capture audio.
//!
//! An [`AudioSink`] receives every frame an [`AudioSource`](crate::AudioSource)
//! delivers. The crate provides [`ChannelSink`], which forwards frames into a
//! tokio mpsc channel. Implement the trait for custom destinations like
//! encoders or analyzers.

mod channel;

pub use channel::ChannelSink;

use crate::AudioFrame;

/// A destination for processed audio frames.
///
/// Sinks are registered on an [`AudioSource`](crate::AudioSource), which only
/// keeps a weak reference: the caller owns the sink, and dropping it
/// unregisters it.
///
/// # Implementation Notes
///
/// - `on_data` runs on the capture thread for every 10ms frame; never block
/// - Methods take `&self`; use interior mutability if needed
/// - The frame is only borrowed; clone what must outlive the call
///
/// # Example
///
/// ```
/// use audio_device_engine::{AudioFrame, AudioSink};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct CountingSink {
///     frames: AtomicUsize,
/// }
///
/// impl AudioSink for CountingSink {
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     fn on_data(&self, _frame: &AudioFrame) {
///         self.frames.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait AudioSink: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "sink"
    }

    /// Receives one processed frame.
    fn on_data(&self, frame: &AudioFrame);
}

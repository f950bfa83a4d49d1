//! Runtime events for monitoring device health.
//!
//! Events are non-fatal notifications about engine behavior. The engines
//! keep running after events are emitted - they're for logging/metrics,
//! not error handling.

use std::sync::Arc;

use crate::DeviceId;

/// Runtime events emitted by the playout and capture engines.
///
/// These are informational events, not errors. Capture recovers inside its
/// engine whether or not anyone listens. Playout stays failed after
/// [`PlayoutDeviceFailed`](Self::PlayoutDeviceFailed) until the host calls
/// `restart_playout`, `set_playout_device` or `start_playout`, which it may
/// do from the callback.
///
/// # Example
///
/// ```
/// use audio_device_engine::EngineEvent;
///
/// fn handle_event(event: EngineEvent) {
///     match event {
///         EngineEvent::PlayoutDeviceFailed { device, error } => {
///             eprintln!("Playout device '{}' failed: {}", device, error);
///         }
///         EngineEvent::PlayoutRestarted { device, recovered } => {
///             eprintln!("Playout restarted on '{}' (recovered: {})", device, recovered);
///         }
///         EngineEvent::PlayoutUnderrun { queued } => {
///             eprintln!("Playout underrun with {} buffers queued", queued);
///         }
///         EngineEvent::CaptureDeviceFailed { device, error } => {
///             eprintln!("Capture device '{}' failed: {}", device, error);
///         }
///         EngineEvent::CaptureSilence { device, empty_cycles } => {
///             eprintln!("Capture '{}' silent for {} cycles", device, empty_cycles);
///         }
///         EngineEvent::CaptureRestarted { device, recovered } => {
///             eprintln!("Capture restarted on '{}' (recovered: {})", device, recovered);
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The playout device failed to open or reported an error.
    ///
    /// Audio is dropped until the next restart succeeds.
    PlayoutDeviceFailed {
        /// Device that failed.
        device: DeviceId,
        /// Description of the error.
        error: String,
    },

    /// The playout restart protocol ran.
    PlayoutRestarted {
        /// Device selected after revalidation.
        device: DeviceId,
        /// Whether a device could be validated and reopened.
        recovered: bool,
    },

    /// The pull buffer had no full chunk while buffers were being refilled.
    ///
    /// Refilling stops for the cycle. Emitted once per run of underrunning
    /// cycles. This is not a hardware error.
    PlayoutUnderrun {
        /// Number of buffers still queued on the device.
        queued: usize,
    },

    /// The capture device failed to open or reported an error.
    CaptureDeviceFailed {
        /// Device that failed.
        device: DeviceId,
        /// Description of the error.
        error: String,
    },

    /// The capture device delivered no data for the restart threshold.
    CaptureSilence {
        /// Silent device.
        device: DeviceId,
        /// Consecutive empty polling cycles observed.
        empty_cycles: u32,
    },

    /// The capture restart protocol ran.
    CaptureRestarted {
        /// Device selected after revalidation.
        device: DeviceId,
        /// Whether a device could be validated and reopened.
        recovered: bool,
    },
}

/// Callback type for receiving runtime events.
///
/// The callback runs on engine threads, including the real-time playout
/// thread. It may call back into the engine that emitted the event;
/// otherwise keep it short and never block in it.
pub type EventCallback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use audio_device_engine::{event_callback, EngineEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(EngineEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Optional event callback with a no-op default.
#[derive(Clone, Default)]
pub(crate) struct EventEmitter(Option<EventCallback>);

impl EventEmitter {
    pub(crate) fn new(callback: Option<EventCallback>) -> Self {
        Self(callback)
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Some(ref callback) = self.0 {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventEmitter")
            .field(&self.0.is_some())
            .finish()
    }
}

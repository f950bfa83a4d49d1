//! Native audio backend abstraction.
//!
//! The engines never talk to an audio library directly. They drive an
//! [`AudioBackend`], which enumerates devices and opens device handles:
//!
//! - [`PlayoutDevice`]: a streaming output source fed with fixed-size
//!   buffers. Handles are thread-affine (not `Send`) and live on the playout
//!   engine's owned thread.
//! - [`CaptureDevice`]: a polled input device that accumulates samples until
//!   they are captured.
//!
//! Two implementations ship with the crate: [`CpalBackend`] for real hardware
//! and [`MockBackend`] for tests.

#[cfg(feature = "cpal-backend")]
mod cpal;
pub mod mock;

use std::time::Duration;

use crate::{BackendError, DeviceId};

#[cfg(feature = "cpal-backend")]
pub use self::cpal::CpalBackend;
pub use mock::MockBackend;

/// Device category queried from the enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Output (speaker) devices.
    Playout,
    /// Input (microphone) devices.
    Capture,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Playout => write!(f, "playout"),
            Self::Capture => write!(f, "capture"),
        }
    }
}

/// PCM layout of an opened device. Samples are always 16-bit interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

/// Optional backend entry points resolved once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendExtensions {
    /// Device contexts can be bound to a specific thread. Required.
    pub thread_context: bool,
    /// The backend can report exact device latency.
    pub exact_latency: bool,
    /// The backend reports device disconnects asynchronously.
    pub disconnect_events: bool,
}

impl BackendExtensions {
    /// Returns a description of the first missing required entry point.
    pub fn missing_required(&self) -> Option<&'static str> {
        if self.thread_context {
            None
        } else {
            Some("thread-bound device contexts")
        }
    }
}

/// A native audio backend.
///
/// Implementations must be cheap to share between threads. Device handles
/// returned from `open_*` are owned by exactly one engine.
pub trait AudioBackend: Send + Sync + 'static {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Resolves the backend's optional entry points.
    ///
    /// Called once from `init()`. Implementations resolve against process-wide
    /// state at most once and return the cached table afterwards.
    fn resolve_extensions(&self) -> BackendExtensions;

    /// Lists device specifiers of the given kind.
    fn devices(&self, kind: DeviceKind) -> Vec<String>;

    /// Returns the default device specifier of the given kind, if any.
    fn default_device(&self, kind: DeviceKind) -> Option<String>;

    /// Prefix the backend prepends to human-readable device names.
    fn name_prefix(&self) -> Option<&str> {
        None
    }

    /// Opens an output device with a streaming source of `buffers` slots.
    ///
    /// An empty `device` selects the system default.
    fn open_playout(
        &self,
        device: &DeviceId,
        format: StreamFormat,
        buffers: usize,
    ) -> Result<Box<dyn PlayoutDevice>, BackendError>;

    /// Opens an input device. Capture does not begin until
    /// [`CaptureDevice::start`] is called.
    ///
    /// An empty `device` selects the system default.
    fn open_capture(
        &self,
        device: &DeviceId,
        format: StreamFormat,
    ) -> Result<Box<dyn CaptureDevice>, BackendError>;
}

/// An open output device with a streaming source.
///
/// Buffers are identified by pool slot index. The source plays queued
/// buffers in order and stops by itself when it runs out of them.
///
/// Handles are thread-affine: every call must happen on the thread that
/// opened the device. Dropping the handle releases the source and closes the
/// device.
pub trait PlayoutDevice {
    /// Uploads samples into the buffer of the given slot.
    fn buffer_data(&mut self, slot: usize, samples: &[i16]);

    /// Appends the buffers of the given slots to the source queue.
    fn queue(&mut self, slots: &[usize]);

    /// Removes one fully played buffer from the queue, returning its slot.
    fn unqueue_processed(&mut self) -> Option<usize>;

    /// Detaches every buffer from the source, played or not.
    fn unqueue_all(&mut self);

    /// Returns `true` while the source is consuming queued buffers.
    fn is_playing(&self) -> bool;

    /// Starts or resumes consumption of queued buffers.
    fn play(&mut self);

    /// Stops the source. Queued buffers stay attached until unqueued.
    fn stop(&mut self);

    /// Returns and clears the pending device error, if any.
    fn take_error(&mut self) -> Option<BackendError>;

    /// Latency added by the device beyond queued buffers, when measurable.
    fn device_latency(&self) -> Option<Duration> {
        None
    }
}

/// An open input device that is polled for samples.
pub trait CaptureDevice: Send {
    /// Starts accumulating samples.
    fn start(&mut self) -> Result<(), BackendError>;

    /// Stops accumulating samples.
    fn stop(&mut self);

    /// Samples per channel ready to be captured.
    fn available_samples(&mut self) -> usize;

    /// Captures exactly `frames` samples per channel as little-endian PCM.
    ///
    /// `out` must hold at least `frames * channels * 2` bytes.
    fn capture(&mut self, out: &mut [u8], frames: usize) -> Result<(), BackendError>;

    /// Returns and clears the pending device error, if any.
    fn take_error(&mut self) -> Option<BackendError>;
}

//! Error types for the audio device engine.
//!
//! Errors are split into three categories:
//! - **Caller errors** ([`EngineError`]): ordering violations and unusable
//!   configuration, returned from public entry points
//! - **Hardware errors** ([`BackendError`]): produced by a backend, absorbed by
//!   the engines into their recovery state and surfaced only as
//!   [`EngineEvent`](crate::EngineEvent)s
//! - **Processing errors** ([`ProcessingError`]): reported by the processing
//!   stage, logged and suppressed

/// Errors returned to the caller of an engine entry point.
///
/// None of these describe a hardware fault. A device that fails to open or
/// disappears mid-session never produces an `EngineError`; the engine keeps
/// running and reports it as an [`EngineEvent`](crate::EngineEvent).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine has not been initialized with `init()`.
    #[error("audio engine not initialized")]
    NotInitialized,

    /// Playout was started before `init_playout()`.
    #[error("playout not initialized")]
    PlayoutNotInitialized,

    /// The requested change is not allowed while audio is playing.
    #[error("operation not allowed while playing")]
    AlreadyPlaying,

    /// The backend lacks required extension entry points.
    #[error("backend '{backend}' lacks required extensions: {missing}")]
    ExtensionsUnavailable {
        /// Name of the backend.
        backend: String,
        /// Description of what is missing.
        missing: String,
    },

    /// A device index outside of the enumerated range.
    #[error("device index {index} out of range ({count} devices)")]
    DeviceIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of enumerated devices.
        count: usize,
    },

    /// The backend reports no default device.
    #[error("no default {kind} device")]
    NoDefaultDevice {
        /// Device category.
        kind: crate::DeviceKind,
    },

    /// The dedicated engine thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread name.
        name: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The dedicated engine thread exited while a task was pending.
    #[error("{name} thread is gone")]
    ThreadGone {
        /// Thread name.
        name: &'static str,
    },

    /// A control call made on the engine thread found the engine busy with
    /// the task that made it.
    #[error("{name} thread is busy with the calling task")]
    ThreadBusy {
        /// Thread name.
        name: &'static str,
    },
}

/// Hardware-facing errors produced by an [`AudioBackend`](crate::AudioBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// A device could not be opened.
    #[error("failed to open device '{device}': {reason}")]
    OpenFailed {
        /// Device specifier (empty for system default).
        device: String,
        /// Reason reported by the backend.
        reason: String,
    },

    /// An open device disconnected or stopped responding.
    #[error("device '{device}' lost: {reason}")]
    DeviceLost {
        /// Device specifier.
        device: String,
        /// Reason reported by the backend.
        reason: String,
    },

    /// Any other error from the underlying audio library.
    #[error("audio backend error: {0}")]
    Backend(String),
}

impl BackendError {
    /// Creates an open failure for the given device.
    pub fn open_failed(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Creates a device loss error for the given device.
    pub fn device_lost(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceLost {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

/// Status reported by an [`AudioProcessor`](crate::AudioProcessor).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    /// The processor returned a non-zero status code.
    #[error("processing failed with status {0}")]
    Status(i32),

    /// The frame format is not supported by the processor.
    #[error("unsupported frame format: {sample_rate}Hz, {channels} channels")]
    UnsupportedFormat {
        /// Frame sample rate.
        sample_rate: u32,
        /// Frame channel count.
        channels: u16,
    },
}

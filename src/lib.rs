//! # audio-device-engine
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time audio device engine for a conferencing media stack.
//!
//! `audio-device-engine` keeps an output device fed from a pull buffer,
//! records 10ms chunks from any number of input devices, and fans captured
//! audio out to sinks. Device failures never stop the engines. Capture falls
//! back to the system default device and restarts on its own. Playout marks
//! itself failed and emits an event; the host restarts it, from the event
//! callback if it wants.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use audio_device_engine::{AudioDeviceModule, ChannelSink, CpalBackend, AudioSink};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let module = AudioDeviceModule::builder(Arc::new(CpalBackend::new()))
//!     .on_event(|e| tracing::warn!(?e, "device event"))
//!     .build();
//! module.init()?;
//!
//! // Capture from the first input device
//! let (tx, mut rx) = mpsc::channel(32);
//! let sink: Arc<dyn AudioSink> = Arc::new(ChannelSink::new(tx));
//! let source = module.create_audio_source(0)?;
//! source.add_sink(&sink);
//!
//! while let Some(frame) = rx.recv().await {
//!     // 10ms of mono PCM
//! }
//! ```
//!
//! ## Architecture
//!
//! Two dedicated threads, each running a fixed-delay 10ms timer:
//!
//! - **Playout Thread**: refills a pool of 7 device buffers up to a low-water
//!   mark of 5 from a [`PlayoutSource`]
//! - **Recording Thread**: polls every [`CaptureEngine`], draining full chunks
//!   into its [`AudioSource`]
//!
//! Native device handles are opened through an [`AudioBackend`]:
//! [`CpalBackend`] for hardware, [`MockBackend`] for tests.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod capture;
mod config;
mod device;
mod error;
mod event;
pub mod format;
mod frame;
mod module;
mod pipeline;
mod playout;
mod processing;
mod recovery;
mod sink;
mod source;

#[cfg(feature = "cpal-backend")]
pub use backend::CpalBackend;
pub use backend::{
    AudioBackend, BackendExtensions, CaptureDevice, DeviceKind, MockBackend, PlayoutDevice,
    StreamFormat,
};
pub use capture::{CaptureEngine, CapturePoller, CaptureStats};
pub use config::{AudioOptions, EngineConfig, NoiseSuppressionLevel, BYTES_PER_SAMPLE};
pub use device::{DeviceEnumerator, DeviceId, DeviceInfo};
pub use error::{BackendError, EngineError, ProcessingError};
pub use event::{event_callback, EngineEvent, EventCallback};
pub use frame::{AudioFrame, RawFrame};
pub use module::{AudioDeviceModule, AudioDeviceModuleBuilder};
pub use playout::{
    playout_buffer, PlayoutEngine, PlayoutProducer, PlayoutSource, PlayoutStats,
    RingPlayoutSource,
};
pub use processing::{AudioLevelCallback, AudioProcessor, PassthroughProcessor};
pub use recovery::DeviceHealth;
pub use sink::{AudioSink, ChannelSink};
pub use source::AudioSource;

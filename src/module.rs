//! Audio device module facade.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{AudioBackend, BackendExtensions, DeviceKind};
use crate::capture::{CaptureEngine, CapturePoller};
use crate::device::{DeviceEnumerator, DeviceInfo};
use crate::processing::{AudioProcessor, PassthroughProcessor};
use crate::{
    event_callback, AudioOptions, AudioSource, DeviceId, EngineConfig, EngineError, EngineEvent,
    EventCallback, PlayoutEngine,
};

/// Builder for an [`AudioDeviceModule`].
///
/// Use [`AudioDeviceModule::builder()`] to create one.
#[must_use]
pub struct AudioDeviceModuleBuilder {
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    event_callback: Option<EventCallback>,
}

impl AudioDeviceModuleBuilder {
    /// Overrides the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a callback for runtime events.
    ///
    /// Events are non-fatal notifications about device failures, restarts
    /// and underruns. Useful for logging and monitoring.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Builds the module. Nothing is opened until [`AudioDeviceModule::init`].
    pub fn build(self) -> AudioDeviceModule {
        AudioDeviceModule {
            enumerator: DeviceEnumerator::new(Arc::clone(&self.backend)),
            playout: PlayoutEngine::new(
                Arc::clone(&self.backend),
                self.config.clone(),
                self.event_callback.clone(),
            ),
            poller: CapturePoller::new(self.config.chunk_duration),
            recording: Mutex::new(RecordingState::default()),
            backend: self.backend,
            config: self.config,
            event_callback: self.event_callback,
        }
    }
}

#[derive(Default)]
struct RecordingState {
    initialized: bool,
    engines: Vec<(DeviceId, Arc<CaptureEngine>)>,
}

/// One playout engine plus any number of capture engines on a shared
/// backend.
///
/// # Example
///
/// ```
/// use audio_device_engine::{AudioDeviceModule, MockBackend};
/// use std::sync::Arc;
///
/// let module = AudioDeviceModule::builder(Arc::new(MockBackend::new()))
///     .on_event(|e| tracing::warn!(?e, "device event"))
///     .build();
/// module.init()?;
///
/// let source = module.create_audio_source(0)?;
/// assert!(module.recording());
///
/// module.playout().init_playout()?;
/// module.playout().start_playout()?;
///
/// module.terminate()?;
/// # drop(source);
/// # Ok::<(), audio_device_engine::EngineError>(())
/// ```
pub struct AudioDeviceModule {
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    event_callback: Option<EventCallback>,
    enumerator: DeviceEnumerator,
    playout: PlayoutEngine,
    poller: CapturePoller,
    recording: Mutex<RecordingState>,
}

impl AudioDeviceModule {
    /// Creates a builder on `backend` with default configuration.
    pub fn builder(backend: Arc<dyn AudioBackend>) -> AudioDeviceModuleBuilder {
        AudioDeviceModuleBuilder {
            backend,
            config: EngineConfig::default(),
            event_callback: None,
        }
    }

    /// Resolves backend extensions. Idempotent after success.
    pub fn init(&self) -> Result<BackendExtensions, EngineError> {
        self.playout.init()
    }

    /// Returns `true` once [`init`](Self::init) succeeded.
    pub fn initialized(&self) -> bool {
        self.playout.initialized()
    }

    /// Stops playout and capture. [`init`](Self::init) may be called again.
    pub fn terminate(&self) -> Result<(), EngineError> {
        self.stop_recording();
        self.recording.lock().initialized = false;
        self.playout.terminate()
    }

    /// The playout engine.
    pub fn playout(&self) -> &PlayoutEngine {
        &self.playout
    }

    /// Configuration shared by all engines.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of output devices.
    pub fn playout_devices(&self) -> usize {
        self.enumerator.count(DeviceKind::Playout)
    }

    /// Number of input devices.
    pub fn recording_devices(&self) -> usize {
        self.enumerator.count(DeviceKind::Capture)
    }

    /// Name and guid of the output device at `index`.
    pub fn playout_device_name(&self, index: usize) -> Result<DeviceInfo, EngineError> {
        self.device_info(DeviceKind::Playout, index)
    }

    /// Name and guid of the input device at `index`.
    pub fn recording_device_name(&self, index: usize) -> Result<DeviceInfo, EngineError> {
        self.device_info(DeviceKind::Capture, index)
    }

    /// Selects the output device at `index`, restarting active playout on it.
    pub fn set_playout_device(&self, index: usize) -> Result<(), EngineError> {
        self.playout.set_playout_device_index(index)
    }

    /// Marks recording as initialized. Idempotent.
    pub fn init_recording(&self) -> Result<(), EngineError> {
        if !self.initialized() {
            return Err(EngineError::NotInitialized);
        }
        self.recording.lock().initialized = true;
        Ok(())
    }

    /// Returns `true` after [`init_recording`](Self::init_recording).
    pub fn recording_is_initialized(&self) -> bool {
        self.recording.lock().initialized
    }

    /// Returns `true` while the recording thread runs.
    pub fn recording(&self) -> bool {
        self.poller.is_running()
    }

    /// Starts capturing from the input device at `index` with default options
    /// and no processing.
    pub fn create_audio_source(&self, index: usize) -> Result<Arc<AudioSource>, EngineError> {
        self.create_audio_source_with(index, AudioOptions::default(), Box::new(PassthroughProcessor))
    }

    /// Starts capturing from the input device at `index` and returns the
    /// source its chunks flow into.
    ///
    /// A device that is already capturing keeps its engine and source; the
    /// options and processor are then ignored. A device that fails to open
    /// still yields a source, which stays silent until the engine recovers.
    pub fn create_audio_source_with(
        &self,
        index: usize,
        options: AudioOptions,
        processor: Box<dyn AudioProcessor>,
    ) -> Result<Arc<AudioSource>, EngineError> {
        if !self.initialized() {
            return Err(EngineError::NotInitialized);
        }
        let id = DeviceId::new(self.device_info(DeviceKind::Capture, index)?.guid);

        let engine = {
            let mut recording = self.recording.lock();
            let existing = recording
                .engines
                .iter()
                .find(|(key, _)| *key == id)
                .map(|(_, engine)| Arc::clone(engine));
            if let Some(engine) = existing {
                engine
            } else {
                let engine = Arc::new(CaptureEngine::new(
                    Arc::clone(&self.backend),
                    id.clone(),
                    &self.config,
                    options,
                    processor,
                    self.event_callback.clone(),
                ));
                recording.engines.push((id.clone(), Arc::clone(&engine)));
                engine
            }
        };

        engine.start_capture();
        self.poller.register(Arc::clone(&engine));
        self.poller.start()?;
        tracing::debug!(device = %id, "Audio source created");
        Ok(engine.source())
    }

    /// Stops and forgets the capture engine created for `device`.
    ///
    /// Returns `false` if no source exists for it.
    pub fn dispose_audio_source(&self, device: &DeviceId) -> bool {
        let engine = {
            let mut recording = self.recording.lock();
            let Some(position) = recording.engines.iter().position(|(key, _)| key == device)
            else {
                return false;
            };
            recording.engines.remove(position).1
        };
        self.poller.unregister(&engine);
        engine.stop_capture();
        tracing::debug!(device = %device, "Audio source disposed");
        true
    }

    /// The capture engine created for `device`, if any.
    pub fn capture_engine(&self, device: &DeviceId) -> Option<Arc<CaptureEngine>> {
        self.recording
            .lock()
            .engines
            .iter()
            .find(|(key, _)| key == device)
            .map(|(_, engine)| Arc::clone(engine))
    }

    /// Stops every capture engine and the recording thread.
    ///
    /// Sources stay registered; creating a source again resumes polling.
    pub fn stop_recording(&self) {
        self.poller.stop();
    }

    fn device_info(&self, kind: DeviceKind, index: usize) -> Result<DeviceInfo, EngineError> {
        self.enumerator
            .device_info(kind, index)
            .ok_or_else(|| EngineError::DeviceIndexOutOfRange {
                index,
                count: self.enumerator.count(kind),
            })
    }
}

impl std::fmt::Debug for AudioDeviceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDeviceModule")
            .field("backend", &self.backend.name())
            .field("playout", &self.playout)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

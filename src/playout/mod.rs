//! Playout engine: buffer-pool scheduling on a dedicated thread.
//!
//! ```text
//! PlayoutSource ──pull 10ms──► [audio-playout thread] ──queue──► PlayoutDevice
//!                               PlayoutScheduler + BufferPool
//! ```
//!
//! The device handle and the buffer pool are touched only on the engine
//! thread. Control methods post tasks to it and wait for them; the flags they
//! read (`playing`, `playout_is_initialized`) sit behind a plain mutex.
//! Control methods called from an event callback run their tasks inline on
//! the engine thread.

mod pool;
mod pull;
mod schedule;

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

pub use pull::{playout_buffer, PlayoutProducer, PlayoutSource, RingPlayoutSource};

use crate::backend::{AudioBackend, BackendExtensions, DeviceKind, PlayoutDevice, StreamFormat};
use crate::device::DeviceEnumerator;
use crate::event::EventEmitter;
use crate::pipeline::{EngineThread, Worker};
use crate::recovery::{DeviceHealth, RecoveryState};
use crate::{DeviceId, EngineConfig, EngineError, EngineEvent, EventCallback};
use schedule::{CycleReport, PlayoutScheduler};

const THREAD_NAME: &str = "audio-playout";

/// Point-in-time statistics of a [`PlayoutEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayoutStats {
    /// Device the engine is configured for.
    pub device: DeviceId,
    /// Health of the playout device.
    pub health: DeviceHealth,
    /// Buffers currently queued on the device.
    pub queued_buffers: usize,
    /// Refill cycles run since creation.
    pub cycles: u64,
    /// Cycles that found no full chunk in the pull buffer.
    pub underruns: u64,
    /// Device errors observed since creation.
    pub device_failures: u64,
    /// Device errors since the last successful open.
    pub consecutive_failures: u32,
    /// Runs of the restart protocol.
    pub restarts: u64,
    /// Last device error, if any.
    pub last_error: Option<String>,
}

struct PlayoutStatus {
    engine_thread: Option<ThreadId>,
    playout_initialized: bool,
    playing: bool,
    device_id: DeviceId,
    channels: u16,
    recovery: RecoveryState,
    queued: usize,
    device_latency: Option<Duration>,
    in_underrun: bool,
    cycles: u64,
    underruns: u64,
}

struct PlayoutShared {
    status: Mutex<PlayoutStatus>,
    source: Mutex<Option<Box<dyn PlayoutSource>>>,
    emitter: EventEmitter,
}

/// Drives one output device from a [`PlayoutSource`].
///
/// # Lifecycle
///
/// 1. [`init`](Self::init) resolves backend extensions once
/// 2. [`init_playout`](Self::init_playout) spawns the playout thread
/// 3. [`start_playout`](Self::start_playout) opens the device and starts the
///    10ms refill timer
/// 4. [`stop_playout`](Self::stop_playout) closes the device and joins the
///    thread; call `init_playout` again before restarting
///
/// Device failures never surface as errors. The engine marks itself failed,
/// emits an [`EngineEvent`], and keeps reporting [`playing`](Self::playing)
/// until stopped. It does not restart on its own:
/// [`restart_playout`](Self::restart_playout) and
/// [`set_playout_device`](Self::set_playout_device) retry the device, and may
/// be called from the event callback that reported the failure.
///
/// # Example
///
/// ```
/// use audio_device_engine::{playout_buffer, EngineConfig, MockBackend, PlayoutEngine};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let engine = PlayoutEngine::new(Arc::new(MockBackend::new()), EngineConfig::default(), None);
/// let (_producer, source) = playout_buffer(Duration::from_millis(200), 48000, 2);
/// engine.register_playout_source(Some(Box::new(source)));
///
/// engine.init()?;
/// engine.init_playout()?;
/// engine.start_playout()?;
/// assert!(engine.playing());
/// engine.stop_playout()?;
/// # Ok::<(), audio_device_engine::EngineError>(())
/// ```
pub struct PlayoutEngine {
    backend: Arc<dyn AudioBackend>,
    enumerator: DeviceEnumerator,
    config: EngineConfig,
    extensions: Mutex<Option<BackendExtensions>>,
    thread: Mutex<Option<EngineThread<PlayoutSession>>>,
    shared: Arc<PlayoutShared>,
}

impl PlayoutEngine {
    /// Creates an uninitialized engine targeting the default device.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        config: EngineConfig,
        on_event: Option<EventCallback>,
    ) -> Self {
        let shared = Arc::new(PlayoutShared {
            status: Mutex::new(PlayoutStatus {
                engine_thread: None,
                playout_initialized: false,
                playing: false,
                device_id: DeviceId::default_device(),
                channels: config.playout_channels.max(1),
                recovery: RecoveryState::default(),
                queued: 0,
                device_latency: None,
                in_underrun: false,
                cycles: 0,
                underruns: 0,
            }),
            source: Mutex::new(None),
            emitter: EventEmitter::new(on_event),
        });
        Self {
            enumerator: DeviceEnumerator::new(Arc::clone(&backend)),
            backend,
            config,
            extensions: Mutex::new(None),
            thread: Mutex::new(None),
            shared,
        }
    }

    /// Resolves the backend's extension entry points.
    ///
    /// Idempotent after success. Fails on every call if a required entry
    /// point is missing.
    pub fn init(&self) -> Result<BackendExtensions, EngineError> {
        let mut slot = self.extensions.lock();
        if let Some(extensions) = *slot {
            return Ok(extensions);
        }
        let extensions = self.backend.resolve_extensions();
        if let Some(missing) = extensions.missing_required() {
            tracing::error!(backend = self.backend.name(), missing, "Backend unusable");
            return Err(EngineError::ExtensionsUnavailable {
                backend: self.backend.name().to_string(),
                missing: missing.to_string(),
            });
        }
        *slot = Some(extensions);
        Ok(extensions)
    }

    /// Returns `true` once [`init`](Self::init) succeeded.
    pub fn initialized(&self) -> bool {
        self.extensions.lock().is_some()
    }

    // On the playout thread a held lock fails fast: its holder may be waiting
    // in `invoke` for this very thread.
    fn lock_thread(
        &self,
    ) -> Result<MutexGuard<'_, Option<EngineThread<PlayoutSession>>>, EngineError> {
        let current = std::thread::current().id();
        if self.shared.status.lock().engine_thread == Some(current) {
            self.thread
                .try_lock()
                .ok_or(EngineError::ThreadBusy { name: THREAD_NAME })
        } else {
            Ok(self.thread.lock())
        }
    }

    /// Spawns the playout thread.
    ///
    /// No-op if playout is already initialized, including while playing.
    pub fn init_playout(&self) -> Result<(), EngineError> {
        if !self.initialized() {
            return Err(EngineError::NotInitialized);
        }
        let mut slot = self.lock_thread()?;
        if self.shared.status.lock().playout_initialized {
            return Ok(());
        }

        if slot.is_none() {
            let backend = Arc::clone(&self.backend);
            let shared = Arc::clone(&self.shared);
            let config = self.config.clone();
            let thread = EngineThread::spawn(THREAD_NAME, move || {
                PlayoutSession::new(backend, shared, &config)
            })?;
            *slot = Some(thread);
        }
        let mut status = self.shared.status.lock();
        status.playout_initialized = true;
        status.engine_thread = slot.as_ref().map(EngineThread::thread_id);
        drop(status);
        tracing::debug!("Playout initialized");
        Ok(())
    }

    /// Returns `true` between `init_playout` and `stop_playout`.
    pub fn playout_is_initialized(&self) -> bool {
        self.shared.status.lock().playout_initialized
    }

    /// Opens the device and starts the refill timer.
    ///
    /// Succeeds even if the device cannot be opened; the engine is then
    /// marked failed and plays nothing until restarted. No-op while playing.
    pub fn start_playout(&self) -> Result<(), EngineError> {
        let slot = self.lock_thread()?;
        let (device, channels) = {
            let mut status = self.shared.status.lock();
            if !status.playout_initialized {
                return Err(EngineError::PlayoutNotInitialized);
            }
            if status.playing {
                return Ok(());
            }
            // A fresh start retries a device that failed before.
            status.recovery.recover();
            (status.device_id.clone(), status.channels)
        };
        let thread = slot.as_ref().ok_or(EngineError::PlayoutNotInitialized)?;

        let event = thread.invoke(move |session| {
            let event = session.open(&device, channels);
            session.start(channels);
            event
        })?;
        thread.start_timer(self.config.chunk_duration)?;
        self.shared.status.lock().playing = true;
        drop(slot);

        tracing::info!(channels, "Playout started");
        if let Some(event) = event {
            self.shared.emitter.emit(event);
        }
        Ok(())
    }

    /// Stops the timer, closes the device, and joins the playout thread.
    ///
    /// Playout must be initialized again before the next start. Idempotent.
    pub fn stop_playout(&self) -> Result<(), EngineError> {
        let thread = self.lock_thread()?.take();
        if let Some(thread) = thread {
            if let Err(e) = thread.stop_timer() {
                tracing::warn!(error = %e, "Playout thread gone before timer stop");
            }
            if let Err(e) = thread.invoke(PlayoutSession::stop) {
                tracing::warn!(error = %e, "Playout thread gone before stop");
            }
            thread.shutdown();
        }

        let mut status = self.shared.status.lock();
        status.engine_thread = None;
        if status.playing {
            tracing::info!("Playout stopped");
        }
        status.playing = false;
        status.playout_initialized = false;
        status.queued = 0;
        status.in_underrun = false;
        Ok(())
    }

    /// Returns `true` while a playout session is active.
    ///
    /// Stays `true` when the device failed or disappeared; audio is dropped
    /// until a restart succeeds.
    pub fn playing(&self) -> bool {
        self.shared.status.lock().playing
    }

    /// Selects the output device and restarts an active session on it.
    ///
    /// An unknown id falls back to the system default.
    pub fn set_playout_device(&self, id: DeviceId) -> Result<(), EngineError> {
        let validated = self
            .enumerator
            .validate(DeviceKind::Playout, &id)
            .unwrap_or(id);
        self.shared.status.lock().device_id = validated;
        self.restart_playout()
    }

    /// Selects the device at `index` in the playout device list.
    pub fn set_playout_device_index(&self, index: usize) -> Result<(), EngineError> {
        let info = self
            .enumerator
            .device_info(DeviceKind::Playout, index)
            .ok_or_else(|| EngineError::DeviceIndexOutOfRange {
                index,
                count: self.enumerator.count(DeviceKind::Playout),
            })?;
        self.set_playout_device(DeviceId::new(info.guid))
    }

    /// Selects the system default output device.
    pub fn set_playout_device_default(&self) -> Result<(), EngineError> {
        let default = self
            .enumerator
            .default_device(DeviceKind::Playout)
            .ok_or(EngineError::NoDefaultDevice {
                kind: DeviceKind::Playout,
            })?;
        self.set_playout_device(default)
    }

    /// Device the engine is configured for.
    pub fn playout_device(&self) -> DeviceId {
        self.shared.status.lock().device_id.clone()
    }

    /// Runs the restart protocol: stop, close, revalidate, reopen, resume.
    ///
    /// No-op unless playing. If no device validates, the engine stays
    /// playing in the failed state and the next call retries.
    ///
    /// Safe to call from the event callback, including on the playout
    /// thread after [`EngineEvent::PlayoutDeviceFailed`].
    pub fn restart_playout(&self) -> Result<(), EngineError> {
        let slot = self.lock_thread()?;
        let Some(thread) = slot.as_ref() else {
            return Ok(());
        };
        let requested = {
            let status = self.shared.status.lock();
            if !status.playing {
                return Ok(());
            }
            status.device_id.clone()
        };

        thread.stop_timer()?;
        thread.invoke(PlayoutSession::stop)?;

        let Some(device) = self.enumerator.validate(DeviceKind::Playout, &requested) else {
            let mut status = self.shared.status.lock();
            status.recovery.record_restart();
            status.recovery.no_device();
            status.queued = 0;
            drop(status);
            drop(slot);

            tracing::warn!(device = %requested, "Playout restart found no device");
            self.shared.emitter.emit(EngineEvent::PlayoutRestarted {
                device: requested,
                recovered: false,
            });
            return Ok(());
        };

        let channels = {
            let mut status = self.shared.status.lock();
            status.recovery.record_restart();
            status.recovery.recover();
            status.device_id = device.clone();
            status.channels
        };
        let open_device = device.clone();
        let failure = thread.invoke(move |session| {
            let event = session.open(&open_device, channels);
            session.start(channels);
            event
        })?;
        thread.start_timer(self.config.chunk_duration)?;
        drop(slot);

        let recovered = failure.is_none();
        tracing::info!(device = %device, recovered, "Playout restarted");
        if let Some(event) = failure {
            self.shared.emitter.emit(event);
        }
        self.shared
            .emitter
            .emit(EngineEvent::PlayoutRestarted { device, recovered });
        Ok(())
    }

    /// Switches between stereo and mono playout. Rejected while playing.
    pub fn set_stereo_playout(&self, enable: bool) -> Result<(), EngineError> {
        let mut status = self.shared.status.lock();
        if status.playing {
            return Err(EngineError::AlreadyPlaying);
        }
        status.channels = if enable { 2 } else { 1 };
        Ok(())
    }

    /// Returns `true` if playout uses two channels.
    pub fn stereo_playout(&self) -> bool {
        self.shared.status.lock().channels == 2
    }

    /// Estimated delay between pulling a chunk and hearing it.
    ///
    /// Queued buffers plus the device latency when the backend reports it,
    /// or the configured latency floor when it does not. Zero while stopped.
    pub fn playout_delay(&self) -> Duration {
        let status = self.shared.status.lock();
        if !status.playing {
            return Duration::ZERO;
        }
        let queued = self.config.chunk_duration * status.queued as u32;
        queued
            + status
                .device_latency
                .unwrap_or(self.config.default_playout_latency)
    }

    /// Installs the pull buffer the engine reads from, replacing any previous
    /// one. `None` plays silence.
    pub fn register_playout_source(&self, source: Option<Box<dyn PlayoutSource>>) {
        let (playing, channels) = {
            let status = self.shared.status.lock();
            (status.playing, status.channels)
        };
        let mut slot = self.shared.source.lock();
        if let Some(old) = slot.as_mut() {
            old.stop_playout();
        }
        *slot = source;
        if playing {
            if let Some(new) = slot.as_mut() {
                new.set_playout_format(self.config.playout_sample_rate, channels);
                new.start_playout();
            }
        }
    }

    /// Returns current playout statistics.
    pub fn stats(&self) -> PlayoutStats {
        let status = self.shared.status.lock();
        PlayoutStats {
            device: status.device_id.clone(),
            health: status.recovery.health(),
            queued_buffers: status.queued,
            cycles: status.cycles,
            underruns: status.underruns,
            device_failures: status.recovery.total_failures(),
            consecutive_failures: status.recovery.consecutive_failures(),
            restarts: status.recovery.restarts(),
            last_error: status.recovery.last_error().map(ToString::to_string),
        }
    }

    /// Stops playout and forgets the initialization.
    pub fn terminate(&self) -> Result<(), EngineError> {
        self.stop_playout()?;
        *self.extensions.lock() = None;
        Ok(())
    }
}

impl std::fmt::Debug for PlayoutEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.shared.status.lock();
        f.debug_struct("PlayoutEngine")
            .field("backend", &self.backend.name())
            .field("device", &status.device_id)
            .field("playing", &status.playing)
            .field("failed", &status.recovery.is_failed())
            .finish_non_exhaustive()
    }
}

/// Playout state owned by the engine thread.
struct PlayoutSession {
    backend: Arc<dyn AudioBackend>,
    shared: Arc<PlayoutShared>,
    scheduler: PlayoutScheduler,
    device: Option<Box<dyn PlayoutDevice>>,
    device_id: DeviceId,
    sample_rate: u32,
}

impl PlayoutSession {
    fn new(backend: Arc<dyn AudioBackend>, shared: Arc<PlayoutShared>, config: &EngineConfig) -> Self {
        Self {
            backend,
            shared,
            scheduler: PlayoutScheduler::new(
                config.buffer_pool_size,
                config.low_water_mark,
                config.playout_part(),
                config.playout_channels,
            ),
            device: None,
            device_id: DeviceId::default_device(),
            sample_rate: config.playout_sample_rate,
        }
    }

    /// Opens the device unless one is open. Returns the failure event.
    fn open(&mut self, id: &DeviceId, channels: u16) -> Option<EngineEvent> {
        if self.device.is_some() {
            return None;
        }
        let format = StreamFormat {
            sample_rate: self.sample_rate,
            channels,
        };
        match self
            .backend
            .open_playout(id, format, self.scheduler.pool_size())
        {
            Ok(device) => {
                tracing::debug!(device = %id, channels, "Playout device opened");
                self.device = Some(device);
                self.device_id = id.clone();
                None
            }
            Err(e) => {
                tracing::error!(device = %id, error = %e, "Playout device open failed");
                self.shared.status.lock().recovery.fail(e.to_string());
                Some(EngineEvent::PlayoutDeviceFailed {
                    device: id.clone(),
                    error: e.to_string(),
                })
            }
        }
    }

    fn start(&mut self, channels: u16) {
        self.scheduler.set_channels(channels);
        self.scheduler.reset();
        if let Some(source) = self.shared.source.lock().as_mut() {
            source.set_playout_format(self.sample_rate, channels);
            source.start_playout();
        }
    }

    fn stop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
            device.unqueue_all();
            tracing::debug!(device = %self.device_id, "Playout device closed");
        }
        self.scheduler.reset();
        if let Some(source) = self.shared.source.lock().as_mut() {
            source.stop_playout();
        }
        self.shared.status.lock().queued = 0;
    }

    fn apply(&mut self, report: CycleReport, latency: Option<Duration>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let mut status = self.shared.status.lock();
        status.cycles += 1;
        status.queued = report.queued;
        status.device_latency = latency;

        if report.underrun {
            status.underruns += 1;
            if !status.in_underrun {
                tracing::debug!(queued = report.queued, "Playout underrun");
                events.push(EngineEvent::PlayoutUnderrun {
                    queued: report.queued,
                });
            }
        }
        status.in_underrun = report.underrun;

        if let Some(error) = &report.error {
            tracing::error!(device = %self.device_id, error = %error, "Playout device error");
            status.recovery.fail(error.to_string());
            events.push(EngineEvent::PlayoutDeviceFailed {
                device: self.device_id.clone(),
                error: error.to_string(),
            });
        }
        events
    }
}

impl Worker for PlayoutSession {
    fn on_tick(&mut self) -> Vec<EngineEvent> {
        let Some(device) = self.device.as_mut() else {
            return Vec::new();
        };
        let report = {
            let mut source = self.shared.source.lock();
            self.scheduler.process(device.as_mut(), source.as_deref_mut())
        };
        let latency = device.device_latency();
        self.apply(report, latency)
    }

    fn emitter(&self) -> EventEmitter {
        self.shared.emitter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackendError, MockBackend};

    fn engine(backend: &MockBackend) -> PlayoutEngine {
        PlayoutEngine::new(Arc::new(backend.clone()), EngineConfig::default(), None)
    }

    fn started(backend: &MockBackend) -> PlayoutEngine {
        let engine = engine(backend);
        engine.init().unwrap();
        engine.init_playout().unwrap();
        engine.start_playout().unwrap();
        engine
    }

    #[test]
    fn test_init_playout_requires_init() {
        let engine = engine(&MockBackend::new());
        assert!(matches!(
            engine.init_playout(),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn test_start_requires_init_playout() {
        let engine = engine(&MockBackend::new());
        engine.init().unwrap();
        assert!(matches!(
            engine.start_playout(),
            Err(EngineError::PlayoutNotInitialized)
        ));
    }

    #[test]
    fn test_init_fails_without_required_extensions() {
        let backend = MockBackend::new();
        backend.set_extensions(BackendExtensions {
            thread_context: false,
            exact_latency: false,
            disconnect_events: false,
        });
        let engine = engine(&backend);
        assert!(matches!(
            engine.init(),
            Err(EngineError::ExtensionsUnavailable { .. })
        ));
        assert!(engine.init().is_err());
        assert!(!engine.initialized());
    }

    #[test]
    fn test_init_resolves_once() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.init().unwrap();
        engine.init().unwrap();
        assert_eq!(backend.extension_resolutions(), 1);
    }

    #[test]
    fn test_start_twice_opens_once() {
        let backend = MockBackend::new();
        let engine = started(&backend);
        engine.start_playout().unwrap();

        assert!(engine.playing());
        assert_eq!(backend.playout_snapshot().opens, vec!["Mock Speakers"]);
        engine.stop_playout().unwrap();
    }

    #[test]
    fn test_stop_closes_and_uninitializes() {
        let backend = MockBackend::new();
        let engine = started(&backend);
        engine.stop_playout().unwrap();
        engine.stop_playout().unwrap();

        assert!(!engine.playing());
        assert!(!engine.playout_is_initialized());
        let snapshot = backend.playout_snapshot();
        assert_eq!(snapshot.open_device, None);
        assert_eq!(snapshot.closes, 1);
    }

    #[test]
    fn test_open_failure_still_plays() {
        let backend = MockBackend::new();
        backend.fail_open("Mock Speakers");
        let engine = started(&backend);

        assert!(engine.playing());
        assert_eq!(engine.stats().health, DeviceHealth::Failed);
        assert_eq!(engine.stats().consecutive_failures, 1);
        engine.stop_playout().unwrap();
    }

    #[test]
    fn test_stereo_rejected_while_playing() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.set_stereo_playout(false).unwrap();
        assert!(!engine.stereo_playout());

        engine.init().unwrap();
        engine.init_playout().unwrap();
        engine.start_playout().unwrap();
        assert!(matches!(
            engine.set_stereo_playout(true),
            Err(EngineError::AlreadyPlaying)
        ));
        engine.stop_playout().unwrap();
    }

    #[test]
    fn test_set_device_while_stopped_only_records() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine
            .set_playout_device(DeviceId::new("Mock Headphones"))
            .unwrap();
        assert_eq!(engine.playout_device(), DeviceId::new("Mock Headphones"));
        assert!(backend.playout_snapshot().opens.is_empty());
    }

    #[test]
    fn test_set_unknown_device_falls_back() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.set_playout_device(DeviceId::new("Nope")).unwrap();
        assert_eq!(engine.playout_device(), DeviceId::new("Mock Speakers"));
    }

    #[test]
    fn test_set_device_index_out_of_range() {
        let engine = engine(&MockBackend::new());
        assert!(matches!(
            engine.set_playout_device_index(5),
            Err(EngineError::DeviceIndexOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_set_device_default_without_devices() {
        let engine = engine(&MockBackend::empty());
        assert!(matches!(
            engine.set_playout_device_default(),
            Err(EngineError::NoDefaultDevice { .. })
        ));
    }

    #[test]
    fn test_set_device_while_playing_restarts() {
        let backend = MockBackend::new();
        let engine = started(&backend);
        engine.set_playout_device_index(1).unwrap();

        let snapshot = backend.playout_snapshot();
        assert_eq!(snapshot.opens, vec!["Mock Speakers", "Mock Headphones"]);
        assert_eq!(snapshot.open_device.as_deref(), Some("Mock Headphones"));
        assert_eq!(engine.stats().restarts, 1);
        engine.stop_playout().unwrap();
    }

    #[test]
    fn test_restart_without_devices_stays_playing() {
        let backend = MockBackend::new();
        let engine = started(&backend);
        backend.unplug(DeviceKind::Playout, "Mock Speakers");
        backend.unplug(DeviceKind::Playout, "Mock Headphones");

        engine.restart_playout().unwrap();
        assert!(engine.playing());
        assert_eq!(engine.stats().health, DeviceHealth::NoDevice);
        assert_eq!(backend.playout_snapshot().open_device, None);

        backend.set_devices(DeviceKind::Playout, &["USB Speakers"]);
        backend.set_default(DeviceKind::Playout, Some("USB Speakers"));
        engine.restart_playout().unwrap();
        assert_eq!(engine.stats().health, DeviceHealth::Healthy);
        assert_eq!(
            backend.playout_snapshot().open_device.as_deref(),
            Some("USB Speakers")
        );
        engine.stop_playout().unwrap();
    }

    #[test]
    fn test_restart_is_noop_when_stopped() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.restart_playout().unwrap();
        assert!(backend.playout_snapshot().opens.is_empty());
    }

    #[test]
    fn test_playout_delay_uses_floor() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        assert_eq!(engine.playout_delay(), Duration::ZERO);

        engine.init().unwrap();
        engine.init_playout().unwrap();
        engine.start_playout().unwrap();
        assert!(engine.playout_delay() >= Duration::from_millis(20));
        engine.stop_playout().unwrap();
    }

    #[test]
    fn test_device_error_marks_failed() {
        let backend = MockBackend::new();
        let (mut producer, source) = playout_buffer(Duration::from_millis(500), 48000, 2);
        producer.push(&[1i16; 48000]);
        let engine = engine(&backend);
        engine.register_playout_source(Some(Box::new(source)));
        engine.init().unwrap();
        engine.init_playout().unwrap();
        engine.start_playout().unwrap();

        backend.inject_playout_error(BackendError::device_lost("Mock Speakers", "gone"));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while engine.stats().health != DeviceHealth::Failed && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.stats().health, DeviceHealth::Failed);
        assert!(engine.playing());
        engine.stop_playout().unwrap();
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_restart_from_failure_callback() {
        let backend = MockBackend::new();
        let slot: Arc<Mutex<Option<std::sync::Weak<PlayoutEngine>>>> = Arc::default();
        let results = Arc::new(Mutex::new(Vec::new()));
        let (engine_slot, seen) = (Arc::clone(&slot), Arc::clone(&results));

        let callback = crate::event_callback(move |event| {
            if !matches!(event, EngineEvent::PlayoutDeviceFailed { .. }) {
                return;
            }
            let engine = engine_slot.lock().as_ref().and_then(std::sync::Weak::upgrade);
            if let Some(engine) = engine {
                let on_playout_thread = std::thread::current().name() == Some(THREAD_NAME);
                let restarted = engine.restart_playout().is_ok();
                seen.lock().push((on_playout_thread, restarted));
            }
        });
        let engine = Arc::new(PlayoutEngine::new(
            Arc::new(backend.clone()),
            EngineConfig::default(),
            Some(callback),
        ));
        *slot.lock() = Some(Arc::downgrade(&engine));

        let (mut producer, source) = playout_buffer(Duration::from_millis(500), 48000, 2);
        producer.push(&[1i16; 48000]);
        engine.register_playout_source(Some(Box::new(source)));
        engine.init().unwrap();
        engine.init_playout().unwrap();
        engine.start_playout().unwrap();
        assert!(wait_for(|| backend.playout_snapshot().playing));

        backend.inject_playout_error(BackendError::device_lost("Mock Speakers", "gone"));
        assert!(wait_for(|| !results.lock().is_empty()));
        assert_eq!(results.lock()[0], (true, true));

        let stats = engine.stats();
        assert_eq!(stats.health, DeviceHealth::Healthy);
        assert_eq!(stats.restarts, 1);
        assert_eq!(stats.device_failures, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(
            backend.playout_snapshot().opens,
            vec!["Mock Speakers", "Mock Speakers"]
        );
        assert!(wait_for(|| backend.playout_snapshot().playing));

        engine.stop_playout().unwrap();
        assert!(!engine.playing());
    }

    #[test]
    fn test_stop_from_failure_callback() {
        let backend = MockBackend::new();
        let slot: Arc<Mutex<Option<std::sync::Weak<PlayoutEngine>>>> = Arc::default();
        let engine_slot = Arc::clone(&slot);

        let callback = crate::event_callback(move |event| {
            if let EngineEvent::PlayoutDeviceFailed { .. } = event {
                let engine = engine_slot.lock().as_ref().and_then(std::sync::Weak::upgrade);
                if let Some(engine) = engine {
                    engine.stop_playout().unwrap();
                }
            }
        });
        let engine = Arc::new(PlayoutEngine::new(
            Arc::new(backend.clone()),
            EngineConfig::default(),
            Some(callback),
        ));
        *slot.lock() = Some(Arc::downgrade(&engine));

        let (mut producer, source) = playout_buffer(Duration::from_millis(500), 48000, 2);
        producer.push(&[1i16; 48000]);
        engine.register_playout_source(Some(Box::new(source)));
        engine.init().unwrap();
        engine.init_playout().unwrap();
        engine.start_playout().unwrap();
        assert!(wait_for(|| backend.playout_snapshot().playing));

        backend.inject_playout_error(BackendError::device_lost("Mock Speakers", "gone"));
        assert!(wait_for(|| !engine.playing()));
        assert!(!engine.playout_is_initialized());
        assert_eq!(backend.playout_snapshot().closes, 1);

        // The engine can be brought back up from the caller's thread.
        engine.init_playout().unwrap();
        engine.start_playout().unwrap();
        assert!(engine.playing());
        engine.stop_playout().unwrap();
    }

    #[test]
    fn test_terminate_requires_init_again() {
        let backend = MockBackend::new();
        let engine = started(&backend);
        engine.terminate().unwrap();
        assert!(!engine.initialized());
        assert!(matches!(
            engine.init_playout(),
            Err(EngineError::NotInitialized)
        ));
    }
}

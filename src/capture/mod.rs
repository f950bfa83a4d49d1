//! Capture engine: polled per-device recording with automatic restart.
//!
//! ```text
//! CaptureDevice ──poll 10ms──► CaptureEngine ──RawFrame──► AudioSource ──► sinks
//!                              (scratch buffer,
//!                               empty-cycle counter)
//! ```
//!
//! Engines do not own a thread. A [`CapturePoller`] calls
//! [`CaptureEngine::process_recorded_part`] on every registered engine once
//! per cycle.

mod poller;

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::ReentrantMutex;

pub use poller::CapturePoller;

use crate::backend::{AudioBackend, CaptureDevice, DeviceKind, StreamFormat};
use crate::device::DeviceEnumerator;
use crate::event::EventEmitter;
use crate::processing::AudioProcessor;
use crate::recovery::{DeviceHealth, RecoveryState};
use crate::{
    AudioOptions, AudioSource, BackendError, DeviceId, EngineConfig, EngineEvent, EventCallback,
    RawFrame,
};

/// Point-in-time statistics of a [`CaptureEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureStats {
    /// Device the engine records from.
    pub device: DeviceId,
    /// Health of the capture device.
    pub health: DeviceHealth,
    /// Recording has been requested and not stopped.
    pub recording: bool,
    /// Chunks forwarded to the audio source.
    pub chunks_delivered: u64,
    /// Consecutive cycles that started without a full chunk.
    pub empty_cycles: u32,
    /// Runs of the restart protocol.
    pub restarts: u64,
    /// Device errors observed since creation.
    pub device_failures: u64,
    /// Device errors since the last successful open.
    pub consecutive_failures: u32,
    /// Last device error, if any.
    pub last_error: Option<String>,
}

struct CaptureState {
    device_id: DeviceId,
    device: Option<Box<dyn CaptureDevice>>,
    recording: bool,
    recovery: RecoveryState,
    empty_cycles: u32,
    chunks_delivered: u64,
    scratch: Vec<u8>,
}

enum Poll {
    Idle,
    Chunk(Vec<u8>),
    Restart,
}

/// Records 10ms chunks from one input device into an [`AudioSource`].
///
/// The engine is polled, never pushed: each call to
/// [`process_recorded_part`](Self::process_recorded_part) moves at most one
/// chunk from the device to the source. Hardware failures never surface as
/// errors. They mark the engine failed, emit an [`EngineEvent`], and trigger
/// [`restart_recording`](Self::restart_recording).
///
/// State sits behind a reentrant lock, so sinks and level observers may call
/// back into the engine from the polling thread.
pub struct CaptureEngine {
    backend: Arc<dyn AudioBackend>,
    enumerator: DeviceEnumerator,
    source: Arc<AudioSource>,
    emitter: EventEmitter,
    format: StreamFormat,
    part: usize,
    restart_after: u32,
    epoch: Instant,
    state: ReentrantMutex<RefCell<CaptureState>>,
}

impl CaptureEngine {
    /// Creates a stopped engine for `device` and the source it feeds.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        device: DeviceId,
        config: &EngineConfig,
        options: AudioOptions,
        processor: Box<dyn AudioProcessor>,
        on_event: Option<EventCallback>,
    ) -> Self {
        let source = AudioSource::with_processor(options, processor, config.level_interval);
        Self {
            enumerator: DeviceEnumerator::new(Arc::clone(&backend)),
            backend,
            source: Arc::new(source),
            emitter: EventEmitter::new(on_event),
            format: StreamFormat {
                sample_rate: config.recording_sample_rate,
                channels: config.recording_channels.max(1),
            },
            part: config.recording_part(),
            restart_after: config.restart_after_empty_cycles.max(1),
            epoch: Instant::now(),
            state: ReentrantMutex::new(RefCell::new(CaptureState {
                device_id: device,
                device: None,
                recording: false,
                recovery: RecoveryState::default(),
                empty_cycles: 0,
                chunks_delivered: 0,
                scratch: vec![0; config.recording_buffer_bytes()],
            })),
        }
    }

    /// The source this engine feeds.
    pub fn source(&self) -> Arc<AudioSource> {
        Arc::clone(&self.source)
    }

    /// Device the engine records from.
    pub fn device_id(&self) -> DeviceId {
        self.state.lock().borrow().device_id.clone()
    }

    /// Returns `true` between `start_capture` and `stop_capture`.
    pub fn recording(&self) -> bool {
        self.state.lock().borrow().recording
    }

    /// Opens the device if needed and starts capturing. Idempotent.
    ///
    /// A device that cannot be opened or started leaves the engine failed;
    /// polling then reports no data.
    pub fn start_capture(&self) {
        let guard = self.state.lock();
        let event = {
            let mut state = guard.borrow_mut();
            if state.recording {
                return;
            }
            state.recording = true;
            // A fresh start retries a device that failed before.
            state.recovery.recover();
            self.open_and_start(&mut state)
        };
        drop(guard);
        if let Some(event) = event {
            self.emitter.emit(event);
        }
    }

    /// Stops capturing and closes the device. Idempotent.
    pub fn stop_capture(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if !state.recording {
            return;
        }
        state.recording = false;
        state.empty_cycles = 0;
        if let Some(mut device) = state.device.take() {
            device.stop();
            tracing::info!(device = %state.device_id, "Capture stopped");
        }
    }

    /// Moves one chunk from the device to the source.
    ///
    /// Returns `true` if a chunk was delivered; the poller calls again until
    /// this returns `false`. Only the first call of a cycle
    /// (`first_in_cycle`) counts towards the silence restart.
    pub fn process_recorded_part(&self, first_in_cycle: bool) -> bool {
        let guard = self.state.lock();
        let mut events = Vec::new();
        let poll = {
            let mut state = guard.borrow_mut();
            if !state.recording {
                return false;
            }
            self.poll(&mut state, first_in_cycle, &mut events)
        };

        let delivered = match poll {
            Poll::Idle => false,
            Poll::Chunk(scratch) => {
                let raw = RawFrame {
                    data: &scratch,
                    bits_per_sample: 16,
                    sample_rate: self.format.sample_rate,
                    channels: self.format.channels,
                    frames: self.part,
                    timestamp: self.epoch.elapsed(),
                };
                self.source.on_data(&raw);
                let mut state = guard.borrow_mut();
                state.scratch = scratch;
                state.chunks_delivered += 1;
                true
            }
            Poll::Restart => {
                let mut state = guard.borrow_mut();
                events.extend(self.restart_locked(&mut state));
                false
            }
        };
        drop(guard);

        for event in events {
            self.emitter.emit(event);
        }
        delivered
    }

    /// Runs the restart protocol: close, revalidate, reopen, start.
    ///
    /// No-op unless recording. An unknown device falls back to the system
    /// default. If nothing validates, the engine stays recording in the
    /// failed state and polling is a no-op until the next restart.
    pub fn restart_recording(&self) {
        let guard = self.state.lock();
        let events = {
            let mut state = guard.borrow_mut();
            self.restart_locked(&mut state)
        };
        drop(guard);
        for event in events {
            self.emitter.emit(event);
        }
    }

    /// Returns current capture statistics.
    pub fn stats(&self) -> CaptureStats {
        let guard = self.state.lock();
        let state = guard.borrow();
        CaptureStats {
            device: state.device_id.clone(),
            health: state.recovery.health(),
            recording: state.recording,
            chunks_delivered: state.chunks_delivered,
            empty_cycles: state.empty_cycles,
            restarts: state.recovery.restarts(),
            device_failures: state.recovery.total_failures(),
            consecutive_failures: state.recovery.consecutive_failures(),
            last_error: state.recovery.last_error().map(ToString::to_string),
        }
    }

    fn poll(
        &self,
        state: &mut CaptureState,
        first_in_cycle: bool,
        events: &mut Vec<EngineEvent>,
    ) -> Poll {
        let Some(device) = state.device.as_mut() else {
            return Poll::Idle;
        };

        if let Some(error) = device.take_error() {
            events.push(Self::failed(state, &error));
            return Poll::Restart;
        }

        if device.available_samples() < self.part {
            if !first_in_cycle {
                return Poll::Idle;
            }
            state.empty_cycles += 1;
            if state.empty_cycles < self.restart_after {
                return Poll::Idle;
            }
            tracing::warn!(
                device = %state.device_id,
                empty_cycles = state.empty_cycles,
                "Capture device silent, restarting"
            );
            events.push(EngineEvent::CaptureSilence {
                device: state.device_id.clone(),
                empty_cycles: state.empty_cycles,
            });
            state.empty_cycles = 0;
            return Poll::Restart;
        }

        state.empty_cycles = 0;
        let mut scratch = std::mem::take(&mut state.scratch);
        let captured = device
            .capture(&mut scratch, self.part)
            .and_then(|()| device.take_error().map_or(Ok(()), Err));
        match captured {
            Ok(()) => Poll::Chunk(scratch),
            Err(error) => {
                state.scratch = scratch;
                events.push(Self::failed(state, &error));
                Poll::Restart
            }
        }
    }

    fn failed(state: &mut CaptureState, error: &BackendError) -> EngineEvent {
        tracing::error!(device = %state.device_id, error = %error, "Capture device error");
        state.recovery.fail(error.to_string());
        EngineEvent::CaptureDeviceFailed {
            device: state.device_id.clone(),
            error: error.to_string(),
        }
    }

    fn restart_locked(&self, state: &mut CaptureState) -> Vec<EngineEvent> {
        if !state.recording {
            return Vec::new();
        }
        if let Some(mut device) = state.device.take() {
            device.stop();
        }
        state.empty_cycles = 0;
        state.recovery.record_restart();

        let Some(validated) = self.enumerator.validate(DeviceKind::Capture, &state.device_id)
        else {
            state.recovery.no_device();
            tracing::warn!(device = %state.device_id, "Capture restart found no device");
            return vec![EngineEvent::CaptureRestarted {
                device: state.device_id.clone(),
                recovered: false,
            }];
        };

        state.device_id = validated;
        state.recovery.recover();
        let mut events = Vec::new();
        events.extend(self.open_and_start(state));
        let recovered = state.device.is_some();
        tracing::info!(device = %state.device_id, recovered, "Capture restarted");
        events.push(EngineEvent::CaptureRestarted {
            device: state.device_id.clone(),
            recovered,
        });
        events
    }

    fn open_and_start(&self, state: &mut CaptureState) -> Option<EngineEvent> {
        let opened = self
            .backend
            .open_capture(&state.device_id, self.format)
            .and_then(|mut device| device.start().map(|()| device));
        match opened {
            Ok(device) => {
                tracing::info!(
                    device = %state.device_id,
                    sample_rate = self.format.sample_rate,
                    channels = self.format.channels,
                    "Capture started"
                );
                state.device = Some(device);
                None
            }
            Err(error) => Some(Self::failed(state, &error)),
        }
    }
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.state.lock();
        let state = guard.borrow();
        f.debug_struct("CaptureEngine")
            .field("backend", &self.backend.name())
            .field("device", &state.device_id)
            .field("recording", &state.recording)
            .field("failed", &state.recovery.is_failed())
            .finish_non_exhaustive()
    }
}

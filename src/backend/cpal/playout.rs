//! Streaming playout source on a CPAL output stream.
//!
//! Queued buffers are pushed into a lock-free ring consumed by the output
//! callback. The callback tracks how many samples it has consumed, which lets
//! the owning thread find buffers that have been fully played.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, OutputCallbackInfo, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{select_config, stream_error};
use crate::backend::{DeviceKind, PlayoutDevice, StreamFormat};
use crate::format::i16_to_f32;
use crate::{BackendError, DeviceId};

/// Ring headroom per buffer slot.
const SLOT_HEADROOM: Duration = Duration::from_millis(20);

/// State shared between the owning thread and the output callback.
#[derive(Default)]
struct CallbackState {
    /// Samples consumed from the ring, including flushed ones.
    consumed: AtomicU64,
    /// Samples before this position are discarded without being played.
    flush_until: AtomicU64,
    /// Whether the callback plays ring contents or outputs silence.
    playing: AtomicBool,
    /// Last measured callback-to-playback delay in microseconds.
    latency_us: AtomicU64,
    error: Mutex<Option<BackendError>>,
}

impl CallbackState {
    fn flush(&self, consumer: &mut HeapCons<i16>) {
        let consumed = self.consumed.load(Ordering::Acquire);
        let target = self.flush_until.load(Ordering::Acquire);
        if target > consumed {
            let pending = (target - consumed) as usize;
            let skipped = consumer.skip(pending.min(consumer.occupied_len()));
            self.consumed.fetch_add(skipped as u64, Ordering::AcqRel);
        }
    }

    fn record_latency(&self, info: &OutputCallbackInfo) {
        let timestamp = info.timestamp();
        if let Some(delay) = timestamp.playback.duration_since(&timestamp.callback) {
            self.latency_us
                .store(delay.as_micros() as u64, Ordering::Relaxed);
        }
    }

    /// Fills `out` from the ring and returns the samples written.
    ///
    /// A short read means the queue ran dry, which stops playback.
    fn fill(&self, consumer: &mut HeapCons<i16>, out: &mut [i16]) -> usize {
        if !self.playing.load(Ordering::Acquire) {
            return 0;
        }
        let read = consumer.pop_slice(out);
        self.consumed.fetch_add(read as u64, Ordering::AcqRel);
        if read < out.len() {
            self.playing.store(false, Ordering::Release);
        }
        read
    }
}

pub(super) struct CpalPlayout {
    stream: Stream,
    producer: HeapProd<i16>,
    state: Arc<CallbackState>,
    staged: Vec<Vec<i16>>,
    /// Slot and end position of each queued buffer, in play order.
    in_flight: VecDeque<(usize, u64)>,
    pushed: u64,
    device: DeviceId,
}

impl CpalPlayout {
    pub(super) fn open(
        device: &Device,
        id: &DeviceId,
        format: StreamFormat,
        buffers: usize,
    ) -> Result<Self, BackendError> {
        let supported = select_config(device, DeviceKind::Playout, format, false)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let slot_samples = (format.sample_rate as f64 * SLOT_HEADROOM.as_secs_f64()) as usize
            * format.channels as usize;
        let ring = HeapRb::<i16>::new((slot_samples * buffers).max(1));
        let (producer, consumer) = ring.split();
        let state = Arc::new(CallbackState::default());

        let stream = match sample_format {
            SampleFormat::I16 => build_i16_stream(device, &config, id, consumer, &state)?,
            SampleFormat::F32 => build_f32_stream(device, &config, id, consumer, &state)?,
            other => {
                return Err(BackendError::open_failed(
                    id.as_str(),
                    format!("unsupported sample format {other:?}"),
                ))
            }
        };
        stream
            .play()
            .map_err(|e| BackendError::open_failed(id.as_str(), e.to_string()))?;

        tracing::info!(
            device = %id,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?sample_format,
            "Opened CPAL playout stream"
        );

        Ok(Self {
            stream,
            producer,
            state,
            staged: vec![Vec::new(); buffers],
            in_flight: VecDeque::with_capacity(buffers),
            pushed: 0,
            device: id.clone(),
        })
    }
}

fn build_i16_stream(
    device: &Device,
    config: &StreamConfig,
    id: &DeviceId,
    mut consumer: HeapCons<i16>,
    state: &Arc<CallbackState>,
) -> Result<Stream, BackendError> {
    let state = Arc::clone(state);
    let error_state = Arc::clone(&state);
    let error_id = id.clone();
    device
        .build_output_stream(
            config,
            move |data: &mut [i16], info: &OutputCallbackInfo| {
                state.record_latency(info);
                state.flush(&mut consumer);
                let read = state.fill(&mut consumer, data);
                data[read..].fill(0);
            },
            move |err| {
                tracing::error!(device = %error_id, error = %err, "Playout stream error");
                *error_state.error.lock() = Some(stream_error(&error_id, err));
            },
            None,
        )
        .map_err(|e| BackendError::open_failed(id.as_str(), e.to_string()))
}

fn build_f32_stream(
    device: &Device,
    config: &StreamConfig,
    id: &DeviceId,
    mut consumer: HeapCons<i16>,
    state: &Arc<CallbackState>,
) -> Result<Stream, BackendError> {
    let state = Arc::clone(state);
    let error_state = Arc::clone(&state);
    let error_id = id.clone();
    let mut scratch: Vec<i16> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], info: &OutputCallbackInfo| {
                state.record_latency(info);
                state.flush(&mut consumer);
                // Grows only on the first callbacks.
                scratch.resize(data.len(), 0);
                let read = state.fill(&mut consumer, &mut scratch);
                for (out, &sample) in data.iter_mut().zip(&scratch[..read]) {
                    *out = i16_to_f32(sample);
                }
                data[read..].fill(0.0);
            },
            move |err| {
                tracing::error!(device = %error_id, error = %err, "Playout stream error");
                *error_state.error.lock() = Some(stream_error(&error_id, err));
            },
            None,
        )
        .map_err(|e| BackendError::open_failed(id.as_str(), e.to_string()))
}

impl PlayoutDevice for CpalPlayout {
    fn buffer_data(&mut self, slot: usize, samples: &[i16]) {
        if self.staged.len() <= slot {
            self.staged.resize(slot + 1, Vec::new());
        }
        let staged = &mut self.staged[slot];
        staged.clear();
        staged.extend_from_slice(samples);
    }

    fn queue(&mut self, slots: &[usize]) {
        for &slot in slots {
            let Some(samples) = self.staged.get(slot) else {
                continue;
            };
            let written = self.producer.push_slice(samples);
            if written < samples.len() {
                tracing::warn!(
                    device = %self.device,
                    dropped = samples.len() - written,
                    "Playout ring full, truncating buffer"
                );
            }
            self.pushed += written as u64;
            self.in_flight.push_back((slot, self.pushed));
        }
    }

    fn unqueue_processed(&mut self) -> Option<usize> {
        let consumed = self.state.consumed.load(Ordering::Acquire);
        match self.in_flight.front() {
            Some(&(slot, end)) if end <= consumed => {
                self.in_flight.pop_front();
                Some(slot)
            }
            _ => None,
        }
    }

    fn unqueue_all(&mut self) {
        self.state.flush_until.store(self.pushed, Ordering::Release);
        self.in_flight.clear();
    }

    fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Acquire)
    }

    fn play(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        self.state.playing.store(true, Ordering::Release);
        if let Err(e) = self.stream.play() {
            *self.state.error.lock() = Some(BackendError::Backend(e.to_string()));
        }
    }

    fn stop(&mut self) {
        self.state.playing.store(false, Ordering::Release);
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.state.error.lock().take()
    }

    fn device_latency(&self) -> Option<Duration> {
        match self.state.latency_us.load(Ordering::Relaxed) {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }
}

impl Drop for CpalPlayout {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!(device = %self.device, error = %e, "Failed to pause playout stream");
        }
    }
}

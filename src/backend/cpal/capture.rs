//! Polled capture device on a CPAL input stream.
//!
//! CPAL streams are not `Send` on every host, so each stream lives on a small
//! keeper thread that builds it, starts and pauses it on request, and drops it
//! when the device handle is dropped. Samples reach the poller through a
//! lock-free ring.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{InputCallbackInfo, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{select_config, stream_error, CpalBackend};
use crate::backend::{CaptureDevice, DeviceKind, StreamFormat};
use crate::format::{f32_to_i16, i16_to_bytes};
use crate::{BackendError, DeviceId};

/// Seconds of audio the capture ring can hold between polls.
const RING_SECONDS: usize = 1;

type SharedError = Arc<Mutex<Option<BackendError>>>;

enum KeeperCommand {
    Play(SyncSender<Result<(), BackendError>>),
    Pause,
}

pub(super) struct CpalCapture {
    consumer: HeapCons<i16>,
    commands: Option<Sender<KeeperCommand>>,
    keeper: Option<JoinHandle<()>>,
    error: SharedError,
    channels: u16,
    scratch: Vec<i16>,
    device: DeviceId,
}

impl CpalCapture {
    pub(super) fn open(device: DeviceId, format: StreamFormat) -> Result<Self, BackendError> {
        let capacity = format.sample_rate as usize * format.channels as usize * RING_SECONDS;
        let (producer, consumer) = HeapRb::<i16>::new(capacity.max(1)).split();
        let error: SharedError = Arc::new(Mutex::new(None));

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (command_tx, command_rx) = mpsc::channel();

        let keeper_device = device.clone();
        let keeper_error = Arc::clone(&error);
        let keeper = std::thread::Builder::new()
            .name("capture-stream".to_string())
            .spawn(move || {
                run_keeper(
                    &keeper_device,
                    format,
                    producer,
                    keeper_error,
                    &ready_tx,
                    &command_rx,
                );
            })
            .map_err(|e| BackendError::open_failed(device.as_str(), e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = keeper.join();
                return Err(e);
            }
            Err(_) => {
                let _ = keeper.join();
                return Err(BackendError::open_failed(
                    device.as_str(),
                    "capture stream thread exited",
                ));
            }
        }

        Ok(Self {
            consumer,
            commands: Some(command_tx),
            keeper: Some(keeper),
            error,
            channels: format.channels.max(1),
            scratch: Vec::new(),
            device,
        })
    }

    fn send(&self, command: KeeperCommand) -> Result<(), BackendError> {
        self.commands
            .as_ref()
            .and_then(|tx| tx.send(command).ok())
            .ok_or_else(|| BackendError::device_lost(self.device.as_str(), "stream thread gone"))
    }
}

fn run_keeper(
    device: &DeviceId,
    format: StreamFormat,
    producer: HeapProd<i16>,
    error: SharedError,
    ready: &SyncSender<Result<(), BackendError>>,
    commands: &Receiver<KeeperCommand>,
) {
    let stream = match build_stream(device, format, producer, error) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            KeeperCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| BackendError::Backend(e.to_string()));
                let _ = reply.send(result);
            }
            KeeperCommand::Pause => {
                if let Err(e) = stream.pause() {
                    tracing::debug!(device = %device, error = %e, "Failed to pause capture stream");
                }
            }
        }
    }
    tracing::debug!(device = %device, "Capture stream closed");
}

fn build_stream(
    id: &DeviceId,
    format: StreamFormat,
    mut producer: HeapProd<i16>,
    error: SharedError,
) -> Result<Stream, BackendError> {
    let device = CpalBackend::find_device(DeviceKind::Capture, id)?;
    let supported = select_config(&device, DeviceKind::Capture, format, true)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let device_channels = config.channels as usize;
    let wanted_channels = format.channels as usize;

    tracing::info!(
        device = %id,
        sample_rate = config.sample_rate.0,
        device_channels,
        wanted_channels,
        ?sample_format,
        "Opening CPAL capture stream"
    );

    let error_id = id.clone();
    let on_error = move |err| {
        tracing::error!(device = %error_id, error = %err, "Capture stream error");
        *error.lock() = Some(stream_error(&error_id, err));
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &InputCallbackInfo| {
                if device_channels == wanted_channels {
                    // Non-blocking push, drops samples if the poller falls behind
                    let _ = producer.push_slice(data);
                } else {
                    push_frames(&mut producer, data, device_channels, wanted_channels, |s| s);
                }
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &InputCallbackInfo| {
                push_frames(
                    &mut producer,
                    data,
                    device_channels,
                    wanted_channels,
                    f32_to_i16,
                );
            },
            on_error,
            None,
        ),
        other => {
            return Err(BackendError::open_failed(
                id.as_str(),
                format!("unsupported sample format {other:?}"),
            ))
        }
    }
    .map_err(|e| BackendError::open_failed(id.as_str(), e.to_string()))?;

    Ok(stream)
}

/// Pushes interleaved frames, reducing `device_channels` to `wanted` channels.
///
/// Mono output averages all device channels. Other layouts keep the leading
/// channels.
fn push_frames<T: Copy>(
    producer: &mut HeapProd<i16>,
    data: &[T],
    device_channels: usize,
    wanted: usize,
    convert: impl Fn(T) -> i16,
) {
    for frame in data.chunks_exact(device_channels.max(1)) {
        if wanted == 1 {
            let sum: i32 = frame.iter().map(|&s| i32::from(convert(s))).sum();
            let _ = producer.try_push((sum / frame.len() as i32) as i16);
        } else {
            for &sample in frame.iter().take(wanted) {
                let _ = producer.try_push(convert(sample));
            }
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn start(&mut self) -> Result<(), BackendError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.send(KeeperCommand::Play(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| BackendError::device_lost(self.device.as_str(), "stream thread gone"))?
    }

    fn stop(&mut self) {
        if let Err(e) = self.send(KeeperCommand::Pause) {
            tracing::debug!(device = %self.device, error = %e, "Capture stop ignored");
        }
    }

    fn available_samples(&mut self) -> usize {
        self.consumer.occupied_len() / self.channels as usize
    }

    fn capture(&mut self, out: &mut [u8], frames: usize) -> Result<(), BackendError> {
        let wanted = frames * self.channels as usize;
        if self.consumer.occupied_len() < wanted {
            return Err(BackendError::Backend(format!(
                "requested {wanted} samples, {} available",
                self.consumer.occupied_len()
            )));
        }
        self.scratch.resize(wanted, 0);
        let read = self.consumer.pop_slice(&mut self.scratch);
        i16_to_bytes(&self.scratch[..read], out);
        Ok(())
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.error.lock().take()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        // Closing the command channel ends the keeper loop and drops the stream.
        self.commands.take();
        if let Some(keeper) = self.keeper.take() {
            if keeper.join().is_err() {
                tracing::warn!(device = %self.device, "Capture stream thread panicked");
            }
        }
    }
}

//! Mock audio backend for testing without hardware.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    AudioBackend, BackendExtensions, CaptureDevice, DeviceKind, PlayoutDevice, StreamFormat,
};
use crate::format::i16_to_bytes;
use crate::{BackendError, DeviceId};

/// A scriptable backend that simulates devices in memory.
///
/// This allows exercising the playout and capture engines, including device
/// loss and recovery, without audio hardware. All clones share the same
/// simulated state, so a test keeps one clone to drive the simulation while
/// the engine owns another.
///
/// Playout follows the streaming-source model: queued buffers are only
/// consumed when the test calls [`consume_playout`](Self::consume_playout),
/// and the source stops by itself when its queue runs dry.
///
/// # Example
///
/// ```
/// use audio_device_engine::{DeviceKind, MockBackend};
///
/// let backend = MockBackend::new();
/// backend.set_devices(DeviceKind::Capture, &["USB Mic"]);
/// backend.set_default(DeviceKind::Capture, Some("USB Mic"));
///
/// // Samples become available once a capture device is opened and started.
/// backend.push_capture_samples("USB Mic", &[0i16; 480]);
/// ```
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    name_prefix: Option<Arc<str>>,
}

struct MockState {
    extensions: BackendExtensions,
    extension_resolutions: usize,
    playout_devices: Vec<String>,
    capture_devices: Vec<String>,
    default_playout: Option<String>,
    default_capture: Option<String>,
    failing_opens: Vec<String>,
    playout: MockPlayoutState,
    captures: Vec<MockCaptureState>,
    capture_opens: Vec<String>,
    next_capture_handle: usize,
}

#[derive(Default)]
struct MockPlayoutState {
    open_device: Option<String>,
    opens: Vec<String>,
    closes: usize,
    attached: VecDeque<usize>,
    processed: VecDeque<usize>,
    buffers: Vec<Vec<i16>>,
    played: Vec<Vec<i16>>,
    playing: bool,
    play_calls: usize,
    pending_error: Option<BackendError>,
    latency: Option<Duration>,
}

struct MockCaptureState {
    handle: usize,
    device: String,
    channels: u16,
    started: bool,
    samples: VecDeque<i16>,
    pending_error: Option<BackendError>,
}

/// Point-in-time view of the simulated playout device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPlayoutSnapshot {
    /// Specifier of the currently open device.
    pub open_device: Option<String>,
    /// Every device opened so far, in order.
    pub opens: Vec<String>,
    /// Number of device closes.
    pub closes: usize,
    /// Buffers attached to the source, played or not.
    pub attached: usize,
    /// Whether the source is consuming buffers.
    pub playing: bool,
    /// Number of `play()` calls.
    pub play_calls: usize,
    /// Number of buffers consumed so far.
    pub played_buffers: usize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a backend with two playout and two capture devices.
    ///
    /// The first device of each kind is the default.
    pub fn new() -> Self {
        let backend = Self::empty();
        backend.set_devices(DeviceKind::Playout, &["Mock Speakers", "Mock Headphones"]);
        backend.set_devices(DeviceKind::Capture, &["Mock Microphone", "Mock Headset Mic"]);
        backend.set_default(DeviceKind::Playout, Some("Mock Speakers"));
        backend.set_default(DeviceKind::Capture, Some("Mock Microphone"));
        backend
    }

    /// Creates a backend without any devices.
    pub fn empty() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                extensions: BackendExtensions {
                    thread_context: true,
                    exact_latency: false,
                    disconnect_events: false,
                },
                extension_resolutions: 0,
                playout_devices: Vec::new(),
                capture_devices: Vec::new(),
                default_playout: None,
                default_capture: None,
                failing_opens: Vec::new(),
                playout: MockPlayoutState::default(),
                captures: Vec::new(),
                capture_opens: Vec::new(),
                next_capture_handle: 0,
            })),
            name_prefix: None,
        }
    }

    /// Sets the prefix reported by [`AudioBackend::name_prefix`].
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: &str) -> Self {
        self.name_prefix = Some(Arc::from(prefix));
        self
    }

    /// Replaces the extension table returned on resolution.
    pub fn set_extensions(&self, extensions: BackendExtensions) {
        self.state.lock().extensions = extensions;
    }

    /// Number of times the extension table was resolved.
    pub fn extension_resolutions(&self) -> usize {
        self.state.lock().extension_resolutions
    }

    /// Replaces the device list of the given kind.
    pub fn set_devices(&self, kind: DeviceKind, devices: &[&str]) {
        let list: Vec<String> = devices.iter().map(ToString::to_string).collect();
        let mut state = self.state.lock();
        match kind {
            DeviceKind::Playout => state.playout_devices = list,
            DeviceKind::Capture => state.capture_devices = list,
        }
    }

    /// Sets the default device of the given kind.
    pub fn set_default(&self, kind: DeviceKind, device: Option<&str>) {
        let device = device.map(ToString::to_string);
        let mut state = self.state.lock();
        match kind {
            DeviceKind::Playout => state.default_playout = device,
            DeviceKind::Capture => state.default_capture = device,
        }
    }

    /// Simulates a device disconnect.
    ///
    /// The device disappears from enumeration, the default moves to the first
    /// remaining device, and open handles on it report a device loss.
    pub fn unplug(&self, kind: DeviceKind, device: &str) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let (list, default) = match kind {
            DeviceKind::Playout => (&mut state.playout_devices, &mut state.default_playout),
            DeviceKind::Capture => (&mut state.capture_devices, &mut state.default_capture),
        };
        list.retain(|d| d != device);
        if default.as_deref() == Some(device) {
            *default = list.first().cloned();
        }

        let lost = BackendError::device_lost(device, "unplugged");
        match kind {
            DeviceKind::Playout => {
                if state.playout.open_device.as_deref() == Some(device) {
                    state.playout.pending_error = Some(lost);
                    state.playout.playing = false;
                }
            }
            DeviceKind::Capture => {
                for capture in state.captures.iter_mut().filter(|c| c.device == device) {
                    capture.pending_error = Some(lost.clone());
                    capture.started = false;
                }
            }
        }
    }

    /// Makes opening the given device fail until [`allow_open`](Self::allow_open).
    pub fn fail_open(&self, device: &str) {
        self.state.lock().failing_opens.push(device.to_string());
    }

    /// Lets the given device open again.
    pub fn allow_open(&self, device: &str) {
        self.state.lock().failing_opens.retain(|d| d != device);
    }

    // Playout simulation

    /// Consumes up to `count` queued buffers, as the hardware would.
    ///
    /// Returns the number consumed. Does nothing while the source is stopped.
    /// The source stops when the queue runs dry.
    pub fn consume_playout(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        let playout = &mut state.playout;
        if !playout.playing {
            return 0;
        }
        let mut consumed = 0;
        while consumed < count {
            let Some(slot) = playout.attached.pop_front() else {
                break;
            };
            let samples = playout.buffers.get(slot).cloned().unwrap_or_default();
            playout.played.push(samples);
            playout.processed.push_back(slot);
            consumed += 1;
        }
        if playout.attached.is_empty() {
            playout.playing = false;
        }
        consumed
    }

    /// Makes the open playout device report an error on its next poll.
    pub fn inject_playout_error(&self, error: BackendError) {
        self.state.lock().playout.pending_error = Some(error);
    }

    /// Sets the latency the playout device reports.
    pub fn set_playout_latency(&self, latency: Option<Duration>) {
        self.state.lock().playout.latency = latency;
    }

    /// Returns a snapshot of the simulated playout device.
    pub fn playout_snapshot(&self) -> MockPlayoutSnapshot {
        let state = self.state.lock();
        let playout = &state.playout;
        MockPlayoutSnapshot {
            open_device: playout.open_device.clone(),
            opens: playout.opens.clone(),
            closes: playout.closes,
            attached: playout.attached.len() + playout.processed.len(),
            playing: playout.playing,
            play_calls: playout.play_calls,
            played_buffers: playout.played.len(),
        }
    }

    /// Returns every buffer consumed so far, in play order.
    pub fn played_buffers(&self) -> Vec<Vec<i16>> {
        self.state.lock().playout.played.clone()
    }

    // Capture simulation

    /// Appends samples to the open capture handle(s) of the given device.
    pub fn push_capture_samples(&self, device: &str, samples: &[i16]) {
        let mut state = self.state.lock();
        for capture in state.captures.iter_mut().filter(|c| c.device == device) {
            capture.samples.extend(samples.iter().copied());
        }
    }

    /// Makes the open capture handle(s) of the given device report an error.
    pub fn inject_capture_error(&self, device: &str, error: BackendError) {
        let mut state = self.state.lock();
        for capture in state.captures.iter_mut().filter(|c| c.device == device) {
            capture.pending_error = Some(error.clone());
        }
    }

    /// Every capture device opened so far, in order.
    pub fn capture_opens(&self) -> Vec<String> {
        self.state.lock().capture_opens.clone()
    }

    /// Number of currently open capture handles.
    pub fn open_captures(&self) -> usize {
        self.state.lock().captures.len()
    }

    /// Returns `true` if an open handle of the given device is started.
    pub fn capture_started(&self, device: &str) -> bool {
        self.state
            .lock()
            .captures
            .iter()
            .any(|c| c.device == device && c.started)
    }

    fn resolve(
        state: &MockState,
        kind: DeviceKind,
        device: &DeviceId,
    ) -> Result<String, BackendError> {
        let (list, default) = match kind {
            DeviceKind::Playout => (&state.playout_devices, &state.default_playout),
            DeviceKind::Capture => (&state.capture_devices, &state.default_capture),
        };
        let name = if device.is_default() {
            default
                .clone()
                .ok_or_else(|| BackendError::open_failed("", "no default device"))?
        } else {
            device.as_str().to_string()
        };
        if !list.contains(&name) {
            return Err(BackendError::open_failed(name, "no such device"));
        }
        if state.failing_opens.contains(&name) {
            return Err(BackendError::open_failed(name, "device busy"));
        }
        Ok(name)
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn resolve_extensions(&self) -> BackendExtensions {
        let mut state = self.state.lock();
        state.extension_resolutions += 1;
        state.extensions
    }

    fn devices(&self, kind: DeviceKind) -> Vec<String> {
        let state = self.state.lock();
        match kind {
            DeviceKind::Playout => state.playout_devices.clone(),
            DeviceKind::Capture => state.capture_devices.clone(),
        }
    }

    fn default_device(&self, kind: DeviceKind) -> Option<String> {
        let state = self.state.lock();
        match kind {
            DeviceKind::Playout => state.default_playout.clone(),
            DeviceKind::Capture => state.default_capture.clone(),
        }
    }

    fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    fn open_playout(
        &self,
        device: &DeviceId,
        _format: StreamFormat,
        buffers: usize,
    ) -> Result<Box<dyn PlayoutDevice>, BackendError> {
        let mut state = self.state.lock();
        let name = Self::resolve(&state, DeviceKind::Playout, device)?;

        let playout = &mut state.playout;
        playout.open_device = Some(name.clone());
        playout.opens.push(name);
        playout.attached.clear();
        playout.processed.clear();
        playout.buffers = vec![Vec::new(); buffers];
        playout.playing = false;
        playout.pending_error = None;

        Ok(Box::new(MockPlayoutDevice {
            state: Arc::clone(&self.state),
        }))
    }

    fn open_capture(
        &self,
        device: &DeviceId,
        format: StreamFormat,
    ) -> Result<Box<dyn CaptureDevice>, BackendError> {
        let mut state = self.state.lock();
        let name = Self::resolve(&state, DeviceKind::Capture, device)?;

        let handle = state.next_capture_handle;
        state.next_capture_handle += 1;
        state.capture_opens.push(name.clone());
        state.captures.push(MockCaptureState {
            handle,
            device: name,
            channels: format.channels.max(1),
            started: false,
            samples: VecDeque::new(),
            pending_error: None,
        });

        Ok(Box::new(MockCaptureDevice {
            state: Arc::clone(&self.state),
            handle,
        }))
    }
}

struct MockPlayoutDevice {
    state: Arc<Mutex<MockState>>,
}

impl PlayoutDevice for MockPlayoutDevice {
    fn buffer_data(&mut self, slot: usize, samples: &[i16]) {
        let mut state = self.state.lock();
        let buffers = &mut state.playout.buffers;
        if buffers.len() <= slot {
            buffers.resize(slot + 1, Vec::new());
        }
        buffers[slot].clear();
        buffers[slot].extend_from_slice(samples);
    }

    fn queue(&mut self, slots: &[usize]) {
        self.state.lock().playout.attached.extend(slots.iter().copied());
    }

    fn unqueue_processed(&mut self) -> Option<usize> {
        self.state.lock().playout.processed.pop_front()
    }

    fn unqueue_all(&mut self) {
        let mut state = self.state.lock();
        state.playout.attached.clear();
        state.playout.processed.clear();
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playout.playing
    }

    fn play(&mut self) {
        let mut state = self.state.lock();
        state.playout.play_calls += 1;
        state.playout.playing = !state.playout.attached.is_empty();
    }

    fn stop(&mut self) {
        self.state.lock().playout.playing = false;
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.state.lock().playout.pending_error.take()
    }

    fn device_latency(&self) -> Option<Duration> {
        self.state.lock().playout.latency
    }
}

impl Drop for MockPlayoutDevice {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let playout = &mut state.playout;
        playout.open_device = None;
        playout.closes += 1;
        playout.attached.clear();
        playout.processed.clear();
        playout.playing = false;
    }
}

struct MockCaptureDevice {
    state: Arc<Mutex<MockState>>,
    handle: usize,
}

impl MockCaptureDevice {
    fn with_capture<R>(&self, f: impl FnOnce(&mut MockCaptureState) -> R) -> Option<R> {
        let mut state = self.state.lock();
        state
            .captures
            .iter_mut()
            .find(|c| c.handle == self.handle)
            .map(f)
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn start(&mut self) -> Result<(), BackendError> {
        self.with_capture(|c| c.started = true)
            .ok_or_else(|| BackendError::Backend("capture handle closed".to_string()))
    }

    fn stop(&mut self) {
        self.with_capture(|c| c.started = false);
    }

    fn available_samples(&mut self) -> usize {
        self.with_capture(|c| {
            if c.started {
                c.samples.len() / c.channels as usize
            } else {
                0
            }
        })
        .unwrap_or(0)
    }

    fn capture(&mut self, out: &mut [u8], frames: usize) -> Result<(), BackendError> {
        self.with_capture(|c| {
            let wanted = frames * c.channels as usize;
            if c.samples.len() < wanted {
                return Err(BackendError::Backend(format!(
                    "requested {wanted} samples, {} available",
                    c.samples.len()
                )));
            }
            let samples: Vec<i16> = c.samples.drain(..wanted).collect();
            i16_to_bytes(&samples, out);
            Ok(())
        })
        .unwrap_or_else(|| Err(BackendError::Backend("capture handle closed".to_string())))
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.with_capture(|c| c.pending_error.take()).flatten()
    }
}

impl Drop for MockCaptureDevice {
    fn drop(&mut self) {
        let handle = self.handle;
        self.state.lock().captures.retain(|c| c.handle != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> StreamFormat {
        StreamFormat {
            sample_rate: 48000,
            channels: 2,
        }
    }

    fn mono() -> StreamFormat {
        StreamFormat {
            sample_rate: 48000,
            channels: 1,
        }
    }

    #[test]
    fn test_mock_enumerates_defaults() {
        let backend = MockBackend::new();
        assert_eq!(backend.devices(DeviceKind::Playout).len(), 2);
        assert_eq!(
            backend.default_device(DeviceKind::Capture).as_deref(),
            Some("Mock Microphone")
        );
    }

    #[test]
    fn test_open_default_playout_resolves_name() {
        let backend = MockBackend::new();
        let _device = backend
            .open_playout(&DeviceId::default_device(), stereo(), 7)
            .unwrap();
        assert_eq!(
            backend.playout_snapshot().open_device.as_deref(),
            Some("Mock Speakers")
        );
    }

    #[test]
    fn test_open_unknown_device_fails() {
        let backend = MockBackend::new();
        let result = backend.open_playout(&DeviceId::new("Nope"), stereo(), 7);
        assert!(matches!(result, Err(BackendError::OpenFailed { .. })));
    }

    #[test]
    fn test_playout_consumes_in_order_and_starves() {
        let backend = MockBackend::new();
        let mut device = backend
            .open_playout(&DeviceId::default_device(), stereo(), 7)
            .unwrap();

        device.buffer_data(0, &[1, 1]);
        device.buffer_data(1, &[2, 2]);
        device.queue(&[0, 1]);
        device.play();
        assert!(device.is_playing());

        assert_eq!(backend.consume_playout(1), 1);
        assert_eq!(device.unqueue_processed(), Some(0));
        assert_eq!(device.unqueue_processed(), None);

        assert_eq!(backend.consume_playout(5), 1);
        assert!(!device.is_playing());
        assert_eq!(backend.played_buffers(), vec![vec![1, 1], vec![2, 2]]);
    }

    #[test]
    fn test_drop_closes_playout() {
        let backend = MockBackend::new();
        let device = backend
            .open_playout(&DeviceId::default_device(), stereo(), 7)
            .unwrap();
        drop(device);

        let snapshot = backend.playout_snapshot();
        assert_eq!(snapshot.open_device, None);
        assert_eq!(snapshot.closes, 1);
    }

    #[test]
    fn test_capture_requires_start() {
        let backend = MockBackend::new();
        let mut device = backend
            .open_capture(&DeviceId::new("Mock Microphone"), mono())
            .unwrap();
        backend.push_capture_samples("Mock Microphone", &[5; 480]);

        assert_eq!(device.available_samples(), 0);
        device.start().unwrap();
        assert_eq!(device.available_samples(), 480);

        let mut out = vec![0u8; 960];
        device.capture(&mut out, 480).unwrap();
        assert_eq!(&out[..2], &[5, 0]);
        assert_eq!(device.available_samples(), 0);
    }

    #[test]
    fn test_unplug_moves_default_and_reports_loss() {
        let backend = MockBackend::new();
        let mut device = backend
            .open_capture(&DeviceId::new("Mock Microphone"), mono())
            .unwrap();
        backend.unplug(DeviceKind::Capture, "Mock Microphone");

        assert_eq!(
            backend.default_device(DeviceKind::Capture).as_deref(),
            Some("Mock Headset Mic")
        );
        assert!(matches!(
            device.take_error(),
            Some(BackendError::DeviceLost { .. })
        ));
    }

    #[test]
    fn test_fail_open_until_allowed() {
        let backend = MockBackend::new();
        backend.fail_open("Mock Microphone");
        assert!(backend
            .open_capture(&DeviceId::new("Mock Microphone"), mono())
            .is_err());

        backend.allow_open("Mock Microphone");
        assert!(backend
            .open_capture(&DeviceId::new("Mock Microphone"), mono())
            .is_ok());
    }
}

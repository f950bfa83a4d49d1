//! CPAL backend for real audio hardware.

mod capture;
mod playout;

use std::sync::OnceLock;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, StreamError, SupportedStreamConfig};

use super::{
    AudioBackend, BackendExtensions, CaptureDevice, DeviceKind, PlayoutDevice, StreamFormat,
};
use crate::{BackendError, DeviceId};

/// Extension table shared by every `CpalBackend` in the process.
static EXTENSIONS: OnceLock<BackendExtensions> = OnceLock::new();

/// Audio backend on top of the platform's default CPAL host.
///
/// Devices are identified by their CPAL name. The empty [`DeviceId`] selects
/// the host's default device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    /// Creates a backend on the default host.
    pub fn new() -> Self {
        Self
    }

    fn host() -> Host {
        cpal::default_host()
    }

    fn find_device(kind: DeviceKind, id: &DeviceId) -> Result<Device, BackendError> {
        let host = Self::host();
        if id.is_default() {
            let device = match kind {
                DeviceKind::Playout => host.default_output_device(),
                DeviceKind::Capture => host.default_input_device(),
            };
            return device.ok_or_else(|| BackendError::open_failed("", "no default device"));
        }

        let devices = match kind {
            DeviceKind::Playout => host.output_devices(),
            DeviceKind::Capture => host.input_devices(),
        }
        .map_err(|e| BackendError::Backend(e.to_string()))?;

        for device in devices {
            if device.name().is_ok_and(|name| name == id.as_str()) {
                return Ok(device);
            }
        }
        Err(BackendError::open_failed(id.as_str(), "no such device"))
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn resolve_extensions(&self) -> BackendExtensions {
        *EXTENSIONS.get_or_init(|| {
            let host = Self::host();
            tracing::debug!(host = ?host.id(), "Resolved CPAL host capabilities");
            // Streams run on host-managed threads and report device loss and
            // timestamps through their callbacks on every supported host.
            BackendExtensions {
                thread_context: true,
                exact_latency: true,
                disconnect_events: true,
            }
        })
    }

    fn devices(&self, kind: DeviceKind) -> Vec<String> {
        let host = Self::host();
        let devices = match kind {
            DeviceKind::Playout => host.output_devices(),
            DeviceKind::Capture => host.input_devices(),
        };
        match devices {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                tracing::warn!(%kind, error = %e, "Failed to enumerate devices");
                Vec::new()
            }
        }
    }

    fn default_device(&self, kind: DeviceKind) -> Option<String> {
        let host = Self::host();
        let device = match kind {
            DeviceKind::Playout => host.default_output_device(),
            DeviceKind::Capture => host.default_input_device(),
        };
        device.and_then(|d| d.name().ok())
    }

    fn open_playout(
        &self,
        device: &DeviceId,
        format: StreamFormat,
        buffers: usize,
    ) -> Result<Box<dyn PlayoutDevice>, BackendError> {
        let cpal_device = Self::find_device(DeviceKind::Playout, device)?;
        let playout = playout::CpalPlayout::open(&cpal_device, device, format, buffers)?;
        Ok(Box::new(playout))
    }

    fn open_capture(
        &self,
        device: &DeviceId,
        format: StreamFormat,
    ) -> Result<Box<dyn CaptureDevice>, BackendError> {
        let capture = capture::CpalCapture::open(device.clone(), format)?;
        Ok(Box::new(capture))
    }
}

/// Picks a device configuration for the requested format.
///
/// Prefers i16 over f32 and an exact channel match over any other layout.
/// With `allow_downmix`, a configuration with more channels is accepted.
fn select_config(
    device: &Device,
    kind: DeviceKind,
    format: StreamFormat,
    allow_downmix: bool,
) -> Result<SupportedStreamConfig, BackendError> {
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let ranges: Vec<_> = match kind {
        DeviceKind::Playout => device
            .supported_output_configs()
            .map_err(|e| BackendError::open_failed(&name, e.to_string()))?
            .collect(),
        DeviceKind::Capture => device
            .supported_input_configs()
            .map_err(|e| BackendError::open_failed(&name, e.to_string()))?
            .collect(),
    };

    let rate = cpal::SampleRate(format.sample_rate);
    let rank = |channels: u16, sample_format: SampleFormat| -> Option<u8> {
        let exact = channels == format.channels;
        if !exact && !(allow_downmix && channels > format.channels) {
            return None;
        }
        let format_rank = match sample_format {
            SampleFormat::I16 => 0,
            SampleFormat::F32 => 1,
            _ => return None,
        };
        Some(if exact { format_rank } else { 2 + format_rank })
    };

    ranges
        .into_iter()
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .filter_map(|r| rank(r.channels(), r.sample_format()).map(|score| (score, r)))
        .min_by_key(|(score, _)| *score)
        .map(|(_, r)| r.with_sample_rate(rate))
        .ok_or_else(|| {
            BackendError::open_failed(
                name,
                format!(
                    "no supported config for {}Hz/{}ch",
                    format.sample_rate, format.channels
                ),
            )
        })
}

/// Maps an asynchronous stream error to a backend error.
fn stream_error(device: &DeviceId, error: StreamError) -> BackendError {
    match error {
        StreamError::DeviceNotAvailable => {
            BackendError::device_lost(device.as_str(), "device not available")
        }
        StreamError::BackendSpecific { err } => BackendError::Backend(err.description),
    }
}

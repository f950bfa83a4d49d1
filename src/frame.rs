//! Audio frames passed between capture, processing and sinks.

use std::time::Duration;

use crate::format::bytes_to_i16;

/// One chunk of raw PCM as delivered by a capture device.
///
/// This is the push-buffer payload: exactly one chunk of interleaved
/// little-endian PCM plus the capture timestamp. It borrows the capture
/// engine's scratch buffer and is only valid for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Interleaved little-endian PCM bytes.
    pub data: &'a [u8],
    /// Bits per sample (only 16 is supported).
    pub bits_per_sample: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Samples per channel in `data`.
    pub frames: usize,
    /// Monotonic capture time since the capture engine was created.
    pub timestamp: Duration,
}

impl RawFrame<'_> {
    /// Number of interleaved samples described by this frame.
    pub fn sample_count(&self) -> usize {
        self.frames * self.channels as usize
    }
}

/// A processed audio frame handed to the processing stage and to sinks.
///
/// The frame owns its samples so the processing stage can transform them in
/// place. An [`AudioSource`](crate::AudioSource) keeps one working frame and
/// refills it on every delivery, so the allocation is reused.
///
/// # Example
///
/// ```
/// use audio_device_engine::AudioFrame;
/// use std::time::Duration;
///
/// let frame = AudioFrame::new(vec![0i16; 960], Duration::ZERO, 48000, 2);
/// assert_eq!(frame.duration(), Duration::from_millis(10));
/// assert_eq!(frame.frame_count(), 480);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFrame {
    /// Interleaved 16-bit PCM samples.
    pub samples: Vec<i16>,

    /// Capture timestamp.
    pub timestamp: Duration,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u16,
}

impl AudioFrame {
    /// Creates a new `AudioFrame` with the given parameters.
    pub fn new(samples: Vec<i16>, timestamp: Duration, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            timestamp,
            sample_rate,
            channels,
        }
    }

    /// Refills this frame from a raw capture frame.
    ///
    /// The sample vector is resized to the raw frame's actual sample and
    /// channel count; its capacity is kept across calls.
    pub fn update_from_raw(&mut self, raw: &RawFrame<'_>) {
        self.samples.clear();
        self.samples.extend(bytes_to_i16(raw.data).take(raw.sample_count()));
        self.samples.resize(raw.sample_count(), 0);
        self.timestamp = raw.timestamp;
        self.sample_rate = raw.sample_rate;
        self.channels = raw.channels;
    }

    /// Returns the duration of this frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Returns the number of samples per channel.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Returns `true` if this frame contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_duration_mono_48khz() {
        let frame = AudioFrame::new(vec![0i16; 480], Duration::ZERO, 48000, 1);
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_channels() {
        let frame = AudioFrame::new(vec![0i16; 100], Duration::ZERO, 16000, 0);
        assert_eq!(frame.duration(), Duration::ZERO);
        assert_eq!(frame.frame_count(), 0);
    }

    #[test]
    fn test_update_from_raw_copies_samples() {
        let bytes = raw_bytes(&[1, -2, 300, -400]);
        let raw = RawFrame {
            data: &bytes,
            bits_per_sample: 16,
            sample_rate: 48000,
            channels: 2,
            frames: 2,
            timestamp: Duration::from_millis(30),
        };

        let mut frame = AudioFrame::default();
        frame.update_from_raw(&raw);

        assert_eq!(frame.samples, vec![1, -2, 300, -400]);
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.timestamp, Duration::from_millis(30));
    }

    #[test]
    fn test_update_from_raw_resizes_to_frame_parameters() {
        let bytes = raw_bytes(&[7; 8]);
        let raw = RawFrame {
            data: &bytes,
            bits_per_sample: 16,
            sample_rate: 48000,
            channels: 1,
            frames: 3,
            timestamp: Duration::ZERO,
        };

        let mut frame = AudioFrame::new(vec![0; 100], Duration::ZERO, 16000, 2);
        frame.update_from_raw(&raw);

        assert_eq!(frame.samples, vec![7, 7, 7]);
        assert_eq!(frame.sample_rate, 48000);
    }
}

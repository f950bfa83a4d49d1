//! Configuration types for the audio device engine.

use std::time::Duration;

/// Fixed sizing and cadence of the playout and capture engines.
///
/// Use [`EngineConfig::default()`] for the reference sizing, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use audio_device_engine::EngineConfig;
///
/// let config = EngineConfig {
///     playout_channels: 1,
///     ..Default::default()
/// };
/// assert_eq!(config.playout_part(), 480);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Playout sample rate in Hz.
    ///
    /// Default: 48000
    pub playout_sample_rate: u32,

    /// Playout channel count (1 = mono, 2 = stereo).
    ///
    /// Can be changed while not playing via
    /// [`PlayoutEngine::set_stereo_playout`](crate::PlayoutEngine::set_stereo_playout).
    /// Default: 2
    pub playout_channels: u16,

    /// Capture sample rate in Hz.
    ///
    /// Default: 48000
    pub recording_sample_rate: u32,

    /// Capture channel count. Fixed for the lifetime of a capture engine.
    ///
    /// Default: 1
    pub recording_channels: u16,

    /// Duration of one chunk, the unit of every pull, push and poll.
    ///
    /// Default: 10ms
    pub chunk_duration: Duration,

    /// Number of slots in the playout buffer pool.
    ///
    /// Default: 7
    pub buffer_pool_size: usize,

    /// Minimum number of buffers the playout engine keeps queued.
    ///
    /// Must not exceed `buffer_pool_size`. Default: 5
    pub low_water_mark: usize,

    /// Consecutive empty capture cycles after which the device is restarted.
    ///
    /// Default: 200 (two seconds at a 10ms cadence)
    pub restart_after_empty_cycles: u32,

    /// Minimum interval between two audio level computations.
    ///
    /// Default: 100ms
    pub level_interval: Duration,

    /// Latency floor reported when the backend cannot measure device latency.
    ///
    /// Default: 20ms
    pub default_playout_latency: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playout_sample_rate: 48000,
            playout_channels: 2,
            recording_sample_rate: 48000,
            recording_channels: 1,
            chunk_duration: Duration::from_millis(10),
            buffer_pool_size: 7,
            low_water_mark: 5,
            restart_after_empty_cycles: 200,
            level_interval: Duration::from_millis(100),
            default_playout_latency: Duration::from_millis(20),
        }
    }
}

impl EngineConfig {
    /// Samples per channel in one playout chunk, rounded up.
    #[must_use]
    pub fn playout_part(&self) -> usize {
        part_for(self.playout_sample_rate, self.chunk_duration)
    }

    /// Samples per channel in one capture chunk, rounded up.
    #[must_use]
    pub fn recording_part(&self) -> usize {
        part_for(self.recording_sample_rate, self.chunk_duration)
    }

    /// Size in bytes of the capture scratch buffer (16-bit samples).
    #[must_use]
    pub fn recording_buffer_bytes(&self) -> usize {
        self.recording_part() * self.recording_channels as usize * BYTES_PER_SAMPLE
    }
}

/// Width of one PCM sample in bytes. The engine works with 16-bit PCM only.
pub const BYTES_PER_SAMPLE: usize = 2;

fn part_for(sample_rate: u32, chunk: Duration) -> usize {
    let millis = chunk.as_millis() as u64;
    ((u64::from(sample_rate) * millis + 999) / 1000) as usize
}

/// Noise suppression aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseSuppressionLevel {
    /// Lowest suppression.
    Low,
    /// Moderate suppression.
    Moderate,
    /// High suppression.
    High,
    /// Strongest suppression.
    #[default]
    VeryHigh,
}

/// Audio processing switches attached to an [`AudioSource`](crate::AudioSource).
///
/// The engine itself does not interpret these flags; they are handed to the
/// processing stage and reported back to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioOptions {
    /// Acoustic echo cancellation.
    pub echo_cancellation: bool,
    /// Automatic gain control.
    pub auto_gain_control: bool,
    /// Noise suppression.
    pub noise_suppression: bool,
    /// Noise suppression level, used when `noise_suppression` is on.
    pub noise_suppression_level: NoiseSuppressionLevel,
    /// High-pass filter.
    pub high_pass_filter: bool,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            auto_gain_control: true,
            noise_suppression: true,
            noise_suppression_level: NoiseSuppressionLevel::default(),
            high_pass_filter: true,
        }
    }
}

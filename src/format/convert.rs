//! Sample format conversion and level measurement.

/// Converts f32 samples to i16.
///
/// Input should be in the range [-1.0, 1.0].
/// Values outside this range are clamped.
///
/// Uses × 32767 (not 32768) for symmetric scaling. This means -1.0 maps
/// to -32767 rather than -32768, losing 1 LSB at the negative extreme.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts i16 samples to f32.
///
/// Output will be in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Iterates little-endian 16-bit samples stored in a byte slice.
///
/// A trailing odd byte is ignored.
pub fn bytes_to_i16(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Writes samples into a byte slice as little-endian 16-bit PCM.
///
/// Writes `min(samples.len(), out.len() / 2)` samples and returns that count.
pub fn i16_to_bytes(samples: &[i16], out: &mut [u8]) -> usize {
    let mut written = 0;
    for (sample, slot) in samples.iter().zip(out.chunks_exact_mut(2)) {
        slot.copy_from_slice(&sample.to_le_bytes());
        written += 1;
    }
    written
}

/// Root-mean-square level of interleaved samples, normalized to full scale.
///
/// Returns a value in `[0.0, 1.0]`; an empty slice is silent.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s);
            v * v
        })
        .sum();
    let rms = (sum / samples.len() as f64).sqrt();
    (rms / 32768.0).min(1.0) as f32
}

/// Converts a `[0, 1]` level into the `0..=100` scale reported to hosts.
///
/// Speech rarely exceeds a tenth of full scale, so the level is multiplied by
/// 1000 and saturates at 100.
pub fn level_to_percent(level: f32) -> u32 {
    ((level.max(0.0) * 1000.0).round() as u32).min(100)
}

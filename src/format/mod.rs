//! PCM format conversion utilities.
//!
//! This module provides the small set of conversions the engine needs:
//! - Byte ↔ sample conversion for 16-bit little-endian PCM
//! - Sample format conversion (f32 ↔ i16) for float-native devices
//! - Loudness measurement (RMS normalized to full scale)

mod convert;

pub use convert::{
    bytes_to_i16, f32_to_i16, i16_to_bytes, i16_to_f32, level_to_percent, rms_level,
};

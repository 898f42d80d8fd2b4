//! One-byte logarithmic gain packing for audio loudness
//!
//! Amplitudes in [0, 1] map to decibels over [-60 dB, 0 dB] and quantize
//! to 254 steps; byte zero is reserved for silence so true zero survives
//! the round trip.

/// Quietest representable level
const MIN_GAIN_DB: f32 = -60.0;
const GAIN_STEPS: f32 = 254.0;

/// Pack an amplitude in [0, 1] into one byte
pub fn pack_gain(gain: f32) -> u8 {
    if !(gain > 0.0) {
        return 0;
    }
    let db = (20.0 * gain.log10()).clamp(MIN_GAIN_DB, 0.0);
    let step = ((db - MIN_GAIN_DB) / -MIN_GAIN_DB * GAIN_STEPS).round() as u8;
    step + 1
}

/// Unpack a one-byte gain to an amplitude
pub fn unpack_gain(byte: u8) -> f32 {
    if byte == 0 {
        return 0.0;
    }
    let db = (byte - 1) as f32 / GAIN_STEPS * -MIN_GAIN_DB + MIN_GAIN_DB;
    10.0f32.powf(db / 20.0)
}

//! End-to-end scenario suite
//!
//! Exercises the full pipeline the way two peers would: encode from one
//! avatar, carry the bytes, decode into another, and compare within the
//! quantization tolerances.

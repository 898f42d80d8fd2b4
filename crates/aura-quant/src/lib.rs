//! AURA Quantizers - lossy primitive codecs
//!
//! Every function here is pure and deterministic: identical inputs produce
//! identical bytes on every platform, because all rounding happens in
//! integer space after a single float multiply. Decoders are exact inverses
//! up to the documented quantization step.

pub mod bitvec;
pub mod fixed;
pub mod gain;
pub mod quat;
pub mod ratio;

pub use bitvec::*;
pub use fixed::*;
pub use gain::*;
pub use quat::*;
pub use ratio::*;

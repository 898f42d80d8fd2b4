//! Error types for the AURA protocol

use thiserror::Error;

/// Core AURA errors
#[derive(Error, Debug)]
pub enum AuraError {
    // Wire errors
    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Encode overran the packet budget of {budget} bytes")]
    BufferOverflow { budget: usize },

    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    // Quantization errors
    #[error("Value {value} out of range for radix {radix} fixed point")]
    QuantizationOutOfRange { value: f32, radix: u32 },

    // Trait errors
    #[error("Unknown trait type: {0}")]
    UnknownTraitType(u8),

    #[error("Trait capacity reached: {kind} is capped at {cap}")]
    CapacityExceeded { kind: &'static str, cap: usize },

    #[error("Stale identity sequence")]
    StaleSequence,

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Result type for AURA operations
pub type AuraResult<T> = Result<T, AuraError>;

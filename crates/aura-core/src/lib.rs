//! AURA Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the AURA protocol:
//! - Identifiers (SessionUuid, TraitInstanceId, IdentitySequence)
//! - Math primitives (Vec3, Quat)
//! - Joint records and detail levels
//! - Protocol constants and the error taxonomy

pub mod constants;
pub mod detail;
pub mod error;
pub mod flags;
pub mod id;
pub mod joint;
pub mod math;

pub use constants::*;
pub use detail::*;
pub use error::*;
pub use flags::*;
pub use id::*;
pub use joint::*;
pub use math::*;

//! AURA Runtime - the outbound send loop
//!
//! Drives one avatar's publishing cadence: identity first when it changed,
//! then the trait send window, then exactly one snapshot per tick with the
//! post-send joint commit.

pub mod driver;

pub use driver::*;

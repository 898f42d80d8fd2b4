//! AURA Wire - the avatar snapshot frame codec
//!
//! One snapshot is a 16-bit section mask followed by the present sections in
//! a fixed order, all little-endian. Encoding is resumable: sections that do
//! not fit the packet budget carry over to the next call through
//! [`SendStatus`], and a partially written joint stream resumes mid-array.
//!
//! - [`flags`]: the section mask word
//! - [`sections`]: fixed-layout section structs
//! - [`interface`]: the encoder/decoder capability traits
//! - [`policy`]: change-filtered section selection
//! - [`codec`]: encode / decode
//! - [`rates`]: per-section byte and update meters

pub mod codec;
pub mod flags;
pub mod interface;
pub mod policy;
pub mod rates;
pub mod sections;

pub use codec::*;
pub use flags::*;
pub use interface::*;
pub use policy::*;
pub use rates::*;
pub use sections::*;

//! Pure data types for grove: keys, ordering, media types.
//!
//! This crate is a leaf dependency with no async runtime and no I/O, so
//! consumers (routers, front ends) can name keys and sort them the way the
//! kernel does without pulling in the kernel's dependencies.

pub mod key;
pub mod media;
pub mod natural;

pub use key::*;
pub use media::media_type_is_text;
pub use natural::{natural_cmp, sort_natural};

//! Wire-format structures.
//!
//! Everything here is a byte-exact model of something that appears in an
//! archive: the ZIP envelope records in [`zip`], and the Zstandard framing
//! (including burst's skippable frames) in [`framing`].

pub mod framing;
pub mod zip;

//! Burst: an aligned archive format and its streaming extraction engine.
//!
//! A burst archive is a ZIP envelope whose members are sequences of small
//! Zstandard frames, laid out so that every 8 MiB boundary in the body
//! falls on a frame or member edge. That alignment is what allows an
//! extractor to issue concurrent range reads against object storage and
//! parse each response as it streams in, without buffering whole parts or
//! coordinating between them.
//!
//! The pieces, bottom up:
//!
//! - [`format`]: byte-exact models of the ZIP envelope and Zstandard framing
//! - [`frame`]: identify and measure the next frame in a buffer
//! - [`directory`]: find and decode the central directory, build the
//!   per-part index
//! - [`align`] and [`encode`]: the writer side, from boundary placement to
//!   the streaming archive writer
//! - [`extract`]: the per-part state machine and its filesystem outputs
//! - [`source`] and [`coordinate`]: ranged byte sources and the concurrent
//!   download coordinator

#![warn(clippy::unwrap_used, missing_docs)]
#![deny(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod align;
pub mod constants;
pub mod coordinate;
pub mod directory;
pub mod encode;
pub mod error;
pub mod extract;
pub mod format;
pub mod frame;
pub mod source;

#[doc(inline)]
pub use self::{
	coordinate::{Coordinator, ExtractOptions, ExtractSummary},
	encode::{ArchiveWriter, WriterOptions},
	error::{Error, ErrorKind, Result},
	source::{FileRangeSource, MemoryRangeSource, RangeSource},
};

//! Streaming extraction: per-part processors and their output plumbing.

pub mod output;
pub mod processor;
pub mod sink;

pub use self::processor::PartProcessor;
pub use self::sink::{EncodedWriteSink, ZstdDecodeSink};

//! Where compressed frames go: the encoded-write boundary.

use std::fs::File;

use tracing::trace;

use crate::error::{Error, ErrorKind, Result};

/// Destination for the compressed frames of extracted files.
///
/// `frame` is a complete Zstandard frame whose decoded content covers
/// `[file_offset, file_offset + uncompressed_len)` of the file. Parts run
/// concurrently, so implementations must accept calls from different
/// threads against the same file as long as the offset ranges are disjoint,
/// which the format guarantees.
///
/// Filesystems with compressed-extent ioctls can store the frame as-is and
/// decode on read; [`ZstdDecodeSink`] is the portable fallback.
pub trait EncodedWriteSink: Send + Sync {
	/// Write one frame at the given uncompressed offset.
	fn write_encoded(
		&self,
		file: &File,
		frame: &[u8],
		uncompressed_len: u64,
		file_offset: u64,
	) -> Result<()>;
}

/// Decompresses each frame and writes the plain bytes at the offset.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZstdDecodeSink;

impl EncodedWriteSink for ZstdDecodeSink {
	fn write_encoded(
		&self,
		file: &File,
		frame: &[u8],
		uncompressed_len: u64,
		file_offset: u64,
	) -> Result<()> {
		let decoded = zstd::bulk::decompress(frame, uncompressed_len as usize).map_err(|err| {
			Error::new(ErrorKind::SinkWriteFailed)
				.with_message(format!("frame would not decompress: {err}"))
		})?;
		if decoded.len() as u64 != uncompressed_len {
			return Err(Error::new(ErrorKind::SinkWriteFailed).with_message(format!(
				"frame decoded to {} bytes, header declared {uncompressed_len}",
				decoded.len()
			)));
		}

		trace!(
			bytes = decoded.len(),
			%file_offset,
			"decoded frame to file"
		);
		write_all_at(file, &decoded, file_offset)
			.map_err(|err| Error::new(ErrorKind::SinkWriteFailed).with_message(err.to_string()))
	}
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
	use std::os::unix::fs::FileExt;
	file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
	use std::os::windows::fs::FileExt;
	while !buf.is_empty() {
		let written = file.seek_write(buf, offset)?;
		buf = &buf[written..];
		offset += written as u64;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Read;

	#[test]
	fn decode_sink_places_bytes_at_offset() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.bin");
		let file = File::create(&path).unwrap();

		let frame = zstd::bulk::compress(b"world", 0).unwrap();
		ZstdDecodeSink.write_encoded(&file, &frame, 5, 6).unwrap();
		let frame = zstd::bulk::compress(b"hello ", 0).unwrap();
		ZstdDecodeSink.write_encoded(&file, &frame, 6, 0).unwrap();

		let mut content = Vec::new();
		File::open(&path).unwrap().read_to_end(&mut content).unwrap();
		assert_eq!(content, b"hello world");
	}

	#[test]
	fn decode_sink_rejects_length_mismatch() {
		let dir = tempfile::tempdir().unwrap();
		let file = File::create(dir.path().join("out.bin")).unwrap();
		let frame = zstd::bulk::compress(b"hello", 0).unwrap();

		let err = ZstdDecodeSink
			.write_encoded(&file, &frame, 99, 0)
			.unwrap_err();
		assert_eq!(err.kind, ErrorKind::SinkWriteFailed);
	}
}

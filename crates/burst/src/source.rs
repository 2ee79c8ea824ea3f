//! Byte sources: where archive ranges come from.
//!
//! The coordinator only ever asks for inclusive byte ranges and receives
//! ordered chunks back; everything transport-specific (S3, plain files,
//! test buffers) sits behind [`RangeSource`]. A suffix request additionally
//! reports where the suffix starts and how long the whole object is, which
//! over HTTP comes out of the `Content-Range` response header.

use std::{io::SeekFrom, path::PathBuf, pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

use crate::error::{Error, ErrorKind, Result};

/// Ordered chunks of one ranged read.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Response to a suffix request.
pub struct SuffixFetch {
	/// Absolute offset of the first returned byte.
	pub start: u64,

	/// Total length of the object.
	pub total_size: u64,

	/// The suffix bytes, in order.
	pub chunks: ChunkStream,
}

/// A byte source addressable by inclusive ranges.
#[async_trait]
pub trait RangeSource: Send + Sync {
	/// Read `[start, end]` (inclusive), delivering chunks in byte order.
	async fn read_range(&self, start: u64, end: u64) -> Result<ChunkStream>;

	/// Read the last `length` bytes (fewer when the object is shorter).
	async fn read_suffix(&self, length: u64) -> Result<SuffixFetch>;
}

/// Parse a `Content-Range: bytes S-E/T` header into `(S, E, T)`.
pub fn parse_content_range(value: &str) -> Result<(u64, u64, u64)> {
	let bad = || {
		Error::new(ErrorKind::Network)
			.with_message(format!("malformed Content-Range header {value:?}"))
	};

	let rest = value.trim().strip_prefix("bytes ").ok_or_else(bad)?;
	let (range, total) = rest.split_once('/').ok_or_else(bad)?;
	let (start, end) = range.split_once('-').ok_or_else(bad)?;

	let start = start.parse().map_err(|_| bad())?;
	let end = end.parse().map_err(|_| bad())?;
	let total = total.parse().map_err(|_| bad())?;
	if start > end || end >= total {
		return Err(bad());
	}
	Ok((start, end, total))
}

/// Read size for file-backed ranges.
const FILE_CHUNK: u64 = 256 * 1024;

/// A local archive file as a range source.
///
/// Every request opens its own handle, so concurrent part reads never fight
/// over one file cursor.
#[derive(Clone, Debug)]
pub struct FileRangeSource {
	path: PathBuf,
}

impl FileRangeSource {
	/// Source over the archive at `path`.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}
}

#[async_trait]
impl RangeSource for FileRangeSource {
	async fn read_range(&self, start: u64, end: u64) -> Result<ChunkStream> {
		let mut file = tokio::fs::File::open(&self.path).await?;
		file.seek(SeekFrom::Start(start)).await?;
		trace!(path = ?self.path, %start, %end, "open file range");

		let stream = futures::stream::try_unfold(
			(file, end - start + 1),
			|(mut file, remaining)| async move {
				if remaining == 0 {
					return Ok(None);
				}
				let want = FILE_CHUNK.min(remaining) as usize;
				let mut buffer = vec![0u8; want];
				file.read_exact(&mut buffer).await.map_err(Error::from)?;
				Ok(Some((Bytes::from(buffer), (file, remaining - want as u64))))
			},
		);
		Ok(Box::pin(stream))
	}

	async fn read_suffix(&self, length: u64) -> Result<SuffixFetch> {
		let total_size = tokio::fs::metadata(&self.path).await?.len();
		if total_size == 0 {
			return Ok(SuffixFetch {
				start: 0,
				total_size: 0,
				chunks: Box::pin(futures::stream::empty()),
			});
		}
		let start = total_size.saturating_sub(length);
		Ok(SuffixFetch {
			start,
			total_size,
			chunks: self.read_range(start, total_size - 1).await?,
		})
	}
}

/// An in-memory archive as a range source.
///
/// The chunk size is configurable so tests can split responses at awkward
/// byte positions; it also counts the requests it serves.
#[derive(Clone, Debug)]
pub struct MemoryRangeSource {
	data: Arc<Vec<u8>>,
	chunk_size: usize,
	requests: Arc<std::sync::atomic::AtomicU64>,
}

impl MemoryRangeSource {
	/// Source over `data`, answering in chunks of `chunk_size` bytes.
	pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
		assert!(chunk_size > 0);
		Self {
			data: Arc::new(data),
			chunk_size,
			requests: Arc::new(std::sync::atomic::AtomicU64::new(0)),
		}
	}

	/// How many range requests this source has served.
	pub fn requests(&self) -> u64 {
		self.requests.load(std::sync::atomic::Ordering::Relaxed)
	}

	fn slice(&self, start: u64, end: u64) -> Result<ChunkStream> {
		if end < start || end >= self.data.len() as u64 {
			return Err(Error::new(ErrorKind::HttpStatus(416)).with_message(format!(
				"range {start}-{end} outside object of {} bytes",
				self.data.len()
			)));
		}
		self.requests
			.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

		let data = Arc::clone(&self.data);
		let chunk_size = self.chunk_size;
		let stream = futures::stream::try_unfold(start, move |cursor| {
			let data = Arc::clone(&data);
			async move {
				if cursor > end {
					return Ok(None);
				}
				let stop = end.min(cursor + chunk_size as u64 - 1);
				let chunk =
					Bytes::copy_from_slice(&data[cursor as usize..=stop as usize]);
				Ok(Some((chunk, stop + 1)))
			}
		});
		Ok(Box::pin(stream))
	}
}

#[async_trait]
impl RangeSource for MemoryRangeSource {
	async fn read_range(&self, start: u64, end: u64) -> Result<ChunkStream> {
		self.slice(start, end)
	}

	async fn read_suffix(&self, length: u64) -> Result<SuffixFetch> {
		let total_size = self.data.len() as u64;
		if total_size == 0 {
			return Ok(SuffixFetch {
				start: 0,
				total_size: 0,
				chunks: Box::pin(futures::stream::empty()),
			});
		}
		let start = total_size.saturating_sub(length);
		Ok(SuffixFetch {
			start,
			total_size,
			chunks: self.slice(start, total_size - 1)?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::TryStreamExt;

	#[test]
	fn content_range_parses() {
		assert_eq!(
			parse_content_range("bytes 100-199/1000").unwrap(),
			(100, 199, 1000)
		);
		assert!(parse_content_range("bytes 100-99/1000").is_err());
		assert!(parse_content_range("bytes 0-1000/1000").is_err());
		assert!(parse_content_range("items 0-1/2").is_err());
		assert!(parse_content_range("bytes x-1/2").is_err());
	}

	#[tokio::test]
	async fn memory_source_chunks_and_counts() {
		let source = MemoryRangeSource::new((0u8..=99).collect(), 7);
		let chunks: Vec<Bytes> = source
			.read_range(10, 30)
			.await
			.unwrap()
			.try_collect()
			.await
			.unwrap();
		assert!(chunks.iter().take(chunks.len() - 1).all(|c| c.len() == 7));
		let joined: Vec<u8> = chunks.concat();
		assert_eq!(joined, (10u8..=30).collect::<Vec<u8>>());
		assert_eq!(source.requests(), 1);

		assert!(source.read_range(90, 100).await.is_err());
	}

	#[tokio::test]
	async fn suffix_reports_start_and_total() {
		let source = MemoryRangeSource::new(vec![1u8; 50], 64);
		let suffix = source.read_suffix(8).await.unwrap();
		assert_eq!(suffix.start, 42);
		assert_eq!(suffix.total_size, 50);
		let chunks: Vec<Bytes> = suffix.chunks.try_collect().await.unwrap();
		assert_eq!(chunks.concat().len(), 8);

		let suffix = source.read_suffix(100).await.unwrap();
		assert_eq!(suffix.start, 0);
	}
}

//! The parsed central directory: the root of extraction.
//!
//! A [`CentralDirectory`] is produced once from the archive tail (or, for
//! the hybrid download path, twice: a partial view first and the full view
//! once every record is fetched), then shared read-only by every part
//! processor.

use std::ops::Range;

use crate::{
	constants::BASE_ALIGNMENT,
	error::{Error, ErrorKind, Result},
	format::zip::LOCAL_HEADER_LEN,
	frame::DescriptorWidth,
};

pub use self::parse::{parse_archive_tail, parse_full_directory, DirectoryBounds, TailParse};

mod parse;

/// Unix ownership and permissions of a member.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnixMetadata {
	/// Full `st_mode`, file-type bits included.
	pub mode: u32,

	/// Owning user id.
	pub uid: u32,

	/// Owning group id.
	pub gid: u32,
}

/// Everything the extractor knows about one member, from its central
/// directory record.
#[derive(Clone, Debug)]
pub struct FileMetadata {
	/// Member name: a relative path, `/`-separated, UTF-8.
	pub name: String,

	/// Absolute offset of the member's local file header.
	pub local_header_offset: u64,

	/// Compressed size, including any skippable frames interleaved in the
	/// member's data run.
	pub compressed_size: u64,

	/// Uncompressed size.
	pub uncompressed_size: u64,

	/// CRC-32 of the uncompressed content.
	pub crc32: u32,

	/// Compression method.
	pub method: u16,

	/// Index of the part the local header starts in.
	pub part_index: u64,

	/// Unix mode/uid/gid, when the writer recorded them.
	pub unix: Option<UnixMetadata>,

	/// Whether the member is a directory (name ends in `/`).
	pub is_directory: bool,

	/// Whether the member is a symlink (stored, with the link bit set).
	pub is_symlink: bool,

	/// Whether a data descriptor follows the member's data (flag bit 3).
	pub has_descriptor: bool,

	/// Whether that descriptor carries 64-bit sizes.
	pub zip64_descriptor: bool,
}

impl FileMetadata {
	/// Wire length of the member's local header.
	///
	/// Burst writers put per-file metadata in the central directory only,
	/// so a local header is the fixed portion plus the name.
	pub fn local_header_size(&self) -> u64 {
		LOCAL_HEADER_LEN as u64 + self.name.len() as u64
	}

	/// Which descriptor layout trails the member's data, if any.
	pub fn descriptor_width(&self) -> DescriptorWidth {
		if self.zip64_descriptor {
			DescriptorWidth::Zip64
		} else {
			DescriptorWidth::Standard
		}
	}

	/// Wire length of the trailing data descriptor (zero when absent).
	pub fn descriptor_size(&self) -> u64 {
		if self.has_descriptor {
			self.descriptor_width().wire_length()
		} else {
			0
		}
	}

	/// One past the last byte the member occupies in the archive.
	pub fn extent_end(&self) -> u64 {
		self.local_header_offset
			+ self.local_header_size()
			+ self.compressed_size
			+ self.descriptor_size()
	}
}

/// The files of one part, in the order they appear on disk.
#[derive(Clone, Debug, Default)]
pub struct PartEntry {
	/// Indices (into [`CentralDirectory::files`]) of members whose local
	/// header starts in this part, ascending by offset within the part.
	pub starters: Vec<usize>,

	/// Member whose data run crosses into this part from the previous one.
	pub continuing_file: Option<usize>,
}

/// The parsed central directory plus the per-part index derived from it.
#[derive(Clone, Debug)]
pub struct CentralDirectory {
	/// Every known member, ascending by local header offset.
	pub files: Vec<FileMetadata>,

	/// One entry per body part.
	pub parts: Vec<PartEntry>,

	/// Part size the index was computed for.
	pub part_size: u64,

	/// Total archive length in bytes.
	pub archive_size: u64,

	/// Absolute offset of the first central directory record.
	pub directory_offset: u64,

	/// Length of the central directory in bytes.
	pub directory_size: u64,

	/// False when this is the partial view parsed from the archive tail.
	pub complete: bool,

	/// Smallest local header offset this view has metadata for. Zero when
	/// complete; parts that begin below it cannot be processed from a
	/// partial view.
	pub known_floor: u64,
}

impl CentralDirectory {
	/// Number of parts that contain body bytes.
	pub fn part_count(&self) -> u64 {
		self.parts.len() as u64
	}

	/// The index entry for a part.
	pub fn part(&self, part: u64) -> &PartEntry {
		&self.parts[part as usize]
	}

	/// The archive byte range `[start, end)` covered by a part.
	///
	/// The last body part runs to the end of the archive so the processor
	/// can see the sentinel (and, for the tail-most part, the whole
	/// central directory is simply ignored after it).
	pub fn part_span(&self, part: u64) -> Range<u64> {
		let start = part * self.part_size;
		let end = (start + self.part_size).min(self.archive_size);
		start..end
	}

	fn assert_alignment(part_size: u64) {
		debug_assert!(part_size >= BASE_ALIGNMENT && part_size % BASE_ALIGNMENT == 0);
	}

	/// Build the per-part index for a file list sorted by offset.
	///
	/// For a partial view, entries of parts below the safe floor are left
	/// empty; the caller never dispatches those against this view.
	pub(crate) fn build_index(
		files: &[FileMetadata],
		part_size: u64,
		directory_offset: u64,
	) -> Vec<PartEntry> {
		Self::assert_alignment(part_size);
		let part_count = directory_offset.div_ceil(part_size);
		let mut parts = vec![PartEntry::default(); part_count as usize];

		for (index, file) in files.iter().enumerate() {
			parts[file.part_index as usize].starters.push(index);
		}

		// a file continues into part k when its data run crosses k*P; with
		// boundaries aligned to whole frames there is at most one such file
		for part in 1..part_count {
			let boundary = part * part_size;
			let before = files.partition_point(|f| f.local_header_offset < boundary);
			if before == 0 {
				continue;
			}
			let candidate = before - 1;
			if files[candidate].extent_end() > boundary {
				parts[part as usize].continuing_file = Some(candidate);
			}
		}

		parts
	}

	/// Sanity-check invariants a processor relies on.
	pub(crate) fn validate(&self) -> Result<()> {
		for window in self.files.windows(2) {
			if window[1].local_header_offset < window[0].extent_end() {
				return Err(Error::new(ErrorKind::FormatInvalidSignature)
					.with_message(format!(
						"members {:?} and {:?} overlap",
						window[0].name, window[1].name
					)));
			}
		}
		if let Some(last) = self.files.last() {
			if last.extent_end() > self.directory_offset {
				return Err(Error::new(ErrorKind::FormatTruncated).with_message(
					"last member extends into the central directory",
				));
			}
		}
		Ok(())
	}
}

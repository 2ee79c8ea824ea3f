//! Locating and decoding the central directory from the archive tail.

use deku::{DekuContainerRead, DekuError};
use tracing::{debug, instrument, trace};

use crate::{
	constants::{
		CENTRAL_RECORD_MAGIC, EOCD64_LOCATOR_MAGIC, EOCD64_MAGIC, EOCD_MAGIC, METHOD_STORE,
	},
	error::{Error, ErrorKind, Result},
	format::zip::{
		find_unix_extra, CentralRecord, EndOfCentralDirectory, Zip64EndOfCentralDirectory,
		Zip64Extra, Zip64Locator, EOCD64_LOCATOR_LEN, EOCD_LEN,
	},
};

use super::{CentralDirectory, FileMetadata, UnixMetadata};

/// Where the central directory lives, per the end records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirectoryBounds {
	/// Absolute offset of the first central directory record.
	pub directory_offset: u64,

	/// Length of the central directory in bytes.
	pub directory_size: u64,

	/// Number of records in the central directory.
	pub record_count: u64,
}

impl DirectoryBounds {
	/// The archive range still needed beyond a tail starting at `tail_start`.
	pub fn missing_range(&self, tail_start: u64) -> std::ops::Range<u64> {
		self.directory_offset..tail_start.min(self.directory_offset + self.directory_size)
	}
}

/// Outcome of parsing the archive tail.
#[derive(Clone, Debug)]
pub enum TailParse {
	/// The whole central directory was inside the tail buffer.
	Complete(CentralDirectory),

	/// The central directory extends below the tail buffer; more ranges
	/// must be fetched and handed to [`parse_full_directory`].
	NeedsMore {
		/// The records that were inside the tail, as a partial view.
		partial: CentralDirectory,

		/// Where the full directory lives.
		bounds: DirectoryBounds,

		/// Smallest part index the partial view has complete metadata for.
		///
		/// Equal to the part count when nothing can be dispatched early.
		safe_first_part: u64,
	},
}

/// Parse the archive tail: find the end records, and decode as much of the
/// central directory as the buffer holds.
///
/// `tail` must end at the last byte of the archive and start at absolute
/// offset `tail_start`.
#[instrument(level = "debug", skip(tail), fields(tail_len = tail.len()))]
pub fn parse_archive_tail(
	tail: &[u8],
	tail_start: u64,
	archive_size: u64,
	part_size: u64,
) -> Result<TailParse> {
	debug_assert_eq!(tail_start + tail.len() as u64, archive_size);

	let (eocd_pos, eocd) = find_eocd(tail)?;
	let (bounds, records_start_in_tail) = resolve_bounds(tail, tail_start, eocd_pos, &eocd)?;
	debug!(?bounds, "located central directory");

	let directory_end = bounds.directory_offset + bounds.directory_size;
	if directory_end != tail_start + records_start_in_tail as u64 {
		return Err(Error::new(ErrorKind::FormatInvalidSignature).with_message(format!(
			"central directory [{}, {}) does not reach its end record at {}",
			bounds.directory_offset,
			directory_end,
			tail_start + records_start_in_tail as u64,
		)));
	}

	if bounds.directory_offset >= tail_start {
		let start = (bounds.directory_offset - tail_start) as usize;
		let directory = parse_full_directory(
			&tail[start..records_start_in_tail],
			&bounds,
			archive_size,
			part_size,
		)?;
		return Ok(TailParse::Complete(directory));
	}

	// the tail holds only a suffix of the directory: recover what it can
	let part_count = bounds.directory_offset.div_ceil(part_size);
	let files = partial_records(&tail[..records_start_in_tail], tail_start, part_size);
	let safe_first_part = safe_first_part(&files, part_size).min(part_count);
	debug!(
		known = files.len(),
		%safe_first_part,
		"parsed partial central directory"
	);

	let known_floor = files
		.first()
		.map_or(bounds.directory_offset, |f| f.local_header_offset);
	let parts = CentralDirectory::build_index(&files, part_size, bounds.directory_offset);
	let partial = CentralDirectory {
		files,
		parts,
		part_size,
		archive_size,
		directory_offset: bounds.directory_offset,
		directory_size: bounds.directory_size,
		complete: false,
		known_floor,
	};

	Ok(TailParse::NeedsMore {
		partial,
		bounds,
		safe_first_part,
	})
}

/// Decode a fully assembled central directory.
///
/// `directory` must hold exactly the bytes
/// `[bounds.directory_offset, bounds.directory_offset + bounds.directory_size)`.
#[instrument(level = "debug", skip(directory, bounds))]
pub fn parse_full_directory(
	directory: &[u8],
	bounds: &DirectoryBounds,
	archive_size: u64,
	part_size: u64,
) -> Result<CentralDirectory> {
	if directory.len() as u64 != bounds.directory_size {
		return Err(Error::new(ErrorKind::FormatTruncated).with_message(format!(
			"assembled central directory is {} bytes, end record declares {}",
			directory.len(),
			bounds.directory_size
		)));
	}

	let mut files = walk_records(directory, bounds.directory_offset, part_size)?;
	if files.len() as u64 != bounds.record_count {
		return Err(Error::new(ErrorKind::FormatTruncated).with_message(format!(
			"central directory holds {} records, end record declares {}",
			files.len(),
			bounds.record_count
		)));
	}

	files.sort_by_key(|file| file.local_header_offset);
	let parts = CentralDirectory::build_index(&files, part_size, bounds.directory_offset);

	let directory = CentralDirectory {
		files,
		parts,
		part_size,
		archive_size,
		directory_offset: bounds.directory_offset,
		directory_size: bounds.directory_size,
		complete: true,
		known_floor: 0,
	};
	directory.validate()?;
	Ok(directory)
}

/// Scan backward for the end-of-central-directory record.
///
/// A comment may follow the record, so every candidate position is checked
/// until one parses and runs exactly to the end of the buffer.
fn find_eocd(tail: &[u8]) -> Result<(usize, EndOfCentralDirectory)> {
	let Some(scan_top) = tail.len().checked_sub(EOCD_LEN) else {
		return Err(Error::new(ErrorKind::FormatNoEocd)
			.with_message("archive is shorter than an end-of-central-directory record"));
	};

	for pos in (0..=scan_top).rev() {
		if u32::from_le_bytes([tail[pos], tail[pos + 1], tail[pos + 2], tail[pos + 3]])
			!= EOCD_MAGIC
		{
			continue;
		}
		let Ok((_, eocd)) = EndOfCentralDirectory::from_bytes((&tail[pos..], 0)) else {
			continue;
		};
		if pos + EOCD_LEN + eocd.comment.len() == tail.len() {
			trace!(%pos, "found end-of-central-directory record");
			return Ok((pos, eocd));
		}
	}

	Err(Error::new(ErrorKind::FormatNoEocd))
}

/// Resolve the directory bounds from the end record, following the ZIP64
/// locator when one precedes it. Returns the bounds and the tail offset at
/// which the directory's end records begin.
fn resolve_bounds(
	tail: &[u8],
	tail_start: u64,
	eocd_pos: usize,
	eocd: &EndOfCentralDirectory,
) -> Result<(DirectoryBounds, usize)> {
	let split = |disk: u16| disk != 0 && disk != 0xFFFF;
	if split(eocd.disk_number) || split(eocd.directory_disk) {
		return Err(Error::new(ErrorKind::Zip64Unsupported)
			.with_message("multi-volume archives are not supported"));
	}

	let locator_pos = eocd_pos.checked_sub(EOCD64_LOCATOR_LEN);
	let locator = locator_pos.and_then(|pos| {
		let magic =
			u32::from_le_bytes([tail[pos], tail[pos + 1], tail[pos + 2], tail[pos + 3]]);
		if magic != EOCD64_LOCATOR_MAGIC {
			return None;
		}
		Zip64Locator::from_bytes((&tail[pos..], 0)).ok().map(|(_, l)| l)
	});

	if let Some(locator) = locator {
		if locator.total_disks > 1 || locator.directory_disk != 0 {
			return Err(Error::new(ErrorKind::Zip64Unsupported)
				.with_message("multi-volume archives are not supported"));
		}
		if locator.eocd64_offset < tail_start {
			return Err(Error::new(ErrorKind::FormatTruncated).with_message(
				"zip64 end-of-central-directory record lies outside the fetched tail",
			));
		}
		let pos = (locator.eocd64_offset - tail_start) as usize;
		let magic = u32::from_le_bytes([tail[pos], tail[pos + 1], tail[pos + 2], tail[pos + 3]]);
		if magic != EOCD64_MAGIC {
			return Err(Error::new(ErrorKind::FormatInvalidSignature)
				.with_message("zip64 locator does not point at a zip64 end record"));
		}
		let (_, eocd64) = Zip64EndOfCentralDirectory::from_bytes((&tail[pos..], 0))
			.map_err(Error::from_deku)?;
		if eocd64.disk_number != 0 || eocd64.directory_disk != 0 {
			return Err(Error::new(ErrorKind::Zip64Unsupported)
				.with_message("multi-volume archives are not supported"));
		}
		let bounds = DirectoryBounds {
			directory_offset: eocd64.directory_offset,
			directory_size: eocd64.directory_size,
			record_count: eocd64.total_records,
		};
		return Ok((bounds, pos));
	}

	if eocd.directory_offset == u32::MAX || eocd.directory_size == u32::MAX {
		return Err(Error::new(ErrorKind::FormatInvalidSignature)
			.with_message("zip64-sized end record without a zip64 locator"));
	}

	let bounds = DirectoryBounds {
		directory_offset: eocd.directory_offset as u64,
		directory_size: eocd.directory_size as u64,
		record_count: eocd.total_records as u64,
	};
	Ok((bounds, eocd_pos))
}

/// Walk a run of central directory records covering exactly `buffer`.
fn walk_records(buffer: &[u8], base_offset: u64, part_size: u64) -> Result<Vec<FileMetadata>> {
	let mut files = Vec::new();
	let mut pos = 0usize;

	while pos < buffer.len() {
		let (rest, record) = match CentralRecord::from_bytes((&buffer[pos..], 0)) {
			Ok(((rest, _), record)) => (rest, record),
			Err(DekuError::Incomplete(_)) => {
				return Err(Error::new(ErrorKind::FormatTruncated).with_message(format!(
					"central directory record at offset {} cut short",
					base_offset + pos as u64
				)))
			}
			Err(err) => return Err(Error::from_deku(err)),
		};
		pos = buffer.len() - rest.len();
		files.push(record_metadata(record, part_size)?);
	}

	Ok(files)
}

/// Best-effort decode of the directory suffix present in the tail.
///
/// The first bytes may cut a record anywhere, so every candidate signature
/// is tried until one chains cleanly to the end of the directory region.
/// Early dispatch also needs the records in archive order, which burst
/// writers guarantee; an unordered (foreign) directory yields no usable
/// partial view, only a slower start.
fn partial_records(region: &[u8], tail_start: u64, part_size: u64) -> Vec<FileMetadata> {
	let mut search = 0usize;
	while let Some(found) = find_magic(&region[search..], CENTRAL_RECORD_MAGIC) {
		let candidate = search + found;
		match walk_records(&region[candidate..], tail_start + candidate as u64, part_size) {
			Ok(files) if is_sorted(&files) => return files,
			_ => search = candidate + 1,
		}
	}
	Vec::new()
}

fn find_magic(buffer: &[u8], magic: u32) -> Option<usize> {
	let needle = magic.to_le_bytes();
	buffer
		.windows(4)
		.position(|window| window == needle)
}

fn is_sorted(files: &[FileMetadata]) -> bool {
	files
		.windows(2)
		.all(|w| w[0].local_header_offset < w[1].local_header_offset)
}

/// The smallest part index for which a sorted record suffix is known to
/// list every member: either its first member starts exactly on the part
/// boundary, or every member from an earlier part onward is known.
fn safe_first_part(files: &[FileMetadata], part_size: u64) -> u64 {
	let Some(first) = files.first() else {
		return u64::MAX;
	};
	let offset = first.local_header_offset;
	if offset % part_size == 0 {
		offset / part_size
	} else {
		offset / part_size + 1
	}
}

/// Decode one record into member metadata.
fn record_metadata(record: CentralRecord, part_size: u64) -> Result<FileMetadata> {
	let name = String::from_utf8(record.name)
		.map_err(|_| Error::new(ErrorKind::FormatInvalidSignature).with_message("member name is not valid utf-8"))?;

	let need_uncompressed = record.uncompressed_size == u32::MAX;
	let need_compressed = record.compressed_size == u32::MAX;
	let need_offset = record.local_header_offset == u32::MAX;
	let zip64 = if need_uncompressed || need_compressed || need_offset {
		Zip64Extra::find(&record.extra, need_uncompressed, need_compressed, need_offset)
			.ok_or_else(|| {
				Error::new(ErrorKind::FormatTruncated)
					.with_message(format!("member {name:?} is missing its zip64 extra field"))
			})?
	} else {
		Zip64Extra::default()
	};

	let uncompressed_size = zip64
		.uncompressed_size
		.unwrap_or(record.uncompressed_size as u64);
	let compressed_size = zip64
		.compressed_size
		.unwrap_or(record.compressed_size as u64);
	let local_header_offset = zip64
		.local_header_offset
		.unwrap_or(record.local_header_offset as u64);

	let unix = find_unix_extra(&record.extra).map(|field| UnixMetadata {
		mode: field.mode,
		uid: field.uid,
		gid: field.gid,
	});

	let is_directory = name.ends_with('/');
	let is_symlink = record.method == METHOD_STORE
		&& unix.is_some_and(|u| u.mode & 0o170000 == 0o120000);

	Ok(FileMetadata {
		part_index: local_header_offset / part_size,
		name,
		local_header_offset,
		compressed_size,
		uncompressed_size,
		crc32: record.crc32,
		method: record.method,
		unix,
		is_directory,
		is_symlink,
		has_descriptor: record.flags & crate::constants::FLAG_DATA_DESCRIPTOR != 0,
		// burst writers saturate both size fields on every member that was
		// given a 64-bit descriptor, so this is the descriptor-width signal
		zip64_descriptor: need_uncompressed && need_compressed,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::constants::BASE_ALIGNMENT;

	fn synthetic(offset: u64) -> FileMetadata {
		FileMetadata {
			name: format!("f{offset}"),
			local_header_offset: offset,
			compressed_size: 100,
			uncompressed_size: 100,
			crc32: 0,
			method: 93,
			part_index: offset / BASE_ALIGNMENT,
			unix: None,
			is_directory: false,
			is_symlink: false,
			has_descriptor: true,
			zip64_descriptor: false,
		}
	}

	#[test]
	fn safe_first_part_needs_a_boundary_or_a_predecessor() {
		const P: u64 = BASE_ALIGNMENT;

		// first known member exactly on a boundary: that part is safe
		let files = vec![synthetic(2 * P), synthetic(2 * P + 200)];
		assert_eq!(safe_first_part(&files, P), 2);

		// first known member inside part 2: only part 3 onward is safe
		let files = vec![synthetic(2 * P + 64), synthetic(3 * P + 10)];
		assert_eq!(safe_first_part(&files, P), 3);

		// nothing known: nothing safe
		assert_eq!(safe_first_part(&[], P), u64::MAX);
	}

	#[test]
	fn find_magic_sees_unaligned_signatures() {
		let mut buffer = vec![0x11u8; 7];
		buffer.extend_from_slice(&CENTRAL_RECORD_MAGIC.to_le_bytes());
		assert_eq!(find_magic(&buffer, CENTRAL_RECORD_MAGIC), Some(7));
		assert_eq!(find_magic(&buffer[..8], CENTRAL_RECORD_MAGIC), None);
	}

	#[test]
	fn eocd_scan_survives_a_decoy_in_the_comment() {
		use crate::format::zip::EndOfCentralDirectory;
		use deku::DekuContainerWrite;

		// a comment that itself contains an end-record signature plus
		// plausible-looking bytes whose comment-length field lies
		let mut comment = EOCD_MAGIC.to_le_bytes().to_vec();
		comment.extend_from_slice(&[0u8; 18]);
		comment[20] = 5;

		let eocd = EndOfCentralDirectory {
			disk_number: 0,
			directory_disk: 0,
			records_this_disk: 0,
			total_records: 0,
			directory_size: 0,
			directory_offset: 0,
			comment_length: comment.len() as u16,
			comment,
		};
		let tail = eocd.to_bytes().unwrap();

		let (pos, found) = find_eocd(&tail).unwrap();
		assert_eq!(pos, 0);
		assert_eq!(found.comment.len(), 22);

		// and the whole (empty) archive parses
		let archive_size = tail.len() as u64;
		match parse_archive_tail(&tail, 0, archive_size, crate::constants::BASE_ALIGNMENT)
			.unwrap()
		{
			super::TailParse::Complete(directory) => {
				assert_eq!(directory.files.len(), 0);
				assert_eq!(directory.part_count(), 0);
			}
			other => panic!("expected complete parse, got {other:?}"),
		}
	}

	#[test]
	fn missing_eocd_is_its_own_error() {
		let err = parse_archive_tail(&[0u8; 300], 0, 300, crate::constants::BASE_ALIGNMENT)
			.unwrap_err();
		assert_eq!(err.kind, ErrorKind::FormatNoEocd);
	}
}

//! ZIP envelope records.
//!
//! [Spec (APPNOTE 6.3.10)](https://pkware.cachefly.net/webdocs/casestudies/APPNOTE.TXT)
//!
//! Burst uses a deliberately narrow slice of ZIP: local headers with flag
//! bit 3 and trailing data descriptors for Zstandard members, stored members
//! with known sizes for directories, symlinks and empty files, a central
//! directory in archive order, and ZIP64 records when offsets or counts
//! outgrow their 32-bit fields. Numbers are little-endian throughout.

use deku::prelude::*;

use crate::constants::{UNIX_EXTRA_ID, ZIP64_EXTRA_ID};

/// Fixed wire length of a local file header, before name and extra field.
pub const LOCAL_HEADER_LEN: usize = 30;

/// Fixed wire length of a central directory record, before its variable tail.
pub const CENTRAL_RECORD_LEN: usize = 46;

/// Fixed wire length of the end-of-central-directory record, before comment.
pub const EOCD_LEN: usize = 22;

/// Wire length of the ZIP64 end-of-central-directory locator.
pub const EOCD64_LOCATOR_LEN: usize = 20;

/// Wire length of the ZIP64 end-of-central-directory record burst writes.
pub const EOCD64_LEN: usize = 56;

/// Wire length of a data descriptor with 32-bit sizes.
pub const DESCRIPTOR_LEN: u64 = 16;

/// Wire length of a data descriptor with 64-bit sizes.
pub const DESCRIPTOR64_LEN: u64 = 24;

/// A local file header (`PK\x03\x04`).
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x03\x04")]
pub struct LocalFileHeader {
	/// Minimum ZIP feature version needed to extract this member.
	pub version_needed: u16,

	/// General-purpose flags; burst only ever sets bit 3.
	pub flags: u16,

	/// Compression method: 93 (Zstandard) or 0 (store).
	pub method: u16,

	/// DOS modification time (always zero in burst archives).
	pub mod_time: u16,

	/// DOS modification date (always zero in burst archives).
	pub mod_date: u16,

	/// CRC-32 of the uncompressed content; zero when a descriptor follows.
	pub crc32: u32,

	/// Compressed size; zero when a descriptor follows.
	pub compressed_size: u32,

	/// Uncompressed size; zero when a descriptor follows.
	pub uncompressed_size: u32,

	/// Length of the file name in bytes.
	pub name_length: u16,

	/// Length of the extra field in bytes (always zero in burst archives;
	/// per-file metadata lives in the central directory).
	pub extra_length: u16,

	/// File name bytes (UTF-8).
	#[deku(count = "name_length")]
	pub name: Vec<u8>,

	/// Extra field bytes.
	#[deku(count = "extra_length")]
	pub extra: Vec<u8>,
}

impl LocalFileHeader {
	/// Total wire length of the header.
	pub fn wire_length(&self) -> usize {
		LOCAL_HEADER_LEN + self.name.len() + self.extra.len()
	}
}

/// A data descriptor with 32-bit sizes (`PK\x07\x08`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x07\x08")]
pub struct DataDescriptor {
	/// CRC-32 of the uncompressed content.
	pub crc32: u32,

	/// Compressed size, including any interleaved skippable frames.
	pub compressed_size: u32,

	/// Uncompressed size.
	pub uncompressed_size: u32,
}

/// A data descriptor with 64-bit sizes, used when the member needs ZIP64.
#[derive(Clone, Copy, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x07\x08")]
pub struct DataDescriptor64 {
	/// CRC-32 of the uncompressed content.
	pub crc32: u32,

	/// Compressed size, including any interleaved skippable frames.
	pub compressed_size: u64,

	/// Uncompressed size.
	pub uncompressed_size: u64,
}

/// A central directory record (`PK\x01\x02`).
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x01\x02")]
pub struct CentralRecord {
	/// Version and host system of the writer.
	pub version_made_by: u16,

	/// Minimum ZIP feature version needed to extract this member.
	pub version_needed: u16,

	/// General-purpose flags.
	pub flags: u16,

	/// Compression method.
	pub method: u16,

	/// DOS modification time.
	pub mod_time: u16,

	/// DOS modification date.
	pub mod_date: u16,

	/// CRC-32 of the uncompressed content.
	pub crc32: u32,

	/// Compressed size, `0xFFFFFFFF` when carried in the ZIP64 extra field.
	pub compressed_size: u32,

	/// Uncompressed size, `0xFFFFFFFF` when carried in the ZIP64 extra field.
	pub uncompressed_size: u32,

	/// Length of the file name in bytes.
	pub name_length: u16,

	/// Length of the extra field in bytes.
	pub extra_length: u16,

	/// Length of the comment in bytes.
	pub comment_length: u16,

	/// Disk the member starts on; burst archives are single-volume.
	pub disk_start: u16,

	/// Internal attributes.
	pub internal_attributes: u16,

	/// External attributes; the Unix mode lives in the high 16 bits.
	pub external_attributes: u32,

	/// Offset of the member's local header, `0xFFFFFFFF` when in ZIP64 extra.
	pub local_header_offset: u32,

	/// File name bytes (UTF-8).
	#[deku(count = "name_length")]
	pub name: Vec<u8>,

	/// Extra field bytes.
	#[deku(count = "extra_length")]
	pub extra: Vec<u8>,

	/// Comment bytes.
	#[deku(count = "comment_length")]
	pub comment: Vec<u8>,
}

impl CentralRecord {
	/// Total wire length of the record.
	pub fn wire_length(&self) -> usize {
		CENTRAL_RECORD_LEN + self.name.len() + self.extra.len() + self.comment.len()
	}
}

/// The end-of-central-directory record (`PK\x05\x06`).
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x05\x06")]
pub struct EndOfCentralDirectory {
	/// Number of this disk.
	pub disk_number: u16,

	/// Disk the central directory starts on.
	pub directory_disk: u16,

	/// Central directory records on this disk.
	pub records_this_disk: u16,

	/// Central directory records in total, `0xFFFF` when ZIP64.
	pub total_records: u16,

	/// Size of the central directory in bytes, `0xFFFFFFFF` when ZIP64.
	pub directory_size: u32,

	/// Offset of the central directory, `0xFFFFFFFF` when ZIP64.
	pub directory_offset: u32,

	/// Length of the archive comment.
	pub comment_length: u16,

	/// Archive comment.
	#[deku(count = "comment_length")]
	pub comment: Vec<u8>,
}

/// The ZIP64 end-of-central-directory locator (`PK\x06\x07`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x06\x07")]
pub struct Zip64Locator {
	/// Disk the ZIP64 end-of-central-directory record starts on.
	pub directory_disk: u32,

	/// Absolute offset of the ZIP64 end-of-central-directory record.
	pub eocd64_offset: u64,

	/// Total number of disks.
	pub total_disks: u32,
}

/// The ZIP64 end-of-central-directory record (`PK\x06\x06`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x06\x06")]
pub struct Zip64EndOfCentralDirectory {
	/// Size of the remainder of this record (44 for the fixed layout).
	pub record_size: u64,

	/// Version and host system of the writer.
	pub version_made_by: u16,

	/// Minimum ZIP feature version needed to read this record.
	pub version_needed: u16,

	/// Number of this disk.
	pub disk_number: u32,

	/// Disk the central directory starts on.
	pub directory_disk: u32,

	/// Central directory records on this disk.
	pub records_this_disk: u64,

	/// Central directory records in total.
	pub total_records: u64,

	/// Size of the central directory in bytes.
	pub directory_size: u64,

	/// Offset of the central directory.
	pub directory_offset: u64,
}

/// Unix metadata carried in burst's own extra field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct UnixExtraField {
	/// Extra-field layout version; currently always 1.
	pub version: u8,

	/// Full `st_mode`, file-type bits included.
	pub mode: u32,

	/// Owning user id.
	pub uid: u32,

	/// Owning group id.
	pub gid: u32,
}

/// Wire length of [`UnixExtraField`].
pub const UNIX_EXTRA_LEN: u16 = 13;

/// One block in an extra field: `[id u16][len u16][len bytes]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtraBlock<'data> {
	/// Block ID.
	pub id: u16,

	/// Block payload.
	pub data: &'data [u8],
}

/// Iterate the blocks of an extra field.
///
/// Stops silently at a trailing fragment too short to hold a block header,
/// which some ZIP writers emit as padding.
pub fn extra_blocks(extra: &[u8]) -> impl Iterator<Item = ExtraBlock<'_>> {
	let mut rest = extra;
	std::iter::from_fn(move || {
		if rest.len() < 4 {
			return None;
		}
		let id = u16::from_le_bytes([rest[0], rest[1]]);
		let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
		if rest.len() < 4 + len {
			return None;
		}
		let block = ExtraBlock {
			id,
			data: &rest[4..4 + len],
		};
		rest = &rest[4 + len..];
		Some(block)
	})
}

/// Find and decode burst's Unix extra field, if present.
pub fn find_unix_extra(extra: &[u8]) -> Option<UnixExtraField> {
	extra_blocks(extra)
		.find(|block| block.id == UNIX_EXTRA_ID)
		.and_then(|block| UnixExtraField::from_bytes((block.data, 0)).ok())
		.map(|(_, field)| field)
}

/// Values recovered from a ZIP64 extended-information extra field.
///
/// Only fields whose 32-bit counterpart was saturated appear in the block,
/// in the fixed order uncompressed size, compressed size, header offset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Zip64Extra {
	/// 64-bit uncompressed size, when the record's field was `0xFFFFFFFF`.
	pub uncompressed_size: Option<u64>,

	/// 64-bit compressed size, when the record's field was `0xFFFFFFFF`.
	pub compressed_size: Option<u64>,

	/// 64-bit header offset, when the record's field was `0xFFFFFFFF`.
	pub local_header_offset: Option<u64>,
}

impl Zip64Extra {
	/// Decode the ZIP64 extra block of a record, guided by which of the
	/// record's own fields were saturated.
	pub fn find(
		extra: &[u8],
		need_uncompressed: bool,
		need_compressed: bool,
		need_offset: bool,
	) -> Option<Self> {
		let block = extra_blocks(extra).find(|block| block.id == ZIP64_EXTRA_ID)?;
		let mut out = Self::default();
		let mut rest = block.data;

		let mut take = || -> Option<u64> {
			let (head, tail) = rest.split_first_chunk::<8>()?;
			rest = tail;
			Some(u64::from_le_bytes(*head))
		};

		if need_uncompressed {
			out.uncompressed_size = Some(take()?);
		}
		if need_compressed {
			out.compressed_size = Some(take()?);
		}
		if need_offset {
			out.local_header_offset = Some(take()?);
		}
		Some(out)
	}

	/// Encode the block payload for the fields that are present.
	pub fn to_payload(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(24);
		for value in [
			self.uncompressed_size,
			self.compressed_size,
			self.local_header_offset,
		]
		.into_iter()
		.flatten()
		{
			out.extend_from_slice(&value.to_le_bytes());
		}
		out
	}
}

/// Append one extra-field block to a buffer.
pub fn push_extra_block(out: &mut Vec<u8>, id: u16, payload: &[u8]) {
	out.extend_from_slice(&id.to_le_bytes());
	out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
	out.extend_from_slice(payload);
}

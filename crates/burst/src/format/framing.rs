//! Zstandard framing, including burst's skippable frames.
//!
//! [Spec (Informational RFC8878)](https://datatracker.ietf.org/doc/html/rfc8878)
//!
//! Only the framing layer is modelled here: enough to measure a frame, read
//! its declared content size, and build the two skippable frames burst
//! emits. Block payloads and entropy coding stay opaque; decompression is
//! the sink's business.
//!
//! - Zstandard frames are `[magic][header][blocks...][checksum?]`
//! - Skippable frames are `[magic][u32 size][size bytes]` and any magic in
//!   `0x184D2A50..=0x184D2A5F`; a standard decoder skips them unnoticed
//! - Burst claims `0x184D2A5B` for both padding (payload of zeroes) and
//!   start-of-part frames (16-byte payload, type byte 0x01, then the open
//!   file's uncompressed offset as a u64)

use deku::prelude::*;

use crate::constants::{BURST_SKIPPABLE_MAGIC, START_OF_PART_TAG};

/// Header of a Zstandard frame: magic through frame content size, no blocks.
///
/// [Spec](https://datatracker.ietf.org/doc/html/rfc8878#name-zstandard-frames)
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"\x28\xB5\x2F\xFD")]
pub struct ZstandardFrameHeader {
	/// Describes which other fields are present in the frame header.
	pub frame_descriptor: ZstandardFrameDescriptor,

	/// Minimum memory needed to decode the frame.
	#[deku(bytes = 1, cond = "!frame_descriptor.single_segment")]
	pub window_descriptor: Option<u8>,

	/// Dictionary ID. Burst never writes one.
	#[deku(count = "frame_descriptor.did_length()")]
	pub did: Vec<u8>,

	/// Original (uncompressed) size.
	///
	/// Optional in Zstandard at large; burst requires it on every frame,
	/// since the extractor places decoded bytes without decompressing first.
	#[deku(count = "frame_descriptor.fcs_length()")]
	pub frame_content_size: Vec<u8>,
}

impl ZstandardFrameHeader {
	/// The declared uncompressed length of the frame's content in bytes.
	///
	/// `None` when the header carries no frame content size.
	pub fn uncompressed_size(&self) -> Option<u64> {
		match self.frame_descriptor.fcs_length() {
			0 => None,
			1 => Some(u64::from(self.frame_content_size[0])),
			2 => Some(
				u64::from(u16::from_le_bytes([
					self.frame_content_size[0],
					self.frame_content_size[1],
				])) + 256,
			),
			4 => Some(u64::from(u32::from_le_bytes([
				self.frame_content_size[0],
				self.frame_content_size[1],
				self.frame_content_size[2],
				self.frame_content_size[3],
			]))),
			8 => {
				let mut bytes = [0u8; 8];
				bytes.copy_from_slice(&self.frame_content_size);
				Some(u64::from_le_bytes(bytes))
			}
			_ => unreachable!(),
		}
	}
}

/// Frame descriptor byte of a [`ZstandardFrameHeader`].
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct ZstandardFrameDescriptor {
	/// Frame-content-size field size flag; interpret via
	/// [`fcs_length()`](Self::fcs_length), not directly.
	#[deku(bits = 2)]
	pub fcs_size: u8,

	/// Data must be regenerated within a single continuous memory segment.
	#[deku(bits = 1)]
	pub single_segment: bool,

	/// Unused. Always false.
	#[deku(bits = 1)]
	pub unused_bit: bool,

	/// Reserved. Always false.
	#[deku(bits = 1)]
	pub reserved_bit: bool,

	/// Whether the frame ends with a 4-byte xxhash64 checksum.
	#[deku(bits = 1)]
	pub checksum: bool,

	/// Dictionary-ID field size flag; interpret via
	/// [`did_length()`](Self::did_length).
	#[deku(bits = 2)]
	pub did_size: u8,
}

impl ZstandardFrameDescriptor {
	/// The length in bytes of the dictionary-ID field.
	pub fn did_length(&self) -> usize {
		match self.did_size {
			0 => 0,
			1 => 1,
			2 => 2,
			3 => 4,
			_ => unreachable!(),
		}
	}

	/// The length in bytes of the frame-content-size field.
	pub fn fcs_length(&self) -> usize {
		match self.fcs_size {
			0 if self.single_segment => 1,
			0 => 0,
			1 => 2,
			2 => 4,
			3 => 8,
			_ => unreachable!(),
		}
	}
}

/// The 3-byte header of a Zstandard block.
///
/// [Spec](https://datatracker.ietf.org/doc/html/rfc8878#name-blocks)
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ZstandardBlockHeader {
	#[deku(bits = 5)]
	size_low: u8,

	/// The block type.
	pub block_type: ZstandardBlockType,

	/// Whether this is the last block in the frame.
	#[deku(bits = 1)]
	pub last: bool,

	#[deku(bits = 16)]
	size_high: u16,
}

/// Wire length of a block header.
pub const BLOCK_HEADER_LEN: usize = 3;

impl ZstandardBlockHeader {
	fn size(&self) -> u32 {
		let [a, b] = u16::to_be_bytes(self.size_high);
		let c = self.size_low << 3;
		u32::from_be_bytes([0, a, b, c]) >> 3
	}

	/// How many bytes of payload follow this header.
	///
	/// `None` for the reserved block type, which only a corrupt frame has.
	pub fn payload_length(&self) -> Option<u32> {
		match self.block_type {
			ZstandardBlockType::Raw | ZstandardBlockType::Compressed => Some(self.size()),
			ZstandardBlockType::Rle => Some(1),
			ZstandardBlockType::Reserved => None,
		}
	}
}

/// The type of a Zstandard block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(
	endian = "endian",
	ctx = "endian: deku::ctx::Endian",
	type = "u8",
	bits = "2"
)]
pub enum ZstandardBlockType {
	/// An uncompressed block.
	#[deku(id = "0b00")]
	Raw,

	/// A block with a single byte repeated many times.
	#[deku(id = "0b01")]
	Rle,

	/// A compressed block.
	#[deku(id = "0b10")]
	Compressed,

	/// Reserved.
	#[deku(id = "0b11")]
	Reserved,
}

/// A skippable frame with burst's magic.
#[derive(Clone, Debug, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SkippableFrame {
	#[deku(bytes = 4)]
	magic: u32,

	#[deku(bytes = 4)]
	size: u32,

	/// The payload contained in the frame.
	#[deku(count = "size")]
	pub data: Vec<u8>,
}

impl SkippableFrame {
	/// A padding frame: zero-filled payload of the given length.
	pub fn padding(payload_length: u32) -> Self {
		Self {
			magic: BURST_SKIPPABLE_MAGIC,
			size: payload_length,
			data: vec![0; payload_length as usize],
		}
	}

	/// A start-of-part frame carrying the open file's uncompressed offset.
	pub fn start_of_part(uncompressed_offset: u64) -> Self {
		let mut data = vec![0; 16];
		data[0] = START_OF_PART_TAG;
		data[1..9].copy_from_slice(&uncompressed_offset.to_le_bytes());
		Self {
			magic: BURST_SKIPPABLE_MAGIC,
			size: 16,
			data,
		}
	}

	/// Whether this frame carries burst's magic.
	pub fn is_burst(&self) -> bool {
		self.magic == BURST_SKIPPABLE_MAGIC
	}

	/// Decode a start-of-part payload from this frame, if it is one.
	pub fn start_of_part_offset(&self) -> Option<u64> {
		start_of_part_offset(&self.data)
	}
}

/// Decode a start-of-part payload.
///
/// Returns `None` for any other skippable payload, which is padding.
pub fn start_of_part_offset(payload: &[u8]) -> Option<u64> {
	if payload.len() != 16 || payload[0] != START_OF_PART_TAG {
		return None;
	}
	let mut bytes = [0u8; 8];
	bytes.copy_from_slice(&payload[1..9]);
	Some(u64::from_le_bytes(bytes))
}

//! Frame identification: the first step of part processing.
//!
//! [`parse_next_frame`] looks at the start of a buffer and reports what
//! frame-level element sits there and how long it is. It never consumes
//! anything and never keeps state: callers advance their own cursor by
//! [`FrameInfo::total_size`] once the whole element is in the buffer.

use deku::{DekuContainerRead, DekuError};
use tracing::trace;

use crate::{
	constants::{
		BURST_SKIPPABLE_MAGIC, CENTRAL_RECORD_MAGIC, DATA_DESCRIPTOR_MAGIC, EOCD_MAGIC,
		LOCAL_HEADER_MAGIC, START_OF_PART_TAG, ZSTANDARD_FRAME_MAGIC,
	},
	error::{Error, ErrorKind},
	format::framing::{ZstandardBlockHeader, ZstandardFrameHeader, BLOCK_HEADER_LEN},
	format::zip::{DESCRIPTOR64_LEN, DESCRIPTOR_LEN, LOCAL_HEADER_LEN},
};

/// Which data-descriptor layout the current member uses.
///
/// The descriptor itself does not say; the central directory entry of the
/// member being read does, and the caller passes it down.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DescriptorWidth {
	/// 16-byte descriptor with 32-bit sizes.
	#[default]
	Standard,

	/// 24-byte descriptor with 64-bit sizes (ZIP64 member).
	Zip64,
}

impl DescriptorWidth {
	/// Wire length of a descriptor of this width.
	pub fn wire_length(self) -> u64 {
		match self {
			Self::Standard => DESCRIPTOR_LEN,
			Self::Zip64 => DESCRIPTOR64_LEN,
		}
	}
}

/// A frame-level element identified at the start of a buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameInfo {
	/// A Zstandard compressed frame declaring its content size.
	ZstdCompressed {
		/// Wire length of the whole frame.
		total_size: usize,
		/// Declared uncompressed length of the frame's content.
		uncompressed_size: u64,
	},

	/// A burst padding frame.
	BurstPadding {
		/// Wire length of the whole frame.
		total_size: usize,
	},

	/// A burst start-of-part frame.
	BurstStartOfPart {
		/// Wire length of the whole frame (always 24).
		total_size: usize,
		/// Uncompressed bytes of the open file written before this point.
		uncompressed_offset: u64,
	},

	/// A ZIP local file header.
	ZipLocalHeader {
		/// Wire length of the header including name and extra field.
		total_size: usize,
	},

	/// A ZIP data descriptor.
	ZipDataDescriptor {
		/// Wire length: 16 or 24 depending on [`DescriptorWidth`].
		total_size: usize,
	},

	/// The first central directory record (or the end record of an empty
	/// archive): the body ends here.
	CentralDirectorySentinel,
}

impl FrameInfo {
	/// Wire length of the element; zero for the sentinel.
	pub fn total_size(&self) -> usize {
		match self {
			FrameInfo::ZstdCompressed { total_size, .. }
			| FrameInfo::BurstPadding { total_size }
			| FrameInfo::BurstStartOfPart { total_size, .. }
			| FrameInfo::ZipLocalHeader { total_size }
			| FrameInfo::ZipDataDescriptor { total_size } => *total_size,
			FrameInfo::CentralDirectorySentinel => 0,
		}
	}
}

/// Why [`parse_next_frame`] could not identify a frame.
#[derive(Debug)]
pub enum FrameError {
	/// The buffer ends before the element does; feed more bytes and retry.
	NeedMoreData,

	/// The bytes cannot be a frame-level element.
	Invalid(Error),
}

/// Identify the frame-level element at the start of `buffer`.
///
/// On success the whole element is present in the buffer and its length is
/// reported in the returned [`FrameInfo`]. A buffer that merely ends too
/// early yields [`FrameError::NeedMoreData`] and no partial state.
pub fn parse_next_frame(
	buffer: &[u8],
	descriptor: DescriptorWidth,
) -> Result<FrameInfo, FrameError> {
	let Some(magic) = buffer.first_chunk::<4>().map(|m| u32::from_le_bytes(*m)) else {
		return Err(FrameError::NeedMoreData);
	};

	let info = match magic {
		LOCAL_HEADER_MAGIC => local_header(buffer)?,
		DATA_DESCRIPTOR_MAGIC => {
			let total_size = descriptor.wire_length() as usize;
			if buffer.len() < total_size {
				return Err(FrameError::NeedMoreData);
			}
			FrameInfo::ZipDataDescriptor { total_size }
		}
		CENTRAL_RECORD_MAGIC | EOCD_MAGIC => FrameInfo::CentralDirectorySentinel,
		ZSTANDARD_FRAME_MAGIC => zstandard_frame(buffer)?,
		BURST_SKIPPABLE_MAGIC => skippable_frame(buffer)?,
		other => {
			return Err(FrameError::Invalid(
				Error::new(ErrorKind::FormatInvalidSignature)
					.with_message(format!("unrecognised frame magic 0x{other:08X}")),
			))
		}
	};

	trace!(?info, "identified frame");
	Ok(info)
}

fn local_header(buffer: &[u8]) -> Result<FrameInfo, FrameError> {
	if buffer.len() < LOCAL_HEADER_LEN {
		return Err(FrameError::NeedMoreData);
	}
	let name_length = u16::from_le_bytes([buffer[26], buffer[27]]) as usize;
	let extra_length = u16::from_le_bytes([buffer[28], buffer[29]]) as usize;
	let total_size = LOCAL_HEADER_LEN + name_length + extra_length;
	if buffer.len() < total_size {
		return Err(FrameError::NeedMoreData);
	}
	Ok(FrameInfo::ZipLocalHeader { total_size })
}

fn zstandard_frame(buffer: &[u8]) -> Result<FrameInfo, FrameError> {
	let (header_len, header) = match ZstandardFrameHeader::from_bytes((buffer, 0)) {
		Ok(((rest, _), header)) => (buffer.len() - rest.len(), header),
		Err(DekuError::Incomplete(_)) => return Err(FrameError::NeedMoreData),
		Err(err) => return Err(FrameError::Invalid(Error::from_deku(err))),
	};

	let Some(uncompressed_size) = header.uncompressed_size() else {
		return Err(FrameError::Invalid(Error::new(
			ErrorKind::FormatZstdMissingContentSize,
		)));
	};

	// walk block headers to the end of the frame; payloads stay unparsed
	let mut cursor = header_len;
	loop {
		let Some(header_bytes) = buffer.get(cursor..cursor + BLOCK_HEADER_LEN) else {
			return Err(FrameError::NeedMoreData);
		};
		let block = match ZstandardBlockHeader::from_bytes((header_bytes, 0)) {
			Ok((_, block)) => block,
			Err(DekuError::Incomplete(_)) => return Err(FrameError::NeedMoreData),
			Err(err) => return Err(FrameError::Invalid(Error::from_deku(err))),
		};
		let Some(payload) = block.payload_length() else {
			return Err(FrameError::Invalid(
				Error::new(ErrorKind::FormatInvalidSignature)
					.with_message("reserved zstandard block type"),
			));
		};
		cursor += BLOCK_HEADER_LEN + payload as usize;
		if block.last {
			break;
		}
	}

	if header.frame_descriptor.checksum {
		cursor += 4;
	}
	if buffer.len() < cursor {
		return Err(FrameError::NeedMoreData);
	}

	Ok(FrameInfo::ZstdCompressed {
		total_size: cursor,
		uncompressed_size,
	})
}

fn skippable_frame(buffer: &[u8]) -> Result<FrameInfo, FrameError> {
	let Some(size_bytes) = buffer.get(4..8) else {
		return Err(FrameError::NeedMoreData);
	};
	let payload_length =
		u32::from_le_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]) as usize;
	let total_size = 8 + payload_length;
	if buffer.len() < total_size {
		return Err(FrameError::NeedMoreData);
	}

	let payload = &buffer[8..total_size];
	if payload_length == 16 && payload[0] == START_OF_PART_TAG {
		let mut offset = [0u8; 8];
		offset.copy_from_slice(&payload[1..9]);
		Ok(FrameInfo::BurstStartOfPart {
			total_size,
			uncompressed_offset: u64::from_le_bytes(offset),
		})
	} else {
		Ok(FrameInfo::BurstPadding { total_size })
	}
}

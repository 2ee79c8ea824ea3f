//! Archive writer.
//!
//! Streams a tree of members into the aligned format: Zstandard members cut
//! into bounded frames with trailing data descriptors, stored members for
//! directories, symlinks and empty files, then a central directory in
//! archive order and the end records.
//!
//! The writer never seeks. Sizes that are unknown until compression ends go
//! out in data descriptors (flag bit 3), which is what lets an archive be
//! streamed straight to object storage.

use std::io::{Read, Write};

use deku::DekuContainerWrite;
use tracing::{debug, instrument, trace};
use zstd_safe::{CCtx, CParameter};

use crate::{
	align::{AlignmentEngine, Placement},
	constants::{
		CONTENT_FRAME_SIZE, FLAG_DATA_DESCRIPTOR, MAX_SYMLINK_TARGET, METHOD_STORE,
		METHOD_ZSTANDARD, UNIX_EXTRA_ID, VERSION_STORE, VERSION_ZIP64, VERSION_ZSTANDARD,
		ZIP64_EXTRA_ID,
	},
	directory::UnixMetadata,
	error::{Error, ErrorKind, Result},
	format::framing::SkippableFrame,
	format::zip::{
		push_extra_block, CentralRecord, DataDescriptor, DataDescriptor64,
		EndOfCentralDirectory, LocalFileHeader, UnixExtraField, Zip64EndOfCentralDirectory,
		Zip64Extra, Zip64Locator,
	},
};

/// Knobs for [`ArchiveWriter`].
#[derive(Clone, Copy, Debug)]
pub struct WriterOptions {
	/// Zstandard compression level; 0 selects the library default.
	pub level: i32,
}

impl Default for WriterOptions {
	fn default() -> Self {
		Self { level: 0 }
	}
}

/// What [`ArchiveWriter::finish`] reports back.
#[derive(Clone, Copy, Debug)]
pub struct WriteSummary {
	/// Total archive length in bytes.
	pub archive_size: u64,

	/// Number of members written.
	pub members: u64,
}

struct PendingRecord {
	name: String,
	local_header_offset: u64,
	crc32: u32,
	compressed_size: u64,
	uncompressed_size: u64,
	method: u16,
	flags: u16,
	version_needed: u16,
	unix: Option<UnixMetadata>,
	wide_descriptor: bool,
	is_directory: bool,
}

/// Streaming archive writer.
pub struct ArchiveWriter<'writer, W: Write> {
	writer: &'writer mut W,
	offset: u64,
	zstd: CCtx<'writer>,
	align: AlignmentEngine,
	pending: Vec<PendingRecord>,
}

impl<'writer, W: Write> ArchiveWriter<'writer, W> {
	/// Create a new writer at the start of an empty output.
	pub fn new(writer: &'writer mut W, options: WriterOptions) -> Result<Self> {
		trace!("create zstd context");
		let mut zstd = CCtx::try_create()
			.ok_or_else(|| Error::new(ErrorKind::OutOfMemory).with_message("failed allocating zstd context"))?;
		zstd.init(options.level).map_err(map_zstd_error)?;
		zstd.set_parameter(CParameter::ContentSizeFlag(true))
			.map_err(map_zstd_error)?;

		Ok(Self {
			writer,
			offset: 0,
			zstd,
			align: AlignmentEngine::default(),
			pending: Vec::new(),
		})
	}

	/// Add a regular file of known length, streaming its content.
	///
	/// Empty files become stored members; everything else is compressed
	/// into bounded Zstandard frames with a trailing data descriptor.
	#[instrument(level = "debug", skip(self, content))]
	pub fn add_file(
		&mut self,
		name: &str,
		length: u64,
		unix: Option<UnixMetadata>,
		content: &mut impl Read,
	) -> Result<()> {
		if length == 0 {
			return self.add_stored(name.to_string(), &[], unix, false);
		}

		// the descriptor layout is fixed before any data goes out, so give
		// the compressed run generous headroom over the 32-bit limit
		let wide_descriptor = length + length / 16 + (1 << 20) > u32::MAX as u64;
		let name = name.to_string();
		let header_offset = self.place_local_header(
			&name,
			FLAG_DATA_DESCRIPTOR,
			METHOD_ZSTANDARD,
			if wide_descriptor { VERSION_ZSTANDARD.max(VERSION_ZIP64) } else { VERSION_ZSTANDARD },
			0,
			0,
			0,
		)?;
		let data_start = self.offset;

		let mut crc = crc32fast::Hasher::new();
		let mut chunk = vec![0u8; CONTENT_FRAME_SIZE];
		let mut written = 0u64;
		let mut compressed_size = 0u64;

		while written < length {
			let want = CONTENT_FRAME_SIZE.min((length - written) as usize);
			content.read_exact(&mut chunk[..want])?;
			crc.update(&chunk[..want]);

			let frame = self.compress_frame(&chunk[..want])?;
			let at_end = written + want as u64 == length;
			let descriptor_len = if at_end {
				if wide_descriptor { 24 } else { 16 }
			} else {
				0
			};

			match self.align.place(
				self.offset,
				frame.len() as u64 + descriptor_len,
				true,
				!at_end,
			) {
				Placement::Emit {
					start_of_part_after,
				} => {
					self.emit(&frame)?;
					if at_end {
						compressed_size = self.offset - data_start;
						self.emit_descriptor(
							crc.clone().finalize(),
							compressed_size,
							length,
							wide_descriptor,
						)?;
					}
					if start_of_part_after {
						self.emit_start_of_part(written + want as u64)?;
					}
				}
				Placement::PadFirst {
					pad_payload,
					start_of_part,
				} => {
					self.emit_padding(pad_payload)?;
					if start_of_part {
						self.emit_start_of_part(written)?;
					}
					self.emit(&frame)?;
					if at_end {
						compressed_size = self.offset - data_start;
						self.emit_descriptor(
							crc.clone().finalize(),
							compressed_size,
							length,
							wide_descriptor,
						)?;
					}
				}
			}

			written += want as u64;
		}

		debug!(%name, %length, %compressed_size, "wrote file member");
		self.pending.push(PendingRecord {
			name,
			local_header_offset: header_offset,
			crc32: crc.finalize(),
			compressed_size,
			uncompressed_size: length,
			method: METHOD_ZSTANDARD,
			flags: FLAG_DATA_DESCRIPTOR,
			version_needed: if wide_descriptor {
				VERSION_ZSTANDARD.max(VERSION_ZIP64)
			} else {
				VERSION_ZSTANDARD
			},
			unix,
			wide_descriptor,
			is_directory: false,
		});
		Ok(())
	}

	/// Add a directory member. The name gains a trailing `/` if missing.
	#[instrument(level = "debug", skip(self))]
	pub fn add_directory(&mut self, name: &str, unix: Option<UnixMetadata>) -> Result<()> {
		let name = if name.ends_with('/') {
			name.to_string()
		} else {
			format!("{name}/")
		};
		self.add_stored(name, &[], unix, true)
	}

	/// Add a symlink member; the stored content is the link target.
	#[instrument(level = "debug", skip(self))]
	pub fn add_symlink(
		&mut self,
		name: &str,
		target: &[u8],
		unix: Option<UnixMetadata>,
	) -> Result<()> {
		if target.is_empty() || target.len() as u64 > MAX_SYMLINK_TARGET {
			return Err(Error::new(ErrorKind::InvalidArgs)
				.with_message(format!("symlink target of {} bytes", target.len())));
		}
		self.add_stored(name.to_string(), target, unix, false)
	}

	/// Write the central directory and end records, and flush.
	#[instrument(level = "debug", skip(self))]
	pub fn finish(mut self) -> Result<WriteSummary> {
		let directory_offset = self.offset;
		let records = std::mem::take(&mut self.pending);

		for record in &records {
			let bytes = self.central_record(record)?;
			self.emit(&bytes)?;
		}
		let directory_size = self.offset - directory_offset;
		debug!(
			members = records.len(),
			%directory_offset,
			%directory_size,
			"wrote central directory"
		);

		let needs_zip64 = records.len() >= 0xFFFF
			|| directory_offset >= u32::MAX as u64
			|| directory_size >= u32::MAX as u64;
		if needs_zip64 {
			let eocd64_offset = self.offset;
			let eocd64 = Zip64EndOfCentralDirectory {
				record_size: 44,
				version_made_by: VERSION_MADE_BY,
				version_needed: VERSION_ZIP64,
				disk_number: 0,
				directory_disk: 0,
				records_this_disk: records.len() as u64,
				total_records: records.len() as u64,
				directory_size,
				directory_offset,
			};
			let bytes = eocd64.to_bytes().map_err(Error::from_deku)?;
			self.emit(&bytes)?;

			let locator = Zip64Locator {
				directory_disk: 0,
				eocd64_offset,
				total_disks: 1,
			};
			let bytes = locator.to_bytes().map_err(Error::from_deku)?;
			self.emit(&bytes)?;
		}

		let eocd = EndOfCentralDirectory {
			disk_number: 0,
			directory_disk: 0,
			records_this_disk: (records.len() as u64).min(0xFFFF) as u16,
			total_records: (records.len() as u64).min(0xFFFF) as u16,
			directory_size: directory_size.min(u32::MAX as u64) as u32,
			directory_offset: directory_offset.min(u32::MAX as u64) as u32,
			comment_length: 0,
			comment: Vec::new(),
		};
		let bytes = eocd.to_bytes().map_err(Error::from_deku)?;
		self.emit(&bytes)?;

		self.writer.flush()?;
		Ok(WriteSummary {
			archive_size: self.offset,
			members: records.len() as u64,
		})
	}

	/// Emit a whole stored member: header with known sizes, then content.
	///
	/// Placed as one atom so a boundary can never fall inside the raw
	/// content, where there would be no frame to resume parsing at.
	fn add_stored(
		&mut self,
		name: String,
		content: &[u8],
		unix: Option<UnixMetadata>,
		is_directory: bool,
	) -> Result<()> {
		check_name(&name)?;
		let mut crc = crc32fast::Hasher::new();
		crc.update(content);
		let crc32 = crc.finalize();

		let version_needed = if self.offset >= u32::MAX as u64 {
			VERSION_STORE.max(VERSION_ZIP64)
		} else {
			VERSION_STORE
		};
		let atom = 30 + name.len() as u64 + content.len() as u64;
		if let Placement::PadFirst { pad_payload, .. } =
			self.align.place(self.offset, atom, false, false)
		{
			self.emit_padding(pad_payload)?;
		}

		let header_offset = self.offset;
		let header = LocalFileHeader {
			version_needed,
			flags: 0,
			method: METHOD_STORE,
			mod_time: 0,
			mod_date: 0,
			crc32,
			compressed_size: content.len() as u32,
			uncompressed_size: content.len() as u32,
			name_length: name.len() as u16,
			extra_length: 0,
			name: name.clone().into_bytes(),
			extra: Vec::new(),
		};
		let bytes = header.to_bytes().map_err(Error::from_deku)?;
		self.emit(&bytes)?;
		self.emit(content)?;

		debug!(%name, length = content.len(), "wrote stored member");
		self.pending.push(PendingRecord {
			name,
			local_header_offset: header_offset,
			crc32,
			compressed_size: content.len() as u64,
			uncompressed_size: content.len() as u64,
			method: METHOD_STORE,
			flags: 0,
			version_needed,
			unix,
			wide_descriptor: false,
			is_directory,
		});
		Ok(())
	}

	/// Pad if needed and write a local file header; returns its offset.
	#[allow(clippy::too_many_arguments)]
	fn place_local_header(
		&mut self,
		name: &str,
		flags: u16,
		method: u16,
		version_needed: u16,
		crc32: u32,
		compressed_size: u32,
		uncompressed_size: u32,
	) -> Result<u64> {
		check_name(name)?;
		let header_len = 30 + name.len() as u64;
		if let Placement::PadFirst { pad_payload, .. } =
			self.align.place(self.offset, header_len, false, false)
		{
			self.emit_padding(pad_payload)?;
		}

		let header_offset = self.offset;
		let header = LocalFileHeader {
			version_needed,
			flags,
			method,
			mod_time: 0,
			mod_date: 0,
			crc32,
			compressed_size,
			uncompressed_size,
			name_length: name.len() as u16,
			extra_length: 0,
			name: name.as_bytes().to_vec(),
			extra: Vec::new(),
		};
		let bytes = header.to_bytes().map_err(Error::from_deku)?;
		self.emit(&bytes)?;
		Ok(header_offset)
	}

	// zstd-safe is bad at writing data, so every frame goes through a
	// buffer in memory before reaching the writer
	fn compress_frame(&mut self, data: &[u8]) -> Result<Vec<u8>> {
		let mut buffer: Vec<u8> = Vec::with_capacity(data.len() + 1024.max(data.len() / 10));
		self.zstd
			.compress2(&mut buffer, data)
			.map_err(map_zstd_error)?;
		trace!(
			input = data.len(),
			frame = buffer.len(),
			"compressed content frame"
		);
		Ok(buffer)
	}

	fn emit(&mut self, bytes: &[u8]) -> Result<()> {
		self.writer.write_all(bytes)?;
		self.offset += bytes.len() as u64;
		Ok(())
	}

	fn emit_padding(&mut self, payload: u32) -> Result<()> {
		trace!(%payload, offset = self.offset, "pad to boundary");
		let frame = SkippableFrame::padding(payload);
		let bytes = frame.to_bytes().map_err(Error::from_deku)?;
		self.emit(&bytes)
	}

	fn emit_start_of_part(&mut self, uncompressed_offset: u64) -> Result<()> {
		trace!(%uncompressed_offset, offset = self.offset, "start-of-part at boundary");
		let frame = SkippableFrame::start_of_part(uncompressed_offset);
		let bytes = frame.to_bytes().map_err(Error::from_deku)?;
		self.emit(&bytes)
	}

	fn emit_descriptor(
		&mut self,
		crc32: u32,
		compressed_size: u64,
		uncompressed_size: u64,
		wide: bool,
	) -> Result<()> {
		let bytes = if wide {
			DataDescriptor64 {
				crc32,
				compressed_size,
				uncompressed_size,
			}
			.to_bytes()
		} else {
			debug_assert!(compressed_size < u32::MAX as u64);
			DataDescriptor {
				crc32,
				compressed_size: compressed_size as u32,
				uncompressed_size: uncompressed_size as u32,
			}
			.to_bytes()
		}
		.map_err(Error::from_deku)?;
		self.emit(&bytes)
	}

	fn central_record(&self, record: &PendingRecord) -> Result<Vec<u8>> {
		// members with a 64-bit descriptor saturate both size fields, which
		// is how the extractor knows the descriptor width
		let saturate_sizes = record.wide_descriptor
			|| record.compressed_size >= u32::MAX as u64
			|| record.uncompressed_size >= u32::MAX as u64;
		let saturate_offset = record.local_header_offset >= u32::MAX as u64;

		let mut extra = Vec::new();
		if saturate_sizes || saturate_offset {
			let zip64 = Zip64Extra {
				uncompressed_size: saturate_sizes.then_some(record.uncompressed_size),
				compressed_size: saturate_sizes.then_some(record.compressed_size),
				local_header_offset: saturate_offset.then_some(record.local_header_offset),
			};
			push_extra_block(&mut extra, ZIP64_EXTRA_ID, &zip64.to_payload());
		}
		if let Some(unix) = record.unix {
			let field = UnixExtraField {
				version: 1,
				mode: unix.mode,
				uid: unix.uid,
				gid: unix.gid,
			};
			let payload = field.to_bytes().map_err(Error::from_deku)?;
			push_extra_block(&mut extra, UNIX_EXTRA_ID, &payload);
		}

		let external_attributes = record.unix.map_or(0, |u| u.mode << 16)
			| if record.is_directory { 0x10 } else { 0 };
		let version_needed = if saturate_sizes || saturate_offset {
			record.version_needed.max(VERSION_ZIP64)
		} else {
			record.version_needed
		};

		let central = CentralRecord {
			version_made_by: VERSION_MADE_BY,
			version_needed,
			flags: record.flags,
			method: record.method,
			mod_time: 0,
			mod_date: 0,
			crc32: record.crc32,
			compressed_size: if saturate_sizes {
				u32::MAX
			} else {
				record.compressed_size as u32
			},
			uncompressed_size: if saturate_sizes {
				u32::MAX
			} else {
				record.uncompressed_size as u32
			},
			name_length: record.name.len() as u16,
			extra_length: extra.len() as u16,
			comment_length: 0,
			disk_start: 0,
			internal_attributes: 0,
			external_attributes,
			local_header_offset: if saturate_offset {
				u32::MAX
			} else {
				record.local_header_offset as u32
			},
			name: record.name.clone().into_bytes(),
			extra,
			comment: Vec::new(),
		};
		central.to_bytes().map_err(Error::from_deku)
	}
}

/// Unix host, ZIP feature set 6.3.
const VERSION_MADE_BY: u16 = (3 << 8) | 63;

fn check_name(name: &str) -> Result<()> {
	if name.is_empty() || name.len() > u16::MAX as usize {
		return Err(Error::new(ErrorKind::InvalidArgs)
			.with_message(format!("member name of {} bytes", name.len())));
	}
	Ok(())
}

pub(crate) fn map_zstd_error(code: usize) -> Error {
	let msg = zstd_safe::get_error_name(code);
	Error::new(ErrorKind::Io).with_message(format!("zstd: {msg}"))
}

//! The per-part streaming state machine.
//!
//! One processor owns one part. Chunks arrive in byte order (that is the
//! transport's guarantee), get cut into frames, and every compressed frame
//! is handed to the sink at the right uncompressed offset. A frame that
//! straddles two chunks waits in a staging buffer whose high-water mark is
//! one frame, never a part.

use std::{path::PathBuf, sync::Arc};

use tracing::{debug, instrument, trace};

use crate::{
	constants::BASE_ALIGNMENT,
	directory::{CentralDirectory, FileMetadata},
	error::{Error, ErrorKind, Result},
	extract::{
		output::FileContext,
		sink::EncodedWriteSink,
	},
	format::zip::{DataDescriptor, DataDescriptor64},
	frame::{parse_next_frame, DescriptorWidth, FrameError, FrameInfo},
};

use deku::DekuContainerRead;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
	/// The part begins inside a member; the first frame must be
	/// start-of-part.
	ContinuingFile,

	/// Between members: padding or the next local header.
	ExpectLocalHeader,

	/// Raw stored bytes of a symlink target are being accumulated.
	ReadingSymlink,

	/// Inside a member's data run.
	ProcessingFrames,

	/// The sentinel was seen or the part was finalized.
	Done,
}

/// Streaming consumer for the bytes of exactly one part.
pub struct PartProcessor {
	directory: Arc<CentralDirectory>,
	sink: Arc<dyn EncodedWriteSink>,
	output_root: PathBuf,

	part_index: u64,
	part_start: u64,

	state: State,
	staging: Vec<u8>,
	consumed: u64,
	next_starter: usize,
	current: Option<FileContext>,
	failure: Option<Error>,
}

impl PartProcessor {
	/// Processor for `part_index`, resolving members against `directory`.
	pub fn new(
		directory: Arc<CentralDirectory>,
		part_index: u64,
		sink: Arc<dyn EncodedWriteSink>,
		output_root: PathBuf,
	) -> Self {
		let state = if directory.part(part_index).continuing_file.is_some() {
			State::ContinuingFile
		} else {
			State::ExpectLocalHeader
		};
		Self {
			part_start: part_index * directory.part_size,
			directory,
			sink,
			output_root,
			part_index,
			state,
			staging: Vec::new(),
			consumed: 0,
			next_starter: 0,
			current: None,
			failure: None,
		}
	}

	/// Feed the next chunk of the part, in byte order.
	///
	/// After an error every further call returns the same stored error.
	#[instrument(level = "trace", skip(self, chunk), fields(part = self.part_index, len = chunk.len()))]
	pub fn process_data(&mut self, chunk: &[u8]) -> Result<()> {
		if let Some(failure) = &self.failure {
			return Err(failure.clone());
		}
		if self.state == State::Done {
			// bytes past the sentinel are central directory, already parsed
			self.consumed += chunk.len() as u64;
			return Ok(());
		}

		// parse straight from the chunk unless a partial frame is staged
		let staged: Option<Vec<u8>> = if self.staging.is_empty() {
			None
		} else {
			let mut buffer = std::mem::take(&mut self.staging);
			if let Err(err) = buffer.try_reserve(chunk.len()) {
				return self.fail(
					Error::new(ErrorKind::OutOfMemory)
						.with_message(format!("staging buffer: {err}")),
				);
			}
			buffer.extend_from_slice(chunk);
			Some(buffer)
		};
		let data: &[u8] = staged.as_deref().unwrap_or(chunk);

		match self.run(data) {
			Ok(parsed) => {
				// `consumed` keeps pointing at the first unparsed byte, so
				// staged bytes are only counted once they parse
				let rest = &data[parsed..];
				if !rest.is_empty() && self.state != State::Done {
					if let Err(err) = self.staging.try_reserve(rest.len()) {
						return self.fail(
							Error::new(ErrorKind::OutOfMemory)
								.with_message(format!("staging buffer: {err}")),
						);
					}
					self.staging.extend_from_slice(rest);
				}
				self.consumed += parsed as u64;
				Ok(())
			}
			Err(err) => self.fail(err),
		}
	}

	/// The part's byte range is exhausted: close whatever is open.
	#[instrument(level = "debug", skip(self), fields(part = self.part_index))]
	pub fn finalize(&mut self) -> Result<()> {
		if let Some(failure) = &self.failure {
			return Err(failure.clone());
		}

		if self.state != State::Done {
			if !self.staging.is_empty() {
				let err = Error::new(ErrorKind::FormatUnexpectedEof)
					.with_message("part ended in the middle of a frame")
					.at_part(self.part_index, self.part_start + self.consumed);
				return self.fail(err);
			}
			if self.state == State::ReadingSymlink {
				let err = Error::new(ErrorKind::FormatUnexpectedEof)
					.with_message("part ended in the middle of a symlink target")
					.at_part(self.part_index, self.part_start + self.consumed);
				return self.fail(err);
			}
			if self.next_starter < self.directory.part(self.part_index).starters.len() {
				let err = Error::new(ErrorKind::FormatUnexpectedEof)
					.with_message("part ended before all its members appeared")
					.at_part(self.part_index, self.part_start + self.consumed);
				return self.fail(err);
			}
		}

		// a member spanning into the next part closes here; truncation to
		// the final size is idempotent across parts
		if let Some(open) = self.current.take() {
			open.close()?;
		}

		debug!(bytes = self.consumed, "part finalized");
		self.state = State::Done;
		Ok(())
	}

	/// Bytes of this part handed to [`process_data`](Self::process_data)
	/// so far.
	pub fn bytes_processed(&self) -> u64 {
		self.consumed
	}

	fn fail(&mut self, err: Error) -> Result<()> {
		let err = err.at_part(self.part_index, self.part_start + self.consumed);
		self.failure = Some(err.clone());
		self.staging = Vec::new();
		self.current = None;
		Err(err)
	}

	fn descriptor_width(&self) -> DescriptorWidth {
		self.current
			.as_ref()
			.map(|open| open.meta.descriptor_width())
			.unwrap_or_default()
	}

	/// Parse as many whole frames from `data` as possible; returns how many
	/// bytes were consumed.
	fn run(&mut self, data: &[u8]) -> std::result::Result<usize, Error> {
		let mut pos = 0usize;

		loop {
			if self.state == State::Done {
				return Ok(data.len());
			}

			if self.state == State::ReadingSymlink {
				pos += self.take_symlink_bytes(&data[pos..])?;
				if self.state == State::ReadingSymlink {
					return Ok(pos);
				}
				continue;
			}

			if pos == data.len() {
				return Ok(pos);
			}

			let absolute = self.part_start + self.consumed + pos as u64;
			let info = match parse_next_frame(&data[pos..], self.descriptor_width()) {
				Ok(info) => info,
				Err(FrameError::NeedMoreData) => return Ok(pos),
				Err(FrameError::Invalid(err)) => {
					return Err(err.at_part(self.part_index, absolute))
				}
			};
			trace!(?info, state = ?self.state, offset = absolute, "frame");

			let consume = self
				.handle(info, &data[pos..pos + info.total_size()], pos)
				.map_err(|err| err.at_part(self.part_index, absolute))?;
			if consume {
				pos += info.total_size();
			}
		}
	}

	/// Dispatch one frame; returns false when the frame must be re-parsed
	/// in the new state instead of being consumed.
	fn handle(&mut self, info: FrameInfo, frame: &[u8], pos: usize) -> Result<bool> {
		match (self.state, info) {
			(State::ContinuingFile, FrameInfo::BurstStartOfPart { uncompressed_offset, .. }) => {
				let index = self
					.directory
					.part(self.part_index)
					.continuing_file
					.expect("state implies a continuing file");
				let meta = Arc::new(self.directory.files[index].clone());
				debug!(name = %meta.name, %uncompressed_offset, "resume spanning member");
				self.current = Some(FileContext::open(
					&self.output_root,
					meta,
					uncompressed_offset,
				)?);
				self.state = State::ProcessingFrames;
				Ok(true)
			}
			(State::ContinuingFile, _) => Err(Error::new(ErrorKind::FormatUnexpectedFrame)
				.with_message(format!(
					"part continues a member but starts with {info:?} instead of start-of-part"
				))),

			(State::ExpectLocalHeader, FrameInfo::BurstPadding { .. }) => Ok(true),
			(State::ExpectLocalHeader, FrameInfo::ZipLocalHeader { .. }) => {
				self.open_starter(pos)?;
				Ok(true)
			}
			(State::ExpectLocalHeader, FrameInfo::CentralDirectorySentinel) => {
				self.state = State::Done;
				Ok(true)
			}

			(State::ProcessingFrames, FrameInfo::ZstdCompressed { uncompressed_size, .. }) => {
				let open = self.current.as_mut().expect("state implies an open member");
				open.write_frame(self.sink.as_ref(), frame, uncompressed_size)?;
				Ok(true)
			}
			(State::ProcessingFrames, FrameInfo::BurstPadding { .. }) => Ok(true),
			(State::ProcessingFrames, FrameInfo::BurstStartOfPart { uncompressed_offset, .. }) => {
				// legal only on the sub-grid, where a larger part size has
				// interior boundaries
				let absolute = self.part_start + self.consumed + pos as u64;
				if absolute % BASE_ALIGNMENT != 0 {
					return Err(Error::new(ErrorKind::FormatUnexpectedFrame).with_message(
						format!("start-of-part frame off the alignment grid at {absolute}"),
					));
				}
				let open = self.current.as_mut().expect("state implies an open member");
				open.uncompressed_offset = uncompressed_offset;
				Ok(true)
			}
			(State::ProcessingFrames, FrameInfo::ZipDataDescriptor { .. }) => {
				self.check_descriptor(frame)?;
				let open = self.current.take().expect("state implies an open member");
				open.close()?;
				self.state = State::ExpectLocalHeader;
				Ok(true)
			}
			(State::ProcessingFrames, FrameInfo::ZipLocalHeader { .. }) => {
				// a member without a descriptor ends at the next header,
				// which the next state parses again
				let open = self.current.take().expect("state implies an open member");
				open.close()?;
				self.state = State::ExpectLocalHeader;
				Ok(false)
			}
			(State::ProcessingFrames, FrameInfo::CentralDirectorySentinel) => {
				let open = self.current.take().expect("state implies an open member");
				open.close()?;
				self.state = State::Done;
				Ok(true)
			}

			(state, info) => Err(Error::new(ErrorKind::FormatUnexpectedFrame)
				.with_message(format!("{info:?} in state {state:?}"))),
		}
	}

	/// A local header arrived: look up the member it must belong to.
	fn open_starter(&mut self, pos: usize) -> Result<()> {
		let entry = self.directory.part(self.part_index);
		let Some(&index) = entry.starters.get(self.next_starter) else {
			return Err(Error::new(ErrorKind::FormatUnexpectedFrame)
				.with_message("local header after the last expected member of the part"));
		};
		self.next_starter += 1;

		let meta = &self.directory.files[index];
		let absolute = self.part_start + self.consumed + pos as u64;
		if meta.local_header_offset != absolute {
			return Err(Error::new(ErrorKind::FormatInvalidSignature).with_message(format!(
				"local header at {absolute}, directory puts {:?} at {}",
				meta.name, meta.local_header_offset
			)));
		}
		if meta.method == crate::constants::METHOD_STORE
			&& !meta.is_directory
			&& !meta.is_symlink
			&& meta.uncompressed_size != 0
		{
			return Err(Error::new(ErrorKind::FormatUnexpectedFrame).with_message(format!(
				"stored member {:?} with content; only directories, symlinks and empty files may be stored",
				meta.name
			)));
		}

		let meta = Arc::new(meta.clone());
		debug!(name = %meta.name, "begin member");
		let open = FileContext::open(&self.output_root, meta, 0)?;

		if open.is_symlink() {
			self.current = Some(open);
			self.state = State::ReadingSymlink;
		} else {
			self.current = Some(open);
			self.state = State::ProcessingFrames;
		}
		Ok(())
	}

	/// Raw stored bytes: move up to the declared target length into the
	/// accumulator, then create the link.
	fn take_symlink_bytes(&mut self, data: &[u8]) -> Result<usize> {
		let open = self.current.as_mut().expect("state implies an open member");
		let want = (open.symlink_remaining() as usize).min(data.len());
		open.push_symlink_bytes(&data[..want]);

		if open.symlink_remaining() == 0 {
			let open = self.current.take().expect("just borrowed it");
			open.close()?;
			self.state = State::ExpectLocalHeader;
		}
		Ok(want)
	}

	/// Cheap cross-check of a descriptor against the directory record.
	fn check_descriptor(&self, bytes: &[u8]) -> Result<()> {
		let meta: &FileMetadata = &self.current.as_ref().expect("state implies an open member").meta;
		let (crc32, uncompressed) = match meta.descriptor_width() {
			DescriptorWidth::Standard => {
				let (_, descriptor) =
					DataDescriptor::from_bytes((bytes, 0)).map_err(Error::from_deku)?;
				(descriptor.crc32, descriptor.uncompressed_size as u64)
			}
			DescriptorWidth::Zip64 => {
				let (_, descriptor) =
					DataDescriptor64::from_bytes((bytes, 0)).map_err(Error::from_deku)?;
				(descriptor.crc32, descriptor.uncompressed_size)
			}
		};

		if uncompressed != meta.uncompressed_size || crc32 != meta.crc32 {
			return Err(Error::new(ErrorKind::FormatInvalidSignature).with_message(format!(
				"data descriptor of {:?} disagrees with the central directory",
				meta.name
			)));
		}
		Ok(())
	}
}

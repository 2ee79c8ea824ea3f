use std::path::PathBuf;

use burst::{
	constants::BASE_ALIGNMENT,
	error::Error,
	frame::{parse_next_frame, DescriptorWidth, FrameError, FrameInfo},
};
use clap::{Parser, ValueHint};

#[derive(Debug, Clone, Parser)]
pub struct DebugArgs {
	/// Input file.
	#[arg(
		value_hint = ValueHint::FilePath,
		value_name = "PATH",
	)]
	pub input: PathBuf,

	/// Stop after N frames.
	#[arg(long, short = 'n')]
	pub limit: Option<usize>,

	/// Assume ZIP64 (24-byte) data descriptors.
	#[arg(long)]
	pub wide_descriptors: bool,
}

/// Walk the body frame by frame and print what sits where.
///
/// This is a raw view: it does not consult the central directory, so the
/// descriptor width is an assumption, not a fact.
pub(crate) fn debug(args: DebugArgs) -> Result<(), Error> {
	let file = std::fs::read(&args.input)?;
	let width = if args.wide_descriptors {
		DescriptorWidth::Zip64
	} else {
		DescriptorWidth::Standard
	};

	let mut offset = 0usize;
	let mut count = 0usize;
	loop {
		if args.limit.is_some_and(|limit| count >= limit) {
			break;
		}

		let aligned = if offset as u64 % BASE_ALIGNMENT == 0 {
			" *"
		} else {
			""
		};
		let info = match parse_next_frame(&file[offset..], width) {
			Ok(info) => info,
			Err(FrameError::NeedMoreData) => {
				println!("{offset:>12}{aligned} truncated frame, {} bytes left", file.len() - offset);
				break;
			}
			Err(FrameError::Invalid(err)) => {
				println!("{offset:>12}{aligned} {err}");
				break;
			}
		};

		match info {
			FrameInfo::ZipLocalHeader { total_size } => {
				let name_length =
					u16::from_le_bytes([file[offset + 26], file[offset + 27]]) as usize;
				let name =
					String::from_utf8_lossy(&file[offset + 30..offset + 30 + name_length]);
				println!("{offset:>12}{aligned} local header, {total_size} bytes: {name}");
			}
			FrameInfo::ZstdCompressed {
				total_size,
				uncompressed_size,
			} => println!(
				"{offset:>12}{aligned} zstd frame, {total_size} bytes, {uncompressed_size} uncompressed"
			),
			FrameInfo::BurstPadding { total_size } => {
				println!("{offset:>12}{aligned} padding, {total_size} bytes")
			}
			FrameInfo::BurstStartOfPart {
				uncompressed_offset,
				..
			} => println!(
				"{offset:>12}{aligned} start-of-part, file continues at uncompressed offset {uncompressed_offset}"
			),
			FrameInfo::ZipDataDescriptor { total_size } => {
				println!("{offset:>12}{aligned} data descriptor, {total_size} bytes")
			}
			FrameInfo::CentralDirectorySentinel => {
				println!(
					"{offset:>12}{aligned} central directory, {} bytes to end of file",
					file.len() - offset
				);
				break;
			}
		}

		offset += info.total_size();
		count += 1;
	}

	Ok(())
}

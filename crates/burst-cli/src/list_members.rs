use std::path::PathBuf;

use burst::{
	directory::{parse_archive_tail, TailParse},
	error::{Error, ErrorKind},
	source::RangeSource,
	FileRangeSource,
};
use clap::{Parser, ValueHint};
use futures::TryStreamExt;
use tracing::info;

#[derive(Debug, Clone, Parser)]
pub struct ListArgs {
	/// Input file.
	#[arg(
		value_hint = ValueHint::FilePath,
		value_name = "PATH",
	)]
	pub input: PathBuf,

	/// Indicate filetypes with suffixes.
	///
	/// Directories already end in '/'; symlinks are marked with `@`.
	#[arg(long)]
	pub decorate: bool,

	/// Print offsets and sizes alongside names.
	#[arg(long)]
	pub long: bool,

	/// Tail fetch length in bytes; raise it for huge directories.
	#[arg(long, value_name = "BYTES", default_value_t = 8 * 1024 * 1024)]
	pub tail_length: u64,
}

/// List members from the archive tail alone, without touching the body.
pub(crate) async fn list(args: ListArgs) -> Result<(), Error> {
	info!(path = ?args.input, "read archive tail");
	let source = FileRangeSource::new(&args.input);
	let suffix = source.read_suffix(args.tail_length).await?;
	let tail: Vec<u8> = suffix
		.chunks
		.try_fold(Vec::new(), |mut tail, chunk| async move {
			tail.extend_from_slice(&chunk);
			Ok(tail)
		})
		.await?;

	let directory = match parse_archive_tail(
		&tail,
		suffix.start,
		suffix.total_size,
		burst::constants::DEFAULT_PART_SIZE,
	)? {
		TailParse::Complete(directory) => directory,
		TailParse::NeedsMore { bounds, .. } => {
			return Err(Error::new(ErrorKind::FormatTruncated).with_message(format!(
				"central directory is {} bytes; retry with --tail-length {}",
				bounds.directory_size,
				bounds.directory_size + args.tail_length,
			)));
		}
	};

	for member in &directory.files {
		if args.long {
			print!(
				"{:>12} {:>12} {:>10} ",
				member.local_header_offset, member.uncompressed_size, member.compressed_size
			);
		}
		print!("{}", member.name);
		if args.decorate && member.is_symlink {
			print!("@");
		}
		println!();
	}

	Ok(())
}

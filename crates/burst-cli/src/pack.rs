use std::{fs::File, path::PathBuf};

use burst::{
	directory::UnixMetadata,
	error::Error,
	ArchiveWriter, WriterOptions,
};
use clap::{Parser, ValueHint};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Parser)]
pub struct PackArgs {
	/// Output file.
	#[arg(long,
		value_hint = ValueHint::AnyPath,
		value_name = "PATH",
	)]
	pub output: PathBuf,

	/// Paths to pack.
	#[arg(
		value_hint = ValueHint::AnyPath,
		value_name = "PATH",
		required = true,
	)]
	pub paths: Vec<PathBuf>,

	/// Zstandard compression level.
	#[arg(
		long,
		allow_negative_numbers = true,
		value_parser = clap::value_parser!(i32).range(-7..=22),
	)]
	pub level: Option<i32>,
}

pub(crate) fn pack(args: PackArgs) -> Result<(), Error> {
	info!(path = ?args.output, "create output file");
	let mut output = File::create(&args.output)?;

	let mut archive = ArchiveWriter::new(
		&mut output,
		WriterOptions {
			level: args.level.unwrap_or(0),
		},
	)?;

	for path in &args.paths {
		info!("walk {path:?}");
		// symlinks are stored as links, never followed
		for entry in WalkDir::new(path).sort_by_file_name() {
			let entry = match entry {
				Ok(entry) => entry,
				Err(err) => {
					eprintln!("read error: {err}");
					continue;
				}
			};

			let name = member_name(entry.path());
			let meta = entry.metadata().map_err(|err| {
				Error::from(std::io::Error::other(err))
			})?;
			let unix = unix_metadata(&meta);
			debug!(%name, "add {:?}", entry.path());

			if entry.file_type().is_dir() {
				archive.add_directory(&name, unix)?;
			} else if entry.file_type().is_symlink() {
				let target = std::fs::read_link(entry.path())?;
				archive.add_symlink(&name, target.as_os_str().as_encoded_bytes(), unix)?;
			} else if entry.file_type().is_file() {
				let mut content = File::open(entry.path())?;
				archive.add_file(&name, meta.len(), unix, &mut content)?;
			} else {
				warn!(path = ?entry.path(), "skipping special file");
			}
		}
	}

	let summary = archive.finish()?;
	println!(
		"packed {} members into {} bytes",
		summary.members, summary.archive_size
	);
	Ok(())
}

fn member_name(path: &std::path::Path) -> String {
	let name = path.to_string_lossy().replace('\\', "/");
	name.trim_start_matches("./").trim_start_matches('/').to_string()
}

fn unix_metadata(meta: &std::fs::Metadata) -> Option<UnixMetadata> {
	#[cfg(unix)]
	{
		use std::os::unix::fs::MetadataExt;
		Some(UnixMetadata {
			mode: meta.mode(),
			uid: meta.uid(),
			gid: meta.gid(),
		})
	}

	#[cfg(not(unix))]
	{
		let _ = meta;
		None
	}
}

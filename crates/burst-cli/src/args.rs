use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Restore file trees from object storage at line speed.
#[derive(Debug, Clone, Parser)]
#[command(
	name = "burst",
	bin_name = "burst",
	author,
	version,
	after_help = "Want more detail? Try the long '--help' flag!"
)]
#[cfg_attr(debug_assertions, command(before_help = "⚠ DEBUG BUILD ⚠"))]
pub struct Args {
	/// What to do.
	#[command(subcommand)]
	pub action: Action,

	/// Log verbosity; pass multiple times for more.
	#[arg(long, short, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Write logs to this file (or a directory for a timestamped file).
	#[arg(long, global = true, value_hint = ValueHint::AnyPath, value_name = "PATH")]
	pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
	/// Extract an archive from S3 or a local file.
	Extract(crate::extract::ExtractArgs),

	/// Pack local paths into an archive.
	Pack(crate::pack::PackArgs),

	/// List the members of a local archive.
	List(crate::list_members::ListArgs),

	/// Dump the frame structure of a local archive.
	Debug(crate::debug::DebugArgs),
}

use std::path::PathBuf;

use burst::{
	error::{Error, ErrorKind},
	Coordinator, ExtractOptions, FileRangeSource,
};
use clap::{Parser, ValueHint};
use tracing::info;

use crate::s3::S3RangeSource;

#[derive(Debug, Clone, Parser)]
pub struct ExtractArgs {
	/// S3 bucket holding the archive.
	#[arg(long, value_name = "BUCKET", requires = "key")]
	pub bucket: Option<String>,

	/// Object key of the archive.
	#[arg(long, value_name = "KEY", requires = "bucket")]
	pub key: Option<String>,

	/// AWS region; falls back to the profile's or environment's region.
	#[arg(long, value_name = "REGION")]
	pub region: Option<String>,

	/// Credentials profile; AWS_PROFILE works too.
	#[arg(long, value_name = "NAME")]
	pub profile: Option<String>,

	/// Extract from a local archive file instead of S3.
	#[arg(
		long,
		value_hint = ValueHint::FilePath,
		value_name = "PATH",
		conflicts_with_all = ["bucket", "key", "region", "profile"],
	)]
	pub input: Option<PathBuf>,

	/// Directory to extract into.
	#[arg(long, value_hint = ValueHint::DirPath, value_name = "PATH", default_value = ".")]
	pub output_dir: PathBuf,

	/// HTTP connections to hold open against S3.
	#[arg(
		long,
		value_name = "N",
		default_value_t = 16,
		value_parser = clap::value_parser!(u16).range(1..=256),
	)]
	pub connections: u16,

	/// Parts downloaded and processed concurrently.
	#[arg(long, value_name = "N", default_value_t = 8)]
	pub concurrent_parts: usize,

	/// Part size in MiB; must match a multiple of the 8 MiB alignment.
	#[arg(long, value_name = "MIB", default_value_t = 8)]
	pub part_size: u64,
}

pub(crate) async fn extract(args: ExtractArgs) -> Result<(), Error> {
	let options = ExtractOptions {
		output_dir: args.output_dir.clone(),
		part_size: args.part_size * 1024 * 1024,
		max_concurrent_parts: args.concurrent_parts,
		..ExtractOptions::default()
	};

	let summary = if let Some(input) = args.input {
		info!(?input, "extracting local archive");
		Coordinator::new(FileRangeSource::new(input), options)
			.extract()
			.await?
	} else {
		let (Some(bucket), Some(key)) = (args.bucket, args.key) else {
			return Err(Error::new(ErrorKind::InvalidArgs)
				.with_message("pass either --input or both --bucket and --key"));
		};
		info!(%bucket, %key, "extracting from s3");
		let source = S3RangeSource::connect(
			bucket,
			key,
			args.region,
			args.profile,
			args.connections,
		)
		.await?;
		Coordinator::new(source, options).extract().await?
	};

	println!(
		"extracted {} members from {} parts ({} bytes fetched)",
		summary.members, summary.parts, summary.bytes_fetched
	);
	Ok(())
}

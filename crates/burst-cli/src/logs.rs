use std::{
	env::var,
	fs::{metadata, File},
	sync::Mutex,
};

use tracing::info;

use crate::args::Args;

pub fn from_env() -> bool {
	if var("RUST_LOG").is_ok() {
		tracing_subscriber::fmt::try_init().is_ok()
	} else {
		false
	}
}

pub fn from_args(args: &Args) {
	if args.verbose == 0 {
		return;
	}

	let log_file = args.log_file.as_ref().map(|file| {
		let is_dir = metadata(file).map_or(false, |info| info.is_dir());
		let path = if is_dir {
			let filename = format!(
				"burst.{}.log",
				chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ")
			);
			file.join(filename)
		} else {
			file.to_owned()
		};

		File::create(path)
	});

	let mut builder = tracing_subscriber::fmt().with_env_filter(match args.verbose {
		0 => unreachable!("checked by if earlier"),
		1 => "warn",
		2 => "info",
		3 => "debug",
		_ => "trace",
	});

	if args.verbose > 2 {
		use tracing_subscriber::fmt::format::FmtSpan;
		builder = builder.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
	}

	match match log_file {
		Some(Ok(writer)) => builder.json().with_writer(Mutex::new(writer)).try_init(),
		Some(Err(err)) => {
			eprintln!("Failed to open log file, logging to stderr\n{err}");
			builder.try_init()
		}
		None if args.verbose > 3 => builder.pretty().try_init(),
		None => builder.try_init(),
	} {
		Ok(_) => info!("logging initialised"),
		Err(e) => eprintln!("Failed to initialise logging, continuing with none\n{e}"),
	}
}

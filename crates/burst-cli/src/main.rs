#![warn(clippy::unwrap_used)]
#![deny(rust_2018_idioms)]

use clap::Parser;
use tracing::{debug, warn};

use crate::args::Action;

mod args;
mod debug;
mod extract;
mod list_members;
mod logs;
mod pack;
mod s3;

#[tokio::main]
async fn main() {
	std::process::exit(run().await);
}

async fn run() -> i32 {
	let args = match args::Args::try_parse() {
		Ok(args) => args,
		Err(err) => {
			// help and version are not usage errors
			let code = match err.kind() {
				clap::error::ErrorKind::DisplayHelp
				| clap::error::ErrorKind::DisplayVersion => 0,
				_ => 1,
			};
			let _ = err.print();
			return code;
		}
	};

	let logs_on = logs::from_env();
	if logs_on {
		warn!("ignoring logging options from args");
	} else {
		logs::from_args(&args);
	}
	debug!(?args, "got arguments");

	let result = match args.action {
		Action::Extract(args) => extract::extract(args).await,
		Action::Pack(args) => pack::pack(args),
		Action::List(args) => list_members::list(args).await,
		Action::Debug(args) => debug::debug(args),
	};

	match result {
		Ok(()) => 0,
		Err(err) => {
			eprintln!("burst: {err}");
			err.exit_code()
		}
	}
}

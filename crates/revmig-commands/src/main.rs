//! revmig
//!
//! Command-line runner for revision-based schema migrations.
//!
//! ## Usage
//!
//! ```bash
//! revmig generate -m "add items"
//! revmig up
//! revmig down base
//! revmig status
//! ```

use clap::Parser;
use console::style;
use revmig_commands::{Cli, init_logging, run};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	init_logging(cli.log_directive());

	match run(&cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("{} {:#}", style("Error:").red().bold(), e);
			ExitCode::FAILURE
		}
	}
}

//! # revmig commands
//!
//! Operator commands for the `revmig` binary.
//!
//! ## Commands
//!
//! - `generate -m <message>`: diff declared models against the head revision
//!   and write a new revision file
//! - `up [target]`: upgrade to `head` or a revision (`--sql` prints the SQL
//!   instead of running it)
//! - `down <target>`: downgrade to `base` or a revision
//! - `status`: revision recorded in the database
//! - `history`, `heads`: inspect the revision graph
//! - `set <target>`: overwrite the recorded revision without running DDL
//!
//! ## Settings
//!
//! Settings are read from `revmig.toml`, then `REVMIG_*` environment
//! variables, then command line flags. See
//! [`MigrationSettings`](revmig_migrations::MigrationSettings).

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::run;

use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber
///
/// `RUST_LOG` takes precedence over `directive`. Calling this twice is a
/// no-op.
pub fn init_logging(directive: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.try_init();
}

//! Command line definition for the `revmig` binary

use clap::{Parser, Subcommand};
use revmig_migrations::MigrationSettings;
use std::path::PathBuf;

/// Revision-based schema migrations
///
/// This is the parser used by the `revmig` binary. It can also be used
/// directly for testing argument handling.
#[derive(Debug, Parser)]
#[command(name = "revmig")]
#[command(about = "Revision-based schema migrations", long_about = None)]
#[command(version)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Commands,

	/// Settings file (default: ./revmig.toml when present)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Database connection URL
	#[arg(long, global = true, value_name = "URL")]
	pub database_url: Option<String>,

	/// Directory holding the revision files
	#[arg(long, global = true, value_name = "DIR")]
	pub migrations_dir: Option<PathBuf>,

	/// JSON file declaring the current tables
	#[arg(long, global = true, value_name = "FILE")]
	pub models: Option<PathBuf>,

	/// Verbosity level (can be repeated for more output)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbosity: u8,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
	/// Generate a revision from the difference between models and revisions
	Generate {
		/// Revision message
		#[arg(short, long)]
		message: String,

		/// Write a revision even when nothing changed
		#[arg(long)]
		empty: bool,
	},

	/// Upgrade the database
	Up {
		/// Target revision: `head` or a revision id prefix
		#[arg(value_name = "TARGET", default_value = "head")]
		target: String,

		/// Print the SQL instead of running it
		#[arg(long)]
		sql: bool,

		/// Starting revision for `--sql` (default: base)
		#[arg(long, value_name = "REVISION", requires = "sql")]
		from: Option<String>,
	},

	/// Downgrade the database
	Down {
		/// Target revision: `base` or a revision id prefix
		#[arg(value_name = "TARGET")]
		target: String,
	},

	/// Show the revision recorded in the database
	Status,

	/// List revisions from head to root
	History,

	/// List head revisions
	Heads,

	/// Overwrite the recorded revision without running any migration
	Set {
		/// Target revision: `head`, `base` or a revision id prefix
		#[arg(value_name = "TARGET")]
		target: String,

		/// Do not ask for confirmation
		#[arg(short, long)]
		yes: bool,
	},
}

impl Cli {
	/// Settings file and environment, then command line flags
	pub fn settings(&self) -> revmig_migrations::Result<MigrationSettings> {
		let mut settings = MigrationSettings::load(self.config.as_deref())?;
		self.apply_overrides(&mut settings);
		Ok(settings)
	}

	pub fn apply_overrides(&self, settings: &mut MigrationSettings) {
		if let Some(url) = &self.database_url {
			settings.database_url = Some(url.clone());
		}
		if let Some(dir) = &self.migrations_dir {
			settings.migrations_dir = dir.clone();
		}
		if let Some(models) = &self.models {
			settings.models_file = models.clone();
		}
	}

	/// Log filter directive for the verbosity flag
	///
	/// Targets match by prefix, so `revmig` covers every crate of the
	/// workspace.
	pub fn log_directive(&self) -> &'static str {
		match self.verbosity {
			0 => "revmig=info",
			1 => "revmig=debug",
			_ => "trace",
		}
	}
}

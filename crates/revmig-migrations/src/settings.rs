//! Migration settings
//!
//! Values are layered: built-in defaults, then an optional `revmig.toml`,
//! then `REVMIG_*` environment variables. Command line flags are applied by
//! the caller on top of the result.

use super::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name, looked up in the working directory
pub const SETTINGS_FILE: &str = "revmig.toml";

pub const ENV_DATABASE_URL: &str = "REVMIG_DATABASE_URL";
pub const ENV_MIGRATIONS_DIR: &str = "REVMIG_MIGRATIONS_DIR";
pub const ENV_MODELS: &str = "REVMIG_MODELS";
pub const ENV_LOCK_TIMEOUT: &str = "REVMIG_LOCK_TIMEOUT";
pub const ENV_STATEMENT_TIMEOUT: &str = "REVMIG_STATEMENT_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
	/// Connection URL of the database holding the schema and the marker
	pub database_url: Option<String>,
	/// Directory holding one JSON file per revision
	pub migrations_dir: PathBuf,
	/// JSON file declaring the current tables
	pub models_file: PathBuf,
	pub lock_timeout_secs: u64,
	pub statement_timeout_secs: u64,
}

impl Default for MigrationSettings {
	fn default() -> Self {
		Self {
			database_url: None,
			migrations_dir: PathBuf::from("migrations"),
			models_file: PathBuf::from("models.json"),
			lock_timeout_secs: 30,
			statement_timeout_secs: 60,
		}
	}
}

impl MigrationSettings {
	/// Load settings from `path` (or `revmig.toml` when `None`), then apply
	/// environment overrides
	///
	/// A missing default file is not an error; a missing explicit file is.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let settings = match path {
			Some(path) => Self::from_file(path)?,
			None if Path::new(SETTINGS_FILE).exists() => Self::from_file(SETTINGS_FILE)?,
			None => Self::default(),
		};
		settings.with_overrides(|key| std::env::var(key).ok())
	}

	/// Parse a TOML settings file
	///
	/// # Examples
	///
	/// ```rust,no_run
	/// use revmig_migrations::MigrationSettings;
	///
	/// let settings = MigrationSettings::from_file("revmig.toml").unwrap();
	/// println!("{}", settings.migrations_dir.display());
	/// ```
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|e| {
			MigrationError::Settings(format!("Failed to read {}: {}", path.display(), e))
		})?;
		Self::from_toml(&contents)
			.map_err(|e| MigrationError::Settings(format!("{}: {}", path.display(), e)))
	}

	pub fn from_toml(contents: &str) -> Result<Self> {
		toml::from_str(contents)
			.map_err(|e| MigrationError::Settings(format!("TOML parse error: {}", e)))
	}

	/// Apply `REVMIG_*` overrides looked up through `lookup`
	pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(url) = lookup(ENV_DATABASE_URL) {
			self.database_url = Some(url);
		}
		if let Some(dir) = lookup(ENV_MIGRATIONS_DIR) {
			self.migrations_dir = PathBuf::from(dir);
		}
		if let Some(models) = lookup(ENV_MODELS) {
			self.models_file = PathBuf::from(models);
		}
		if let Some(value) = lookup(ENV_LOCK_TIMEOUT) {
			self.lock_timeout_secs = parse_seconds(ENV_LOCK_TIMEOUT, &value)?;
		}
		if let Some(value) = lookup(ENV_STATEMENT_TIMEOUT) {
			self.statement_timeout_secs = parse_seconds(ENV_STATEMENT_TIMEOUT, &value)?;
		}
		Ok(self)
	}

	/// Connection URL, required by every command touching the database
	pub fn require_database_url(&self) -> Result<&str> {
		self.database_url.as_deref().ok_or_else(|| {
			MigrationError::Settings(format!(
				"database_url is not set (use {} or {})",
				ENV_DATABASE_URL, SETTINGS_FILE
			))
		})
	}

	pub fn lock_timeout(&self) -> Duration {
		Duration::from_secs(self.lock_timeout_secs)
	}

	pub fn statement_timeout(&self) -> Duration {
		Duration::from_secs(self.statement_timeout_secs)
	}
}

fn parse_seconds(key: &str, value: &str) -> Result<u64> {
	value.trim().parse().map_err(|_| {
		MigrationError::Settings(format!(
			"{} must be a whole number of seconds, got {:?}",
			key, value
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::collections::HashMap;

	#[rstest]
	fn test_partial_toml_keeps_defaults() {
		let settings = MigrationSettings::from_toml(
			r#"
database_url = "sqlite::memory:"
lock_timeout_secs = 5
"#,
		)
		.unwrap();

		assert_eq!(settings.database_url.as_deref(), Some("sqlite::memory:"));
		assert_eq!(settings.lock_timeout(), Duration::from_secs(5));
		assert_eq!(settings.migrations_dir, PathBuf::from("migrations"));
		assert_eq!(settings.statement_timeout_secs, 60);
	}

	#[rstest]
	fn test_environment_overrides_file() {
		let env: HashMap<&str, &str> = HashMap::from([
			(ENV_MIGRATIONS_DIR, "db/revisions"),
			(ENV_STATEMENT_TIMEOUT, "15"),
		]);

		let settings = MigrationSettings::from_toml("migrations_dir = \"other\"")
			.unwrap()
			.with_overrides(|key| env.get(key).map(|value| value.to_string()))
			.unwrap();

		assert_eq!(settings.migrations_dir, PathBuf::from("db/revisions"));
		assert_eq!(settings.statement_timeout_secs, 15);
	}

	#[rstest]
	#[case("soon")]
	#[case("-1")]
	fn test_invalid_timeout_is_rejected(#[case] value: &str) {
		let result = MigrationSettings::default().with_overrides(|key| {
			(key == ENV_LOCK_TIMEOUT).then(|| value.to_string())
		});
		assert!(matches!(result, Err(MigrationError::Settings(_))));
	}

	#[rstest]
	fn test_missing_database_url() {
		assert!(MigrationSettings::default().require_database_url().is_err());
	}

	#[rstest]
	fn test_malformed_value_errors() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("revmig.toml");
		std::fs::write(&path, "lock_timeout_secs = \"thirty\"").unwrap();

		assert!(matches!(
			MigrationSettings::from_file(&path),
			Err(MigrationError::Settings(_))
		));
	}
}

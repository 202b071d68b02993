//! Declared model registry
//!
//! The generator only needs one thing from the model layer: the full set of
//! currently declared tables. [`ModelSource`] is that seam; [`ModelRegistry`]
//! is the in-process implementation, fed either by code or by a JSON models
//! file.

use super::snapshot::{SchemaSnapshot, TableDefinition};
use super::{MigrationError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;

/// Provider of the declared tables
///
/// Implementations must be pure: calling `declared_tables` has no side
/// effects and may happen at any point.
pub trait ModelSource {
	fn declared_tables(&self) -> Vec<TableDefinition>;

	/// Declared snapshot, validated
	fn declared_snapshot(&self) -> Result<SchemaSnapshot> {
		SchemaSnapshot::from_tables(self.declared_tables())
	}
}

impl<F> ModelSource for F
where
	F: Fn() -> Vec<TableDefinition>,
{
	fn declared_tables(&self) -> Vec<TableDefinition> {
		self()
	}
}

/// Registry of declared tables, keyed by table name
#[derive(Debug, Default)]
pub struct ModelRegistry {
	tables: RwLock<BTreeMap<String, TableDefinition>>,
}

impl ModelRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Load a models file: a JSON array of table definitions
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::{ModelRegistry, ModelSource};
	///
	/// let registry = ModelRegistry::from_json(r#"[
	///     {"name": "items", "columns": [
	///         {"name": "id", "type": {"kind": "id"}, "nullable": false, "primary_key": true},
	///         {"name": "title", "type": {"kind": "string"}}
	///     ]}
	/// ]"#).unwrap();
	/// assert_eq!(registry.declared_tables().len(), 1);
	/// ```
	pub fn from_json(content: &str) -> Result<Self> {
		let tables: Vec<TableDefinition> = serde_json::from_str(content)?;
		let registry = Self::new();
		for table in tables {
			if registry.get(&table.name).is_some() {
				return Err(MigrationError::Validation(format!(
					"table {} is declared more than once",
					table.name
				)));
			}
			registry.register(table);
		}
		Ok(registry)
	}

	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| {
			MigrationError::Validation(format!(
				"cannot read models file {}: {}",
				path.display(),
				e
			))
		})?;
		Self::from_json(&content)
	}

	/// Register a table, replacing any previous definition with the same name
	pub fn register(&self, table: TableDefinition) {
		self.tables.write().insert(table.name.clone(), table);
	}

	pub fn unregister(&self, name: &str) -> Option<TableDefinition> {
		self.tables.write().remove(name)
	}

	pub fn get(&self, name: &str) -> Option<TableDefinition> {
		self.tables.read().get(name).cloned()
	}

	pub fn clear(&self) {
		self.tables.write().clear();
	}

	pub fn len(&self) -> usize {
		self.tables.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.tables.read().is_empty()
	}
}

impl ModelSource for ModelRegistry {
	fn declared_tables(&self) -> Vec<TableDefinition> {
		self.tables.read().values().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fields::{ColumnType, OnDelete};
	use crate::snapshot::ColumnDefinition;
	use rstest::rstest;

	fn items() -> TableDefinition {
		TableDefinition::new("items")
			.with_column(ColumnDefinition::id())
			.with_column(ColumnDefinition::new("title", ColumnType::String))
	}

	#[rstest]
	fn test_register_replaces_by_name() {
		let registry = ModelRegistry::new();
		registry.register(items());
		registry.register(items().with_column(ColumnDefinition::new("qty", ColumnType::Integer)));

		assert_eq!(registry.len(), 1);
		assert_eq!(registry.get("items").unwrap().columns.len(), 3);
	}

	#[rstest]
	fn test_declared_snapshot_validates_references() {
		let registry = ModelRegistry::new();
		registry.register(
			TableDefinition::new("items")
				.with_column(ColumnDefinition::id())
				.with_column(ColumnDefinition::reference("owner_id", "owners", OnDelete::Cascade)),
		);

		let result = registry.declared_snapshot();

		assert!(matches!(result, Err(MigrationError::Validation(_))));
	}

	#[rstest]
	fn test_closure_source() {
		let source = || vec![items()];
		let snapshot = source.declared_snapshot().unwrap();
		assert!(snapshot.table("items").is_some());
	}

	#[rstest]
	fn test_duplicate_table_in_models_file() {
		let table = serde_json::to_string(&items()).unwrap();
		let content = format!("[{},{}]", table, table);

		assert!(matches!(
			ModelRegistry::from_json(&content),
			Err(MigrationError::Validation(_))
		));
	}
}

//! Schema snapshots
//!
//! A [`SchemaSnapshot`] describes every table, column and index at one point
//! of the revision chain. The same type describes the *declared* state (built
//! from model definitions) and the *recorded* state (built by replaying the
//! `up_ops` of applied revisions from the empty snapshot).

use super::fields::{ColumnType, DefaultValue, OnDelete};
use super::operations::{ColumnAttributes, Operation};
use super::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_nullable() -> bool {
	true
}

fn is_false(value: &bool) -> bool {
	!*value
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
	pub name: String,
	#[serde(rename = "type")]
	pub column_type: ColumnType,
	#[serde(default = "default_nullable")]
	pub nullable: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default: Option<DefaultValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub length: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub on_delete: Option<OnDelete>,
	#[serde(default, skip_serializing_if = "is_false")]
	pub primary_key: bool,
}

impl ColumnDefinition {
	/// Create a nullable column without default
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::{ColumnDefinition, ColumnType};
	///
	/// let column = ColumnDefinition::new("name", ColumnType::String).length(64).not_null();
	/// assert_eq!(column.length, Some(64));
	/// assert!(!column.nullable);
	/// ```
	pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
		Self {
			name: name.into(),
			column_type,
			nullable: true,
			default: None,
			length: None,
			on_delete: None,
			primary_key: false,
		}
	}

	/// Primary key `id` column
	pub fn id() -> Self {
		Self::new("id", ColumnType::Id).not_null().primary_key()
	}

	/// Reference column pointing at `table.id`
	pub fn reference(name: impl Into<String>, table: impl Into<String>, on_delete: OnDelete) -> Self {
		let mut column = Self::new(
			name,
			ColumnType::Reference {
				table: table.into(),
			},
		);
		column.on_delete = Some(on_delete);
		column
	}

	pub fn not_null(mut self) -> Self {
		self.nullable = false;
		self
	}

	pub fn default(mut self, default: DefaultValue) -> Self {
		self.default = Some(default);
		self
	}

	pub fn length(mut self, length: u32) -> Self {
		self.length = Some(length);
		self
	}

	pub fn primary_key(mut self) -> Self {
		self.primary_key = true;
		self
	}

	/// Everything but the name
	pub fn attributes(&self) -> ColumnAttributes {
		ColumnAttributes {
			column_type: self.column_type.clone(),
			nullable: self.nullable,
			default: self.default.clone(),
			length: self.length,
			on_delete: self.on_delete,
			primary_key: self.primary_key,
		}
	}

	pub fn with_attributes(name: impl Into<String>, attributes: ColumnAttributes) -> Self {
		Self {
			name: name.into(),
			column_type: attributes.column_type,
			nullable: attributes.nullable,
			default: attributes.default,
			length: attributes.length,
			on_delete: attributes.on_delete,
			primary_key: attributes.primary_key,
		}
	}
}

/// Index definition
///
/// An index covers plain `fields`, backend-specific `expressions`, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
	pub name: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub fields: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub expressions: Vec<String>,
	#[serde(default)]
	pub unique: bool,
	/// Partial index predicate
	#[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
	pub where_clause: Option<String>,
}

impl IndexDefinition {
	pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			name: name.into(),
			fields: fields.into_iter().map(Into::into).collect(),
			expressions: Vec::new(),
			unique: false,
			where_clause: None,
		}
	}

	/// Index named after the `<table>_widx__<name>` convention
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::IndexDefinition;
	///
	/// let index = IndexDefinition::conventional("items", "name", ["name"]);
	/// assert_eq!(index.name, "items_widx__name");
	/// ```
	pub fn conventional<I, S>(table: &str, name: &str, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::new(Self::conventional_name(table, name), fields)
	}

	pub fn conventional_name(table: &str, name: &str) -> String {
		format!("{}_widx__{}", table, name)
	}

	pub fn unique(mut self) -> Self {
		self.unique = true;
		self
	}

	pub fn expression(mut self, expression: impl Into<String>) -> Self {
		self.expressions.push(expression.into());
		self
	}

	pub fn partial(mut self, predicate: impl Into<String>) -> Self {
		self.where_clause = Some(predicate.into());
		self
	}

	fn check(&self, table: &TableDefinition) -> std::result::Result<(), String> {
		if self.fields.is_empty() && self.expressions.is_empty() {
			return Err(format!(
				"index {}.{} has neither fields nor expressions",
				table.name, self.name
			));
		}
		for field in &self.fields {
			if table.column(field).is_none() {
				return Err(format!(
					"index {}.{} references unknown column {}",
					table.name, self.name, field
				));
			}
		}
		Ok(())
	}
}

/// Table definition
///
/// Column order is preserved for reproducible generation; equality treats
/// columns and indexes as sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
	pub name: String,
	pub columns: Vec<ColumnDefinition>,
	/// Composite primary key, in key order
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub primary_key: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			columns: Vec::new(),
			primary_key: Vec::new(),
			indexes: Vec::new(),
		}
	}

	pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
		self.columns.iter().find(|c| c.name == name)
	}

	pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
		self.indexes.iter().find(|i| i.name == name)
	}

	pub fn with_column(mut self, column: ColumnDefinition) -> Self {
		self.columns.push(column);
		self
	}

	pub fn with_index(mut self, index: IndexDefinition) -> Self {
		self.indexes.push(index);
		self
	}

	pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.primary_key = columns.into_iter().map(Into::into).collect();
		self
	}

	fn sorted_columns(&self) -> Vec<&ColumnDefinition> {
		let mut columns: Vec<_> = self.columns.iter().collect();
		columns.sort_by(|a, b| a.name.cmp(&b.name));
		columns
	}

	fn sorted_indexes(&self) -> Vec<&IndexDefinition> {
		let mut indexes: Vec<_> = self.indexes.iter().collect();
		indexes.sort_by(|a, b| a.name.cmp(&b.name));
		indexes
	}

	/// Structural checks that only need the table itself
	fn check_shape(&self) -> std::result::Result<(), String> {
		if self.columns.is_empty() {
			return Err(format!("table {} has no columns", self.name));
		}
		let mut seen = BTreeSet::new();
		for column in &self.columns {
			if !seen.insert(column.name.as_str()) {
				return Err(format!("duplicate column {}.{}", self.name, column.name));
			}
		}
		let flagged: Vec<_> = self
			.columns
			.iter()
			.filter(|c| c.primary_key)
			.map(|c| c.name.as_str())
			.collect();
		if flagged.len() > 1 {
			return Err(format!(
				"table {} flags more than one primary key column ({}); declare a composite primary key instead",
				self.name,
				flagged.join(", ")
			));
		}
		if !self.primary_key.is_empty() {
			if !flagged.is_empty() {
				return Err(format!(
					"table {} declares a composite primary key and a primary key column",
					self.name
				));
			}
			for key in &self.primary_key {
				if self.column(key).is_none() {
					return Err(format!(
						"composite primary key of {} references unknown column {}",
						self.name, key
					));
				}
			}
		}
		let mut index_names = BTreeSet::new();
		for index in &self.indexes {
			if !index_names.insert(index.name.as_str()) {
				return Err(format!("duplicate index {}.{}", self.name, index.name));
			}
			index.check(self)?;
		}
		Ok(())
	}
}

impl PartialEq for TableDefinition {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
			&& self.primary_key == other.primary_key
			&& self.sorted_columns() == other.sorted_columns()
			&& self.sorted_indexes() == other.sorted_indexes()
	}
}

/// Immutable description of all tables, columns and indexes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSnapshot {
	/// Table definitions (BTreeMap for deterministic iteration order)
	tables: BTreeMap<String, TableDefinition>,
}

impl SchemaSnapshot {
	/// The empty snapshot every replay starts from
	pub fn new() -> Self {
		Self::default()
	}

	/// Build the declared snapshot from model definitions and validate it
	///
	/// # Errors
	///
	/// Returns [`MigrationError::Validation`] for duplicate tables and for
	/// anything [`SchemaSnapshot::validate`] rejects.
	pub fn from_tables<I>(tables: I) -> Result<Self>
	where
		I: IntoIterator<Item = TableDefinition>,
	{
		let mut snapshot = Self::new();
		for table in tables {
			if snapshot.tables.contains_key(&table.name) {
				return Err(MigrationError::Validation(format!(
					"table {} is declared more than once",
					table.name
				)));
			}
			snapshot.tables.insert(table.name.clone(), table);
		}
		snapshot.validate()?;
		Ok(snapshot)
	}

	pub fn table(&self, name: &str) -> Option<&TableDefinition> {
		self.tables.get(name)
	}

	pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
		self.tables.values()
	}

	pub fn table_names(&self) -> impl Iterator<Item = &str> {
		self.tables.keys().map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.tables.is_empty()
	}

	pub fn len(&self) -> usize {
		self.tables.len()
	}

	/// Check every invariant of a declared schema
	///
	/// # Errors
	///
	/// Returns [`MigrationError::Validation`] on the first violation found,
	/// in table name order.
	pub fn validate(&self) -> Result<()> {
		for table in self.tables.values() {
			table.check_shape().map_err(MigrationError::Validation)?;
			for column in &table.columns {
				if let Some(target) = column.column_type.referenced_table()
					&& !self.tables.contains_key(target)
				{
					return Err(MigrationError::Validation(format!(
						"column {}.{} references unknown table {}",
						table.name, column.name, target
					)));
				}
			}
		}
		Ok(())
	}

	/// Apply operations in order, returning the resulting snapshot
	///
	/// Pure and deterministic: `self` is left untouched, and the same list
	/// applied to the same snapshot always produces the same result.
	///
	/// # Errors
	///
	/// Returns [`MigrationError::InvalidOperation`] when an operation refers to
	/// a table, column or index that does not exist (or creates one that does).
	pub fn apply(&self, operations: &[Operation]) -> Result<SchemaSnapshot> {
		let mut next = self.clone();
		for operation in operations {
			next.apply_in_place(operation)?;
		}
		Ok(next)
	}

	pub(crate) fn apply_in_place(&mut self, operation: &Operation) -> Result<()> {
		match operation {
			Operation::CreateTable {
				name,
				columns,
				primary_key,
				indexes,
			} => {
				if self.tables.contains_key(name) {
					return Err(invalid(format!("CreateTable: table {} already exists", name)));
				}
				let table = TableDefinition {
					name: name.clone(),
					columns: columns.clone(),
					primary_key: primary_key.clone(),
					indexes: indexes.clone(),
				};
				table
					.check_shape()
					.map_err(|message| invalid(format!("CreateTable: {}", message)))?;
				self.tables.insert(name.clone(), table);
			}
			Operation::DropTable { name } => {
				if self.tables.remove(name).is_none() {
					return Err(invalid(format!("DropTable: table {} does not exist", name)));
				}
			}
			Operation::AddColumn { table, column } => {
				let definition = self.table_mut("AddColumn", table)?;
				if definition.column(&column.name).is_some() {
					return Err(invalid(format!(
						"AddColumn: column {}.{} already exists",
						table, column.name
					)));
				}
				definition.columns.push(column.clone());
			}
			Operation::DropColumn { table, column } => {
				let definition = self.table_mut("DropColumn", table)?;
				if definition.primary_key.iter().any(|key| key == column) {
					return Err(invalid(format!(
						"DropColumn: column {}.{} is part of the composite primary key",
						table, column
					)));
				}
				if let Some(index) = definition
					.indexes
					.iter()
					.find(|i| i.fields.iter().any(|f| f == column))
				{
					return Err(invalid(format!(
						"DropColumn: column {}.{} is still used by index {}",
						table, column, index.name
					)));
				}
				let before = definition.columns.len();
				definition.columns.retain(|c| &c.name != column);
				if definition.columns.len() == before {
					return Err(invalid(format!(
						"DropColumn: column {}.{} does not exist",
						table, column
					)));
				}
			}
			Operation::AlterColumn {
				table,
				column,
				changes,
				existing,
			} => {
				let definition = self.table_mut("AlterColumn", table)?;
				let Some(current) = definition.columns.iter_mut().find(|c| &c.name == column)
				else {
					return Err(invalid(format!(
						"AlterColumn: column {}.{} does not exist",
						table, column
					)));
				};
				if &current.attributes() != existing {
					return Err(invalid(format!(
						"AlterColumn: recorded state of {}.{} does not match the live definition",
						table, column
					)));
				}
				*current = ColumnDefinition::with_attributes(column.clone(), changes.apply_to(existing));
			}
			Operation::CreateIndex { table, index } => {
				let definition = self.table_mut("CreateIndex", table)?;
				if definition.index(&index.name).is_some() {
					return Err(invalid(format!(
						"CreateIndex: index {}.{} already exists",
						table, index.name
					)));
				}
				index
					.check(definition)
					.map_err(|message| invalid(format!("CreateIndex: {}", message)))?;
				definition.indexes.push(index.clone());
			}
			Operation::DropIndex { table, index } => {
				let definition = self.table_mut("DropIndex", table)?;
				let before = definition.indexes.len();
				definition.indexes.retain(|i| &i.name != index);
				if definition.indexes.len() == before {
					return Err(invalid(format!(
						"DropIndex: index {}.{} does not exist",
						table, index
					)));
				}
			}
		}
		Ok(())
	}

	fn table_mut(&mut self, operation: &str, name: &str) -> Result<&mut TableDefinition> {
		self.tables
			.get_mut(name)
			.ok_or_else(|| invalid(format!("{}: table {} does not exist", operation, name)))
	}
}

fn invalid(message: String) -> MigrationError {
	MigrationError::InvalidOperation {
		revision: None,
		message,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};

	#[fixture]
	fn items() -> TableDefinition {
		TableDefinition::new("items")
			.with_column(ColumnDefinition::id())
			.with_column(ColumnDefinition::new("name", ColumnType::String))
			.with_column(ColumnDefinition::new("price", ColumnType::Float))
	}

	#[rstest]
	fn test_equality_ignores_column_order(items: TableDefinition) {
		let mut reordered = items.clone();
		reordered.columns.reverse();
		let a = SchemaSnapshot::from_tables([items]).unwrap();
		let b = SchemaSnapshot::from_tables([reordered]).unwrap();
		assert_eq!(a, b);
	}

	#[rstest]
	fn test_equality_sees_column_attributes(items: TableDefinition) {
		let mut changed = items.clone();
		changed.columns[1].nullable = false;
		let a = SchemaSnapshot::from_tables([items]).unwrap();
		let b = SchemaSnapshot::from_tables([changed]).unwrap();
		assert_ne!(a, b);
	}

	#[rstest]
	fn test_reference_to_unknown_table_is_rejected(items: TableDefinition) {
		let table = items.with_column(ColumnDefinition::reference(
			"owner",
			"owners",
			OnDelete::Cascade,
		));
		let err = SchemaSnapshot::from_tables([table]).unwrap_err();
		assert!(matches!(err, MigrationError::Validation(msg) if msg.contains("owners")));
	}

	#[rstest]
	fn test_two_primary_key_columns_are_rejected(items: TableDefinition) {
		let table = items.with_column(ColumnDefinition::new("code", ColumnType::String).primary_key());
		assert!(matches!(
			SchemaSnapshot::from_tables([table]),
			Err(MigrationError::Validation(_))
		));
	}

	#[rstest]
	fn test_composite_primary_key_must_name_known_columns() {
		let table = TableDefinition::new("tags")
			.with_column(ColumnDefinition::new("item", ColumnType::Integer))
			.with_column(ColumnDefinition::new("tag", ColumnType::String))
			.with_primary_key(["item", "label"]);
		assert!(matches!(
			SchemaSnapshot::from_tables([table]),
			Err(MigrationError::Validation(msg)) if msg.contains("label")
		));
	}

	#[rstest]
	fn test_index_needs_fields_or_expressions(items: TableDefinition) {
		let table = items.with_index(IndexDefinition::new("items_widx__empty", Vec::<String>::new()));
		assert!(matches!(
			SchemaSnapshot::from_tables([table]),
			Err(MigrationError::Validation(_))
		));
	}

	#[rstest]
	fn test_duplicate_table_is_rejected(items: TableDefinition) {
		assert!(matches!(
			SchemaSnapshot::from_tables([items.clone(), items]),
			Err(MigrationError::Validation(_))
		));
	}

	#[rstest]
	fn test_apply_does_not_mutate_source(items: TableDefinition) {
		let empty = SchemaSnapshot::new();
		let created = empty
			.apply(&[Operation::CreateTable {
				name: "items".to_string(),
				columns: items.columns.clone(),
				primary_key: vec![],
				indexes: vec![],
			}])
			.unwrap();
		assert!(empty.is_empty());
		assert_eq!(created.table("items").unwrap().columns.len(), 3);
	}

	#[rstest]
	fn test_drop_missing_column_is_invalid(items: TableDefinition) {
		let snapshot = SchemaSnapshot::from_tables([items]).unwrap();
		let err = snapshot
			.apply(&[Operation::DropColumn {
				table: "items".to_string(),
				column: "ghost".to_string(),
			}])
			.unwrap_err();
		assert!(matches!(err, MigrationError::InvalidOperation { .. }));
	}

	#[rstest]
	fn test_drop_indexed_column_is_invalid(items: TableDefinition) {
		let table = items.with_index(IndexDefinition::conventional("items", "title", ["name"]));
		let snapshot = SchemaSnapshot::from_tables([table]).unwrap();
		let err = snapshot
			.apply(&[Operation::DropColumn {
				table: "items".to_string(),
				column: "name".to_string(),
			}])
			.unwrap_err();
		assert!(matches!(err, MigrationError::InvalidOperation { message, .. } if message.contains("items_widx__title")));
	}

	#[rstest]
	fn test_failed_apply_leaves_no_partial_state(items: TableDefinition) {
		let snapshot = SchemaSnapshot::from_tables([items]).unwrap();
		let result = snapshot.apply(&[
			Operation::AddColumn {
				table: "items".to_string(),
				column: ColumnDefinition::new("count", ColumnType::Integer),
			},
			Operation::DropTable {
				name: "missing".to_string(),
			},
		]);
		assert!(result.is_err());
		assert!(snapshot.table("items").unwrap().column("count").is_none());
	}
}

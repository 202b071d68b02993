//! Schema diff detection
//!
//! Computes the ordered operation list turning one snapshot into another:
//! - Table additions/removals
//! - Column additions/removals/modifications
//! - Index changes
//!
//! Operations are grouped by kind (create table, drop table, add column, drop
//! column, alter column, create index, drop index) and sorted by table name,
//! then column or index name. Two cases deviate from the plain grouping so the
//! list stays executable: an index covering a column that is being dropped is
//! dropped right before that column, and an index whose definition changed
//! under the same name is dropped right before it is recreated.
//!
//! Renames are not detected. A renamed table or column shows up as a drop
//! paired with a create.
//!
//! A composite primary key is fixed when its table is created. Changing it on
//! an existing table is refused instead of producing an incomplete diff.

use super::{MigrationError, Result};
use super::operations::{ColumnChanges, Operation};
use super::snapshot::{SchemaSnapshot, TableDefinition};
use std::collections::BTreeSet;

/// Schema difference detector
pub struct SchemaDiff<'a> {
	/// Recorded schema (replayed from revisions)
	current: &'a SchemaSnapshot,
	/// Target schema from models
	target: &'a SchemaSnapshot,
}

/// Schema diff result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiffResult {
	/// Operations turning the current snapshot into the target
	pub up_ops: Vec<Operation>,
	/// Structural inverse of `up_ops`, in reverse order
	pub down_ops: Vec<Operation>,
}

impl SchemaDiffResult {
	pub fn is_empty(&self) -> bool {
		self.up_ops.is_empty() && self.down_ops.is_empty()
	}
}

impl<'a> SchemaDiff<'a> {
	/// Create a new schema diff detector
	pub fn new(current: &'a SchemaSnapshot, target: &'a SchemaSnapshot) -> Self {
		Self { current, target }
	}

	/// Detect differences between the snapshots
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::{ColumnDefinition, ColumnType, SchemaDiff, SchemaSnapshot, TableDefinition};
	///
	/// let empty = SchemaSnapshot::new();
	/// let declared = SchemaSnapshot::from_tables([TableDefinition::new("items")
	///     .with_column(ColumnDefinition::id())])
	/// .unwrap();
	///
	/// let diff = SchemaDiff::new(&empty, &declared).detect().unwrap();
	/// assert_eq!(diff.up_ops.len(), 1);
	/// assert_eq!(empty.apply(&diff.up_ops).unwrap(), declared);
	/// assert_eq!(declared.apply(&diff.down_ops).unwrap(), empty);
	/// ```
	///
	/// # Errors
	///
	/// Returns [`MigrationError::Validation`] when the composite primary key
	/// of an existing table differs between the snapshots, and
	/// [`MigrationError::InvalidOperation`] if the generated operations cannot
	/// be replayed against the current snapshot, which means the target holds
	/// a change the operation set cannot express.
	pub fn detect(&self) -> Result<SchemaDiffResult> {
		self.check_primary_keys()?;
		let up_ops = self.operations();

		let mut state = self.current.clone();
		let mut down_ops = Vec::with_capacity(up_ops.len());
		for operation in &up_ops {
			down_ops.push(operation.inverse(&state)?);
			state.apply_in_place(operation)?;
		}
		down_ops.reverse();

		Ok(SchemaDiffResult { up_ops, down_ops })
	}

	fn check_primary_keys(&self) -> Result<()> {
		for target_table in self.target.tables() {
			if let Some(current_table) = self.current.table(&target_table.name)
				&& current_table.primary_key != target_table.primary_key
			{
				return Err(MigrationError::Validation(format!(
					"composite primary key of table {} changed from [{}] to [{}]; \
					 drop and recreate the table in a hand-written revision",
					target_table.name,
					current_table.primary_key.join(", "),
					target_table.primary_key.join(", ")
				)));
			}
		}
		Ok(())
	}

	/// Forward operations only
	///
	/// Does not check composite primary keys; use [`SchemaDiff::detect`].
	pub fn operations(&self) -> Vec<Operation> {
		let mut create_tables = Vec::new();
		let mut drop_tables = Vec::new();
		let mut add_columns = Vec::new();
		let mut drop_columns = Vec::new();
		let mut alter_columns = Vec::new();
		let mut create_indexes = Vec::new();
		let mut drop_indexes = Vec::new();

		// BTreeMap iteration keeps every group sorted by table name
		for target_table in self.target.tables() {
			if self.current.table(&target_table.name).is_none() {
				create_tables.push(Operation::CreateTable {
					name: target_table.name.clone(),
					columns: target_table.columns.clone(),
					primary_key: target_table.primary_key.clone(),
					indexes: target_table.indexes.clone(),
				});
			}
		}

		for current_table in self.current.tables() {
			if self.target.table(&current_table.name).is_none() {
				drop_tables.push(Operation::DropTable {
					name: current_table.name.clone(),
				});
			}
		}

		for target_table in self.target.tables() {
			let Some(current_table) = self.current.table(&target_table.name) else {
				continue;
			};
			let table = &target_table.name;

			for column in sorted(target_table.columns.iter().map(|c| c.name.as_str())) {
				if current_table.column(column).is_none()
					&& let Some(definition) = target_table.column(column)
				{
					add_columns.push(Operation::AddColumn {
						table: table.clone(),
						column: definition.clone(),
					});
				}
			}

			// Indexes dropped ahead of their columns
			let mut dropped_early = BTreeSet::new();
			for column in sorted(current_table.columns.iter().map(|c| c.name.as_str())) {
				if target_table.column(column).is_some() {
					continue;
				}
				for index in sorted(current_table.indexes.iter().map(|i| i.name.as_str())) {
					let covers = current_table
						.index(index)
						.is_some_and(|i| i.fields.iter().any(|f| f == column));
					if covers && !dropped_early.contains(index) {
						dropped_early.insert(index.to_string());
						drop_columns.push(Operation::DropIndex {
							table: table.clone(),
							index: index.to_string(),
						});
					}
				}
				drop_columns.push(Operation::DropColumn {
					table: table.clone(),
					column: column.to_string(),
				});
			}

			for column in sorted(target_table.columns.iter().map(|c| c.name.as_str())) {
				if let (Some(existing), Some(wanted)) =
					(current_table.column(column), target_table.column(column))
				{
					let existing = existing.attributes();
					let changes = ColumnChanges::between(&existing, &wanted.attributes());
					if !changes.is_empty() {
						alter_columns.push(Operation::AlterColumn {
							table: table.clone(),
							column: column.to_string(),
							changes,
							existing,
						});
					}
				}
			}

			self.index_changes(
				current_table,
				target_table,
				&dropped_early,
				&mut create_indexes,
				&mut drop_indexes,
			);
		}

		let mut operations = Vec::new();
		operations.extend(create_tables);
		operations.extend(drop_tables);
		operations.extend(add_columns);
		operations.extend(drop_columns);
		operations.extend(alter_columns);
		operations.extend(create_indexes);
		operations.extend(drop_indexes);
		operations
	}

	fn index_changes(
		&self,
		current_table: &TableDefinition,
		target_table: &TableDefinition,
		dropped_early: &BTreeSet<String>,
		create_indexes: &mut Vec<Operation>,
		drop_indexes: &mut Vec<Operation>,
	) {
		let table = &target_table.name;

		for name in sorted(target_table.indexes.iter().map(|i| i.name.as_str())) {
			let Some(wanted) = target_table.index(name) else {
				continue;
			};
			match current_table.index(name) {
				Some(existing) if existing == wanted && !dropped_early.contains(name) => {}
				Some(_) if !dropped_early.contains(name) => {
					create_indexes.push(Operation::DropIndex {
						table: table.clone(),
						index: name.to_string(),
					});
					create_indexes.push(Operation::CreateIndex {
						table: table.clone(),
						index: wanted.clone(),
					});
				}
				_ => create_indexes.push(Operation::CreateIndex {
					table: table.clone(),
					index: wanted.clone(),
				}),
			}
		}

		for name in sorted(current_table.indexes.iter().map(|i| i.name.as_str())) {
			if target_table.index(name).is_none() && !dropped_early.contains(name) {
				drop_indexes.push(Operation::DropIndex {
					table: table.clone(),
					index: name.to_string(),
				});
			}
		}
	}
}

fn sorted<'s>(names: impl Iterator<Item = &'s str>) -> Vec<&'s str> {
	let mut names: Vec<_> = names.collect();
	names.sort_unstable();
	names
}

//! Migration operations
//!
//! The closed set of schema-change primitives a revision is made of. Every
//! operation is self-describing; `AlterColumn` additionally carries the
//! pre-change column attributes so backends that cannot introspect can still
//! build correct DDL and so the operation can be reversed on its own.
//!
//! # Example
//!
//! ```rust
//! use revmig_migrations::{ColumnDefinition, ColumnType, Operation, SchemaSnapshot};
//!
//! let create = Operation::CreateTable {
//!     name: "items".to_string(),
//!     columns: vec![ColumnDefinition::id(), ColumnDefinition::new("name", ColumnType::String)],
//!     primary_key: vec![],
//!     indexes: vec![],
//! };
//! let before = SchemaSnapshot::new();
//! let after = before.apply(&[create.clone()]).unwrap();
//! let undo = create.inverse(&before).unwrap();
//! assert_eq!(after.apply(&[undo]).unwrap(), before);
//! ```

use super::fields::{ColumnType, DefaultValue, OnDelete};
use super::snapshot::{ColumnDefinition, IndexDefinition, SchemaSnapshot};
use super::store::StoreError;
use super::{MigrationError, Result};
use pg_escape::{quote_identifier, quote_literal};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A migration operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op")]
pub enum Operation {
	CreateTable {
		name: String,
		columns: Vec<ColumnDefinition>,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		primary_key: Vec<String>,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		indexes: Vec<IndexDefinition>,
	},
	DropTable {
		name: String,
	},
	AddColumn {
		table: String,
		column: ColumnDefinition,
	},
	DropColumn {
		table: String,
		column: String,
	},
	AlterColumn {
		table: String,
		column: String,
		changes: ColumnChanges,
		/// Column attributes before the change
		existing: ColumnAttributes,
	},
	CreateIndex {
		table: String,
		index: IndexDefinition,
	},
	DropIndex {
		table: String,
		index: String,
	},
}

/// Operation discriminant, used for grouping and capability checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
	CreateTable,
	DropTable,
	AddColumn,
	DropColumn,
	AlterColumn,
	CreateIndex,
	DropIndex,
}

impl OperationKind {
	pub const ALL: [OperationKind; 7] = [
		OperationKind::CreateTable,
		OperationKind::DropTable,
		OperationKind::AddColumn,
		OperationKind::DropColumn,
		OperationKind::AlterColumn,
		OperationKind::CreateIndex,
		OperationKind::DropIndex,
	];
}

impl fmt::Display for OperationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			OperationKind::CreateTable => "CreateTable",
			OperationKind::DropTable => "DropTable",
			OperationKind::AddColumn => "AddColumn",
			OperationKind::DropColumn => "DropColumn",
			OperationKind::AlterColumn => "AlterColumn",
			OperationKind::CreateIndex => "CreateIndex",
			OperationKind::DropIndex => "DropIndex",
		};
		f.write_str(name)
	}
}

/// Full set of column attributes (everything but the name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAttributes {
	#[serde(rename = "type")]
	pub column_type: ColumnType,
	pub nullable: bool,
	#[serde(default)]
	pub default: Option<DefaultValue>,
	#[serde(default)]
	pub length: Option<u32>,
	#[serde(default)]
	pub on_delete: Option<OnDelete>,
	#[serde(default)]
	pub primary_key: bool,
}

/// Requested column changes; `None` leaves the attribute untouched
///
/// For optional attributes `Some(None)` clears the attribute (serialized as
/// `null`), a missing key leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnChanges {
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub column_type: Option<ColumnType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nullable: Option<bool>,
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		deserialize_with = "present"
	)]
	pub default: Option<Option<DefaultValue>>,
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		deserialize_with = "present"
	)]
	pub length: Option<Option<u32>>,
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		deserialize_with = "present"
	)]
	pub on_delete: Option<Option<OnDelete>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub primary_key: Option<bool>,
}

// A present key (even `null`) is a change
fn present<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
	T: Deserialize<'de>,
	D: Deserializer<'de>,
{
	T::deserialize(deserializer).map(Some)
}

impl ColumnChanges {
	/// Changes turning `from` into `to`
	pub fn between(from: &ColumnAttributes, to: &ColumnAttributes) -> Self {
		fn diff<T: PartialEq + Clone>(a: &T, b: &T) -> Option<T> {
			(a != b).then(|| b.clone())
		}
		Self {
			column_type: diff(&from.column_type, &to.column_type),
			nullable: diff(&from.nullable, &to.nullable),
			default: diff(&from.default, &to.default),
			length: diff(&from.length, &to.length),
			on_delete: diff(&from.on_delete, &to.on_delete),
			primary_key: diff(&from.primary_key, &to.primary_key),
		}
	}

	pub fn is_empty(&self) -> bool {
		*self == Self::default()
	}

	pub fn apply_to(&self, existing: &ColumnAttributes) -> ColumnAttributes {
		let mut target = existing.clone();
		if let Some(column_type) = &self.column_type {
			target.column_type = column_type.clone();
		}
		if let Some(nullable) = self.nullable {
			target.nullable = nullable;
		}
		if let Some(default) = &self.default {
			target.default = default.clone();
		}
		if let Some(length) = self.length {
			target.length = length;
		}
		if let Some(on_delete) = self.on_delete {
			target.on_delete = on_delete;
		}
		if let Some(primary_key) = self.primary_key {
			target.primary_key = primary_key;
		}
		target
	}
}

impl Operation {
	pub fn kind(&self) -> OperationKind {
		match self {
			Operation::CreateTable { .. } => OperationKind::CreateTable,
			Operation::DropTable { .. } => OperationKind::DropTable,
			Operation::AddColumn { .. } => OperationKind::AddColumn,
			Operation::DropColumn { .. } => OperationKind::DropColumn,
			Operation::AlterColumn { .. } => OperationKind::AlterColumn,
			Operation::CreateIndex { .. } => OperationKind::CreateIndex,
			Operation::DropIndex { .. } => OperationKind::DropIndex,
		}
	}

	/// Table the operation targets
	pub fn table(&self) -> &str {
		match self {
			Operation::CreateTable { name, .. } | Operation::DropTable { name } => name,
			Operation::AddColumn { table, .. }
			| Operation::DropColumn { table, .. }
			| Operation::AlterColumn { table, .. }
			| Operation::CreateIndex { table, .. }
			| Operation::DropIndex { table, .. } => table,
		}
	}

	/// Column or index the operation targets, empty for table operations
	pub fn subject(&self) -> &str {
		match self {
			Operation::CreateTable { .. } | Operation::DropTable { .. } => "",
			Operation::AddColumn { column, .. } => &column.name,
			Operation::DropColumn { column, .. } | Operation::AlterColumn { column, .. } => column,
			Operation::CreateIndex { index, .. } => &index.name,
			Operation::DropIndex { index, .. } => index,
		}
	}

	/// Whether running the operation may discard data
	pub fn is_destructive(&self) -> bool {
		matches!(
			self,
			Operation::DropTable { .. } | Operation::DropColumn { .. } | Operation::AlterColumn { .. }
		)
	}

	/// Structural inverse of this operation
	///
	/// `before` is the snapshot the operation is applied to; drops reconstruct
	/// the dropped table, column or index from it.
	///
	/// # Errors
	///
	/// Returns [`MigrationError::InvalidOperation`] when a dropped object is
	/// absent from `before`.
	pub fn inverse(&self, before: &SchemaSnapshot) -> Result<Operation> {
		let missing = |what: String| MigrationError::InvalidOperation {
			revision: None,
			message: format!("cannot reverse {}: {} does not exist", self.kind(), what),
		};
		Ok(match self {
			Operation::CreateTable { name, .. } => Operation::DropTable { name: name.clone() },
			Operation::DropTable { name } => {
				let table = before
					.table(name)
					.ok_or_else(|| missing(format!("table {}", name)))?;
				Operation::CreateTable {
					name: table.name.clone(),
					columns: table.columns.clone(),
					primary_key: table.primary_key.clone(),
					indexes: table.indexes.clone(),
				}
			}
			Operation::AddColumn { table, column } => Operation::DropColumn {
				table: table.clone(),
				column: column.name.clone(),
			},
			Operation::DropColumn { table, column } => {
				let definition = before
					.table(table)
					.and_then(|t| t.column(column))
					.ok_or_else(|| missing(format!("column {}.{}", table, column)))?;
				Operation::AddColumn {
					table: table.clone(),
					column: definition.clone(),
				}
			}
			Operation::AlterColumn {
				table,
				column,
				changes,
				existing,
			} => {
				let target = changes.apply_to(existing);
				Operation::AlterColumn {
					table: table.clone(),
					column: column.clone(),
					changes: ColumnChanges::between(&target, existing),
					existing: target,
				}
			}
			Operation::CreateIndex { table, index } => Operation::DropIndex {
				table: table.clone(),
				index: index.name.clone(),
			},
			Operation::DropIndex { table, index } => {
				let definition = before
					.table(table)
					.and_then(|t| t.index(index))
					.ok_or_else(|| missing(format!("index {}.{}", table, index)))?;
				Operation::CreateIndex {
					table: table.clone(),
					index: definition.clone(),
				}
			}
		})
	}

	/// Render the DDL statements for this operation
	///
	/// # Errors
	///
	/// Returns [`StoreError::Unsupported`] when the dialect cannot express
	/// the operation (ALTER COLUMN on SQLite, partial indexes on MySQL, ...).
	pub fn to_sql(&self, dialect: SqlDialect) -> std::result::Result<Vec<String>, StoreError> {
		match self {
			Operation::CreateTable {
				name,
				columns,
				primary_key,
				indexes,
			} => {
				let mut parts: Vec<String> = columns
					.iter()
					.map(|c| column_sql(c, dialect, dialect != SqlDialect::Mysql))
					.collect();
				if !primary_key.is_empty() {
					let keys: Vec<_> = primary_key.iter().map(|k| dialect.quote_ident(k)).collect();
					parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
				}
				if dialect == SqlDialect::Mysql {
					parts.extend(columns.iter().filter_map(|c| foreign_key_sql(c, dialect)));
				}
				let mut statements = vec![format!("CREATE TABLE {} ({})", dialect.quote_ident(name), parts.join(", "))];
				for index in indexes {
					statements.push(create_index_sql(name, index, dialect)?);
				}
				Ok(statements)
			}
			Operation::DropTable { name } => Ok(vec![format!("DROP TABLE {}", dialect.quote_ident(name))]),
			Operation::AddColumn { table, column } => {
				let mut statement = format!(
					"ALTER TABLE {} ADD COLUMN {}",
					dialect.quote_ident(table),
					column_sql(column, dialect, dialect != SqlDialect::Mysql)
				);
				if let Some(fk) = foreign_key_sql(column, dialect)
					&& dialect == SqlDialect::Mysql
				{
					statement.push_str(&format!(", ADD {}", fk));
				}
				Ok(vec![statement])
			}
			Operation::DropColumn { table, column } => Ok(vec![format!(
				"ALTER TABLE {} DROP COLUMN {}",
				dialect.quote_ident(table),
				dialect.quote_ident(column)
			)]),
			Operation::AlterColumn {
				table,
				column,
				changes,
				existing,
			} => alter_column_sql(table, column, changes, existing, dialect),
			Operation::CreateIndex { table, index } => {
				Ok(vec![create_index_sql(table, index, dialect)?])
			}
			Operation::DropIndex { table, index } => Ok(vec![match dialect {
				SqlDialect::Mysql => format!("DROP INDEX {} ON {}", dialect.quote_ident(index), dialect.quote_ident(table)),
				SqlDialect::Postgres | SqlDialect::Sqlite => format!("DROP INDEX {}", dialect.quote_ident(index)),
			}]),
		}
	}
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Operation::CreateTable { name, columns, .. } => {
				write!(f, "CreateTable({}, {} columns)", name, columns.len())
			}
			Operation::DropTable { name } => write!(f, "DropTable({})", name),
			Operation::AddColumn { table, column } => {
				write!(f, "AddColumn({}, {} {})", table, column.name, column.column_type)
			}
			Operation::DropColumn { table, column } => write!(f, "DropColumn({}, {})", table, column),
			Operation::AlterColumn { table, column, .. } => {
				write!(f, "AlterColumn({}, {})", table, column)
			}
			Operation::CreateIndex { table, index } => {
				write!(f, "CreateIndex({}, {})", table, index.name)
			}
			Operation::DropIndex { table, index } => write!(f, "DropIndex({}, {})", table, index),
		}
	}
}

/// SQL dialects the DDL renderer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
	Postgres,
	Mysql,
	Sqlite,
}

impl SqlDialect {
	/// Detect the dialect from a connection URL scheme
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::SqlDialect;
	///
	/// assert_eq!(SqlDialect::from_url("postgres://localhost/app"), Some(SqlDialect::Postgres));
	/// assert_eq!(SqlDialect::from_url("sqlite::memory:"), Some(SqlDialect::Sqlite));
	/// assert_eq!(SqlDialect::from_url("redis://localhost"), None);
	/// ```
	pub fn from_url(url: &str) -> Option<Self> {
		if url.starts_with("postgres://") || url.starts_with("postgresql://") {
			Some(SqlDialect::Postgres)
		} else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
			Some(SqlDialect::Mysql)
		} else if url.starts_with("sqlite:") {
			Some(SqlDialect::Sqlite)
		} else {
			None
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			SqlDialect::Postgres => "postgres",
			SqlDialect::Mysql => "mysql",
			SqlDialect::Sqlite => "sqlite",
		}
	}

	pub fn quote_ident(&self, ident: &str) -> String {
		match self {
			SqlDialect::Mysql => format!("`{}`", ident.replace('`', "``")),
			SqlDialect::Postgres | SqlDialect::Sqlite => quote_identifier(ident).to_string(),
		}
	}

	pub fn quote_literal(&self, literal: &str) -> String {
		match self {
			SqlDialect::Mysql => format!("'{}'", literal.replace('\\', "\\\\").replace('\'', "''")),
			SqlDialect::Postgres | SqlDialect::Sqlite => quote_literal(literal).to_string(),
		}
	}
}

impl fmt::Display for SqlDialect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

fn column_sql(column: &ColumnDefinition, dialect: SqlDialect, inline_reference: bool) -> String {
	column_sql_from(&column.name, &column.attributes(), dialect, inline_reference)
}

fn column_sql_from(
	name: &str,
	attributes: &ColumnAttributes,
	dialect: SqlDialect,
	inline_reference: bool,
) -> String {
	let mut sql = format!(
		"{} {}",
		dialect.quote_ident(name),
		attributes
			.column_type
			.to_sql_for_dialect(dialect, attributes.length)
	);
	if attributes.primary_key {
		sql.push_str(" PRIMARY KEY");
		if dialect == SqlDialect::Sqlite && attributes.column_type == ColumnType::Id {
			sql.push_str(" AUTOINCREMENT");
		}
	} else if !attributes.nullable {
		sql.push_str(" NOT NULL");
	}
	if let Some(default) = attributes.default.as_ref().and_then(|d| d.to_sql(dialect)) {
		sql.push_str(&format!(" DEFAULT {}", default));
	}
	if inline_reference && let Some(target) = attributes.column_type.referenced_table() {
		sql.push_str(&format!(" REFERENCES {} (id)", dialect.quote_ident(target)));
		if let Some(on_delete) = attributes.on_delete {
			sql.push_str(&format!(" ON DELETE {}", on_delete.to_sql()));
		}
	}
	sql
}

fn foreign_key_sql(column: &ColumnDefinition, dialect: SqlDialect) -> Option<String> {
	let target = column.column_type.referenced_table()?;
	let mut sql = format!(
		"FOREIGN KEY ({}) REFERENCES {} (id)",
		dialect.quote_ident(&column.name),
		dialect.quote_ident(target)
	);
	if let Some(on_delete) = column.on_delete {
		sql.push_str(&format!(" ON DELETE {}", on_delete.to_sql()));
	}
	Some(sql)
}

fn create_index_sql(
	table: &str,
	index: &IndexDefinition,
	dialect: SqlDialect,
) -> std::result::Result<String, StoreError> {
	if index.where_clause.is_some() && dialect == SqlDialect::Mysql {
		return Err(StoreError::Unsupported(format!(
			"partial index {} is not supported by mysql",
			index.name
		)));
	}
	let mut items: Vec<String> = index.fields.iter().map(|f| dialect.quote_ident(f)).collect();
	items.extend(index.expressions.iter().map(|e| format!("({})", e)));
	let mut sql = format!(
		"CREATE {}INDEX {} ON {} ({})",
		if index.unique { "UNIQUE " } else { "" },
		dialect.quote_ident(&index.name),
		dialect.quote_ident(table),
		items.join(", ")
	);
	if let Some(predicate) = &index.where_clause {
		sql.push_str(&format!(" WHERE {}", predicate));
	}
	Ok(sql)
}

fn alter_column_sql(
	table: &str,
	column: &str,
	changes: &ColumnChanges,
	existing: &ColumnAttributes,
	dialect: SqlDialect,
) -> std::result::Result<Vec<String>, StoreError> {
	let table_q = dialect.quote_ident(table);
	let column_q = dialect.quote_ident(column);
	match dialect {
		SqlDialect::Sqlite => Err(StoreError::Unsupported(format!(
			"ALTER COLUMN {}.{} is not supported by sqlite",
			table, column
		))),
		// MySQL rewrites the whole column definition
		SqlDialect::Mysql => {
			let target = changes.apply_to(existing);
			Ok(vec![format!(
				"ALTER TABLE {} MODIFY COLUMN {}",
				table_q,
				column_sql_from(column, &target, dialect, false)
			)])
		}
		SqlDialect::Postgres => {
			if changes.on_delete.is_some() || changes.primary_key.is_some() {
				return Err(StoreError::Unsupported(format!(
					"changing constraints of {}.{} requires a table rewrite",
					table, column
				)));
			}
			let target = changes.apply_to(existing);
			let mut statements = Vec::new();
			if changes.column_type.is_some() || changes.length.is_some() {
				let type_sql = target
					.column_type
					.to_sql_for_dialect(dialect, target.length);
				statements.push(format!(
					"ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
					table_q, column_q, type_sql, column_q, type_sql
				));
			}
			if let Some(nullable) = changes.nullable {
				statements.push(format!(
					"ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
					table_q,
					column_q,
					if nullable { "DROP" } else { "SET" }
				));
			}
			if let Some(default) = &changes.default {
				match default.as_ref().and_then(|d| d.to_sql(dialect)) {
					Some(value) => statements.push(format!(
						"ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
						table_q, column_q, value
					)),
					None => statements.push(format!(
						"ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
						table_q, column_q
					)),
				}
			}
			Ok(statements)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::snapshot::TableDefinition;
	use rstest::rstest;

	fn items_snapshot() -> SchemaSnapshot {
		SchemaSnapshot::from_tables([TableDefinition::new("items")
			.with_column(ColumnDefinition::id())
			.with_column(ColumnDefinition::new("title", ColumnType::String).length(80))
			.with_index(IndexDefinition::conventional("items", "title", ["title"]).unique())])
		.unwrap()
	}

	#[rstest]
	fn test_alter_column_inverse_swaps_states() {
		let existing = ColumnDefinition::new("title", ColumnType::String)
			.length(80)
			.attributes();
		let target = ColumnDefinition::new("title", ColumnType::Text)
			.not_null()
			.attributes();
		let op = Operation::AlterColumn {
			table: "items".to_string(),
			column: "title".to_string(),
			changes: ColumnChanges::between(&existing, &target),
			existing: existing.clone(),
		};

		let snapshot = items_snapshot();
		let inverse = op.inverse(&snapshot).unwrap();
		match &inverse {
			Operation::AlterColumn {
				changes,
				existing: inverse_existing,
				..
			} => {
				assert_eq!(inverse_existing, &target);
				assert_eq!(changes.apply_to(&target), existing);
			}
			other => panic!("unexpected inverse {:?}", other),
		}

		let forward = snapshot.apply(&[op]).unwrap();
		assert_eq!(forward.apply(&[inverse]).unwrap(), snapshot);
	}

	#[rstest]
	fn test_drop_index_inverse_rebuilds_definition() {
		let snapshot = items_snapshot();
		let op = Operation::DropIndex {
			table: "items".to_string(),
			index: "items_widx__title".to_string(),
		};
		let inverse = op.inverse(&snapshot).unwrap();
		assert_eq!(
			inverse,
			Operation::CreateIndex {
				table: "items".to_string(),
				index: IndexDefinition::conventional("items", "title", ["title"]).unique(),
			}
		);
	}

	#[rstest]
	fn test_inverse_of_missing_drop_is_invalid() {
		let op = Operation::DropColumn {
			table: "items".to_string(),
			column: "ghost".to_string(),
		};
		assert!(matches!(
			op.inverse(&items_snapshot()),
			Err(MigrationError::InvalidOperation { .. })
		));
	}

	#[rstest]
	fn test_changes_serde_distinguishes_clear_from_untouched() {
		let changes = ColumnChanges {
			default: Some(None),
			..Default::default()
		};
		let json = serde_json::to_string(&changes).unwrap();
		assert_eq!(json, r#"{"default":null}"#);
		let parsed: ColumnChanges = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed.default, Some(None));

		let untouched: ColumnChanges = serde_json::from_str("{}").unwrap();
		assert!(untouched.is_empty());
	}

	#[rstest]
	fn test_create_table_sql_sqlite() {
		let op = Operation::CreateTable {
			name: "items".to_string(),
			columns: vec![
				ColumnDefinition::id(),
				ColumnDefinition::new("title", ColumnType::String).not_null(),
				ColumnDefinition::new("qty", ColumnType::Integer)
					.default(DefaultValue::literal(0)),
			],
			primary_key: vec![],
			indexes: vec![],
		};
		assert_eq!(
			op.to_sql(SqlDialect::Sqlite).unwrap(),
			vec![
				"CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, title VARCHAR(512) NOT NULL, qty INTEGER DEFAULT 0)"
					.to_string()
			]
		);
	}

	#[rstest]
	fn test_reference_sql_per_dialect() {
		let op = Operation::AddColumn {
			table: "items".to_string(),
			column: ColumnDefinition::reference("owner_id", "owners", OnDelete::Nullify),
		};
		assert_eq!(
			op.to_sql(SqlDialect::Postgres).unwrap(),
			vec!["ALTER TABLE items ADD COLUMN owner_id INTEGER REFERENCES owners (id) ON DELETE SET NULL".to_string()]
		);
		assert_eq!(
			op.to_sql(SqlDialect::Mysql).unwrap(),
			vec!["ALTER TABLE `items` ADD COLUMN `owner_id` INTEGER, ADD FOREIGN KEY (`owner_id`) REFERENCES `owners` (id) ON DELETE SET NULL".to_string()]
		);
	}

	#[rstest]
	fn test_alter_column_sql() {
		let existing = ColumnDefinition::new("qty", ColumnType::Integer).attributes();
		let target = ColumnDefinition::new("qty", ColumnType::Integer)
			.not_null()
			.default(DefaultValue::literal(1))
			.attributes();
		let op = Operation::AlterColumn {
			table: "items".to_string(),
			column: "qty".to_string(),
			changes: ColumnChanges::between(&existing, &target),
			existing,
		};
		assert_eq!(
			op.to_sql(SqlDialect::Postgres).unwrap(),
			vec![
				"ALTER TABLE items ALTER COLUMN qty SET NOT NULL".to_string(),
				"ALTER TABLE items ALTER COLUMN qty SET DEFAULT 1".to_string(),
			]
		);
		assert!(matches!(
			op.to_sql(SqlDialect::Sqlite),
			Err(StoreError::Unsupported(_))
		));
	}

	#[rstest]
	#[case(SqlDialect::Postgres, "CREATE UNIQUE INDEX items_widx__live ON items (title) WHERE deleted_at IS NULL")]
	#[case(SqlDialect::Sqlite, "CREATE UNIQUE INDEX items_widx__live ON items (title) WHERE deleted_at IS NULL")]
	fn test_partial_index_sql(#[case] dialect: SqlDialect, #[case] expected: &str) {
		let op = Operation::CreateIndex {
			table: "items".to_string(),
			index: IndexDefinition::conventional("items", "live", ["title"])
				.unique()
				.partial("deleted_at IS NULL"),
		};
		assert_eq!(op.to_sql(dialect).unwrap(), vec![expected.to_string()]);
		assert!(op.to_sql(SqlDialect::Mysql).is_err());
	}
}

//! Column type definitions for migrations

use super::operations::SqlDialect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default length for sized string columns when none is declared
pub const DEFAULT_STRING_LENGTH: u32 = 512;

/// Represents declared column types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
	/// Auto-incrementing integer identifier
	Id,
	String,
	Text,
	Boolean,
	Integer,
	Float,
	Decimal {
		precision: u32,
		scale: u32,
	},
	Date,
	Time,
	DateTime,
	/// Hashed password, stored as a sized string
	Password,
	Blob,
	/// Integer reference to the `id` of another table
	Reference {
		table: String,
	},
	/// List of scalar values of the inner type
	List {
		of: Box<ColumnType>,
	},
	Json,
}

impl ColumnType {
	/// Whether the type accepts a `length`
	pub fn is_sized(&self) -> bool {
		matches!(self, ColumnType::String | ColumnType::Password)
	}

	/// Referenced table for reference columns
	pub fn referenced_table(&self) -> Option<&str> {
		match self {
			ColumnType::Reference { table } => Some(table),
			_ => None,
		}
	}

	/// Convert ColumnType to SQL string for a specific dialect
	///
	/// `length` only applies to sized types; other types ignore it.
	pub fn to_sql_for_dialect(&self, dialect: SqlDialect, length: Option<u32>) -> String {
		let sized = || format!("VARCHAR({})", length.unwrap_or(DEFAULT_STRING_LENGTH));
		match self {
			ColumnType::Id => match dialect {
				SqlDialect::Postgres => "SERIAL".to_string(),
				SqlDialect::Mysql => "INT AUTO_INCREMENT".to_string(),
				SqlDialect::Sqlite => "INTEGER".to_string(),
			},
			ColumnType::String | ColumnType::Password => sized(),
			ColumnType::Text => match dialect {
				SqlDialect::Mysql => "LONGTEXT".to_string(),
				SqlDialect::Postgres | SqlDialect::Sqlite => "TEXT".to_string(),
			},
			ColumnType::Boolean => "BOOLEAN".to_string(),
			ColumnType::Integer | ColumnType::Reference { .. } => "INTEGER".to_string(),
			ColumnType::Float => match dialect {
				SqlDialect::Postgres => "DOUBLE PRECISION".to_string(),
				SqlDialect::Mysql => "DOUBLE".to_string(),
				SqlDialect::Sqlite => "REAL".to_string(),
			},
			ColumnType::Decimal { precision, scale } => {
				format!("NUMERIC({}, {})", precision, scale)
			}
			ColumnType::Date => "DATE".to_string(),
			ColumnType::Time => "TIME".to_string(),
			ColumnType::DateTime => match dialect {
				SqlDialect::Postgres => "TIMESTAMP".to_string(),
				SqlDialect::Mysql | SqlDialect::Sqlite => "DATETIME".to_string(),
			},
			ColumnType::Blob => match dialect {
				SqlDialect::Postgres => "BYTEA".to_string(),
				SqlDialect::Mysql => "LONGBLOB".to_string(),
				SqlDialect::Sqlite => "BLOB".to_string(),
			},
			// Lists are encoded by the model layer; MySQL has no native array type
			ColumnType::List { of } => match dialect {
				SqlDialect::Postgres => format!("{}[]", of.to_sql_for_dialect(dialect, length)),
				SqlDialect::Mysql => "JSON".to_string(),
				SqlDialect::Sqlite => "TEXT".to_string(),
			},
			ColumnType::Json => match dialect {
				SqlDialect::Postgres => "JSONB".to_string(),
				SqlDialect::Mysql => "JSON".to_string(),
				SqlDialect::Sqlite => "TEXT".to_string(),
			},
		}
	}
}

impl fmt::Display for ColumnType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ColumnType::Id => write!(f, "id"),
			ColumnType::String => write!(f, "string"),
			ColumnType::Text => write!(f, "text"),
			ColumnType::Boolean => write!(f, "boolean"),
			ColumnType::Integer => write!(f, "integer"),
			ColumnType::Float => write!(f, "float"),
			ColumnType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
			ColumnType::Date => write!(f, "date"),
			ColumnType::Time => write!(f, "time"),
			ColumnType::DateTime => write!(f, "datetime"),
			ColumnType::Password => write!(f, "password"),
			ColumnType::Blob => write!(f, "blob"),
			ColumnType::Reference { table } => write!(f, "reference {}", table),
			ColumnType::List { of } => write!(f, "list:{}", of),
			ColumnType::Json => write!(f, "json"),
		}
	}
}

/// Referential action for reference columns
///
/// Inert metadata as far as the engine is concerned: it only shapes the
/// `REFERENCES ... ON DELETE` clause of generated DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnDelete {
	#[default]
	Cascade,
	Nullify,
	Restrict,
}

impl OnDelete {
	pub fn to_sql(self) -> &'static str {
		match self {
			OnDelete::Cascade => "CASCADE",
			OnDelete::Nullify => "SET NULL",
			OnDelete::Restrict => "RESTRICT",
		}
	}
}

/// Column default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
	/// A literal rendered into the DDL (`0`, `'draft'`, `TRUE`, `NULL`)
	Literal(serde_json::Value),
	/// A value computed at insert time (`now`, a callback name, ...)
	///
	/// Only `now` maps to SQL (`CURRENT_TIMESTAMP`); other markers are left to
	/// the model layer and produce no `DEFAULT` clause.
	Deferred(String),
}

impl DefaultValue {
	pub fn literal(value: impl Into<serde_json::Value>) -> Self {
		DefaultValue::Literal(value.into())
	}

	pub fn deferred(marker: impl Into<String>) -> Self {
		DefaultValue::Deferred(marker.into())
	}

	/// SQL expression for a `DEFAULT` clause, if one can be expressed
	pub fn to_sql(&self, dialect: SqlDialect) -> Option<String> {
		match self {
			DefaultValue::Literal(serde_json::Value::Null) => Some("NULL".to_string()),
			DefaultValue::Literal(serde_json::Value::Bool(b)) => {
				let sql = match (dialect, b) {
					(SqlDialect::Sqlite, true) => "1",
					(SqlDialect::Sqlite, false) => "0",
					(_, true) => "TRUE",
					(_, false) => "FALSE",
				};
				Some(sql.to_string())
			}
			DefaultValue::Literal(serde_json::Value::Number(n)) => Some(n.to_string()),
			DefaultValue::Literal(serde_json::Value::String(s)) => {
				Some(dialect.quote_literal(s))
			}
			// Arrays and objects are stored as their JSON text
			DefaultValue::Literal(other) => Some(dialect.quote_literal(&other.to_string())),
			DefaultValue::Deferred(marker) => match marker.to_ascii_lowercase().as_str() {
				"now" | "current_timestamp" => Some("CURRENT_TIMESTAMP".to_string()),
				_ => None,
			},
		}
	}
}

impl fmt::Display for DefaultValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DefaultValue::Literal(value) => write!(f, "{}", value),
			DefaultValue::Deferred(marker) => write!(f, "<{}>", marker),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(ColumnType::String, SqlDialect::Postgres, Some(64), "VARCHAR(64)")]
	#[case(ColumnType::String, SqlDialect::Sqlite, None, "VARCHAR(512)")]
	#[case(ColumnType::Id, SqlDialect::Postgres, None, "SERIAL")]
	#[case(ColumnType::Float, SqlDialect::Sqlite, None, "REAL")]
	#[case(ColumnType::Decimal { precision: 10, scale: 2 }, SqlDialect::Mysql, None, "NUMERIC(10, 2)")]
	#[case(ColumnType::List { of: Box::new(ColumnType::Integer) }, SqlDialect::Postgres, None, "INTEGER[]")]
	#[case(ColumnType::Json, SqlDialect::Postgres, None, "JSONB")]
	fn test_column_type_sql(
		#[case] column_type: ColumnType,
		#[case] dialect: SqlDialect,
		#[case] length: Option<u32>,
		#[case] expected: &str,
	) {
		assert_eq!(column_type.to_sql_for_dialect(dialect, length), expected);
	}

	#[rstest]
	fn test_default_value_sql() {
		assert_eq!(
			DefaultValue::literal(0).to_sql(SqlDialect::Sqlite),
			Some("0".to_string())
		);
		assert_eq!(
			DefaultValue::literal(true).to_sql(SqlDialect::Sqlite),
			Some("1".to_string())
		);
		assert_eq!(
			DefaultValue::literal("it's").to_sql(SqlDialect::Postgres),
			Some("'it''s'".to_string())
		);
		assert_eq!(
			DefaultValue::deferred("now").to_sql(SqlDialect::Mysql),
			Some("CURRENT_TIMESTAMP".to_string())
		);
		assert_eq!(DefaultValue::deferred("uuid4").to_sql(SqlDialect::Mysql), None);
	}

	#[rstest]
	fn test_column_type_serde_shape() {
		let json = serde_json::to_string(&ColumnType::Reference {
			table: "items".to_string(),
		})
		.unwrap();
		assert_eq!(json, r#"{"kind":"reference","table":"items"}"#);

		let parsed: ColumnType = serde_json::from_str(r#"{"kind":"string"}"#).unwrap();
		assert_eq!(parsed, ColumnType::String);
	}
}

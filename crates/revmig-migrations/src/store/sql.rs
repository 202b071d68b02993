//! SQL state store
//!
//! Runs operations against PostgreSQL, MySQL or SQLite through sqlx's `Any`
//! driver. The marker lives in `revmig_version`, created on first use.
//!
//! Locking per backend:
//! - PostgreSQL: session-level `pg_advisory_lock`, bounded by `lock_timeout`
//! - MySQL: `GET_LOCK` with timeout
//! - SQLite: `BEGIN IMMEDIATE` held for the whole run, one `SAVEPOINT` per
//!   revision; the outer transaction commits when the lock is released

use super::{Capabilities, StateStore, StoreError};
use crate::migration::RevisionId;
use crate::operations::{Operation, OperationKind, SqlDialect};
use async_trait::async_trait;
use sqlx::{AnyConnection, Connection, Executor, Row};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Marker table name
pub const VERSION_TABLE: &str = "revmig_version";

const LOCK_NAME: &str = "revmig_migrations";
const SAVEPOINT: &str = "revmig_revision";

/// State store backed by a live SQL connection
pub struct SqlStore {
	connection: AnyConnection,
	dialect: SqlDialect,
	capabilities: Capabilities,
	lock_timeout: Duration,
	locked: bool,
	in_transaction: bool,
	version_table_ready: bool,
}

impl SqlStore {
	/// Connect to `database_url`
	///
	/// # Examples
	///
	/// ```rust,no_run
	/// use revmig_migrations::SqlStore;
	///
	/// # async fn example() {
	/// let store = SqlStore::connect("sqlite::memory:").await.unwrap();
	/// assert_eq!(store.dialect().name(), "sqlite");
	/// # }
	/// # tokio::runtime::Runtime::new().unwrap().block_on(example());
	/// ```
	pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
		let dialect = SqlDialect::from_url(database_url).ok_or_else(|| {
			StoreError::Unsupported(format!(
				"unrecognised database url scheme: {}",
				database_url.split(':').next().unwrap_or_default()
			))
		})?;
		sqlx::any::install_default_drivers();
		let connection = AnyConnection::connect(database_url).await?;
		Ok(Self::from_connection(connection, dialect))
	}

	pub fn from_connection(connection: AnyConnection, dialect: SqlDialect) -> Self {
		Self {
			connection,
			dialect,
			capabilities: Self::default_capabilities(dialect),
			lock_timeout: Duration::from_secs(30),
			locked: false,
			in_transaction: false,
			version_table_ready: false,
		}
	}

	/// How long MySQL and PostgreSQL wait for the migration lock
	pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
		self.lock_timeout = timeout;
		self
	}

	pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
		self.capabilities = capabilities;
		self
	}

	pub fn dialect(&self) -> SqlDialect {
		self.dialect
	}

	pub fn default_capabilities(dialect: SqlDialect) -> Capabilities {
		match dialect {
			SqlDialect::Postgres => Capabilities::full(),
			// MySQL commits implicitly around every DDL statement
			SqlDialect::Mysql => Capabilities::full().non_transactional(),
			SqlDialect::Sqlite => Capabilities::full().without(OperationKind::AlterColumn),
		}
	}

	fn run<'a>(
		&'a mut self,
		sql: &'a str,
	) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
		Box::pin(async move {
			debug!(backend = self.dialect.name(), "{}", sql);
			let connection: &'a mut AnyConnection = &mut self.connection;
			connection.execute(sqlx::raw_sql(sql)).await?;
			Ok(())
		})
	}

	async fn ensure_version_table(&mut self) -> Result<(), StoreError> {
		if self.version_table_ready {
			return Ok(());
		}
		let sql = format!(
			"CREATE TABLE IF NOT EXISTS {} (version_num VARCHAR(32) NOT NULL PRIMARY KEY)",
			self.dialect.quote_ident(VERSION_TABLE)
		);
		self.run(&sql).await?;
		self.version_table_ready = true;
		Ok(())
	}

	/// Names of user tables, for diagnostics and tests
	pub async fn table_names(&mut self) -> Result<Vec<String>, StoreError> {
		let sql = match self.dialect {
			SqlDialect::Sqlite => {
				"SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
			}
			SqlDialect::Postgres => {
				"SELECT CAST(table_name AS TEXT) AS name FROM information_schema.tables WHERE table_schema = current_schema() ORDER BY name"
			}
			SqlDialect::Mysql => {
				"SELECT CAST(table_name AS CHAR) AS name FROM information_schema.tables WHERE table_schema = DATABASE() ORDER BY name"
			}
		};
		let rows = sqlx::query(sql).fetch_all(&mut self.connection).await?;
		let mut names = Vec::with_capacity(rows.len());
		for row in rows {
			let name: String = row.try_get("name")?;
			if name != VERSION_TABLE {
				names.push(name);
			}
		}
		Ok(names)
	}

	/// Column names of `table`, in declaration order (SQLite only)
	pub async fn column_names(&mut self, table: &str) -> Result<Vec<String>, StoreError> {
		if self.dialect != SqlDialect::Sqlite {
			return Err(StoreError::Unsupported(format!(
				"column listing is not implemented for {}",
				self.dialect
			)));
		}
		let sql = format!(
			"SELECT name FROM pragma_table_info({})",
			self.dialect.quote_literal(table)
		);
		let rows = sqlx::query(&sql).fetch_all(&mut self.connection).await?;
		rows.iter()
			.map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
			.collect()
	}
}

#[async_trait]
impl StateStore for SqlStore {
	fn backend(&self) -> &str {
		self.dialect.name()
	}

	fn capabilities(&self) -> &Capabilities {
		&self.capabilities
	}

	fn check(&self, operation: &Operation) -> Result<(), StoreError> {
		if !self.capabilities.supports(operation.kind()) {
			return Err(StoreError::Unsupported(format!(
				"{} is not supported by the {} backend",
				operation.kind(),
				self.dialect
			)));
		}
		operation.to_sql(self.dialect).map(|_| ())
	}

	async fn acquire_lock(&mut self) -> Result<(), StoreError> {
		if self.locked {
			return Ok(());
		}
		match self.dialect {
			SqlDialect::Postgres => {
				let [set_timeout, lock, reset_timeout] = postgres_lock_statements(self.lock_timeout);
				self.run(&set_timeout).await?;
				let locked = self.run(&lock).await;
				// The timeout must not bound the DDL lock waits of the run
				let reset = self.run(&reset_timeout).await;
				locked?;
				reset?;
			}
			SqlDialect::Mysql => {
				let sql = format!(
					"SELECT GET_LOCK({}, {}) AS locked",
					self.dialect.quote_literal(LOCK_NAME),
					self.lock_timeout.as_secs().max(1)
				);
				let row = sqlx::query(&sql).fetch_one(&mut self.connection).await?;
				let locked: Option<i64> = row.try_get("locked")?;
				if locked != Some(1) {
					return Err(StoreError::LockUnavailable(format!(
						"GET_LOCK timed out after {}s",
						self.lock_timeout.as_secs().max(1)
					)));
				}
			}
			SqlDialect::Sqlite => {
				self.run("BEGIN IMMEDIATE").await?;
			}
		}
		self.locked = true;
		self.ensure_version_table().await
	}

	async fn release_lock(&mut self) -> Result<(), StoreError> {
		if !self.locked {
			return Ok(());
		}
		if self.in_transaction {
			self.rollback().await?;
		}
		let sql = match self.dialect {
			SqlDialect::Postgres => format!(
				"SELECT pg_advisory_unlock(hashtext({}))",
				self.dialect.quote_literal(LOCK_NAME)
			),
			SqlDialect::Mysql => format!(
				"SELECT RELEASE_LOCK({})",
				self.dialect.quote_literal(LOCK_NAME)
			),
			SqlDialect::Sqlite => "COMMIT".to_string(),
		};
		self.locked = false;
		self.run(&sql).await
	}

	async fn begin(&mut self) -> Result<(), StoreError> {
		let sql = match self.dialect {
			SqlDialect::Sqlite if self.locked => format!("SAVEPOINT {}", SAVEPOINT),
			_ => "BEGIN".to_string(),
		};
		self.run(&sql).await?;
		self.in_transaction = true;
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), StoreError> {
		let sql = match self.dialect {
			SqlDialect::Sqlite if self.locked => format!("RELEASE SAVEPOINT {}", SAVEPOINT),
			_ => "COMMIT".to_string(),
		};
		self.in_transaction = false;
		self.run(&sql).await
	}

	async fn rollback(&mut self) -> Result<(), StoreError> {
		if !self.in_transaction {
			return Ok(());
		}
		self.in_transaction = false;
		match self.dialect {
			SqlDialect::Sqlite if self.locked => {
				self.run(&format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT)).await?;
				self.run(&format!("RELEASE SAVEPOINT {}", SAVEPOINT)).await
			}
			_ => self.run("ROLLBACK").await,
		}
	}

	async fn execute(&mut self, operation: &Operation) -> Result<(), StoreError> {
		for statement in operation.to_sql(self.dialect)? {
			self.run(&statement).await?;
		}
		Ok(())
	}

	async fn read_marker(&mut self) -> Result<Vec<RevisionId>, StoreError> {
		self.ensure_version_table().await?;
		let sql = format!(
			"SELECT version_num FROM {} ORDER BY version_num",
			self.dialect.quote_ident(VERSION_TABLE)
		);
		let rows = sqlx::query(&sql).fetch_all(&mut self.connection).await?;
		let mut marker = Vec::with_capacity(rows.len());
		for row in rows {
			let value: String = row.try_get("version_num")?;
			let id = RevisionId::new(value)
				.map_err(|err| StoreError::Rejected(format!("corrupt marker row: {}", err)))?;
			marker.push(id);
		}
		Ok(marker)
	}

	async fn write_marker(&mut self, revision: Option<&RevisionId>) -> Result<(), StoreError> {
		self.ensure_version_table().await?;
		let table = self.dialect.quote_ident(VERSION_TABLE);
		self.run(&format!("DELETE FROM {}", table)).await?;
		if let Some(revision) = revision {
			// Ids are validated alphanumerics; quoting keeps the literal well-formed anyway
			let sql = format!(
				"INSERT INTO {} (version_num) VALUES ({})",
				table,
				self.dialect.quote_literal(revision.as_str())
			);
			self.run(&sql).await?;
		}
		Ok(())
	}
}

/// Session timeout, advisory lock, timeout reset
fn postgres_lock_statements(lock_timeout: Duration) -> [String; 3] {
	[
		format!("SET lock_timeout = '{}ms'", lock_timeout.as_millis()),
		// pg_advisory_lock returns void, which the Any driver cannot decode
		format!(
			"SELECT 1 AS locked FROM (SELECT pg_advisory_lock(hashtext({}))) AS l",
			SqlDialect::Postgres.quote_literal(LOCK_NAME)
		),
		"RESET lock_timeout".to_string(),
	]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fields::ColumnType;
	use crate::operations::{ColumnChanges, Operation};
	use crate::snapshot::ColumnDefinition;
	use rstest::rstest;

	async fn sqlite() -> SqlStore {
		SqlStore::connect("sqlite::memory:").await.unwrap()
	}

	fn create_items() -> Operation {
		Operation::CreateTable {
			name: "items".to_string(),
			columns: vec![ColumnDefinition::id(), ColumnDefinition::new("title", ColumnType::String)],
			primary_key: vec![],
			indexes: vec![],
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_marker_round_trip() {
		let mut store = sqlite().await;
		assert!(store.read_marker().await.unwrap().is_empty());

		let id = RevisionId::new("abc123def456").unwrap();
		store.write_marker(Some(&id)).await.unwrap();
		assert_eq!(store.read_marker().await.unwrap(), vec![id]);

		store.write_marker(None).await.unwrap();
		assert!(store.read_marker().await.unwrap().is_empty());
	}

	#[rstest]
	#[tokio::test]
	async fn test_savepoint_rollback_keeps_earlier_work() {
		let mut store = sqlite().await;
		store.acquire_lock().await.unwrap();

		store.begin().await.unwrap();
		store.execute(&create_items()).await.unwrap();
		store.commit().await.unwrap();

		store.begin().await.unwrap();
		store
			.execute(&Operation::AddColumn {
				table: "items".to_string(),
				column: ColumnDefinition::new("qty", ColumnType::Integer),
			})
			.await
			.unwrap();
		store.rollback().await.unwrap();

		store.release_lock().await.unwrap();
		assert_eq!(store.table_names().await.unwrap(), vec!["items".to_string()]);
		assert_eq!(
			store.column_names("items").await.unwrap(),
			vec!["id".to_string(), "title".to_string()]
		);
	}

	#[rstest]
	fn test_sqlite_gate_rejects_alter_column() {
		let caps = SqlStore::default_capabilities(SqlDialect::Sqlite);
		assert!(!caps.supports(OperationKind::AlterColumn));
		let alter = Operation::AlterColumn {
			table: "items".to_string(),
			column: "title".to_string(),
			changes: ColumnChanges {
				nullable: Some(false),
				..Default::default()
			},
			existing: ColumnDefinition::new("title", ColumnType::String).attributes(),
		};
		assert!(alter.to_sql(SqlDialect::Sqlite).is_err());
	}

	#[rstest]
	#[case(SqlDialect::Postgres, true)]
	#[case(SqlDialect::Mysql, false)]
	#[case(SqlDialect::Sqlite, true)]
	fn test_transactional_ddl_per_dialect(#[case] dialect: SqlDialect, #[case] expected: bool) {
		assert_eq!(
			SqlStore::default_capabilities(dialect).transactional_ddl,
			expected
		);
	}

	#[rstest]
	fn test_postgres_lock_timeout_is_reset_after_locking() {
		let statements = postgres_lock_statements(Duration::from_millis(1500));

		assert_eq!(statements[0], "SET lock_timeout = '1500ms'");
		assert!(statements[1].contains("pg_advisory_lock(hashtext('revmig_migrations'))"));
		assert_eq!(statements[2], "RESET lock_timeout");
	}
}

//! # revmig migrations
//!
//! Revision-based schema migration engine.
//!
//! ## Features
//!
//! - **Snapshots**: immutable descriptions of tables, columns and indexes, built
//!   either from declared models or by replaying recorded revisions
//! - **Diffing**: deterministic, reviewable operation lists between two snapshots
//! - **Revision graph**: parent/child chain of revisions persisted as plain files
//! - **Runner**: per-revision transactions, a persisted revision marker and
//!   compare-then-lock protection against concurrent deployers
//!
//! ## Data flow
//!
//! ```text
//! declared models ──► SchemaSnapshot (declared) ─┐
//!                                                ├─► SchemaDiff ─► Revision ─► repository
//! revision graph ──► replay ──► SchemaSnapshot ──┘
//!
//! MigrationExecutor(graph, marker, target) ─► StateStore (DDL + marker, one transaction per revision)
//! ```
//!
//! Renames are never inferred: a renamed table or column is generated as a
//! drop paired with a create, which discards the data of the old one when
//! executed as-is. Review generated revisions before applying them.

pub mod auto_migration;
pub mod executor;
pub mod fields;
pub mod graph;
pub mod migration;
pub mod model_registry;
pub mod operations;
pub mod plan;
pub mod repository;
pub mod schema_diff;
pub mod settings;
pub mod snapshot;
pub mod store;

pub use auto_migration::{AutoMigrationGenerator, GenerateOptions};
pub use executor::{ExecutionResult, MigrationExecutor, ProgressEvent, ProgressStatus, RunnerState};
pub use fields::{ColumnType, DefaultValue, OnDelete};
pub use graph::{History, RevisionGraph};
pub use migration::{Revision, RevisionId};
pub use model_registry::{ModelRegistry, ModelSource};
pub use operations::{ColumnAttributes, ColumnChanges, Operation, OperationKind, SqlDialect};
pub use plan::{Direction, MigrationPlan, Target};
pub use repository::{MigrationRepository, filesystem::FilesystemRepository};
pub use schema_diff::{SchemaDiff, SchemaDiffResult};
pub use settings::MigrationSettings;
pub use snapshot::{ColumnDefinition, IndexDefinition, SchemaSnapshot, TableDefinition};
pub use store::{
	Capabilities, StateStore, StoreError, memory::MemoryBackend, memory::MemoryStore,
	sql::SqlStore,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
	/// The declared schema is malformed (unknown reference target, duplicate
	/// column, index without fields, ...)
	#[error("Validation error: {0}")]
	Validation(String),

	/// More than one head exists; divergent branches must be resolved first
	#[error("Multiple heads present: {}", join_ids(.heads))]
	AmbiguousHead { heads: Vec<RevisionId> },

	/// The persisted marker holds more than one revision
	#[error("Database is stamped with multiple revisions: {}", join_ids(.markers))]
	MultipleMarkers { markers: Vec<RevisionId> },

	#[error("No path from {from} to {to}")]
	NoPath { from: String, to: String },

	/// The backend capability gate rejected an operation before execution
	#[error("Revision {revision}: operation {kind} is not supported by the {backend} backend")]
	UnsupportedOperation {
		revision: RevisionId,
		kind: OperationKind,
		backend: String,
	},

	/// The store rejected a statement; the revision was rolled back
	#[error("Revision {revision} failed (last applied: {}): {source}", display_marker(.last_applied.as_ref()))]
	Execution {
		revision: RevisionId,
		last_applied: Option<RevisionId>,
		#[source]
		source: StoreError,
	},

	/// The marker moved between planning and taking the lock
	#[error("Revision marker changed concurrently: expected {}, found {}", display_markers(.expected), display_markers(.found))]
	Conflict {
		expected: Vec<RevisionId>,
		found: Vec<RevisionId>,
	},

	/// Replay met a structurally impossible operation (corrupted or hand-edited revision)
	#[error("Invalid operation{}: {message}", in_revision(.revision.as_ref()))]
	InvalidOperation {
		revision: Option<RevisionId>,
		message: String,
	},

	#[error("Run cancelled during {} (last applied: {})", display_marker(.revision.as_ref()), display_marker(.last_applied.as_ref()))]
	Cancelled {
		revision: Option<RevisionId>,
		last_applied: Option<RevisionId>,
	},

	#[error("Revision not found: {0}")]
	NotFound(String),

	#[error("Invalid revision file {path}: {message}")]
	InvalidRevisionFile { path: String, message: String },

	#[error("Circular dependency detected: {cycle}")]
	CircularDependency { cycle: String },

	#[error("Confirmation required: {0}")]
	ConfirmationRequired(String),

	/// Store failure outside of a revision (lock, marker read)
	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Settings error: {0}")]
	Settings(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
	/// Attach the revision being replayed to an `InvalidOperation` error
	pub(crate) fn for_revision(self, id: &RevisionId) -> Self {
		match self {
			MigrationError::InvalidOperation {
				revision: None,
				message,
			} => MigrationError::InvalidOperation {
				revision: Some(id.clone()),
				message,
			},
			other => other,
		}
	}
}

fn join_ids(ids: &[RevisionId]) -> String {
	ids.iter()
		.map(|id| id.as_str())
		.collect::<Vec<_>>()
		.join(", ")
}

fn display_marker(id: Option<&RevisionId>) -> String {
	id.map(|id| id.to_string())
		.unwrap_or_else(|| "none".to_string())
}

fn in_revision(id: Option<&RevisionId>) -> String {
	id.map(|id| format!(" in revision {}", id))
		.unwrap_or_default()
}

fn display_markers(ids: &[RevisionId]) -> String {
	if ids.is_empty() {
		"none".to_string()
	} else {
		join_ids(ids)
	}
}

// Prelude for migrations
pub mod prelude {
	pub use super::{
		AutoMigrationGenerator, ColumnDefinition, ColumnType, DefaultValue, Direction,
		FilesystemRepository, IndexDefinition, MigrationExecutor, MigrationRepository,
		ModelRegistry, OnDelete, Operation, Revision, RevisionGraph, RevisionId, SchemaDiff,
		SchemaSnapshot, SqlStore, StateStore, TableDefinition, Target,
	};
}

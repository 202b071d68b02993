//! State store adapters
//!
//! The narrow contract the runner needs from the live store: execute one
//! operation, scope statements in a transaction, read and write the revision
//! marker, and hold an exclusive lock for the duration of a run.

pub mod memory;
pub mod sql;

use super::migration::RevisionId;
use super::operations::{Operation, OperationKind};
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

/// Failures reported by a store
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Sql(#[from] sqlx::Error),

	/// The store refused a statement
	#[error("Statement rejected: {0}")]
	Rejected(String),

	/// The store cannot express the operation
	#[error("Unsupported: {0}")]
	Unsupported(String),

	#[error("Migration lock unavailable: {0}")]
	LockUnavailable(String),

	#[error("Store call timed out")]
	Timeout,
}

/// What a store can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
	/// Operation kinds the store can execute
	pub operations: BTreeSet<OperationKind>,
	/// Whether DDL statements take part in transactions
	///
	/// When `false` the marker is written right after the DDL of a revision,
	/// and a crash between the two leaves the schema ahead of the marker.
	pub transactional_ddl: bool,
}

impl Capabilities {
	/// Every operation, transactional DDL
	pub fn full() -> Self {
		Self {
			operations: OperationKind::ALL.into_iter().collect(),
			transactional_ddl: true,
		}
	}

	pub fn without(mut self, kind: OperationKind) -> Self {
		self.operations.remove(&kind);
		self
	}

	pub fn non_transactional(mut self) -> Self {
		self.transactional_ddl = false;
		self
	}

	pub fn supports(&self, kind: OperationKind) -> bool {
		self.operations.contains(&kind)
	}
}

impl Default for Capabilities {
	fn default() -> Self {
		Self::full()
	}
}

/// Adapter between the runner and the live store
///
/// A store instance is owned by one running invocation; it is never shared
/// with application traffic. Calls are made in this order by the runner:
/// `acquire_lock`, `read_marker`, then per revision `begin`, `execute`...,
/// `write_marker`, `commit` (or `rollback`), and finally `release_lock`.
#[async_trait]
pub trait StateStore: Send {
	/// Backend name used in diagnostics
	fn backend(&self) -> &str;

	fn capabilities(&self) -> &Capabilities;

	/// Check that `operation` can run here, without touching the store
	fn check(&self, operation: &Operation) -> Result<(), StoreError> {
		if self.capabilities().supports(operation.kind()) {
			Ok(())
		} else {
			Err(StoreError::Unsupported(format!(
				"{} is not supported by the {} backend",
				operation.kind(),
				self.backend()
			)))
		}
	}

	/// Take the exclusive migration lock, waiting until it is free
	async fn acquire_lock(&mut self) -> Result<(), StoreError>;

	/// Release the migration lock; a no-op when it is not held
	async fn release_lock(&mut self) -> Result<(), StoreError>;

	async fn begin(&mut self) -> Result<(), StoreError>;

	async fn commit(&mut self) -> Result<(), StoreError>;

	async fn rollback(&mut self) -> Result<(), StoreError>;

	/// Execute one operation inside the open transaction
	async fn execute(&mut self, operation: &Operation) -> Result<(), StoreError>;

	/// Current marker row(s); empty when nothing is applied
	async fn read_marker(&mut self) -> Result<Vec<RevisionId>, StoreError>;

	/// Replace the marker; `None` clears it
	async fn write_marker(&mut self, revision: Option<&RevisionId>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_capabilities_builders() {
		let caps = Capabilities::full()
			.without(OperationKind::AlterColumn)
			.non_transactional();
		assert!(!caps.supports(OperationKind::AlterColumn));
		assert!(caps.supports(OperationKind::CreateIndex));
		assert!(!caps.transactional_ddl);
	}
}

//! In-process state store
//!
//! The "live schema" is a [`SchemaSnapshot`] held by a [`MemoryBackend`].
//! Backends are cheap handles: every [`MemoryStore`] created from the same
//! backend sees the same schema, marker and lock, which is how several
//! deployers racing on one database are modelled.

use super::{Capabilities, StateStore, StoreError};
use crate::migration::RevisionId;
use crate::operations::Operation;
use crate::snapshot::SchemaSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
struct BackendState {
	schema: SchemaSnapshot,
	marker: Vec<RevisionId>,
	/// Tables whose statements are refused
	rejected_tables: BTreeSet<String>,
	/// Committed operations, in execution order
	executed: Vec<Operation>,
}

/// Shared in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
	state: Arc<Mutex<BackendState>>,
	lock: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// A store with every capability
	pub fn store(&self) -> MemoryStore {
		MemoryStore::new(self.clone(), Capabilities::full())
	}

	pub fn store_with(&self, capabilities: Capabilities) -> MemoryStore {
		MemoryStore::new(self.clone(), capabilities)
	}

	/// Committed schema
	pub fn schema(&self) -> SchemaSnapshot {
		self.state.lock().schema.clone()
	}

	/// Committed marker
	pub fn marker(&self) -> Vec<RevisionId> {
		self.state.lock().marker.clone()
	}

	/// Overwrite the committed marker, bypassing the lock
	pub fn set_marker(&self, marker: Vec<RevisionId>) {
		self.state.lock().marker = marker;
	}

	/// Committed operations, in execution order
	pub fn executed(&self) -> Vec<Operation> {
		self.state.lock().executed.clone()
	}

	/// Refuse every statement touching `table` from now on
	pub fn reject_table(&self, table: impl Into<String>) {
		self.state.lock().rejected_tables.insert(table.into());
	}

	pub fn is_locked(&self) -> bool {
		self.lock.try_lock().is_err()
	}
}

#[derive(Debug)]
struct Transaction {
	schema: SchemaSnapshot,
	marker: Vec<RevisionId>,
	executed: Vec<Operation>,
}

/// One connection to a [`MemoryBackend`]
#[derive(Debug)]
pub struct MemoryStore {
	backend: MemoryBackend,
	capabilities: Capabilities,
	/// Held while the migration lock is taken; dropping releases it
	guard: Option<OwnedMutexGuard<()>>,
	transaction: Option<Transaction>,
	statement_delay: Option<Duration>,
}

impl MemoryStore {
	pub fn new(backend: MemoryBackend, capabilities: Capabilities) -> Self {
		Self {
			backend,
			capabilities,
			guard: None,
			transaction: None,
			statement_delay: None,
		}
	}

	/// Make every `execute` take at least `delay`
	pub fn with_statement_delay(mut self, delay: Duration) -> Self {
		self.statement_delay = Some(delay);
		self
	}

	pub fn holds_lock(&self) -> bool {
		self.guard.is_some()
	}
}

#[async_trait]
impl StateStore for MemoryStore {
	fn backend(&self) -> &str {
		"memory"
	}

	fn capabilities(&self) -> &Capabilities {
		&self.capabilities
	}

	async fn acquire_lock(&mut self) -> Result<(), StoreError> {
		if self.guard.is_none() {
			let guard = self.backend.lock.clone().lock_owned().await;
			self.guard = Some(guard);
		}
		Ok(())
	}

	async fn release_lock(&mut self) -> Result<(), StoreError> {
		self.transaction = None;
		self.guard = None;
		Ok(())
	}

	async fn begin(&mut self) -> Result<(), StoreError> {
		if self.transaction.is_some() {
			return Err(StoreError::Rejected(
				"a transaction is already open".to_string(),
			));
		}
		let state = self.backend.state.lock();
		self.transaction = Some(Transaction {
			schema: state.schema.clone(),
			marker: state.marker.clone(),
			executed: Vec::new(),
		});
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), StoreError> {
		let transaction = self
			.transaction
			.take()
			.ok_or_else(|| StoreError::Rejected("no open transaction".to_string()))?;
		let mut state = self.backend.state.lock();
		if self.capabilities.transactional_ddl {
			state.schema = transaction.schema;
			state.executed.extend(transaction.executed);
		}
		state.marker = transaction.marker;
		Ok(())
	}

	async fn rollback(&mut self) -> Result<(), StoreError> {
		self.transaction = None;
		Ok(())
	}

	async fn execute(&mut self, operation: &Operation) -> Result<(), StoreError> {
		if let Some(delay) = self.statement_delay {
			tokio::time::sleep(delay).await;
		}
		self.check(operation)?;

		let mut guard = self.backend.state.lock();
		let state = &mut *guard;
		if state.rejected_tables.contains(operation.table()) {
			return Err(StoreError::Rejected(format!(
				"statements on table {} are refused",
				operation.table()
			)));
		}

		// Without transactional DDL statements land immediately, like autocommit
		let (schema, executed) = match &mut self.transaction {
			Some(transaction) if self.capabilities.transactional_ddl => {
				(&mut transaction.schema, &mut transaction.executed)
			}
			_ => (&mut state.schema, &mut state.executed),
		};
		schema
			.apply_in_place(operation)
			.map_err(|err| StoreError::Rejected(err.to_string()))?;
		executed.push(operation.clone());
		Ok(())
	}

	async fn read_marker(&mut self) -> Result<Vec<RevisionId>, StoreError> {
		match &self.transaction {
			Some(transaction) => Ok(transaction.marker.clone()),
			None => Ok(self.backend.marker()),
		}
	}

	async fn write_marker(&mut self, revision: Option<&RevisionId>) -> Result<(), StoreError> {
		let marker: Vec<RevisionId> = revision.into_iter().cloned().collect();
		match &mut self.transaction {
			Some(transaction) => transaction.marker = marker,
			None => self.backend.set_marker(marker),
		}
		Ok(())
	}
}

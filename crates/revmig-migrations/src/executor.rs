//! Migration runner
//!
//! Executes plans against a [`StateStore`]. A run moves through
//! `Idle -> Resolving -> Applying -> Complete`, or ends in `Failed`.
//!
//! Guarantees:
//! - the capability gate rejects unsupported operations before any statement
//!   runs
//! - the migration lock is held for the whole run and released on every exit
//!   path; a panic drops the store, which releases the lock with it. A
//!   failed release after a successful run is returned as an error, since
//!   some stores commit their outer transaction there
//! - after taking the lock the marker is re-read and compared with the value
//!   seen while planning; a mismatch aborts with [`MigrationError::Conflict`]
//! - every revision runs in its own transaction together with its marker
//!   update, and a failure rolls that revision back and stops the run
//! - every store call is bounded by a timeout and races the cancellation token

use super::graph::RevisionGraph;
use super::migration::RevisionId;
use super::plan::{Direction, MigrationPlan, PlanStep, Target};
use super::settings::MigrationSettings;
use super::store::{StateStore, StoreError};
use super::{MigrationError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
	Idle,
	Resolving,
	Applying,
	Failed,
	Complete,
}

/// Per-revision progress
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStatus {
	Started,
	Applied,
	Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
	pub direction: Direction,
	pub revision: RevisionId,
	pub message: String,
	pub status: ProgressStatus,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
	pub direction: Direction,
	/// Revisions executed, in execution order
	pub revisions: Vec<RevisionId>,
	/// Marker after the run
	pub marker: Option<RevisionId>,
}

/// Why a guarded store call did not complete
enum Interrupt {
	Cancelled,
	Store(StoreError),
}

/// Bound `call` by `timeout` and race it against `cancel`
async fn guarded<T, F>(cancel: &CancellationToken, timeout: Duration, call: F) -> std::result::Result<T, Interrupt>
where
	F: Future<Output = std::result::Result<T, StoreError>>,
{
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(Interrupt::Cancelled),
		result = tokio::time::timeout(timeout, call) => match result {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(err)) => Err(Interrupt::Store(err)),
			Err(_) => Err(Interrupt::Store(StoreError::Timeout)),
		},
	}
}

/// Migration runner over a revision graph and a state store
pub struct MigrationExecutor<S: StateStore> {
	store: S,
	graph: RevisionGraph,
	state: RunnerState,
	lock_timeout: Duration,
	statement_timeout: Duration,
	cancel: CancellationToken,
	progress: Option<UnboundedSender<ProgressEvent>>,
}

impl<S: StateStore> MigrationExecutor<S> {
	/// Create a runner with default timeouts (30s lock, 60s per statement)
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::{MemoryBackend, MigrationExecutor, RevisionGraph, RunnerState};
	///
	/// let backend = MemoryBackend::new();
	/// let executor = MigrationExecutor::new(backend.store(), RevisionGraph::new());
	/// assert_eq!(executor.state(), RunnerState::Idle);
	/// ```
	pub fn new(store: S, graph: RevisionGraph) -> Self {
		Self {
			store,
			graph,
			state: RunnerState::Idle,
			lock_timeout: Duration::from_secs(30),
			statement_timeout: Duration::from_secs(60),
			cancel: CancellationToken::new(),
			progress: None,
		}
	}

	pub fn with_settings(self, settings: &MigrationSettings) -> Self {
		self.with_timeouts(settings.lock_timeout(), settings.statement_timeout())
	}

	pub fn with_timeouts(mut self, lock_timeout: Duration, statement_timeout: Duration) -> Self {
		self.lock_timeout = lock_timeout;
		self.statement_timeout = statement_timeout;
		self
	}

	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = token;
		self
	}

	pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
		self.progress = Some(sender);
		self
	}

	pub fn state(&self) -> RunnerState {
		self.state
	}

	pub fn graph(&self) -> &RevisionGraph {
		&self.graph
	}

	pub fn store(&self) -> &S {
		&self.store
	}

	pub fn store_mut(&mut self) -> &mut S {
		&mut self.store
	}

	pub fn into_store(self) -> S {
		self.store
	}

	fn transition(&mut self, state: RunnerState) {
		tracing::debug!(from = ?self.state, to = ?state, "runner state");
		self.state = state;
	}

	fn emit(&self, step: &PlanStep, direction: Direction, status: ProgressStatus) {
		if let Some(progress) = &self.progress {
			// A dropped receiver only means nobody is listening
			let _ = progress.send(ProgressEvent {
				direction,
				revision: step.revision.id.clone(),
				message: step.revision.message.clone(),
				status,
			});
		}
	}

	/// Current marker row(s), read without taking the lock
	///
	/// Several rows are reported as-is; an empty list means no revision.
	pub async fn status(&mut self) -> Result<Vec<RevisionId>> {
		guarded(&self.cancel, self.statement_timeout, self.store.read_marker())
			.await
			.map_err(|interrupt| outside_revision(interrupt, None))
	}

	/// Upgrade to `target`
	pub async fn up(&mut self, target: &Target) -> Result<ExecutionResult> {
		let plan = self.plan(Direction::Up, target).await?;
		self.execute(&plan).await
	}

	/// Downgrade to `target`
	pub async fn down(&mut self, target: &Target) -> Result<ExecutionResult> {
		let plan = self.plan(Direction::Down, target).await?;
		self.execute(&plan).await
	}

	/// Observe the marker and resolve the revisions a run would execute
	///
	/// The plan is checked by replaying it against the recorded schema, so
	/// corrupted revision files are reported before anything is locked.
	pub async fn plan(&mut self, direction: Direction, target: &Target) -> Result<MigrationPlan> {
		self.transition(RunnerState::Resolving);
		let result = self.resolve(direction, target).await;
		let next = if result.is_ok() {
			RunnerState::Idle
		} else {
			RunnerState::Failed
		};
		self.transition(next);
		result
	}

	async fn resolve(&mut self, direction: Direction, target: &Target) -> Result<MigrationPlan> {
		let marker = self.status().await?;
		let plan = MigrationPlan::resolve(&self.graph, direction, target, &marker)?;
		plan.preflight(&self.graph)?;
		Ok(plan)
	}

	/// Execute a plan under the migration lock
	///
	/// # Errors
	///
	/// - [`MigrationError::UnsupportedOperation`] from the capability gate,
	///   before the lock is taken
	/// - [`MigrationError::Conflict`] when the marker moved since planning;
	///   nothing is executed
	/// - [`MigrationError::Execution`] when the store rejects a statement;
	///   the failing revision is rolled back, earlier ones stay committed
	/// - [`MigrationError::Cancelled`] when the token fires; the open
	///   revision is rolled back
	pub async fn execute(&mut self, plan: &MigrationPlan) -> Result<ExecutionResult> {
		self.transition(RunnerState::Resolving);
		let result = self.execute_locked(plan).await;
		let next = if result.is_ok() {
			RunnerState::Complete
		} else {
			RunnerState::Failed
		};
		self.transition(next);
		result
	}

	fn gate(&self, plan: &MigrationPlan) -> Result<()> {
		for step in &plan.steps {
			for operation in step.operations(plan.direction) {
				if let Err(err) = self.store.check(operation) {
					tracing::debug!(revision = %step.revision.id, "capability gate: {}", err);
					return Err(MigrationError::UnsupportedOperation {
						revision: step.revision.id.clone(),
						kind: operation.kind(),
						backend: self.store.backend().to_string(),
					});
				}
			}
		}
		Ok(())
	}

	async fn execute_locked(&mut self, plan: &MigrationPlan) -> Result<ExecutionResult> {
		self.gate(plan)?;

		let current = plan.expected_marker.first().cloned();
		if let Err(interrupt) = guarded(&self.cancel, self.lock_timeout, self.store.acquire_lock()).await {
			self.release_after_failure().await;
			return Err(outside_revision(interrupt, current));
		}

		match self.run(plan).await {
			Ok(result) => {
				self.release().await?;
				Ok(result)
			}
			Err(err) => {
				self.release_after_failure().await;
				Err(err)
			}
		}
	}

	/// Release the lock at the end of a successful run
	///
	/// Some stores finish their outer transaction here, so a failure means
	/// the run's work may not be persisted and is reported as an error.
	async fn release(&mut self) -> Result<()> {
		match tokio::time::timeout(self.statement_timeout, self.store.release_lock()).await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(err)) => {
				tracing::error!(error = %err, "failed to release the migration lock");
				Err(MigrationError::Store(err))
			}
			Err(_) => {
				tracing::error!("timed out releasing the migration lock");
				Err(MigrationError::Store(StoreError::Timeout))
			}
		}
	}

	async fn release_after_failure(&mut self) {
		if let Err(err) = self.release().await {
			tracing::warn!(error = %err, "lock release failed after an earlier error");
		}
	}

	async fn run(&mut self, plan: &MigrationPlan) -> Result<ExecutionResult> {
		let mut last_applied = plan.expected_marker.first().cloned();

		let found = guarded(&self.cancel, self.statement_timeout, self.store.read_marker())
			.await
			.map_err(|interrupt| outside_revision(interrupt, last_applied.clone()))?;
		if found != plan.expected_marker {
			return Err(MigrationError::Conflict {
				expected: plan.expected_marker.clone(),
				found,
			});
		}

		self.transition(RunnerState::Applying);
		if !plan.is_empty() && !self.store.capabilities().transactional_ddl {
			tracing::warn!(
				backend = self.store.backend(),
				"DDL is not transactional on this backend; a crash between a revision's statements and its marker update leaves the schema ahead of the marker"
			);
		}

		let mut revisions = Vec::with_capacity(plan.len());
		for step in &plan.steps {
			self.emit(step, plan.direction, ProgressStatus::Started);
			if let Err(err) = self.run_step(step, plan.direction, last_applied.as_ref()).await {
				self.emit(step, plan.direction, ProgressStatus::Failed(err.to_string()));
				return Err(err);
			}
			tracing::info!(
				revision = %step.revision.id,
				"{} {} ({})",
				plan.direction.name(),
				step.revision.id,
				step.revision.message
			);
			self.emit(step, plan.direction, ProgressStatus::Applied);
			last_applied = step.marker_after.clone();
			revisions.push(step.revision.id.clone());
		}

		Ok(ExecutionResult {
			direction: plan.direction,
			revisions,
			marker: last_applied,
		})
	}

	async fn run_step(
		&mut self,
		step: &PlanStep,
		direction: Direction,
		last_applied: Option<&RevisionId>,
	) -> Result<()> {
		let timeout = self.statement_timeout;
		let failed = |interrupt: Interrupt| match interrupt {
			Interrupt::Cancelled => MigrationError::Cancelled {
				revision: Some(step.revision.id.clone()),
				last_applied: last_applied.cloned(),
			},
			Interrupt::Store(source) => MigrationError::Execution {
				revision: step.revision.id.clone(),
				last_applied: last_applied.cloned(),
				source,
			},
		};

		guarded(&self.cancel, timeout, self.store.begin())
			.await
			.map_err(failed)?;

		let body = async {
			for operation in step.operations(direction) {
				tracing::debug!(revision = %step.revision.id, "{}", operation);
				guarded(&self.cancel, timeout, self.store.execute(operation)).await?;
			}
			guarded(
				&self.cancel,
				timeout,
				self.store.write_marker(step.marker_after.as_ref()),
			)
			.await?;
			guarded(&self.cancel, timeout, self.store.commit()).await
		};

		if let Err(interrupt) = body.await {
			match tokio::time::timeout(timeout, self.store.rollback()).await {
				Ok(Ok(())) => {}
				Ok(Err(err)) => {
					tracing::warn!(revision = %step.revision.id, error = %err, "rollback failed")
				}
				Err(_) => tracing::warn!(revision = %step.revision.id, "rollback timed out"),
			}
			return Err(failed(interrupt));
		}
		Ok(())
	}

	/// Overwrite the marker with `target` without running any operation
	///
	/// Never checks that the live schema matches `target`. Requires
	/// `confirmed`, and takes the migration lock like any other write.
	///
	/// # Errors
	///
	/// Returns [`MigrationError::ConfirmationRequired`] when `confirmed` is
	/// false.
	pub async fn set(&mut self, target: &Target, confirmed: bool) -> Result<Option<RevisionId>> {
		let revision = match target {
			Target::Head => self.graph.head()?.map(|head| head.id.clone()),
			Target::Base => None,
			Target::Revision(prefix) => Some(self.graph.resolve(prefix)?.id.clone()),
		};
		if !confirmed {
			return Err(MigrationError::ConfirmationRequired(format!(
				"setting the marker to {} skips all schema changes",
				revision
					.as_ref()
					.map_or_else(|| "base".to_string(), |id| id.to_string())
			)));
		}

		self.transition(RunnerState::Applying);
		let result = self.write_marker_locked(revision.as_ref()).await;
		let next = if result.is_ok() {
			RunnerState::Complete
		} else {
			RunnerState::Failed
		};
		self.transition(next);
		result.map(|()| revision)
	}

	async fn write_marker_locked(&mut self, revision: Option<&RevisionId>) -> Result<()> {
		if let Err(interrupt) = guarded(&self.cancel, self.lock_timeout, self.store.acquire_lock()).await {
			self.release_after_failure().await;
			return Err(outside_revision(interrupt, None));
		}

		let timeout = self.statement_timeout;
		let body = async {
			guarded(&self.cancel, timeout, self.store.begin()).await?;
			guarded(&self.cancel, timeout, self.store.write_marker(revision)).await?;
			guarded(&self.cancel, timeout, self.store.commit()).await
		};
		let result = body.await;
		if result.is_err()
			&& let Err(err) = self.store.rollback().await
		{
			tracing::warn!(error = %err, "rollback failed");
		}
		if let Err(interrupt) = result {
			self.release_after_failure().await;
			return Err(outside_revision(interrupt, None));
		}
		self.release().await?;

		tracing::warn!(
			marker = revision.map_or("base", RevisionId::as_str),
			"revision marker overwritten without running migrations"
		);
		Ok(())
	}
}

fn outside_revision(interrupt: Interrupt, last_applied: Option<RevisionId>) -> MigrationError {
	match interrupt {
		Interrupt::Cancelled => MigrationError::Cancelled {
			revision: None,
			last_applied,
		},
		Interrupt::Store(err) => MigrationError::Store(err),
	}
}

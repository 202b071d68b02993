//! Revision storage
//!
//! The revision graph is owned by the storage. Runners and the diff engine
//! only read it; generation appends exactly one revision per call.

pub mod filesystem;

use super::Result;
use super::graph::RevisionGraph;
use super::migration::{Revision, RevisionId};
use async_trait::async_trait;

/// Persistence of revisions
#[async_trait]
pub trait MigrationRepository: Send + Sync {
	/// Persist a new revision; never overwrites an existing one
	async fn save(&mut self, revision: &Revision) -> Result<()>;

	async fn get(&self, id: &RevisionId) -> Result<Revision>;

	/// Every stored revision, sorted by id
	async fn list(&self) -> Result<Vec<Revision>>;

	async fn delete(&mut self, id: &RevisionId) -> Result<()>;

	/// Load and validate the whole graph
	///
	/// # Errors
	///
	/// Fails on malformed files, duplicate ids, unknown parents and cycles.
	async fn load_graph(&self) -> Result<RevisionGraph> {
		RevisionGraph::from_revisions(self.list().await?)
	}
}

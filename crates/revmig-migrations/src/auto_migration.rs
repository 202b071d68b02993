//! Revision generation
//!
//! Compares the declared models with the schema recorded by the revision
//! chain and appends one revision holding the difference.

use super::migration::{Revision, RevisionId};
use super::model_registry::ModelSource;
use super::repository::MigrationRepository;
use super::schema_diff::SchemaDiff;
use super::Result;
use std::sync::Arc;

/// Options for [`AutoMigrationGenerator::generate`]
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
	/// Persist a revision even when no change is detected
	pub allow_empty: bool,
	/// Use this id instead of a random one
	pub revision_id: Option<RevisionId>,
}

impl GenerateOptions {
	pub fn allow_empty(mut self) -> Self {
		self.allow_empty = true;
		self
	}

	pub fn with_revision_id(mut self, id: RevisionId) -> Self {
		self.revision_id = Some(id);
		self
	}
}

/// Revision generator
pub struct AutoMigrationGenerator {
	/// Declared tables
	models: Arc<dyn ModelSource + Send + Sync>,
	/// Storage of the revision graph
	repository: Arc<tokio::sync::Mutex<dyn MigrationRepository>>,
}

impl AutoMigrationGenerator {
	pub fn new(
		models: Arc<dyn ModelSource + Send + Sync>,
		repository: Arc<tokio::sync::Mutex<dyn MigrationRepository>>,
	) -> Self {
		Self { models, repository }
	}

	/// Generate and persist the next revision
	///
	/// The recorded schema is rebuilt by replaying the chain up to the single
	/// head, diffed against the declared models, and the result is saved as a
	/// child of that head. Returns `None` when nothing changed and
	/// `allow_empty` is not set; nothing is written in that case.
	///
	/// # Errors
	///
	/// - [`crate::MigrationError::AmbiguousHead`] when the graph has more
	///   than one head
	/// - [`crate::MigrationError::Validation`] when the declared models are
	///   malformed
	/// - [`crate::MigrationError::InvalidOperation`] when a stored revision
	///   cannot be replayed
	pub async fn generate(
		&self,
		message: &str,
		options: &GenerateOptions,
	) -> Result<Option<Revision>> {
		let mut repository = self.repository.lock().await;
		let graph = repository.load_graph().await?;

		let parent = graph.head()?.map(|head| head.id.clone());
		let recorded = graph.snapshot_at(parent.as_ref())?;
		let declared = self.models.declared_snapshot()?;

		let diff = SchemaDiff::new(&recorded, &declared).detect()?;
		if diff.is_empty() && !options.allow_empty {
			tracing::info!("no changes detected");
			return Ok(None);
		}

		let mut revision = Revision::new(parent, message);
		match &options.revision_id {
			Some(id) => revision.id = id.clone(),
			None => {
				while graph.contains(&revision.id) {
					revision.id = RevisionId::generate();
				}
			}
		}
		let revision = revision.with_operations(diff.up_ops, diff.down_ops);

		repository.save(&revision).await?;
		tracing::info!(
			revision = %revision.id,
			operations = revision.up_ops.len(),
			"generated revision: {}",
			revision.message
		);
		Ok(Some(revision))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MigrationError;
	use crate::fields::ColumnType;
	use crate::model_registry::ModelRegistry;
	use crate::operations::Operation;
	use crate::repository::filesystem::FilesystemRepository;
	use crate::snapshot::{ColumnDefinition, TableDefinition};
	use rstest::rstest;
	use tempfile::TempDir;

	fn items() -> TableDefinition {
		TableDefinition::new("items")
			.with_column(ColumnDefinition::id())
			.with_column(ColumnDefinition::new("title", ColumnType::String))
	}

	fn generator(
		dir: &TempDir,
		registry: Arc<ModelRegistry>,
	) -> (
		AutoMigrationGenerator,
		Arc<tokio::sync::Mutex<FilesystemRepository>>,
	) {
		let repository = Arc::new(tokio::sync::Mutex::new(FilesystemRepository::new(
			dir.path(),
		)));
		let generator = AutoMigrationGenerator::new(registry, repository.clone());
		(generator, repository)
	}

	#[rstest]
	#[tokio::test]
	async fn test_generate_chains_on_head() {
		// Arrange
		let dir = TempDir::new().unwrap();
		let registry = Arc::new(ModelRegistry::new());
		registry.register(items());
		let (generator, repository) = generator(&dir, registry.clone());

		// Act
		let first = generator
			.generate("create items", &GenerateOptions::default())
			.await
			.unwrap()
			.unwrap();
		registry.register(items().with_column(ColumnDefinition::new("qty", ColumnType::Integer)));
		let second = generator
			.generate("add qty", &GenerateOptions::default())
			.await
			.unwrap()
			.unwrap();

		// Assert
		assert_eq!(first.parent_id, None);
		assert_eq!(second.parent_id, Some(first.id.clone()));
		assert_eq!(
			second.down_ops,
			vec![Operation::DropColumn {
				table: "items".to_string(),
				column: "qty".to_string(),
			}]
		);
		assert_eq!(repository.lock().await.list().await.unwrap().len(), 2);
	}

	#[rstest]
	#[tokio::test]
	async fn test_no_changes_writes_nothing() {
		let dir = TempDir::new().unwrap();
		let registry = Arc::new(ModelRegistry::new());
		registry.register(items());
		let (generator, repository) = generator(&dir, registry);
		generator
			.generate("create items", &GenerateOptions::default())
			.await
			.unwrap();

		let result = generator
			.generate("nothing", &GenerateOptions::default())
			.await
			.unwrap();
		let empty = generator
			.generate("checkpoint", &GenerateOptions::default().allow_empty())
			.await
			.unwrap()
			.unwrap();

		assert!(result.is_none());
		assert!(empty.is_empty());
		assert_eq!(repository.lock().await.list().await.unwrap().len(), 2);
	}

	#[rstest]
	#[tokio::test]
	async fn test_divergent_heads_are_refused() {
		let dir = TempDir::new().unwrap();
		let registry = Arc::new(ModelRegistry::new());
		let (generator, repository) = generator(&dir, registry);
		let root = RevisionId::new("aaa111").unwrap();
		{
			let mut repository = repository.lock().await;
			repository
				.save(&Revision::new(None, "root").with_id(root.clone()))
				.await
				.unwrap();
			for id in ["bbb222", "ccc333"] {
				repository
					.save(&Revision::new(Some(root.clone()), "branch").with_id(RevisionId::new(id).unwrap()))
					.await
					.unwrap();
			}
		}

		let result = generator
			.generate("next", &GenerateOptions::default().allow_empty())
			.await;

		assert!(matches!(result, Err(MigrationError::AmbiguousHead { .. })));
	}
}

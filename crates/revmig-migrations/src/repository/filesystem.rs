//! Filesystem-based revision repository
//!
//! Persists revisions as `.json` files in a single directory.

use super::MigrationRepository;
use crate::migration::{Revision, RevisionId};
use crate::{MigrationError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Repository that persists revisions as `.json` files
///
/// Files are named `<id>_<slug>.json`, where the slug is derived from the
/// message:
/// ```text
/// migrations/
///     3f2a9c41b7d0_create_items.json
///     91c0e4d2aa57_add_qty_to_items.json
/// ```
/// Files are plain data and may be edited by hand; they are validated again
/// every time they are loaded.
pub struct FilesystemRepository {
	/// Directory holding the revision files
	root_dir: PathBuf,
}

impl FilesystemRepository {
	/// Create a new FilesystemRepository
	///
	/// # Example
	///
	/// ```rust,no_run
	/// use revmig_migrations::FilesystemRepository;
	/// let repo = FilesystemRepository::new("./migrations");
	/// ```
	pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
		Self {
			root_dir: root_dir.as_ref().to_path_buf(),
		}
	}

	pub fn root_dir(&self) -> &Path {
		&self.root_dir
	}

	/// Reject file names that could escape the root directory
	fn validate_file_name(name: &str) -> Result<()> {
		if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
			return Err(MigrationError::Validation(format!(
				"invalid revision file name: {:?}",
				name
			)));
		}
		if name.contains('\0') {
			return Err(MigrationError::Validation(
				"revision file name contains a null byte".to_string(),
			));
		}
		Ok(())
	}

	fn revision_path(&self, revision: &Revision) -> Result<PathBuf> {
		let file_name = revision.file_name();
		Self::validate_file_name(&file_name)?;
		Ok(self.root_dir.join(file_name))
	}

	/// Path of the stored file for `id`, if any
	///
	/// Ids may contain underscores, so a matching name is confirmed by
	/// loading the file.
	async fn find(&self, id: &RevisionId) -> Result<Option<PathBuf>> {
		for path in self.revision_files().await? {
			if file_stem(&path).is_some_and(|stem| stem_matches(stem, id))
				&& Self::load(&path).await?.id == *id
			{
				return Ok(Some(path));
			}
		}
		Ok(None)
	}

	async fn revision_files(&self) -> Result<Vec<PathBuf>> {
		if !tokio::fs::try_exists(&self.root_dir).await? {
			return Ok(vec![]);
		}

		let mut files = Vec::new();
		let mut entries = tokio::fs::read_dir(&self.root_dir).await?;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			// Skip non-.json files
			if path.extension().and_then(|s| s.to_str()) != Some("json") {
				continue;
			}
			files.push(path);
		}
		files.sort();
		Ok(files)
	}

	/// Read a file and check it against its own name
	async fn load(path: &Path) -> Result<Revision> {
		let invalid = |message: String| MigrationError::InvalidRevisionFile {
			path: path.display().to_string(),
			message,
		};

		let content = tokio::fs::read_to_string(path).await?;
		let revision = Revision::from_json(&content).map_err(|e| invalid(e.to_string()))?;
		let stem = file_stem(path).unwrap_or_default();
		if !stem_matches(stem, &revision.id) {
			return Err(invalid(format!(
				"file name does not start with its revision id {}",
				revision.id
			)));
		}
		Ok(revision)
	}
}

fn file_stem(path: &Path) -> Option<&str> {
	path.file_stem().and_then(|s| s.to_str())
}

/// `<id>` or `<id>_<slug>`
fn stem_matches(stem: &str, id: &RevisionId) -> bool {
	match stem.strip_prefix(id.as_str()) {
		Some(rest) => rest.is_empty() || rest.starts_with('_'),
		None => false,
	}
}

#[async_trait]
impl MigrationRepository for FilesystemRepository {
	async fn save(&mut self, revision: &Revision) -> Result<()> {
		let path = self.revision_path(revision)?;

		// Refuse to overwrite, and refuse a second file for the same id
		if tokio::fs::try_exists(&path).await.unwrap_or(false)
			|| self.find(&revision.id).await?.is_some()
		{
			return Err(MigrationError::Io(std::io::Error::other(format!(
				"Revision {} already exists in {}. \
				If you want to replace it, please delete the existing file first.",
				revision.id,
				self.root_dir.display()
			))));
		}

		tokio::fs::create_dir_all(&self.root_dir).await.map_err(|e| {
			MigrationError::Io(std::io::Error::other(format!(
				"Failed to create directory {}: {}",
				self.root_dir.display(),
				e
			)))
		})?;

		let content = revision.to_json()?;
		tokio::fs::write(&path, content).await.map_err(|e| {
			MigrationError::Io(std::io::Error::other(format!(
				"Failed to write {}: {}",
				path.display(),
				e
			)))
		})?;

		tracing::debug!(path = %path.display(), "revision saved");
		Ok(())
	}

	async fn get(&self, id: &RevisionId) -> Result<Revision> {
		match self.find(id).await? {
			Some(path) => Self::load(&path).await,
			None => Err(MigrationError::NotFound(id.to_string())),
		}
	}

	async fn list(&self) -> Result<Vec<Revision>> {
		let mut revisions = Vec::new();
		for path in self.revision_files().await? {
			revisions.push(Self::load(&path).await?);
		}
		revisions.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(revisions)
	}

	async fn delete(&mut self, id: &RevisionId) -> Result<()> {
		let path = self
			.find(id)
			.await?
			.ok_or_else(|| MigrationError::NotFound(id.to_string()))?;

		tokio::fs::remove_file(&path).await.map_err(|e| {
			MigrationError::Io(std::io::Error::other(format!(
				"Failed to delete {}: {}",
				path.display(),
				e
			)))
		})?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fields::ColumnType;
	use crate::operations::Operation;
	use crate::snapshot::ColumnDefinition;
	use rstest::rstest;
	use tempfile::TempDir;

	fn create_items(id: &str, parent: Option<&str>) -> Revision {
		Revision::new(
			parent.map(|p| RevisionId::new(p).unwrap()),
			"create items",
		)
		.with_id(RevisionId::new(id).unwrap())
		.with_operations(
			vec![Operation::CreateTable {
				name: "items".to_string(),
				columns: vec![ColumnDefinition::id(), ColumnDefinition::new("title", ColumnType::String)],
				primary_key: vec![],
				indexes: vec![],
			}],
			vec![Operation::DropTable {
				name: "items".to_string(),
			}],
		)
	}

	#[rstest]
	#[tokio::test]
	async fn test_save_and_get() {
		// Arrange
		let temp_dir = TempDir::new().unwrap();
		let mut repo = FilesystemRepository::new(temp_dir.path().join("migrations"));
		let revision = create_items("aaa111", None);

		// Act
		repo.save(&revision).await.unwrap();
		let loaded = repo.get(&revision.id).await.unwrap();

		// Assert
		assert_eq!(loaded, revision);
		assert!(
			temp_dir
				.path()
				.join("migrations/aaa111_create_items.json")
				.exists()
		);
	}

	#[rstest]
	#[tokio::test]
	async fn test_save_refuses_overwrite() {
		let temp_dir = TempDir::new().unwrap();
		let mut repo = FilesystemRepository::new(temp_dir.path());
		let revision = create_items("aaa111", None);
		repo.save(&revision).await.unwrap();

		let result = repo.save(&revision).await;

		assert!(matches!(result, Err(MigrationError::Io(_))));
	}

	#[rstest]
	#[tokio::test]
	async fn test_list_missing_directory_is_empty() {
		let temp_dir = TempDir::new().unwrap();
		let repo = FilesystemRepository::new(temp_dir.path().join("absent"));

		assert!(repo.list().await.unwrap().is_empty());
		assert!(repo.load_graph().await.unwrap().is_empty());
	}

	#[rstest]
	#[tokio::test]
	async fn test_malformed_file_is_reported_with_its_path() {
		let temp_dir = TempDir::new().unwrap();
		std::fs::write(temp_dir.path().join("bbb222_broken.json"), "{\"revision\": ").unwrap();
		let repo = FilesystemRepository::new(temp_dir.path());

		let err = repo.list().await.unwrap_err();

		match err {
			MigrationError::InvalidRevisionFile { path, .. } => {
				assert!(path.ends_with("bbb222_broken.json"))
			}
			other => panic!("expected InvalidRevisionFile, got {:?}", other),
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_file_name_must_match_revision_id() {
		let temp_dir = TempDir::new().unwrap();
		let content = create_items("aaa111", None).to_json().unwrap();
		std::fs::write(temp_dir.path().join("ccc333_create_items.json"), content).unwrap();
		let repo = FilesystemRepository::new(temp_dir.path());

		assert!(matches!(
			repo.list().await,
			Err(MigrationError::InvalidRevisionFile { .. })
		));
	}

	#[rstest]
	#[tokio::test]
	async fn test_delete_and_not_found() {
		let temp_dir = TempDir::new().unwrap();
		let mut repo = FilesystemRepository::new(temp_dir.path());
		let revision = create_items("aaa111", None);
		repo.save(&revision).await.unwrap();

		repo.delete(&revision.id).await.unwrap();

		assert!(matches!(
			repo.get(&revision.id).await,
			Err(MigrationError::NotFound(_))
		));
		assert!(matches!(
			repo.delete(&revision.id).await,
			Err(MigrationError::NotFound(_))
		));
	}

	#[rstest]
	#[case("aaa111", true)]
	#[case("aaa111_create_items", true)]
	#[case("aaa1110_create_items", false)]
	#[case("bbb222", false)]
	fn test_stem_matches(#[case] stem: &str, #[case] expected: bool) {
		let id = RevisionId::new("aaa111").unwrap();
		assert_eq!(stem_matches(stem, &id), expected);
	}

	#[rstest]
	#[tokio::test]
	async fn test_load_graph_links_parents() {
		let temp_dir = TempDir::new().unwrap();
		let mut repo = FilesystemRepository::new(temp_dir.path());
		let mut child = create_items("bbb222", Some("aaa111"));
		child.message = "add qty".to_string();
		child.up_ops = vec![Operation::AddColumn {
			table: "items".to_string(),
			column: ColumnDefinition::new("qty", ColumnType::Integer),
		}];
		child.down_ops = vec![Operation::DropColumn {
			table: "items".to_string(),
			column: "qty".to_string(),
		}];
		repo.save(&create_items("aaa111", None)).await.unwrap();
		repo.save(&child).await.unwrap();

		let graph = repo.load_graph().await.unwrap();

		let head = graph.head().unwrap().unwrap();
		assert_eq!(head.id.as_str(), "bbb222");
	}
}

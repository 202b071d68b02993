//! Revision definition

use super::Operation;
use super::{MigrationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of generated revision ids
pub const REVISION_ID_LENGTH: usize = 12;

/// Longest id the marker table can hold
pub const MAX_REVISION_ID_LENGTH: usize = 32;

/// Revision identifier
///
/// Generated ids are 12 lowercase hex characters. Hand-written ids are
/// accepted as long as they are 1 to 32 ASCII alphanumerics or underscores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(String);

impl RevisionId {
	/// Generate a fresh random id
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::RevisionId;
	///
	/// let id = RevisionId::generate();
	/// assert_eq!(id.as_str().len(), 12);
	/// assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
	/// ```
	pub fn generate() -> Self {
		let mut id = uuid::Uuid::new_v4().simple().to_string();
		id.truncate(REVISION_ID_LENGTH);
		Self(id)
	}

	/// Parse and validate an id
	///
	/// # Errors
	///
	/// Returns [`MigrationError::Validation`] for empty, overlong or
	/// non-alphanumeric ids.
	pub fn new(id: impl Into<String>) -> Result<Self> {
		let id = id.into();
		if id.is_empty() || id.len() > MAX_REVISION_ID_LENGTH {
			return Err(MigrationError::Validation(format!(
				"revision id must be 1 to {} characters, got {:?}",
				MAX_REVISION_ID_LENGTH, id
			)));
		}
		if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
			return Err(MigrationError::Validation(format!(
				"revision id {:?} contains characters other than letters, digits and underscores",
				id
			)));
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RevisionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RevisionId {
	type Err = MigrationError;

	fn from_str(s: &str) -> Result<Self> {
		Self::new(s)
	}
}

impl TryFrom<String> for RevisionId {
	type Error = MigrationError;

	fn try_from(value: String) -> Result<Self> {
		Self::new(value)
	}
}

impl From<RevisionId> for String {
	fn from(id: RevisionId) -> Self {
		id.0
	}
}

impl AsRef<str> for RevisionId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// One unit of schema change
///
/// Created once by generation and never mutated afterwards. The persisted
/// form is plain JSON so revisions can be reviewed and hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
	#[serde(rename = "revision")]
	pub id: RevisionId,

	/// Parent revision; `None` only for the first revision of a chain
	#[serde(rename = "revises", default)]
	pub parent_id: Option<RevisionId>,

	#[serde(default)]
	pub message: String,

	pub created_at: DateTime<Utc>,

	#[serde(default)]
	pub up_ops: Vec<Operation>,

	/// Conventionally the structural inverse of `up_ops`, in reverse order
	#[serde(default)]
	pub down_ops: Vec<Operation>,
}

impl Revision {
	/// Create a revision with a fresh id, stamped now
	pub fn new(parent_id: Option<RevisionId>, message: impl Into<String>) -> Self {
		Self {
			id: RevisionId::generate(),
			parent_id,
			message: message.into(),
			created_at: Utc::now(),
			up_ops: Vec::new(),
			down_ops: Vec::new(),
		}
	}

	pub fn with_id(mut self, id: RevisionId) -> Self {
		self.id = id;
		self
	}

	pub fn with_operations(mut self, up_ops: Vec<Operation>, down_ops: Vec<Operation>) -> Self {
		self.up_ops = up_ops;
		self.down_ops = down_ops;
		self
	}

	pub fn is_empty(&self) -> bool {
		self.up_ops.is_empty() && self.down_ops.is_empty()
	}

	/// Deterministic file name, `<id>_<slug>.json`
	///
	/// # Examples
	///
	/// ```rust
	/// use revmig_migrations::{Revision, RevisionId};
	///
	/// let revision = Revision::new(None, "Add items table!")
	///     .with_id(RevisionId::new("1a2b3c4d5e6f").unwrap());
	/// assert_eq!(revision.file_name(), "1a2b3c4d5e6f_add_items_table.json");
	/// ```
	pub fn file_name(&self) -> String {
		let slug = slugify(&self.message);
		if slug.is_empty() {
			format!("{}.json", self.id)
		} else {
			format!("{}_{}.json", self.id, slug)
		}
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string_pretty(self)?)
	}

	pub fn from_json(content: &str) -> Result<Self> {
		Ok(serde_json::from_str(content)?)
	}
}

const MAX_SLUG_LENGTH: usize = 40;

/// Lowercase ASCII words joined by underscores
pub(crate) fn slugify(message: &str) -> String {
	let mut slug = String::new();
	for word in message
		.split(|c: char| !c.is_ascii_alphanumeric())
		.filter(|w| !w.is_empty())
	{
		if slug.len() + word.len() + 1 > MAX_SLUG_LENGTH && !slug.is_empty() {
			break;
		}
		if !slug.is_empty() {
			slug.push('_');
		}
		slug.push_str(&word.to_ascii_lowercase());
	}
	slug.truncate(MAX_SLUG_LENGTH);
	slug
}

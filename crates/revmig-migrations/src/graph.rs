//! Revision graph
//!
//! Every revision points at its parent; the graph derives the child lists,
//! the heads (revisions nobody revises) and the lineage walks the runner and
//! the generator rely on.

use super::migration::{Revision, RevisionId};
use super::snapshot::SchemaSnapshot;
use super::{MigrationError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// The set of known revisions plus derived structure
#[derive(Debug, Clone, Default)]
pub struct RevisionGraph {
	revisions: BTreeMap<RevisionId, Revision>,
	/// Child ids per revision, sorted
	children: BTreeMap<RevisionId, BTreeSet<RevisionId>>,
}

impl RevisionGraph {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build a graph, validating its structure
	///
	/// # Errors
	///
	/// - [`MigrationError::Validation`] for duplicate ids or a parent that is
	///   not part of the set
	/// - [`MigrationError::CircularDependency`] when following parents loops
	pub fn from_revisions<I>(revisions: I) -> Result<Self>
	where
		I: IntoIterator<Item = Revision>,
	{
		let mut graph = Self::new();
		for revision in revisions {
			if graph.revisions.contains_key(&revision.id) {
				return Err(MigrationError::Validation(format!(
					"revision {} is defined more than once",
					revision.id
				)));
			}
			graph.revisions.insert(revision.id.clone(), revision);
		}

		for revision in graph.revisions.values() {
			if let Some(parent) = &revision.parent_id {
				if !graph.revisions.contains_key(parent) {
					return Err(MigrationError::Validation(format!(
						"revision {} revises unknown revision {}",
						revision.id, parent
					)));
				}
				graph
					.children
					.entry(parent.clone())
					.or_default()
					.insert(revision.id.clone());
			}
		}

		graph.check_acyclic()?;
		Ok(graph)
	}

	fn check_acyclic(&self) -> Result<()> {
		// Ids whose ancestry is known to reach a root
		let mut rooted: BTreeSet<&RevisionId> = BTreeSet::new();
		for start in self.revisions.keys() {
			let mut trail: Vec<&RevisionId> = Vec::new();
			let mut on_trail: BTreeSet<&RevisionId> = BTreeSet::new();
			let mut current = Some(start);
			while let Some(id) = current {
				if rooted.contains(id) {
					break;
				}
				if !on_trail.insert(id) {
					let cycle_start = trail.iter().position(|t| *t == id).unwrap_or(0);
					let cycle: Vec<_> = trail[cycle_start..]
						.iter()
						.map(|id| id.as_str())
						.chain(std::iter::once(id.as_str()))
						.collect();
					return Err(MigrationError::CircularDependency {
						cycle: cycle.join(" -> "),
					});
				}
				trail.push(id);
				current = self
					.revisions
					.get(id)
					.and_then(|revision| revision.parent_id.as_ref());
			}
			rooted.extend(trail);
		}
		Ok(())
	}

	/// Append a newly generated revision
	///
	/// # Errors
	///
	/// Returns [`MigrationError::Validation`] if the id is taken or the parent
	/// is unknown.
	pub fn add(&mut self, revision: Revision) -> Result<()> {
		if self.revisions.contains_key(&revision.id) {
			return Err(MigrationError::Validation(format!(
				"revision {} already exists",
				revision.id
			)));
		}
		if let Some(parent) = &revision.parent_id {
			if !self.revisions.contains_key(parent) {
				return Err(MigrationError::Validation(format!(
					"revision {} revises unknown revision {}",
					revision.id, parent
				)));
			}
			self.children
				.entry(parent.clone())
				.or_default()
				.insert(revision.id.clone());
		}
		self.revisions.insert(revision.id.clone(), revision);
		Ok(())
	}

	pub fn is_empty(&self) -> bool {
		self.revisions.is_empty()
	}

	pub fn len(&self) -> usize {
		self.revisions.len()
	}

	pub fn get(&self, id: &RevisionId) -> Option<&Revision> {
		self.revisions.get(id)
	}

	pub fn contains(&self, id: &RevisionId) -> bool {
		self.revisions.contains_key(id)
	}

	pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
		self.revisions.values()
	}

	pub fn children(&self, id: &RevisionId) -> impl Iterator<Item = &Revision> {
		self.children
			.get(id)
			.into_iter()
			.flatten()
			.filter_map(|child| self.revisions.get(child))
	}

	/// Revisions without a recorded child, sorted by id
	pub fn heads(&self) -> Vec<&Revision> {
		self.revisions
			.values()
			.filter(|revision| {
				self.children
					.get(&revision.id)
					.is_none_or(|children| children.is_empty())
			})
			.collect()
	}

	/// The single head, or `None` for an empty graph
	///
	/// # Errors
	///
	/// Returns [`MigrationError::AmbiguousHead`] when divergent branches exist.
	pub fn head(&self) -> Result<Option<&Revision>> {
		let heads = self.heads();
		match heads.as_slice() {
			[] => Ok(None),
			[head] => Ok(Some(*head)),
			_ => Err(MigrationError::AmbiguousHead {
				heads: heads.iter().map(|h| h.id.clone()).collect(),
			}),
		}
	}

	/// Look up a revision by full id or unique id prefix
	///
	/// # Errors
	///
	/// - [`MigrationError::NotFound`] when nothing matches
	/// - [`MigrationError::Validation`] when the prefix matches several ids
	pub fn resolve(&self, prefix: &str) -> Result<&Revision> {
		if let Some(revision) = self.revisions.values().find(|r| r.id.as_str() == prefix) {
			return Ok(revision);
		}
		let matches: Vec<_> = self
			.revisions
			.values()
			.filter(|r| !prefix.is_empty() && r.id.as_str().starts_with(prefix))
			.collect();
		match matches.as_slice() {
			[] => Err(MigrationError::NotFound(prefix.to_string())),
			[revision] => Ok(*revision),
			_ => Err(MigrationError::Validation(format!(
				"revision prefix {} is ambiguous: {}",
				prefix,
				matches
					.iter()
					.map(|r| r.id.as_str())
					.collect::<Vec<_>>()
					.join(", ")
			))),
		}
	}

	/// Whether `ancestor` is on the lineage of `descendant` (or equal to it)
	pub fn is_ancestor(&self, ancestor: &RevisionId, descendant: &RevisionId) -> bool {
		self.history_from(descendant).any(|r| &r.id == ancestor)
	}

	/// Revisions strictly after `from` up to and including `to`, in
	/// parent-to-child order
	///
	/// `None` stands for the state before the first revision. Walks parent
	/// pointers from `to` until `from` is met.
	///
	/// # Errors
	///
	/// - [`MigrationError::NotFound`] for ids missing from the graph
	/// - [`MigrationError::NoPath`] when `from` is not an ancestor of `to`
	pub fn path(&self, from: Option<&RevisionId>, to: Option<&RevisionId>) -> Result<Vec<&Revision>> {
		for id in from.iter().chain(to.iter()) {
			if !self.contains(id) {
				return Err(MigrationError::NotFound(id.to_string()));
			}
		}
		let no_path = || MigrationError::NoPath {
			from: label(from),
			to: label(to),
		};

		let Some(to) = to else {
			return match from {
				None => Ok(Vec::new()),
				Some(_) => Err(no_path()),
			};
		};

		let mut path = Vec::new();
		let mut reached = from.is_none();
		for revision in self.history_from(to) {
			if Some(&revision.id) == from {
				reached = true;
				break;
			}
			path.push(revision);
		}
		if !reached {
			return Err(no_path());
		}
		path.reverse();
		Ok(path)
	}

	/// Lineage of the single head, most recent first
	///
	/// # Errors
	///
	/// Returns [`MigrationError::AmbiguousHead`] when divergent branches exist.
	pub fn history(&self) -> Result<History<'_>> {
		Ok(History::new(self, self.head()?.map(|head| &head.id)))
	}

	/// Lineage of `id`, most recent first
	pub fn history_from(&self, id: &RevisionId) -> History<'_> {
		let start = self.revisions.get_key_value(id).map(|(key, _)| key);
		History::new(self, start)
	}

	/// Recorded schema after applying every revision up to `id`
	///
	/// # Errors
	///
	/// Returns [`MigrationError::InvalidOperation`] tagged with the offending
	/// revision when replay meets an impossible operation.
	pub fn snapshot_at(&self, id: Option<&RevisionId>) -> Result<SchemaSnapshot> {
		let mut snapshot = SchemaSnapshot::new();
		for revision in self.path(None, id)? {
			snapshot = replay(&snapshot, revision, &revision.up_ops)?;
		}
		Ok(snapshot)
	}
}

/// Apply `operations` of `revision` to `snapshot`
pub(crate) fn replay(
	snapshot: &SchemaSnapshot,
	revision: &Revision,
	operations: &[super::Operation],
) -> Result<SchemaSnapshot> {
	snapshot
		.apply(operations)
		.map_err(|err| err.for_revision(&revision.id))
}

fn label(id: Option<&RevisionId>) -> String {
	id.map(|id| id.to_string())
		.unwrap_or_else(|| "base".to_string())
}

/// Lazy walk from a revision to the root, following parent pointers
///
/// Cloning or calling [`History::restart`] starts the walk over.
#[derive(Debug, Clone)]
pub struct History<'a> {
	graph: &'a RevisionGraph,
	start: Option<&'a RevisionId>,
	next: Option<&'a RevisionId>,
}

impl<'a> History<'a> {
	fn new(graph: &'a RevisionGraph, start: Option<&'a RevisionId>) -> Self {
		Self {
			graph,
			start,
			next: start,
		}
	}

	pub fn restart(&mut self) {
		self.next = self.start;
	}
}

impl<'a> Iterator for History<'a> {
	type Item = &'a Revision;

	fn next(&mut self) -> Option<Self::Item> {
		let revision = self.graph.revisions.get(self.next?)?;
		self.next = revision.parent_id.as_ref();
		Some(revision)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fields::ColumnType;
	use crate::operations::Operation;
	use crate::snapshot::ColumnDefinition;
	use rstest::{fixture, rstest};

	fn id(value: &str) -> RevisionId {
		RevisionId::new(value).unwrap()
	}

	fn revision(value: &str, parent: Option<&str>) -> Revision {
		Revision::new(parent.map(id), value).with_id(id(value))
	}

	#[fixture]
	fn chain() -> RevisionGraph {
		RevisionGraph::from_revisions([
			revision("aaa111", None),
			revision("bbb222", Some("aaa111")),
			revision("ccc333", Some("bbb222")),
		])
		.unwrap()
	}

	#[rstest]
	fn test_single_head(chain: RevisionGraph) {
		assert_eq!(chain.head().unwrap().unwrap().id, id("ccc333"));
	}

	#[rstest]
	fn test_empty_graph_has_no_head() {
		assert!(RevisionGraph::new().head().unwrap().is_none());
	}

	#[rstest]
	fn test_divergent_heads_are_ambiguous(mut chain: RevisionGraph) {
		chain.add(revision("ddd444", Some("bbb222"))).unwrap();
		assert_eq!(chain.heads().len(), 2);
		match chain.head() {
			Err(MigrationError::AmbiguousHead { heads }) => {
				assert_eq!(heads, vec![id("ccc333"), id("ddd444")]);
			}
			other => panic!("expected AmbiguousHead, got {:?}", other),
		}
	}

	#[rstest]
	fn test_history_is_reverse_chain_and_restartable(chain: RevisionGraph) {
		let mut history = chain.history().unwrap();
		let ids: Vec<_> = history.by_ref().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["ccc333", "bbb222", "aaa111"]);
		assert!(history.next().is_none());
		history.restart();
		assert_eq!(history.next().unwrap().id, id("ccc333"));
	}

	#[rstest]
	#[case(None, Some("ccc333"), vec!["aaa111", "bbb222", "ccc333"])]
	#[case(Some("aaa111"), Some("ccc333"), vec!["bbb222", "ccc333"])]
	#[case(Some("bbb222"), Some("bbb222"), vec![])]
	#[case(None, None, vec![])]
	fn test_path(
		chain: RevisionGraph,
		#[case] from: Option<&str>,
		#[case] to: Option<&str>,
		#[case] expected: Vec<&str>,
	) {
		let from = from.map(id);
		let to = to.map(id);
		let path: Vec<_> = chain
			.path(from.as_ref(), to.as_ref())
			.unwrap()
			.into_iter()
			.map(|r| r.id.as_str())
			.collect();
		assert_eq!(path, expected);
	}

	#[rstest]
	fn test_path_against_lineage_fails(mut chain: RevisionGraph) {
		assert!(matches!(
			chain.path(Some(&id("ccc333")), Some(&id("aaa111"))),
			Err(MigrationError::NoPath { .. })
		));
		chain.add(revision("ddd444", Some("aaa111"))).unwrap();
		assert!(matches!(
			chain.path(Some(&id("ccc333")), Some(&id("ddd444"))),
			Err(MigrationError::NoPath { .. })
		));
	}

	#[rstest]
	fn test_resolve_prefix(mut chain: RevisionGraph) {
		assert_eq!(chain.resolve("bb").unwrap().id, id("bbb222"));
		assert!(matches!(chain.resolve("zz"), Err(MigrationError::NotFound(_))));
		chain.add(revision("bbb999", Some("ccc333"))).unwrap();
		assert!(matches!(chain.resolve("bbb"), Err(MigrationError::Validation(_))));
	}

	#[rstest]
	fn test_unknown_parent_is_rejected() {
		let result = RevisionGraph::from_revisions([revision("bbb222", Some("aaa111"))]);
		assert!(matches!(result, Err(MigrationError::Validation(_))));
	}

	#[rstest]
	fn test_cycle_is_rejected() {
		let result = RevisionGraph::from_revisions([
			revision("aaa111", Some("ccc333")),
			revision("bbb222", Some("aaa111")),
			revision("ccc333", Some("bbb222")),
		]);
		assert!(matches!(
			result,
			Err(MigrationError::CircularDependency { .. })
		));
	}

	#[rstest]
	fn test_snapshot_at_tags_invalid_revision() {
		let create = Operation::CreateTable {
			name: "items".to_string(),
			columns: vec![ColumnDefinition::id(), ColumnDefinition::new("title", ColumnType::String)],
			primary_key: vec![],
			indexes: vec![],
		};
		let broken = Operation::DropColumn {
			table: "items".to_string(),
			column: "ghost".to_string(),
		};
		let graph = RevisionGraph::from_revisions([
			revision("aaa111", None).with_operations(vec![create], vec![]),
			revision("bbb222", Some("aaa111")).with_operations(vec![broken], vec![]),
		])
		.unwrap();

		assert!(graph.snapshot_at(Some(&id("aaa111"))).unwrap().table("items").is_some());
		match graph.snapshot_at(Some(&id("bbb222"))) {
			Err(MigrationError::InvalidOperation { revision, .. }) => {
				assert_eq!(revision, Some(id("bbb222")));
			}
			other => panic!("expected InvalidOperation, got {:?}", other),
		}
	}
}
